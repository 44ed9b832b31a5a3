//! Snapshot-backed feature store: JSON-lines files loaded into memory at
//! startup, pre-sorted into popularity order.

use super::FeatureStore;
use crate::models::{FeatureStats, ItemFeatures, ItemId, UserFeatures, UserId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug)]
pub struct SnapshotFeatureStore {
    users: HashMap<UserId, UserFeatures>,
    items: HashMap<ItemId, ItemFeatures>,
    /// Popularity order: rank ascending, unranked last, id ascending.
    ranked: Vec<ItemId>,
}

impl SnapshotFeatureStore {
    pub fn from_records(users: Vec<UserFeatures>, items: Vec<ItemFeatures>) -> Self {
        let mut ranked: Vec<(Option<u32>, ItemId)> = items
            .iter()
            .map(|item| (item.popularity_rank, item.article_id.clone()))
            .collect();
        ranked.sort_by(|a, b| match (a.0, b.0) {
            (Some(ra), Some(rb)) => ra.cmp(&rb).then_with(|| a.1.cmp(&b.1)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.1.cmp(&b.1),
        });

        Self {
            users: users
                .into_iter()
                .map(|u| (u.customer_id.clone(), u))
                .collect(),
            items: items
                .into_iter()
                .map(|i| (i.article_id.clone(), i))
                .collect(),
            ranked: ranked.into_iter().map(|(_, id)| id).collect(),
        }
    }

    /// Load both snapshot files. Any record that fails typed
    /// deserialization (including one missing its join key) aborts the
    /// load: that is a deployment problem, not a serving condition.
    pub async fn load(
        user_features_path: impl AsRef<Path>,
        item_features_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let users: Vec<UserFeatures> = read_jsonl(user_features_path.as_ref()).await?;
        let items: Vec<ItemFeatures> = read_jsonl(item_features_path.as_ref()).await?;
        Ok(Self::from_records(users, items))
    }
}

async fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read feature snapshot {}", path.display()))?;

    let mut records = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: T = serde_json::from_str(line).with_context(|| {
            format!(
                "malformed feature record at {}:{}",
                path.display(),
                line_no + 1
            )
        })?;
        records.push(record);
    }
    Ok(records)
}

#[async_trait]
impl FeatureStore for SnapshotFeatureStore {
    async fn user_features(&self, user_id: &str) -> Result<Option<UserFeatures>> {
        Ok(self.users.get(user_id).cloned())
    }

    async fn item_features(&self, item_ids: &[ItemId]) -> Result<Vec<ItemFeatures>> {
        Ok(item_ids
            .iter()
            .filter_map(|id| self.items.get(id).cloned())
            .collect())
    }

    async fn top_items(&self, k: usize) -> Result<Vec<ItemFeatures>> {
        Ok(self
            .ranked
            .iter()
            .take(k)
            .filter_map(|id| self.items.get(id).cloned())
            .collect())
    }

    async fn stats(&self) -> Result<FeatureStats> {
        Ok(FeatureStats {
            user_count: self.users.len(),
            item_count: self.items.len(),
        })
    }
}
