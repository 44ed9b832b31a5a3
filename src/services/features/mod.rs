//! Feature retrieval and per-candidate feature assembly.

pub mod snapshot;

pub use snapshot::SnapshotFeatureStore;

use crate::models::{FeatureStats, ItemFeatures, ItemId, UserFeatures};
use crate::services::ranking::FEATURE_VECTOR_SIZE;
use anyhow::Result;
use async_trait::async_trait;
use ndarray::Array2;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Read interface onto the user/item feature snapshots.
///
/// Implementations are read-only from the core's perspective; schema
/// problems (e.g. a record without its join key) are load-time
/// configuration errors, never per-request conditions.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn user_features(&self, user_id: &str) -> Result<Option<UserFeatures>>;
    async fn item_features(&self, item_ids: &[ItemId]) -> Result<Vec<ItemFeatures>>;
    /// Items ordered ascending by `popularity_rank`, unranked last,
    /// `article_id` ascending on ties.
    async fn top_items(&self, k: usize) -> Result<Vec<ItemFeatures>>;
    async fn stats(&self) -> Result<FeatureStats>;
}

/// One fully-joined candidate row. `candidate_index` is the surrogate
/// position in the merged candidate list; downstream score alignment
/// depends on rows staying sorted by it.
#[derive(Debug, Clone)]
pub struct AssembledCandidate {
    pub article_id: ItemId,
    pub candidate_index: usize,
    pub avg_purchase_hour: f32,
    pub purchase_count: f32,
    pub recency: f32,
    pub unique_items: f32,
    pub popularity_rank: f32,
    pub sales_count: f32,
    pub peak_hour: f32,
}

impl AssembledCandidate {
    /// Fixed model column order:
    /// `[avg_purchase_hour, purchase_count, recency, unique_items,
    ///   popularity_rank, sales_count, peak_hour]`
    pub fn to_vector(&self) -> Vec<f32> {
        vec![
            self.avg_purchase_hour,
            self.purchase_count,
            self.recency,
            self.unique_items,
            self.popularity_rank,
            self.sales_count,
            self.peak_hour,
        ]
    }
}

/// Build the prediction matrix for a batch of assembled rows.
pub fn feature_matrix(rows: &[AssembledCandidate]) -> Result<Array2<f32>> {
    let flat: Vec<f32> = rows.iter().flat_map(AssembledCandidate::to_vector).collect();
    Array2::from_shape_vec((rows.len(), FEATURE_VECTOR_SIZE), flat)
        .map_err(|e| anyhow::anyhow!("failed to build feature matrix: {e}"))
}

/// Joins user and item features onto a merged candidate list, preserving
/// candidate order exactly.
pub struct FeatureAssembler {
    store: Arc<dyn FeatureStore>,
}

impl FeatureAssembler {
    pub fn new(store: Arc<dyn FeatureStore>) -> Self {
        Self { store }
    }

    /// Join candidates against item features. Rows with any missing
    /// required item feature are dropped, not imputed; the survivors come
    /// back in candidate order (explicitly re-sorted on the surrogate
    /// index, not left to join order).
    pub async fn assemble(
        &self,
        user: &UserFeatures,
        candidates: &[ItemId],
    ) -> Result<Vec<AssembledCandidate>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let item_rows = self.store.item_features(candidates).await?;
        let by_id: HashMap<&str, &ItemFeatures> = item_rows
            .iter()
            .map(|row| (row.article_id.as_str(), row))
            .collect();

        // A user record may legitimately lack an average hour; the model
        // consumes NaN natively, so only item-side absence drops a row.
        let avg_purchase_hour = user.avg_purchase_hour.unwrap_or(f64::NAN) as f32;

        let mut rows: Vec<AssembledCandidate> = candidates
            .iter()
            .enumerate()
            .filter_map(|(candidate_index, article_id)| {
                let item = by_id.get(article_id.as_str())?;
                let popularity_rank = item.popularity_rank?;
                let sales_count = item.sales_count?;
                let peak_hour = item.peak_hour?;

                Some(AssembledCandidate {
                    article_id: article_id.clone(),
                    candidate_index,
                    avg_purchase_hour,
                    purchase_count: user.purchase_count as f32,
                    recency: user.recency as f32,
                    unique_items: user.unique_items as f32,
                    popularity_rank: popularity_rank as f32,
                    sales_count: sales_count as f32,
                    peak_hour: peak_hour as f32,
                })
            })
            .collect();

        rows.sort_by_key(|row| row.candidate_index);

        if rows.len() < candidates.len() {
            debug!(
                requested = candidates.len(),
                assembled = rows.len(),
                "dropped candidates with missing item features"
            );
        }

        Ok(rows)
    }
}
