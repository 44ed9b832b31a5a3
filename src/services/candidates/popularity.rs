//! Popularity channel: global sales-rank signal, independent of the user.

use super::CandidateChannel;
use crate::models::{CandidateSource, ItemFeatures, ItemId, ScoredCandidate};
use crate::services::features::FeatureStore;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub struct PopularityChannel {
    store: Arc<dyn FeatureStore>,
}

impl PopularityChannel {
    pub fn new(store: Arc<dyn FeatureStore>) -> Self {
        Self { store }
    }

    /// Top `k` item ids by popularity rank, unranked items last,
    /// `article_id` ascending on ties. The store already promises this
    /// order; it is re-imposed here rather than trusted.
    pub async fn top_popular(&self, k: usize) -> Result<Vec<ItemId>> {
        let mut rows = self.store.top_items(k).await?;
        sort_by_rank(&mut rows);
        rows.truncate(k);
        Ok(rows.into_iter().map(|row| row.article_id).collect())
    }

    /// Popularity-scored candidates in the same order as [`top_popular`].
    /// `raw = 1 / (1 + rank)`: rank 0 scores 1.0, rank 1 scores 0.5, and
    /// an unknown rank gets an effectively unbounded rank (score ~ 0).
    pub async fn scored(&self, k: usize) -> Result<Vec<ScoredCandidate>> {
        let mut rows = self.store.top_items(k).await?;
        sort_by_rank(&mut rows);
        rows.truncate(k);

        Ok(rows
            .into_iter()
            .map(|row| ScoredCandidate {
                article_id: row.article_id,
                score: rank_score(row.popularity_rank),
                source: CandidateSource::Popularity,
            })
            .collect())
    }
}

/// Raw popularity score for a (nullable) rank.
pub fn rank_score(popularity_rank: Option<u32>) -> f64 {
    match popularity_rank {
        Some(rank) => 1.0 / (1.0 + rank as f64),
        None => 1.0 / (1.0 + u32::MAX as f64),
    }
}

fn sort_by_rank(rows: &mut [ItemFeatures]) {
    rows.sort_by(|a, b| match (a.popularity_rank, b.popularity_rank) {
        (Some(ra), Some(rb)) => ra
            .cmp(&rb)
            .then_with(|| a.article_id.cmp(&b.article_id)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.article_id.cmp(&b.article_id),
    });
}

#[async_trait]
impl CandidateChannel for PopularityChannel {
    async fn scored(&self, _user_id: &str, k: usize) -> Result<Vec<ScoredCandidate>> {
        PopularityChannel::scored(self, k).await
    }

    fn source(&self) -> CandidateSource {
        CandidateSource::Popularity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::features::SnapshotFeatureStore;

    fn item(id: &str, rank: Option<u32>) -> ItemFeatures {
        ItemFeatures {
            article_id: id.to_string(),
            popularity_rank: rank,
            sales_count: Some(1),
            peak_hour: Some(12),
        }
    }

    fn channel(items: Vec<ItemFeatures>) -> PopularityChannel {
        PopularityChannel::new(Arc::new(SnapshotFeatureStore::from_records(vec![], items)))
    }

    #[tokio::test]
    async fn test_top_popular_order_and_bound() {
        let channel = channel(vec![
            item("c", Some(3)),
            item("a", Some(1)),
            item("x", None),
            item("b", Some(2)),
        ]);

        let top = channel.top_popular(3).await.unwrap();
        assert_eq!(top, vec!["a", "b", "c"]);

        let all = channel.top_popular(10).await.unwrap();
        assert_eq!(all, vec!["a", "b", "c", "x"]);
    }

    #[tokio::test]
    async fn test_scored_follows_rank_formula() {
        let channel = channel(vec![item("a", Some(0)), item("b", Some(1)), item("x", None)]);

        let scored = channel.scored(3).await.unwrap();

        assert_eq!(scored[0].article_id, "a");
        assert!((scored[0].score - 1.0).abs() < 1e-12);
        assert!((scored[1].score - 0.5).abs() < 1e-12);
        // Unknown rank collapses to an effectively-zero score.
        assert!(scored[2].score < 1e-9);
        assert!(scored.iter().all(|c| c.source == CandidateSource::Popularity));
    }
}
