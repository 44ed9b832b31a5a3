//! Candidate generation: two independent scored channels merged into one
//! bounded, deterministically ordered candidate list.

pub mod cooccurrence;
pub mod normalize;
pub mod popularity;

pub use cooccurrence::{CooccurrenceChannel, CooccurrenceParams};
pub use popularity::PopularityChannel;

use crate::config::CandidateConfig;
use crate::models::{CandidateSource, CandidateStats, ItemId, ScoredCandidate};
use anyhow::Result;
use async_trait::async_trait;
use normalize::normalize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// One source of scored candidates. Channels score on their own raw
/// scales; scores only become comparable after per-source normalization.
#[async_trait]
pub trait CandidateChannel: Send + Sync {
    async fn scored(&self, user_id: &str, k: usize) -> Result<Vec<ScoredCandidate>>;
    fn source(&self) -> CandidateSource;
}

/// Merges the popularity and co-occurrence channels.
pub struct CandidateLayer {
    popularity: Arc<PopularityChannel>,
    cooccurrence: Arc<CooccurrenceChannel>,
    config: CandidateConfig,
}

impl CandidateLayer {
    pub fn new(
        popularity: Arc<PopularityChannel>,
        cooccurrence: Arc<CooccurrenceChannel>,
        config: CandidateConfig,
    ) -> Self {
        Self {
            popularity,
            cooccurrence,
            config,
        }
    }

    /// Produce the merged candidate list for a user, at most
    /// `config.total_k` ids, plus per-channel counts.
    ///
    /// Both channels are fetched as a fan-out and joined before any
    /// merging starts; a failed channel contributes nothing instead of
    /// failing the request. The final ranking key is a total order
    /// (weighted score desc, cf desc, pop desc, article_id asc), so the
    /// output is byte-identical across repeated calls on a fixed
    /// snapshot.
    pub async fn merge(&self, user_id: &str) -> (Vec<ItemId>, CandidateStats) {
        let mut stats = CandidateStats::default();
        let total_k = self.config.total_k;
        if total_k == 0 {
            return (Vec::new(), stats);
        }

        let (pop_raw, cf_raw) = tokio::join!(
            self.fetch(
                self.popularity.as_ref(),
                user_id,
                self.config.popularity_top_k
            ),
            self.fetch(
                self.cooccurrence.as_ref(),
                user_id,
                self.config.cooccurrence_top_k
            ),
        );
        stats.popularity_count = pop_raw.len();
        stats.cooccurrence_count = cf_raw.len();

        let mut pop_scores = normalize(&pop_raw);
        let cf_scores = normalize(&cf_raw);

        let mut union: HashSet<ItemId> = pop_scores.keys().cloned().collect();
        union.extend(cf_scores.keys().cloned());

        // Too few distinct candidates: widen the popularity pool. The
        // wider pool is re-normalized and replaces the popularity map —
        // log1p + min-max is monotone, so relative popularity order is
        // unchanged for ids that were already present.
        if union.len() < total_k {
            match self.popularity.scored(self.config.fallback_expand_k).await {
                Ok(pool) => {
                    let mut expanded = normalize(&pool);
                    for (item, score) in pop_scores {
                        expanded.entry(item).or_insert(score);
                    }
                    pop_scores = expanded;

                    for candidate in &pool {
                        if union.len() >= total_k {
                            break;
                        }
                        if union.insert(candidate.article_id.clone()) {
                            stats.expanded_count += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(user_id, error = %e, "popularity expansion failed");
                }
            }
        }

        let mut ranked: Vec<(ItemId, f64, f64, f64)> = union
            .into_iter()
            .map(|item| {
                let pop = pop_scores.get(&item).copied().unwrap_or(0.0);
                let cf = cf_scores.get(&item).copied().unwrap_or(0.0);
                let combined = self.config.popularity_weight * pop
                    + self.config.cooccurrence_weight * cf;
                (item, combined, cf, pop)
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| b.3.partial_cmp(&a.3).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(total_k);

        let merged: Vec<ItemId> = ranked.into_iter().map(|(item, ..)| item).collect();
        stats.total_candidates = merged.len();

        info!(
            user_id,
            popularity = stats.popularity_count,
            cooccurrence = stats.cooccurrence_count,
            expanded = stats.expanded_count,
            total = stats.total_candidates,
            "candidate merge complete"
        );

        (merged, stats)
    }

    async fn fetch(
        &self,
        channel: &dyn CandidateChannel,
        user_id: &str,
        k: usize,
    ) -> Vec<ScoredCandidate> {
        match channel.scored(user_id, k).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(
                    user_id,
                    source = channel.source().as_str(),
                    error = %e,
                    "candidate channel failed"
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemFeatures, Transaction};
    use crate::services::features::SnapshotFeatureStore;
    use crate::services::transactions::{MemoryTransactionSource, TransactionStore};
    use chrono::NaiveDate;

    fn tx(user: &str, item: &str, date: &str) -> Transaction {
        Transaction {
            customer_id: user.to_string(),
            article_id: item.to_string(),
            t_dat: date.parse::<NaiveDate>().unwrap(),
        }
    }

    fn item(id: &str, rank: u32) -> ItemFeatures {
        ItemFeatures {
            article_id: id.to_string(),
            popularity_rank: Some(rank),
            sales_count: Some(10),
            peak_hour: Some(12),
        }
    }

    fn layer(
        events: Vec<Transaction>,
        items: Vec<ItemFeatures>,
        config: CandidateConfig,
    ) -> CandidateLayer {
        let store: Arc<SnapshotFeatureStore> =
            Arc::new(SnapshotFeatureStore::from_records(vec![], items));
        let transactions = Arc::new(TransactionStore::new(
            Box::new(MemoryTransactionSource::new(events)),
            28,
        ));
        let popularity = Arc::new(PopularityChannel::new(store.clone()));
        let cooccurrence = Arc::new(CooccurrenceChannel::new(
            transactions,
            store,
            CooccurrenceParams {
                recent_seed_count: config.recent_seed_count,
                per_seed_cap: config.per_seed_cap,
                half_life_days: config.half_life_days,
                pop_penalty_alpha: config.pop_penalty_alpha,
                exclude_purchased: config.exclude_purchased,
            },
        ));
        CandidateLayer::new(popularity, cooccurrence, config)
    }

    fn config(total_k: usize, pop_top: usize) -> CandidateConfig {
        CandidateConfig {
            total_k,
            popularity_top_k: pop_top,
            cooccurrence_top_k: 50,
            popularity_weight: 0.3,
            cooccurrence_weight: 0.7,
            fallback_expand_k: 20,
            ..CandidateConfig::default()
        }
    }

    fn catalog(n: u32) -> Vec<ItemFeatures> {
        (1..=n).map(|r| item(&format!("item{r:03}"), r)).collect()
    }

    #[tokio::test]
    async fn test_merge_is_bounded_and_duplicate_free() {
        let (merged, stats) = layer(
            vec![
                tx("u1", "item001", "2024-02-10"),
                tx("u2", "item001", "2024-02-10"),
                tx("u2", "item009", "2024-02-10"),
            ],
            catalog(10),
            config(5, 5),
        )
        .merge("u1")
        .await;

        assert!(merged.len() <= 5);
        let unique: HashSet<&String> = merged.iter().collect();
        assert_eq!(unique.len(), merged.len());
        assert_eq!(stats.total_candidates, merged.len());
    }

    #[tokio::test]
    async fn test_merge_zero_total_k() {
        let (merged, _) = layer(vec![], catalog(5), config(0, 5)).merge("u1").await;
        assert!(merged.is_empty());
    }

    #[tokio::test]
    async fn test_no_cf_signal_degrades_to_popularity_order() {
        // No transactions at all: the co-occurrence channel contributes
        // nothing and the merged order must equal popularity order.
        let (merged, stats) = layer(vec![], catalog(8), config(8, 8)).merge("nobody").await;

        let expected: Vec<String> = (1..=8).map(|r| format!("item{r:03}")).collect();
        assert_eq!(merged, expected);
        assert_eq!(stats.cooccurrence_count, 0);
    }

    #[tokio::test]
    async fn test_popularity_expansion_fills_small_unions() {
        // Only 3 popularity candidates requested, no CF signal, but
        // total_k of 6 pulls 3 more from the expansion pool in
        // popularity order.
        let (merged, stats) = layer(vec![], catalog(10), config(6, 3)).merge("nobody").await;

        let expected: Vec<String> = (1..=6).map(|r| format!("item{r:03}")).collect();
        assert_eq!(merged, expected);
        assert_eq!(stats.expanded_count, 3);
    }

    #[tokio::test]
    async fn test_cf_weight_lifts_co_purchased_items() {
        // item010 is the least popular but strongly co-purchased.
        let events = vec![
            tx("u1", "item005", "2024-02-10"),
            tx("u2", "item005", "2024-02-10"),
            tx("u2", "item010", "2024-02-10"),
            tx("u3", "item005", "2024-02-10"),
            tx("u3", "item010", "2024-02-10"),
        ];
        let (merged, _) = layer(events, catalog(10), config(10, 10)).merge("u1").await;

        let pos_cf = merged.iter().position(|id| id == "item010").unwrap();
        assert_eq!(pos_cf, 0, "co-purchased item should outrank pure popularity");
    }

    #[tokio::test]
    async fn test_merge_is_deterministic() {
        let events = vec![
            tx("u1", "item002", "2024-02-09"),
            tx("u2", "item002", "2024-02-09"),
            tx("u2", "item007", "2024-02-10"),
            tx("u3", "item002", "2024-02-08"),
            tx("u3", "item004", "2024-02-08"),
        ];
        let layer = layer(events, catalog(10), config(10, 10));

        let (first, _) = layer.merge("u1").await;
        let (second, _) = layer.merge("u1").await;
        assert_eq!(first, second);
    }
}
