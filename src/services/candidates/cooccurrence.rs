//! Co-occurrence channel: item-to-item co-purchase signal seeded by the
//! user's recent purchases inside the transaction window.

use super::CandidateChannel;
use crate::models::{CandidateSource, ItemId, ScoredCandidate};
use crate::services::features::FeatureStore;
use crate::services::transactions::TransactionStore;
use crate::utils::half_life_decay;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CooccurrenceParams {
    pub recent_seed_count: usize,
    pub per_seed_cap: usize,
    pub half_life_days: f64,
    pub pop_penalty_alpha: f64,
    pub exclude_purchased: bool,
}

pub struct CooccurrenceChannel {
    transactions: Arc<TransactionStore>,
    store: Arc<dyn FeatureStore>,
    params: CooccurrenceParams,
}

impl CooccurrenceChannel {
    pub fn new(
        transactions: Arc<TransactionStore>,
        store: Arc<dyn FeatureStore>,
        params: CooccurrenceParams,
    ) -> Self {
        Self {
            transactions,
            store,
            params,
        }
    }

    /// Weighted co-purchase aggregation:
    ///
    /// 1. Seed with the user's most recent distinct purchases, each
    ///    weighted by half-life decay of its age (ages are measured from
    ///    the window's newest event, keeping a fixed snapshot
    ///    reproducible).
    /// 2. For every other purchaser of a seed, every *other* item they
    ///    bought contributes `w_seed * decay(event_age)`.
    /// 3. Candidates are capped per seed before cross-seed summation to
    ///    bound the blow-up on busy seeds.
    /// 4. Summed scores are divided by a popularity penalty so the channel
    ///    does not collapse into a copy of the popularity channel.
    /// 5. Already-purchased items are excluded when configured, and the
    ///    top `k` survivors return in (score desc, article_id asc) order.
    pub async fn scored(&self, user_id: &str, k: usize) -> Result<Vec<ScoredCandidate>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let view = self.transactions.view().await?;
        let seeds = view.recent_items(user_id, self.params.recent_seed_count);

        if seeds.is_empty() {
            debug!(user_id, "no in-window purchases to seed co-occurrence");
            return Ok(Vec::new());
        }

        let mut totals: HashMap<ItemId, f64> = HashMap::new();

        for (seed, seed_date) in &seeds {
            let seed_weight =
                half_life_decay(view.age_days(*seed_date), self.params.half_life_days);

            let mut per_seed: HashMap<ItemId, f64> = HashMap::new();
            let mut seen_users: HashSet<&str> = HashSet::new();

            for (other_user, _) in view.purchasers_of(seed) {
                if other_user == user_id || !seen_users.insert(other_user) {
                    continue;
                }
                for (item, event_date) in view.purchases_of(other_user) {
                    if item == seed {
                        continue;
                    }
                    let weight = seed_weight
                        * half_life_decay(view.age_days(*event_date), self.params.half_life_days);
                    *per_seed.entry(item.clone()).or_insert(0.0) += weight;
                }
            }

            // Cap the retained candidates per seed before aggregation.
            let mut capped: Vec<(ItemId, f64)> = per_seed.into_iter().collect();
            capped.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            capped.truncate(self.params.per_seed_cap);

            for (item, score) in capped {
                *totals.entry(item).or_insert(0.0) += score;
            }
        }

        if totals.is_empty() {
            return Ok(Vec::new());
        }

        // Popularity penalty needs the candidates' ranks; fetch them in one
        // deterministic batch.
        let mut candidate_ids: Vec<ItemId> = totals.keys().cloned().collect();
        candidate_ids.sort();
        let ranks: HashMap<ItemId, Option<u32>> = self
            .store
            .item_features(&candidate_ids)
            .await?
            .into_iter()
            .map(|row| (row.article_id, row.popularity_rank))
            .collect();

        let purchased: HashSet<&str> = if self.params.exclude_purchased {
            view.purchases_of(user_id)
                .iter()
                .map(|(item, _)| item.as_str())
                .collect()
        } else {
            HashSet::new()
        };

        let mut candidates: Vec<ScoredCandidate> = totals
            .into_iter()
            .filter(|(item, _)| !purchased.contains(item.as_str()))
            .map(|(item, score_sum)| {
                let rank = ranks.get(&item).copied().flatten();
                ScoredCandidate {
                    score: penalized(score_sum, rank, self.params.pop_penalty_alpha),
                    article_id: item,
                    source: CandidateSource::Cooccurrence,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.article_id.cmp(&b.article_id))
        });
        candidates.truncate(k);

        debug!(
            user_id,
            seeds = seeds.len(),
            candidates = candidates.len(),
            "co-occurrence channel complete"
        );

        Ok(candidates)
    }
}

/// Discount a co-purchase sum by how globally popular the item is.
///
/// The divisor grows with the item's popularity score `1 / (1 + rank)`,
/// so chart-toppers give up part of their co-purchase sum while
/// long-tail and unranked items keep theirs (the unranked case is the
/// rank → ∞ limit of the divisor, i.e. no penalty).
fn penalized(score_sum: f64, popularity_rank: Option<u32>, alpha: f64) -> f64 {
    match popularity_rank {
        Some(rank) => score_sum / (1.0 + alpha * (1.0 + 1.0 / (1.0 + rank as f64)).ln()),
        None => score_sum,
    }
}

#[async_trait]
impl CandidateChannel for CooccurrenceChannel {
    async fn scored(&self, user_id: &str, k: usize) -> Result<Vec<ScoredCandidate>> {
        CooccurrenceChannel::scored(self, user_id, k).await
    }

    fn source(&self) -> CandidateSource {
        CandidateSource::Cooccurrence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemFeatures, Transaction};
    use crate::services::features::SnapshotFeatureStore;
    use crate::services::transactions::MemoryTransactionSource;
    use chrono::NaiveDate;

    fn tx(user: &str, item: &str, date: &str) -> Transaction {
        Transaction {
            customer_id: user.to_string(),
            article_id: item.to_string(),
            t_dat: date.parse::<NaiveDate>().unwrap(),
        }
    }

    fn item(id: &str, rank: Option<u32>) -> ItemFeatures {
        ItemFeatures {
            article_id: id.to_string(),
            popularity_rank: rank,
            sales_count: Some(1),
            peak_hour: Some(12),
        }
    }

    fn params() -> CooccurrenceParams {
        CooccurrenceParams {
            recent_seed_count: 5,
            per_seed_cap: 20,
            half_life_days: 7.0,
            pop_penalty_alpha: 0.25,
            exclude_purchased: true,
        }
    }

    fn channel(
        events: Vec<Transaction>,
        items: Vec<ItemFeatures>,
        params: CooccurrenceParams,
    ) -> CooccurrenceChannel {
        let transactions = Arc::new(TransactionStore::new(
            Box::new(MemoryTransactionSource::new(events)),
            28,
        ));
        let store = Arc::new(SnapshotFeatureStore::from_records(vec![], items));
        CooccurrenceChannel::new(transactions, store, params)
    }

    #[tokio::test]
    async fn test_co_purchasers_surface_their_other_items() {
        // u1 bought a; u2 and u3 bought a too, plus b/c respectively.
        let channel = channel(
            vec![
                tx("u1", "a", "2024-02-10"),
                tx("u2", "a", "2024-02-10"),
                tx("u2", "b", "2024-02-10"),
                tx("u3", "a", "2024-02-10"),
                tx("u3", "b", "2024-02-10"),
                tx("u3", "c", "2024-02-10"),
            ],
            vec![item("a", Some(1)), item("b", None), item("c", None)],
            params(),
        );

        let scored = channel.scored("u1", 10).await.unwrap();

        let ids: Vec<&str> = scored.iter().map(|c| c.article_id.as_str()).collect();
        // b was co-purchased twice, c once; a is excluded as purchased.
        assert_eq!(ids, vec!["b", "c"]);
        assert!(scored[0].score > scored[1].score);
        assert!(scored
            .iter()
            .all(|c| c.source == CandidateSource::Cooccurrence));
    }

    #[tokio::test]
    async fn test_no_seed_purchases_yields_empty() {
        let channel = channel(
            vec![tx("u2", "a", "2024-02-10")],
            vec![item("a", Some(1))],
            params(),
        );

        assert!(channel.scored("u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exclude_purchased_flag() {
        let events = vec![
            tx("u1", "a", "2024-02-10"),
            tx("u1", "b", "2024-02-01"),
            tx("u2", "a", "2024-02-10"),
            tx("u2", "b", "2024-02-10"),
        ];
        let items = vec![item("a", None), item("b", None)];

        let mut keep = params();
        keep.exclude_purchased = false;
        let channel_keep = channel(events.clone(), items.clone(), keep);
        let kept = channel_keep.scored("u1", 10).await.unwrap();
        assert!(kept.iter().any(|c| c.article_id == "b"));

        let channel_drop = channel(events, items, params());
        let dropped = channel_drop.scored("u1", 10).await.unwrap();
        assert!(dropped.iter().all(|c| c.article_id != "b"));
    }

    #[tokio::test]
    async fn test_per_seed_cap_bounds_candidates() {
        // One seed, one co-purchaser with four other items; cap at 2.
        let mut p = params();
        p.per_seed_cap = 2;

        let channel = channel(
            vec![
                tx("u1", "seed", "2024-02-10"),
                tx("u2", "seed", "2024-02-10"),
                tx("u2", "w", "2024-02-10"),
                tx("u2", "x", "2024-02-09"),
                tx("u2", "y", "2024-02-08"),
                tx("u2", "z", "2024-02-07"),
            ],
            vec![item("seed", Some(1))],
            p,
        );

        let scored = channel.scored("u1", 10).await.unwrap();
        assert_eq!(scored.len(), 2);
        // Fresher co-purchases decay less and survive the cap.
        assert_eq!(scored[0].article_id, "w");
        assert_eq!(scored[1].article_id, "x");
    }

    #[tokio::test]
    async fn test_popularity_penalty_prefers_less_popular_item() {
        // b and c are co-purchased identically; b is globally popular.
        let channel = channel(
            vec![
                tx("u1", "a", "2024-02-10"),
                tx("u2", "a", "2024-02-10"),
                tx("u2", "b", "2024-02-10"),
                tx("u2", "c", "2024-02-10"),
            ],
            vec![item("a", Some(3)), item("b", Some(1)), item("c", Some(500))],
            params(),
        );

        let scored = channel.scored("u1", 10).await.unwrap();
        let by_id: HashMap<&str, f64> = scored
            .iter()
            .map(|c| (c.article_id.as_str(), c.score))
            .collect();

        // Equal raw sums; the worse-ranked item keeps more score.
        assert!(by_id["c"] > by_id["b"]);
        assert_eq!(scored[0].article_id, "c");
    }

    #[tokio::test]
    async fn test_recency_decay_weights_newer_seeds_higher() {
        // Two seeds a (fresh) and b (one half-life old), disjoint
        // co-purchase partners.
        let channel = channel(
            vec![
                tx("u1", "a", "2024-02-10"),
                tx("u1", "b", "2024-02-03"),
                tx("u2", "a", "2024-02-10"),
                tx("u2", "via_a", "2024-02-10"),
                tx("u3", "b", "2024-02-10"),
                tx("u3", "via_b", "2024-02-10"),
            ],
            vec![],
            params(),
        );

        let scored = channel.scored("u1", 10).await.unwrap();
        let by_id: HashMap<&str, f64> = scored
            .iter()
            .map(|c| (c.article_id.as_str(), c.score))
            .collect();

        // via_a carries full seed weight, via_b is discounted by the
        // seed's 7-day age (one half-life).
        assert!((by_id["via_a"] - 1.0).abs() < 1e-9);
        assert!((by_id["via_b"] - 0.5).abs() < 1e-9);
    }
}
