//! Serving orchestrator: candidates → features → model → top-K, with the
//! fallback branch as a first-class path.
//!
//! Every upstream failure degrades the response instead of raising: the
//! caller always gets a usable (possibly truncated, unscored) list and a
//! `fallback` flag. The only conditions that raise are configuration
//! mistakes, not per-request data gaps.

use crate::config::ServingConfig;
use crate::models::{ItemId, Recommendation, UserId};
use crate::services::candidates::CandidateLayer;
use crate::services::features::{feature_matrix, FeatureAssembler, FeatureStore};
use crate::services::ranking::Ranker;
use crate::services::transactions::TransactionStore;
use crate::utils::send_hour;
use ndarray::Array2;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ServingError {
    #[error("invalid top_k: {0} (must be positive)")]
    InvalidTopK(usize),
}

/// Which degraded branch a response took. Recoverable by definition;
/// surfaced in logs, never to the caller as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    NoCandidates,
    NoUserFeatures,
    NoItemFeatures,
    ModelUnavailable,
    PredictionError,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::NoCandidates => "no_candidates",
            FallbackReason::NoUserFeatures => "no_user_features",
            FallbackReason::NoItemFeatures => "no_item_features",
            FallbackReason::ModelUnavailable => "model_unavailable",
            FallbackReason::PredictionError => "prediction_error",
        }
    }
}

pub struct ServingOrchestrator {
    candidates: CandidateLayer,
    assembler: FeatureAssembler,
    store: Arc<dyn FeatureStore>,
    transactions: Arc<TransactionStore>,
    /// Resolved once at construction; `None` means every request takes
    /// the model-unavailable branch.
    ranker: Option<Arc<dyn Ranker>>,
    config: ServingConfig,
}

impl ServingOrchestrator {
    pub fn new(
        candidates: CandidateLayer,
        assembler: FeatureAssembler,
        store: Arc<dyn FeatureStore>,
        transactions: Arc<TransactionStore>,
        ranker: Option<Arc<dyn Ranker>>,
        config: ServingConfig,
    ) -> Self {
        Self {
            candidates,
            assembler,
            store,
            transactions,
            ranker,
            config,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.config.default_top_k
    }

    /// Warm the shared transaction window instead of paying for it on the
    /// first request.
    pub async fn open(&self) -> anyhow::Result<()> {
        self.transactions.open().await
    }

    /// Census of the backing feature snapshots.
    pub async fn feature_stats(&self) -> anyhow::Result<crate::models::FeatureStats> {
        self.store.stats().await
    }

    /// Release shared resources. Safe to call more than once.
    pub async fn close(&self) {
        self.transactions.close().await;
    }

    /// Top-K recommendations for one user.
    pub async fn recommend(
        &self,
        user_id: &str,
        top_k: usize,
    ) -> Result<Recommendation, ServingError> {
        if top_k == 0 {
            return Err(ServingError::InvalidTopK(top_k));
        }

        // CandidatesReady
        let (candidates, _stats) = self.candidates.merge(user_id).await;
        if candidates.is_empty() {
            return Ok(self.fallback(user_id, FallbackReason::NoCandidates, &[], top_k, None));
        }

        let user = match self.store.user_features(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                return Ok(self.fallback(
                    user_id,
                    FallbackReason::NoUserFeatures,
                    &candidates,
                    top_k,
                    Some(self.config.default_send_hour),
                ));
            }
            Err(e) => {
                warn!(user_id, error = %e, "user feature lookup failed");
                return Ok(self.fallback(
                    user_id,
                    FallbackReason::NoUserFeatures,
                    &candidates,
                    top_k,
                    Some(self.config.default_send_hour),
                ));
            }
        };
        let hour = send_hour(user.avg_purchase_hour, self.config.default_send_hour);

        // FeaturesReady
        let rows = match self.assembler.assemble(&user, &candidates).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(user_id, error = %e, "feature assembly failed");
                Vec::new()
            }
        };
        if rows.is_empty() {
            return Ok(self.fallback(
                user_id,
                FallbackReason::NoItemFeatures,
                &candidates,
                top_k,
                Some(hour),
            ));
        }

        let Some(ranker) = self.ranker.clone() else {
            return Ok(self.fallback(
                user_id,
                FallbackReason::ModelUnavailable,
                &candidates,
                top_k,
                Some(hour),
            ));
        };

        // Scored
        let scores = match feature_matrix(&rows) {
            Ok(matrix) => self.predict(ranker, matrix).await,
            Err(e) => Err(e),
        };
        let scores = match scores {
            Ok(scores) if scores.len() == rows.len() => scores,
            Ok(scores) => {
                warn!(
                    user_id,
                    rows = rows.len(),
                    scores = scores.len(),
                    "model returned misaligned score vector"
                );
                return Ok(self.fallback(
                    user_id,
                    FallbackReason::PredictionError,
                    &candidates,
                    top_k,
                    Some(hour),
                ));
            }
            Err(e) => {
                warn!(user_id, error = %e, "prediction failed");
                return Ok(self.fallback(
                    user_id,
                    FallbackReason::PredictionError,
                    &candidates,
                    top_k,
                    Some(hour),
                ));
            }
        };

        // Done: partial top-k selection, then order only the winners.
        let selected = select_top_k(&scores, top_k);
        let recommendations: Vec<ItemId> = selected
            .iter()
            .map(|&i| rows[i].article_id.clone())
            .collect();
        let top_scores: Vec<f32> = selected.iter().map(|&i| scores[i]).collect();

        debug!(
            user_id,
            scored = rows.len(),
            returned = recommendations.len(),
            "recommendation served"
        );

        Ok(Recommendation {
            user_id: user_id.to_string(),
            recommendations,
            scores: Some(top_scores),
            optimal_send_time: Some(hour),
            fallback: false,
        })
    }

    /// Sequential batch serving; per-user degradation is already handled
    /// inside [`recommend`], so one bad user never aborts the batch.
    pub async fn recommend_many(
        &self,
        user_ids: &[UserId],
        top_k: usize,
    ) -> Result<Vec<Recommendation>, ServingError> {
        if top_k == 0 {
            return Err(ServingError::InvalidTopK(top_k));
        }

        let mut responses = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            responses.push(self.recommend(user_id, top_k).await?);
        }
        Ok(responses)
    }

    /// Run the model on a blocking thread under the configured timeout;
    /// a timeout is indistinguishable from a prediction error.
    async fn predict(
        &self,
        ranker: Arc<dyn Ranker>,
        matrix: Array2<f32>,
    ) -> anyhow::Result<Vec<f32>> {
        let timeout = Duration::from_millis(self.config.predict_timeout_ms);
        let scores = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || ranker.predict(matrix)),
        )
        .await
        .map_err(|_| anyhow::anyhow!("prediction timed out after {timeout:?}"))?
        .map_err(|e| anyhow::anyhow!("prediction task failed: {e}"))??;

        Ok(scores.to_vec())
    }

    fn fallback(
        &self,
        user_id: &str,
        reason: FallbackReason,
        candidates: &[ItemId],
        top_k: usize,
        optimal_send_time: Option<u8>,
    ) -> Recommendation {
        warn!(user_id, reason = reason.as_str(), "serving fallback");
        Recommendation {
            user_id: user_id.to_string(),
            recommendations: candidates.iter().take(top_k).cloned().collect(),
            scores: None,
            optimal_send_time,
            fallback: true,
        }
    }
}

/// Indices of the `top_k` highest scores, ordered score-descending.
/// Ties keep candidate order (row index ascending); selection is partial
/// (`select_nth_unstable_by`), so only the winners pay for a sort.
fn select_top_k(scores: &[f32], top_k: usize) -> Vec<usize> {
    let by_score_desc = |a: &usize, b: &usize| {
        scores[*b]
            .partial_cmp(&scores[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(b))
    };

    let mut indices: Vec<usize> = (0..scores.len()).collect();
    if top_k < indices.len() {
        indices.select_nth_unstable_by(top_k, by_score_desc);
        indices.truncate(top_k);
    }
    indices.sort_by(by_score_desc);
    indices
}
