use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type ItemId = String;

/// A single purchase event. The transaction window only ever sees these
/// read-only; dates carry day granularity, matching the upstream export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub customer_id: UserId,
    pub article_id: ItemId,
    pub t_dat: NaiveDate,
}

/// Per-user aggregate features, refreshed by an external batch job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFeatures {
    pub customer_id: UserId,
    pub avg_purchase_hour: Option<f64>,
    pub purchase_count: u32,
    pub recency: u32,
    pub unique_items: u32,
}

/// Per-item aggregate features. Nullable columns stay `Option`: the
/// assembler drops rows with any missing required feature instead of
/// imputing, and the popularity index treats an unknown rank as
/// effectively unranked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFeatures {
    pub article_id: ItemId,
    pub popularity_rank: Option<u32>,
    pub sales_count: Option<u32>,
    pub peak_hour: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub article_id: ItemId,
    pub score: f64,
    pub source: CandidateSource,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CandidateSource {
    Popularity,
    Cooccurrence,
}

impl CandidateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateSource::Popularity => "popularity",
            CandidateSource::Cooccurrence => "cooccurrence",
        }
    }
}

/// Per-channel counts for one merge, reported for observability.
#[derive(Debug, Clone, Default)]
pub struct CandidateStats {
    pub popularity_count: usize,
    pub cooccurrence_count: usize,
    pub expanded_count: usize,
    pub total_candidates: usize,
}

/// Feature-store census, exposed over the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStats {
    pub user_count: usize,
    pub item_count: usize,
}

/// The public recommendation payload.
///
/// `recommendations[i]` and `scores[i]` (when present) refer to the same
/// item under the same candidate ordering used for prediction. `fallback`
/// tells the caller whether the list was model-scored or degraded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub user_id: UserId,
    pub recommendations: Vec<ItemId>,
    pub scores: Option<Vec<f32>>,
    pub optimal_send_time: Option<u8>,
    pub fallback: bool,
}
