//! Ranking model interface.
//!
//! The serving core treats the trained model as an opaque batch scorer:
//! a matrix of candidate feature rows in, one score per row out. Model
//! absence is tolerated by the orchestrator, not here.

pub mod model;

pub use model::OnnxRanker;

use ndarray::{Array1, Array2};
use thiserror::Error;

/// Columns per candidate row, in fixed order:
/// `[avg_purchase_hour, purchase_count, recency, unique_items,
///   popularity_rank, sales_count, peak_hour]`
pub const FEATURE_VECTOR_SIZE: usize = 7;

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("Model loading failed: {0}")]
    ModelLoadError(String),

    #[error("Model inference failed: {0}")]
    InferenceError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, RankingError>;

/// Batch purchase-probability scorer.
///
/// Implementations must return exactly one score per input row; the
/// orchestrator rejects anything else as a prediction error.
pub trait Ranker: Send + Sync {
    fn predict(&self, features: Array2<f32>) -> Result<Array1<f32>>;
}
