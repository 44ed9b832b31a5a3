pub mod candidates;
pub mod features;
pub mod ranking;
pub mod serving;
pub mod transactions;

pub use candidates::{CandidateLayer, CooccurrenceChannel, CooccurrenceParams, PopularityChannel};
pub use features::{FeatureAssembler, FeatureStore, SnapshotFeatureStore};
pub use ranking::{OnnxRanker, Ranker};
pub use serving::ServingOrchestrator;
pub use transactions::{JsonlTransactionSource, TransactionStore};
