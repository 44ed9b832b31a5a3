pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::{
    CandidateLayer, FeatureAssembler, FeatureStore, OnnxRanker, Ranker, ServingOrchestrator,
    SnapshotFeatureStore, TransactionStore,
};
