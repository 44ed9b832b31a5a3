use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub data: DataConfig,
    pub window: WindowConfig,
    pub candidates: CandidateConfig,
    pub serving: ServingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub http_port: u16,
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub transactions_path: String,
    pub user_features_path: String,
    pub item_features_path: String,
    /// Absent path means serving runs model-less and every response takes
    /// the fallback branch.
    pub model_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub lookback_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidateConfig {
    pub total_k: usize,
    pub popularity_top_k: usize,
    pub cooccurrence_top_k: usize,
    pub popularity_weight: f64,
    pub cooccurrence_weight: f64,
    pub fallback_expand_k: usize,
    pub recent_seed_count: usize,
    pub per_seed_cap: usize,
    pub half_life_days: f64,
    pub pop_penalty_alpha: f64,
    pub exclude_purchased: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServingConfig {
    pub default_top_k: usize,
    pub default_send_hour: u8,
    pub predict_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            service: ServiceConfig {
                http_port: env::var("HTTP_PORT")
                    .unwrap_or_else(|_| "8014".to_string())
                    .parse()
                    .expect("HTTP_PORT must be a valid u16"),
                service_name: env::var("SERVICE_NAME")
                    .unwrap_or_else(|_| "recommender-service".to_string()),
            },
            data: DataConfig {
                transactions_path: env::var("TRANSACTIONS_PATH")
                    .unwrap_or_else(|_| "data/snapshots/transactions.jsonl".to_string()),
                user_features_path: env::var("USER_FEATURES_PATH")
                    .unwrap_or_else(|_| "data/snapshots/user_features.jsonl".to_string()),
                item_features_path: env::var("ITEM_FEATURES_PATH")
                    .unwrap_or_else(|_| "data/snapshots/item_features.jsonl".to_string()),
                model_path: env::var("MODEL_PATH").ok(),
            },
            window: WindowConfig {
                lookback_days: env::var("WINDOW_LOOKBACK_DAYS")
                    .unwrap_or_else(|_| "28".to_string())
                    .parse()
                    .expect("WINDOW_LOOKBACK_DAYS must be a valid i64"),
            },
            candidates: CandidateConfig {
                total_k: env::var("CANDIDATE_TOTAL_K")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .expect("CANDIDATE_TOTAL_K must be a valid usize"),
                popularity_top_k: env::var("POPULARITY_TOP_K")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .expect("POPULARITY_TOP_K must be a valid usize"),
                cooccurrence_top_k: env::var("COOCCURRENCE_TOP_K")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .expect("COOCCURRENCE_TOP_K must be a valid usize"),
                popularity_weight: env::var("POPULARITY_WEIGHT")
                    .unwrap_or_else(|_| "0.5".to_string())
                    .parse()
                    .expect("POPULARITY_WEIGHT must be a valid f64"),
                cooccurrence_weight: env::var("COOCCURRENCE_WEIGHT")
                    .unwrap_or_else(|_| "0.5".to_string())
                    .parse()
                    .expect("COOCCURRENCE_WEIGHT must be a valid f64"),
                fallback_expand_k: env::var("FALLBACK_EXPAND_K")
                    .unwrap_or_else(|_| "200".to_string())
                    .parse()
                    .expect("FALLBACK_EXPAND_K must be a valid usize"),
                recent_seed_count: env::var("RECENT_SEED_COUNT")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("RECENT_SEED_COUNT must be a valid usize"),
                per_seed_cap: env::var("PER_SEED_CAP")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("PER_SEED_CAP must be a valid usize"),
                half_life_days: env::var("HALF_LIFE_DAYS")
                    .unwrap_or_else(|_| "7".to_string())
                    .parse()
                    .expect("HALF_LIFE_DAYS must be a valid f64"),
                pop_penalty_alpha: env::var("POP_PENALTY_ALPHA")
                    .unwrap_or_else(|_| "0.25".to_string())
                    .parse()
                    .expect("POP_PENALTY_ALPHA must be a valid f64"),
                exclude_purchased: env::var("EXCLUDE_PURCHASED")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .expect("EXCLUDE_PURCHASED must be a valid bool"),
            },
            serving: ServingConfig {
                default_top_k: env::var("DEFAULT_TOP_K")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .expect("DEFAULT_TOP_K must be a valid usize"),
                default_send_hour: env::var("DEFAULT_SEND_HOUR")
                    .unwrap_or_else(|_| "12".to_string())
                    .parse()
                    .expect("DEFAULT_SEND_HOUR must be a valid u8"),
                predict_timeout_ms: env::var("PREDICT_TIMEOUT_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .expect("PREDICT_TIMEOUT_MS must be a valid u64"),
            },
        })
    }
}

impl Default for CandidateConfig {
    fn default() -> Self {
        CandidateConfig {
            total_k: 100,
            popularity_top_k: 50,
            cooccurrence_top_k: 50,
            popularity_weight: 0.5,
            cooccurrence_weight: 0.5,
            fallback_expand_k: 200,
            recent_seed_count: 5,
            per_seed_cap: 20,
            half_life_days: 7.0,
            pop_penalty_alpha: 0.25,
            exclude_purchased: true,
        }
    }
}

impl Default for ServingConfig {
    fn default() -> Self {
        ServingConfig {
            default_top_k: 10,
            default_send_hour: 12,
            predict_timeout_ms: 2000,
        }
    }
}
