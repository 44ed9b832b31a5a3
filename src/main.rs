use actix_web::{web, App, HttpServer};
use std::io;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recommender_service::config::Config;
use recommender_service::handlers::{
    batch_recommendations, get_feature_stats, get_recommendations, RecommenderHandlerState,
};
use recommender_service::services::candidates::{
    CandidateLayer, CooccurrenceChannel, CooccurrenceParams, PopularityChannel,
};
use recommender_service::services::features::{FeatureAssembler, FeatureStore, SnapshotFeatureStore};
use recommender_service::services::ranking::{OnnxRanker, Ranker};
use recommender_service::services::serving::ServingOrchestrator;
use recommender_service::services::transactions::{JsonlTransactionSource, TransactionStore};

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().expect("Failed to load configuration");

    tracing::info!(
        "Starting {} v{}",
        config.service.service_name,
        env!("CARGO_PKG_VERSION")
    );

    // Load feature snapshots
    let store: Arc<dyn FeatureStore> = match SnapshotFeatureStore::load(
        &config.data.user_features_path,
        &config.data.item_features_path,
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Failed to load feature snapshots: {e:?}");
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to load feature snapshots: {e:?}"),
            ));
        }
    };

    // Transaction window for the co-occurrence channel
    let transactions = Arc::new(TransactionStore::new(
        Box::new(JsonlTransactionSource::new(&config.data.transactions_path)),
        config.window.lookback_days,
    ));

    // Ranking model is optional at startup: serving degrades to fallback
    // responses until a model is deployed.
    let ranker: Option<Arc<dyn Ranker>> = match &config.data.model_path {
        Some(path) => match OnnxRanker::load(path) {
            Ok(model) => Some(Arc::new(model)),
            Err(e) => {
                tracing::warn!("Ranking model unavailable, serving fallback only: {e}");
                None
            }
        },
        None => {
            tracing::warn!("MODEL_PATH not set, serving fallback only");
            None
        }
    };

    let popularity = Arc::new(PopularityChannel::new(store.clone()));
    let cooccurrence = Arc::new(CooccurrenceChannel::new(
        transactions.clone(),
        store.clone(),
        CooccurrenceParams {
            recent_seed_count: config.candidates.recent_seed_count,
            per_seed_cap: config.candidates.per_seed_cap,
            half_life_days: config.candidates.half_life_days,
            pop_penalty_alpha: config.candidates.pop_penalty_alpha,
            exclude_purchased: config.candidates.exclude_purchased,
        },
    ));
    let candidate_layer =
        CandidateLayer::new(popularity, cooccurrence, config.candidates.clone());
    let assembler = FeatureAssembler::new(store.clone());

    let orchestrator = Arc::new(ServingOrchestrator::new(
        candidate_layer,
        assembler,
        store,
        transactions,
        ranker,
        config.serving.clone(),
    ));

    // Build the transaction window up front rather than on first request.
    if let Err(e) = orchestrator.open().await {
        tracing::error!("Failed to build transaction window: {e:?}");
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("Failed to build transaction window: {e:?}"),
        ));
    }

    let state = web::Data::new(RecommenderHandlerState {
        orchestrator: orchestrator.clone(),
    });

    let bind_addr = format!("0.0.0.0:{}", config.service.http_port);
    tracing::info!("HTTP server listening on {bind_addr}");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(|| async { "OK" }))
            .service(get_recommendations)
            .service(batch_recommendations)
            .service(get_feature_stats)
    })
    .bind(bind_addr)?
    .run()
    .await;

    orchestrator.close().await;

    server
}
