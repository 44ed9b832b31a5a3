//! HTTP surface over the serving orchestrator.

use crate::error::{AppError, Result};
use crate::models::UserId;
use crate::services::serving::ServingOrchestrator;
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info_span;
use tracing::Instrument;
use uuid::Uuid;

pub struct RecommenderHandlerState {
    pub orchestrator: Arc<ServingOrchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct RecommendQuery {
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRecommendRequest {
    pub user_ids: Vec<UserId>,
    pub top_k: Option<usize>,
}

#[get("/recommendations/{user_id}")]
pub async fn get_recommendations(
    state: web::Data<RecommenderHandlerState>,
    path: web::Path<String>,
    query: web::Query<RecommendQuery>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    let top_k = query
        .top_k
        .unwrap_or_else(|| state.orchestrator.default_top_k());
    let request_id = Uuid::new_v4();

    let recommendation = state
        .orchestrator
        .recommend(&user_id, top_k)
        .instrument(info_span!("recommend", %request_id, %user_id, top_k))
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(recommendation))
}

#[post("/recommendations/batch")]
pub async fn batch_recommendations(
    state: web::Data<RecommenderHandlerState>,
    body: web::Json<BatchRecommendRequest>,
) -> Result<HttpResponse> {
    let request = body.into_inner();
    let top_k = request
        .top_k
        .unwrap_or_else(|| state.orchestrator.default_top_k());
    let request_id = Uuid::new_v4();

    let recommendations = state
        .orchestrator
        .recommend_many(&request.user_ids, top_k)
        .instrument(info_span!(
            "recommend_batch",
            %request_id,
            users = request.user_ids.len(),
            top_k
        ))
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(recommendations))
}

#[get("/features/stats")]
pub async fn get_feature_stats(
    state: web::Data<RecommenderHandlerState>,
) -> Result<HttpResponse> {
    let stats = state
        .orchestrator
        .feature_stats()
        .await
        .map_err(AppError::from)?;
    Ok(HttpResponse::Ok().json(stats))
}
