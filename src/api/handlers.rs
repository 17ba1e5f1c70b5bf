use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::auth::{extract_bearer_token, validate_jwt_and_extract_user};
use crate::db::connection::health_check;
use crate::db::progress_ops::{load_recent_log, load_user_progress};
use crate::models::api::{AwardXpPayload, AwardXpResponse, ProgressResponse, XpLogResponse};
use crate::models::XpAwardRequest;

const MAX_LOG_LIMIT: i64 = 100;

fn default_log_limit() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct LogQueryParams {
    #[serde(default = "default_log_limit")]
    pub limit: i64,
}

/// Resolve the caller's identity and enforce that it matches the addressed
/// user. Progress records are self-service only.
fn authorize_self(headers: &HeaderMap, user_id: Uuid) -> Result<(), ApiError> {
    let auth_header = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok());
    let token = extract_bearer_token(auth_header)?;
    let caller = validate_jwt_and_extract_user(token)?;

    if caller != user_id {
        return Err(ApiError::Forbidden(
            "cannot operate on another user's progress".to_string(),
        ));
    }
    Ok(())
}

#[tracing::instrument(
    skip(state, headers, payload),
    fields(
        user_id = %user_id,
        amount = payload.amount,
        reason = %payload.reason
    )
)]
pub async fn award_xp_handler(
    Path(user_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AwardXpPayload>,
) -> ApiResult<Json<AwardXpResponse>> {
    info!("Processing XP award request");

    authorize_self(&headers, user_id)?;

    if payload.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("reason must not be empty".to_string()));
    }

    let request = XpAwardRequest {
        user_id,
        amount: payload.amount,
        reason: payload.reason,
        source_id: payload.source_id,
    };

    let result = state.engine.award_xp(&request).await?;

    info!(
        new_xp = result.new_xp,
        new_level = result.new_level,
        leveled_up = result.leveled_up,
        deduplicated = result.deduplicated,
        "XP award completed"
    );

    Ok(Json(AwardXpResponse::from_result(user_id, &result)))
}

#[tracing::instrument(skip(state, headers), fields(user_id = %user_id))]
pub async fn get_progress_handler(
    Path(user_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ProgressResponse>> {
    authorize_self(&headers, user_id)?;

    let progress = load_user_progress(&state.pool, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no progress record for user {}", user_id)))?;

    Ok(Json(ProgressResponse::from_progress(&progress)))
}

#[tracing::instrument(skip(state, headers, params), fields(user_id = %user_id))]
pub async fn get_xp_log_handler(
    Path(user_id): Path<Uuid>,
    Query(params): Query<LogQueryParams>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<XpLogResponse>> {
    authorize_self(&headers, user_id)?;

    let limit = params.limit.clamp(1, MAX_LOG_LIMIT);
    let entries = load_recent_log(&state.pool, user_id, limit).await?;

    Ok(Json(XpLogResponse::from_entries(user_id, entries)))
}

pub async fn health_handler(State(state): State<AppState>) -> ApiResult<&'static str> {
    health_check(&state.pool).await?;
    Ok("OK")
}
