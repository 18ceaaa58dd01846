use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::response::AppError;
use crate::routes::{require_db, SuccessResponse};
use crate::services::activity::{self, ActivityItem, DEFAULT_RECENT_LIMIT};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/:userId/activities", get(all_activities))
        .route("/users/:userId/activities/recent", get(recent_activities))
}

#[derive(Deserialize)]
struct RecentParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActivitiesData {
    activities: Vec<ActivityItem>,
    count: usize,
}

async fn recent_activities(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<RecentParams>,
) -> Result<Response, AppError> {
    let proxy = require_db(&state)?;
    let limit = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT).clamp(1, 100);

    let activities = activity::get_recent_activities(proxy.pool(), &user_id, limit).await;
    Ok(Json(SuccessResponse::new(ActivitiesData {
        count: activities.len(),
        activities,
    }))
    .into_response())
}

async fn all_activities(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, AppError> {
    let proxy = require_db(&state)?;

    let activities = activity::get_all_user_activities(proxy.pool(), &user_id).await;
    Ok(Json(SuccessResponse::new(ActivitiesData {
        count: activities.len(),
        activities,
    }))
    .into_response())
}
