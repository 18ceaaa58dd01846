use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::response::AppError;
use crate::routes::{require_db, SuccessResponse};
use crate::services::achievements;
use crate::services::activity::{self, ActivityItem};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/:userId/achievements", get(list_earned))
        .route("/users/:userId/achievements/all", get(list_all))
        .route(
            "/users/:userId/achievements/:achievementId/activities",
            get(achievement_activities),
        )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EarnedData {
    achievements: Vec<achievements::EarnedAchievement>,
    count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AllData {
    achievements: Vec<achievements::AchievementStatus>,
    total_count: usize,
    unlocked_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AchievementActivitiesData {
    activities: Vec<ActivityItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    earned_at: Option<String>,
}

async fn list_earned(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, AppError> {
    let proxy = require_db(&state)?;
    let achievements = achievements::get_user_achievements(proxy.pool(), &user_id).await?;

    Ok(Json(SuccessResponse::new(EarnedData {
        count: achievements.len(),
        achievements,
    }))
    .into_response())
}

async fn list_all(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, AppError> {
    let proxy = require_db(&state)?;
    let achievements =
        achievements::get_all_with_status(proxy.pool(), state.catalog_cache(), &user_id).await?;
    let unlocked_count = achievements.iter().filter(|a| a.unlocked).count();

    Ok(Json(SuccessResponse::new(AllData {
        total_count: achievements.len(),
        unlocked_count,
        achievements,
    }))
    .into_response())
}

/// The events that made the achievement eligible. The displayed earned-at
/// is the last contributing event's timestamp, falling back to the stored
/// award timestamp when no contributing event was found.
async fn achievement_activities(
    State(state): State<AppState>,
    Path((user_id, achievement_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let proxy = require_db(&state)?;
    let pool = proxy.pool();

    let definition = achievements::get_definition(pool, &achievement_id).await?;
    let result = activity::get_activities_for_achievement(
        pool,
        &user_id,
        definition.requirement_type,
        definition.requirement_value,
    )
    .await
    .map_err(|err| {
        tracing::error!(error = %err, "achievement activity query failed");
        AppError::internal("activity lookup failed")
    })?;

    let earned_at = match result.earned_at {
        Some(ts) => Some(ts.to_rfc3339()),
        None => achievements::stored_earned_at(pool, &user_id, &achievement_id).await?,
    };

    Ok(Json(SuccessResponse::new(AchievementActivitiesData {
        activities: result.activities,
        earned_at,
    }))
    .into_response())
}
