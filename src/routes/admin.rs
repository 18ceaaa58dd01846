use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use sqlx::PgPool;

use crate::response::AppError;
use crate::routes::{require_db, MessageResponse, SuccessResponse};
use crate::services::achievements::{self, DefinitionInput};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/achievements", post(upsert_achievement))
        .route("/users/:userId/role", put(set_role))
        .route("/users/:userId", delete(delete_user))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetRoleBody {
    is_admin: bool,
}

async fn upsert_achievement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DefinitionInput>,
) -> Result<Response, AppError> {
    let proxy = require_db(&state)?;
    require_admin(proxy.pool(), &headers).await?;

    if body.title.trim().is_empty() {
        return Err(AppError::validation("title is required"));
    }
    if body.requirement_value <= 0 {
        return Err(AppError::validation("requirementValue must be positive"));
    }

    let definition =
        achievements::upsert_definition(proxy.pool(), state.catalog_cache(), body).await?;
    Ok(Json(SuccessResponse::new(definition)).into_response())
}

async fn set_role(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SetRoleBody>,
) -> Result<Response, AppError> {
    let proxy = require_db(&state)?;
    require_admin(proxy.pool(), &headers).await?;

    let result = sqlx::query(r#"UPDATE "users" SET "isAdmin" = $2 WHERE "id" = $1"#)
        .bind(&user_id)
        .bind(body.is_admin)
        .execute(proxy.pool())
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "role update failed");
            AppError::internal("role update failed")
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("user {user_id} does not exist")));
    }

    Ok(Json(MessageResponse::new("role updated")).into_response())
}

/// Deletes the user; stats, completions and achievements cascade.
async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let proxy = require_db(&state)?;
    require_admin(proxy.pool(), &headers).await?;

    let result = sqlx::query(r#"DELETE FROM "users" WHERE "id" = $1"#)
        .bind(&user_id)
        .execute(proxy.pool())
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "user delete failed");
            AppError::internal("user delete failed")
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("user {user_id} does not exist")));
    }

    Ok(Json(MessageResponse::new("user deleted")).into_response())
}

/// Auth mechanics live in the external provider; admin routes only check
/// that the caller-declared user actually holds the admin flag.
async fn require_admin(pool: &PgPool, headers: &HeaderMap) -> Result<(), AppError> {
    let admin_id = headers
        .get("x-admin-user")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::unauthorized("x-admin-user header is required"))?;

    let is_admin: Option<bool> =
        sqlx::query_scalar(r#"SELECT "isAdmin" FROM "users" WHERE "id" = $1"#)
            .bind(admin_id)
            .fetch_optional(pool)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "admin lookup failed");
                AppError::internal("admin lookup failed")
            })?;

    if is_admin != Some(true) {
        return Err(AppError::forbidden("admin privileges required"));
    }
    Ok(())
}
