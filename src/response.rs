use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    is_operational: bool,
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::operational(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            message,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
            is_operational: false,
        }
    }

    fn operational(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            is_operational: true,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = if self.is_operational {
            self.message
        } else {
            "internal server error".to_string()
        };

        let body = ErrorResponse {
            success: false,
            error: message,
            code: self.code,
        };

        (self.status, Json(body)).into_response()
    }
}

pub fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> AppError {
    AppError {
        status,
        code: code.into(),
        message: message.into(),
        is_operational: true,
    }
}

impl From<crate::services::stats::StatsError> for AppError {
    fn from(err: crate::services::stats::StatsError) -> Self {
        use crate::services::stats::StatsError;
        match err {
            StatsError::Validation(msg) => AppError::validation(msg),
            StatsError::NotFound(msg) => AppError::not_found(msg),
            StatsError::Sql(e) => {
                tracing::error!(error = %e, "stats mutation failed");
                AppError::internal("stats update failed")
            }
            StatsError::Reward(e) => e.into(),
        }
    }
}

impl From<crate::services::achievements::AchievementError> for AppError {
    fn from(err: crate::services::achievements::AchievementError) -> Self {
        use crate::services::achievements::AchievementError;
        match err {
            AchievementError::NotFound(msg) => AppError::not_found(msg),
            AchievementError::Sql(e) => {
                tracing::error!(error = %e, "achievement query failed");
                AppError::internal("achievement lookup failed")
            }
        }
    }
}

impl From<crate::services::rewards::RewardError> for AppError {
    fn from(err: crate::services::rewards::RewardError) -> Self {
        use crate::services::rewards::RewardError;
        match err {
            RewardError::Validation(msg) => AppError::validation(msg),
            RewardError::Sql(e) => {
                tracing::error!(error = %e, "reward mutation failed");
                AppError::internal("reward update failed")
            }
        }
    }
}
