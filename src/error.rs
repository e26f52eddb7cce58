use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Ring has no shards configured.
    EmptyRing,
    /// Administrative removal of a shard that isn't in the ring.
    UnknownShard(String),
    /// Retries exhausted against the routed shard.
    ShardUnavailable(String),
    /// Fallback routing found no healthy shard.
    NoHealthyShards,
    Validation(String),
    ConfigurationError(String),
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::EmptyRing => write!(f, "hash ring is empty"),
            AppError::UnknownShard(id) => write!(f, "shard not found in ring: {}", id),
            AppError::ShardUnavailable(msg) => write!(f, "shard unavailable: {}", msg),
            AppError::NoHealthyShards => write!(f, "no healthy shards available"),
            AppError::Validation(msg) => write!(f, "validation error: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "configuration error: {}", msg),
            AppError::NotFound(msg) => write!(f, "not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "bad request: {}", msg),
            AppError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::EmptyRing => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::UnknownShard(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::ShardUnavailable(_) => {
                tracing::error!("{}", self);
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::NoHealthyShards => {
                tracing::error!("{}", self);
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::Validation(_) | AppError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::ConfigurationError(_) | AppError::Internal(_) => {
                tracing::error!("{}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::ShardUnavailable(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
