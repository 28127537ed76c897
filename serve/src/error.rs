//! Boundary adapter: leaf module errors composed upward into HTTP responses,
//! the same "leaf enum -> `#[from]` composition -> boundary adapter" shape
//! the core crate uses for its own `GatewayError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::error::{AgentError, HistoryError, StreamError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::History(HistoryError::TaskNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::History(HistoryError::SubtaskNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::History(HistoryError::InvalidSessionId(_)) => StatusCode::BAD_REQUEST,
            ApiError::History(HistoryError::Sqlite(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Stream(StreamError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Stream(StreamError::ProducerAlreadyActive(_)) => StatusCode::CONFLICT,
            ApiError::Stream(StreamError::Cache(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Agent(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}
