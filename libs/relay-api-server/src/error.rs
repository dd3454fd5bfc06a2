use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use relay_engine::DeliveryError;

#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    #[error("bind api :{port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("serve: {0}")]
    Serve(#[source] std::io::Error),
}

/// Error answered to an HTTP client as `{"error": ..., "status": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Delivery(e) => match e {
                DeliveryError::ConcurrentRequest(_)
                | DeliveryError::TopicMismatch { .. }
                | DeliveryError::ModeMismatch { .. } => StatusCode::CONFLICT,
                DeliveryError::UnknownSubscription(_) => StatusCode::NOT_FOUND,
                DeliveryError::Closed(_) | DeliveryError::QueueOverflow(_) => StatusCode::GONE,
                DeliveryError::WriteFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::TopicNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}
