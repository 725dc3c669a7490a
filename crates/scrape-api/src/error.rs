//! HTTP error mapping for core errors.

use axum::{http::StatusCode, response::IntoResponse, Json};
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Internal(scrape_core::Error),
}

impl From<scrape_core::Error> for ApiError {
    fn from(err: scrape_core::Error) -> Self {
        match &err {
            scrape_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg.clone()),
            scrape_core::Error::JobNotFound(id) => ApiError::NotFound(format!("Job {} not found", id)),
            scrape_core::Error::NotFound(msg) => ApiError::NotFound(msg.clone()),
            _ if err.is_store_unavailable() => ApiError::Unavailable(err.to_string()),
            _ => ApiError::Internal(err),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::Unavailable(msg) => msg,
            ApiError::Internal(err) => {
                error!(error = %err, "Request failed");
                err.to_string()
            }
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
