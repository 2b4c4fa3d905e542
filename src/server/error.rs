use crate::models::api::ErrorResponse;
use axum::{ http::StatusCode, response::{ IntoResponse, Response }, Json };
use log::error;
use thiserror::Error;

pub const CHAT_FAILURE: &str = "Failed to process request";
pub const REPORT_FAILURE: &str = "Failed to generate report";

/// Handler failures. The cause is logged; callers only ever see a generic message.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Chat API error: {0}")]
    Chat(String),
    #[error("Reports API error: {0}")]
    Report(String),
}

impl ApiError {
    pub fn public_message(&self) -> &'static str {
        match self {
            ApiError::Chat(_) => CHAT_FAILURE,
            ApiError::Report(_) => REPORT_FAILURE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("{}", self);
        let body = ErrorResponse { error: self.public_message().to_string() };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}
