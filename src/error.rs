//! HTTP-facing error type.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::store::StoreError;

pub const EMPTY_SHEET_MESSAGE: &str = "Excel file is empty or invalid.";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Unsupported file type: {0}. Upload an .xlsx, .xls or .csv file.")]
    UnsupportedFile(String),
    #[error("{}", EMPTY_SHEET_MESSAGE)]
    EmptySheet,
    #[error("{0}")]
    BadRequest(String),
    #[error("Unknown template: {name}. Available: {available:?}")]
    UnknownTemplate { name: String, available: Vec<String> },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::UnsupportedFile(_)
            | AppError::EmptySheet
            | AppError::BadRequest(_)
            | AppError::UnknownTemplate { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = serde_json::json!({
            "success": false,
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
