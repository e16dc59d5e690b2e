//! Success envelope shared by all handlers.

use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

/// `{"success": true, "message": ..., "data": ...}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data,
        })
    }

    pub fn created(message: impl Into<String>, data: T) -> (StatusCode, Json<Self>) {
        (StatusCode::CREATED, Self::ok(message, data))
    }
}

/// Handler result carrying a success envelope.
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, crate::error::ApiError>;
