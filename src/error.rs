//! Error taxonomy for the relay
//!
//! `StoreError` covers failures of the key-value layer. `RelayError` is what
//! services and handlers return; it maps onto an HTTP status through
//! actix-web's `ResponseError` so nothing escapes the boundary unconverted.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;
use thiserror::Error;

/// Errors raised by a key-value backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key already exists: {0}")]
    Conflict(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Errors surfaced by the relay services and HTTP handlers
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    #[error("File too large. Maximum size is {} MB", .max / 1024 / 1024)]
    PayloadTooLarge { max: u64 },

    #[error("Service quota exceeded (storage or transfer limit reached)")]
    QuotaExceeded,

    #[error("File not found")]
    NotFound,

    #[error("File already exists")]
    AlreadyExists,

    #[error("Authorization required")]
    Unauthorized,

    #[error("Invalid authorization")]
    Forbidden,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl RelayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RelayError::Validation(msg.into())
    }
}

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::QuotaExceeded => StatusCode::INSUFFICIENT_STORAGE,
            RelayError::NotFound => StatusCode::NOT_FOUND,
            RelayError::AlreadyExists => StatusCode::CONFLICT,
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            RelayError::Forbidden => StatusCode::FORBIDDEN,
            RelayError::Internal(_) | RelayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Detail stays in the server log
            error!("Request failed: {}", self);
            return HttpResponse::build(status).body("Internal server error");
        }
        HttpResponse::build(status).body(self.to_string())
    }
}
