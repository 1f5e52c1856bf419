//! Error types shared by the storage, metadata and request layers.

use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use log::error;
use serde_json::json;
use std::io;
use thiserror::Error;

/// Methods accepted by the object protocol, reported with 405 responses
pub const ALLOWED_METHODS: &str = "GET, HEAD, POST, PUT, PATCH, DELETE";

/// Terminal, user-visible failures of a request
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("requested range starting at byte {first} is not satisfiable ({available} bytes readable)")]
    RangeNotSatisfiable { first: u64, available: u64 },

    #[error("{0}")]
    Internal(String),

    #[error("method not allowed")]
    MethodNotAllowed,
}

impl StoreError {
    /// Machine-readable code sent in the `X-ERROR-CODE` header
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::ChecksumMismatch { .. } => "CHECKSUM_FAIL",
            Self::RangeNotSatisfiable { .. } => "RANGE_NOT_SATISFIABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
        }
    }

    /// HTTP status for this failure
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ChecksumMismatch { .. } => StatusCode::PRECONDITION_FAILED,
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(e.to_string()),
            _ => StoreError::Internal(e.to_string()),
        }
    }
}

impl ResponseError for StoreError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        let message = self.to_string();
        if let Self::Internal(_) = self {
            error!("Request failed: {}", message);
        }

        // Header values cannot carry newlines
        let header_message = message.replace(['\r', '\n'], " ");
        let mut builder = HttpResponse::build(self.status());
        builder
            .insert_header(("X-ERROR-CODE", self.code()))
            .insert_header(("X-ERROR-MESSAGE", header_message));
        if let Self::MethodNotAllowed = self {
            builder.insert_header((header::ALLOW, ALLOWED_METHODS));
        }
        builder.json(json!({
            "code": self.code(),
            "message": message,
        }))
    }
}

/// Failures raised by a metadata backend
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("metadata backend lock poisoned")]
    Poisoned,

    #[error("unexpected reply for {0}")]
    UnexpectedReply(String),

    #[error("key {0} holds a value of another kind")]
    WrongType(String),
}
