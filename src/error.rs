//! Stream error types and error response formatting.

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use hyper::ext::ReasonPhrase;
use serde_json::json;
use thiserror::Error;

use crate::range::RangeInterval;
use crate::store::TransportError;

/// Boxed cause carried by upload and open failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error codes for stream and emulator operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Caller errors
    InvalidArgument,
    NotSupported,
    StreamClosed,

    // Flush errors
    UploadFailed,
    Cancelled,

    // Collaborator errors
    OpenFailed,
    ItemNotFound,
    ItemAlreadyExists,
    SessionNotFound,
    InvalidRange,
    InternalError,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "InvalidArgument",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::StreamClosed => "StreamClosed",
            ErrorCode::UploadFailed => "UploadFailed",
            ErrorCode::Cancelled => "Cancelled",
            ErrorCode::OpenFailed => "OpenFailed",
            ErrorCode::ItemNotFound => "ItemNotFound",
            ErrorCode::ItemAlreadyExists => "ItemAlreadyExists",
            ErrorCode::SessionNotFound => "SessionNotFound",
            ErrorCode::InvalidRange => "InvalidRange",
            ErrorCode::InternalError => "InternalError",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidArgument | ErrorCode::NotSupported => StatusCode::BAD_REQUEST,
            ErrorCode::ItemNotFound | ErrorCode::SessionNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ItemAlreadyExists => StatusCode::CONFLICT,
            ErrorCode::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            ErrorCode::StreamClosed => StatusCode::GONE,
            ErrorCode::UploadFailed | ErrorCode::OpenFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "An argument was outside the valid range.",
            ErrorCode::NotSupported => "The stream does not support this operation in its access mode.",
            ErrorCode::StreamClosed => "The stream has been closed.",
            ErrorCode::UploadFailed => "Failed to upload data to the remote item.",
            ErrorCode::Cancelled => "The flush was cancelled before all ranges were uploaded.",
            ErrorCode::OpenFailed => "Failed to open the remote item.",
            ErrorCode::ItemNotFound => "The specified item does not exist.",
            ErrorCode::ItemAlreadyExists => "An item with the same name already exists.",
            ErrorCode::SessionNotFound => "The upload session does not exist or has expired.",
            ErrorCode::InvalidRange => "The content range is invalid for the uploaded body.",
            ErrorCode::InternalError => "An internal error occurred.",
        }
    }
}

/// Stream error with code, message and optional cause.
#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct StreamError {
    pub code: ErrorCode,
    pub message: String,
    /// Dirty range the error applies to, for upload failures.
    pub range: Option<RangeInterval>,
    #[source]
    pub source: Option<BoxError>,
    /// Further failures raised by the same flush call.
    pub related: Vec<StreamError>,
}

impl StreamError {
    /// Creates a new error with the given code and default message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.default_message().to_string(),
            code,
            range: None,
            source: None,
            related: Vec::new(),
        }
    }

    /// Creates a new error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            range: None,
            source: None,
            related: Vec::new(),
        }
    }

    /// Shorthand for an `InvalidArgument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidArgument, message)
    }

    /// Wraps a transport failure for one range.
    pub fn upload_failed(range: RangeInterval, cause: TransportError) -> Self {
        Self {
            code: ErrorCode::UploadFailed,
            message: format!("Failed to upload range {} to the remote item", range),
            range: Some(range),
            source: Some(Box::new(cause)),
            related: Vec::new(),
        }
    }

    /// Wraps a transport failure raised while opening an item.
    pub fn open_failed(item_id: &str, cause: TransportError) -> Self {
        let code = match cause {
            TransportError::NotFound(_) => ErrorCode::ItemNotFound,
            _ => ErrorCode::OpenFailed,
        };
        Self {
            code,
            message: format!("Failed to open remote item {}", item_id),
            range: None,
            source: Some(Box::new(cause)),
            related: Vec::new(),
        }
    }

    /// Attaches further failures of the same operation.
    pub fn with_related(mut self, related: Vec<StreamError>) -> Self {
        self.related = related;
        self
    }

    /// Returns true if this is an error of the given code.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        let code = match &err {
            TransportError::NotFound(_) => ErrorCode::ItemNotFound,
            TransportError::AlreadyExists(_) => ErrorCode::ItemAlreadyExists,
            TransportError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            TransportError::InvalidRange(_) => ErrorCode::InvalidRange,
            TransportError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            _ => ErrorCode::InternalError,
        };
        Self {
            code,
            message: err.to_string(),
            range: None,
            source: Some(Box::new(err)),
            related: Vec::new(),
        }
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let status = self.code.status_code();
        let body = json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
            }
        });

        let mut response = (status, Json(body)).into_response();

        if let Ok(reason) = ReasonPhrase::try_from(self.message.as_bytes()) {
            response.extensions_mut().insert(reason);
        }

        response
    }
}

/// Result type alias for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;
