//! Error handling and JSON error responses for the panel API

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Realm announced in the Basic authentication challenge
pub const AUTH_REALM: &str = "frpc-panel";

/// Error codes for panel errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing or wrong credentials
    Unauthorized,
    /// Referenced config file does not exist
    ConfigNotFound,
    /// Config file with that name already exists
    ConfigExists,
    /// Submitted content is not valid TOML
    InvalidToml,
    /// Config file is in use by the running proxy
    ConfigInUse,
    /// Filename escapes the config directory or is otherwise unusable
    InvalidFilename,
    /// Malformed request (bad JSON, missing parameter)
    BadRequest,
    /// No route for this method and path
    UnknownRoute,
    /// Unexpected I/O or internal failure
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::ConfigNotFound | ErrorCode::UnknownRoute => StatusCode::NOT_FOUND,
            ErrorCode::ConfigExists
            | ErrorCode::InvalidToml
            | ErrorCode::ConfigInUse
            | ErrorCode::InvalidFilename
            | ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Panel-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::ConfigNotFound => "CONFIG_NOT_FOUND",
            ErrorCode::ConfigExists => "CONFIG_EXISTS",
            ErrorCode::InvalidToml => "INVALID_TOML",
            ErrorCode::ConfigInUse => "CONFIG_IN_USE",
            ErrorCode::InvalidFilename => "INVALID_FILENAME",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::UnknownRoute => "UNKNOWN_ROUTE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Domain errors raised by the config store, the control panel and the API layer
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("invalid username or password")]
    Unauthorized,

    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("config file already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid TOML: {0}")]
    InvalidToml(String),

    #[error("cannot delete {0} while the proxy is running with it")]
    InUse(String),

    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PanelError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PanelError::Unauthorized => ErrorCode::Unauthorized,
            PanelError::NotFound(_) => ErrorCode::ConfigNotFound,
            PanelError::AlreadyExists(_) => ErrorCode::ConfigExists,
            PanelError::InvalidToml(_) => ErrorCode::InvalidToml,
            PanelError::InUse(_) => ErrorCode::ConfigInUse,
            PanelError::InvalidFilename(_) => ErrorCode::InvalidFilename,
            PanelError::BadRequest(_) => ErrorCode::BadRequest,
            PanelError::Io(_) => ErrorCode::InternalError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.code().status_code()
    }

    /// Render this error as a JSON HTTP response
    pub fn into_response(self) -> Response<Full<Bytes>> {
        json_error_response(self.code(), self.to_string())
    }
}

pub type PanelResult<T> = Result<T, PanelError>;

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// The error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Panel-Error header.
///
/// Unauthorized responses also carry a Basic challenge so browsers prompt
/// for credentials.
pub fn json_error_response(code: ErrorCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    let error = ErrorResponse::new(code, message);
    let mut builder = Response::builder()
        .status(code.status_code())
        .header(CONTENT_TYPE, "application/json")
        .header("X-Panel-Error", code.as_header_value());

    if code == ErrorCode::Unauthorized {
        builder = builder.header(WWW_AUTHENTICATE, format!("Basic realm=\"{}\"", AUTH_REALM));
    }

    builder
        .body(Full::new(Bytes::from(error.to_json())))
        .expect("valid response with StatusCode enum and static headers")
}
