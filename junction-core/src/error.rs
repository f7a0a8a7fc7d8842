//! The failure value carried out of routing, plus the closed error
//! taxonomy from the configuration builder.

use std::fmt;

/// A type alias for `anyhow::Error`, representing any error type.
///
/// This type is used throughout the crate to represent errors that can be
/// of any type, leveraging the flexibility of the `anyhow` crate for error
/// handling.
pub type AnyError = anyhow::Error;

/// A type alias for `Result<T, E>` where `E` defaults to [`AnyError`].
pub type AnyResult<T, E = AnyError> = std::result::Result<T, E>;

/// A routing failure: an HTTP status code plus a message, defaulted from a
/// code -> phrase table when the caller doesn't supply one.
///
/// `code` is always in `[100, 599]`; values outside that range are clamped
/// to 500 at construction, matching spec.md's "default 500" behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    code: u16,
    message: String,
}

impl HttpError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        let code = normalize_code(code);
        HttpError {
            code,
            message: message.into(),
        }
    }

    /// Build an `HttpError` with the default phrase for `code`.
    pub fn from_code(code: u16) -> Self {
        let code = normalize_code(code);
        let message = reason_phrase(code).to_string();
        HttpError { code, message }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        HttpError::new(400, message)
    }

    pub fn not_found() -> Self {
        HttpError::from_code(404)
    }

    pub fn invalid_host() -> Self {
        HttpError::new(503, "no matching host")
    }

    pub fn retry_exceeded() -> Self {
        HttpError::new(500, "rewrite retry limit exceeded")
    }

    pub fn proxy_upstream(message: impl Into<String>) -> Self {
        HttpError::new(502, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        HttpError::new(500, message)
    }
}

impl Default for HttpError {
    fn default() -> Self {
        HttpError::from_code(500)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

impl std::error::Error for HttpError {}

fn normalize_code(code: u16) -> u16 {
    if (100..=599).contains(&code) {
        code
    } else {
        500
    }
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        410 => "Gone",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

/// Configuration-build-time error taxonomy (spec.md §7 `ConfigError`).
///
/// Raised synchronously while compiling a [`crate::config`] document into
/// the runtime route graph; a single bad route aborts the whole table.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid hostname: {0:?}")]
    InvalidHostname(String),
    #[error("invalid method: {0:?}")]
    InvalidMethod(String),
    #[error("invalid protocol: {0:?}")]
    InvalidProtocol(String),
    #[error("invalid port: {0}")]
    InvalidPort(i64),
    #[error("route has none of rewrite/redirect/do")]
    AmbiguousRouteKind,
    #[error("redirect route must set host or pathname: {0:?}")]
    RedirectMissingTarget(String),
    #[error("unknown route handler: {0:?}")]
    UnknownHandler(String),
    #[error("duplicate hostname binding: {0:?}")]
    DuplicateHostname(String),
    #[error("invalid regex in route {0:?}: {1}")]
    InvalidRegex(String, regex::Error),
    #[error("duplicate or overlapping route: {0:?}")]
    DuplicateRoute(String),
    #[error("non-string/non-numeric header value for {0:?}")]
    InvalidHeaderValue(String),
    #[error("unknown route table referenced: {0:?}")]
    UnknownRouteTable(String),
    #[error(transparent)]
    Other(#[from] AnyError),
}
