//! Error types for erniebot operations.
//!
//! The crate surfaces every failure as an [`ErnieError`]. Variants fall into
//! four groups:
//!
//! - Local validation failures (bad arguments, bad configuration). These are
//!   raised before any network call and are never retried.
//! - Transport failures (connection, timeout, non-200 HTTP status).
//! - Provider-signalled transient conditions (`TryAgain`, `RateLimit`).
//!   The resource layer retries these with backoff.
//! - Provider-signalled terminal conditions (bad request, invalid or expired
//!   token, exhausted request quota).
//!
//! Provider errors carry an [`ApiErrorDetails`] with the HTTP status, raw
//! body, headers and provider error code, so a full diagnostic can always be
//! reconstructed from the error value alone.
//!
//! # Example
//!
//! ```rust
//! use erniebot::{ErnieError, ErnieResult};
//!
//! fn handle(result: ErnieResult<String>) {
//!     match result {
//!         Ok(text) => println!("{text}"),
//!         Err(err) if err.is_retryable() => println!("transient: {err}"),
//!         Err(err) => println!("{}", err.user_message()),
//!     }
//! }
//! ```

use crate::config::ConfigItemNotFound;
use crate::logging::{log_error, log_warn};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// ============================================================================
// Error categorization types
// ============================================================================

/// High-level categorization of errors for routing and handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// External service failures (provider errors, network issues).
    External,

    /// Internal errors (malformed provider payloads, invariant violations).
    Internal,

    /// Client errors (invalid input, authentication, configuration).
    ///
    /// The caller made a mistake that they can fix.
    Client,

    /// Temporary failures that should be retried with backoff.
    Transient,
}

/// Severity level for logging and alerting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// System is unusable or data integrity is at risk.
    Critical,
    /// Action failed but system is stable.
    Error,
    /// Unexpected but recoverable situation.
    Warning,
    /// Expected failure (e.g. validation error).
    Info,
}

/// Context attached to every provider-originated error.
#[derive(Debug, Clone, Default)]
pub struct ApiErrorDetails {
    /// Human-readable message, usually the provider's `error_msg`.
    pub message: String,
    /// Provider error code (`error_code` / `errorCode`), when present.
    pub error_code: Option<i64>,
    /// HTTP status of the exchange that produced the error.
    pub status_code: Option<u16>,
    /// Raw response body.
    pub body: Option<String>,
    /// Response headers (lower-cased names).
    pub headers: BTreeMap<String, String>,
}

impl ApiErrorDetails {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_error_code(mut self, code: i64) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

impl fmt::Display for ApiErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = self.error_code {
            write!(f, " (error code: {code})")?;
        }
        if let Some(status) = self.status_code {
            write!(f, " [HTTP {status}]")?;
        }
        if let Some(body) = self.body.as_deref().filter(|b| !b.is_empty()) {
            write!(f, " body: {body}")?;
        }
        if !self.headers.is_empty() {
            write!(f, " headers: {:?}", self.headers)?;
        }
        Ok(())
    }
}

// ============================================================================
// Error enum
// ============================================================================

/// Convenient result type for erniebot operations.
pub type ErnieResult<T> = std::result::Result<T, ErnieError>;

/// Errors that can occur while talking to an ERNIE Bot backend.
///
/// | Variant | Category | Retried by resources |
/// |---------|----------|----------------------|
/// | `Connection` | External | No |
/// | `Timeout` | Transient | Yes |
/// | `HttpRequest` | External | No |
/// | `Api` | External | No |
/// | `BadRequest` | Client | No |
/// | `InvalidToken` | Client | No (backend refreshes once) |
/// | `TokenExpired` | Client | No (backend refreshes once) |
/// | `RateLimit` | Transient | Yes |
/// | `RequestLimit` | Client | No |
/// | `TryAgain` | Transient | Yes |
/// | `TokenUpdateFailed` | External | No |
/// | `InvalidArgument` | Client | No |
/// | `ArgumentNotFound` | Client | No |
/// | `Configuration` | Client | No |
/// | `ConfigItemNotFound` | Client | No |
/// | `ResponseParsing` | Internal | No |
/// | `ReservedField` | Internal | No |
#[derive(Error, Debug)]
pub enum ErnieError {
    /// The connection to the provider could not be established or broke.
    #[error("Connection failed: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A network call or a polling loop exceeded its deadline.
    #[error("Request timed out: {message}")]
    Timeout { message: String },

    /// The provider answered with a non-200 HTTP status.
    #[error("HTTP request failed: {0}")]
    HttpRequest(Box<ApiErrorDetails>),

    /// Generic provider error; also the fallback for unrecognized codes.
    #[error("API error: {0}")]
    Api(Box<ApiErrorDetails>),

    #[error("Bad request: {0}")]
    BadRequest(Box<ApiErrorDetails>),

    #[error("Invalid access token: {0}")]
    InvalidToken(Box<ApiErrorDetails>),

    #[error("Access token expired: {0}")]
    TokenExpired(Box<ApiErrorDetails>),

    /// Momentary throttling; retried with backoff.
    #[error("Rate limit reached: {0}")]
    RateLimit(Box<ApiErrorDetails>),

    /// Quota exhaustion; terminal.
    #[error("Request limit exceeded: {0}")]
    RequestLimit(Box<ApiErrorDetails>),

    /// Provider hint that the same request should simply be sent again.
    #[error("Try again later: {0}")]
    TryAgain(Box<ApiErrorDetails>),

    /// Fetching or refreshing an access token failed.
    #[error("Failed to update access token: {message}")]
    TokenUpdateFailed {
        message: String,
        #[source]
        source: Option<Box<ErnieError>>,
    },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Missing required argument: {argument}")]
    ArgumentNotFound { argument: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    ConfigItemNotFound(#[from] ConfigItemNotFound),

    /// The provider's payload could not be decoded.
    #[error("Response parsing failed: {message}")]
    ResponseParsing { message: String },

    /// A response body tried to shadow one of the envelope's reserved fields.
    #[error("Response body contains reserved field `{field}`")]
    ReservedField { field: String },
}

impl ErnieError {
    /// Get the error category for routing and handling decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::External,
            Self::Timeout { .. } => ErrorCategory::Transient,
            Self::HttpRequest(_) => ErrorCategory::External,
            Self::Api(_) => ErrorCategory::External,
            Self::BadRequest(_) => ErrorCategory::Client,
            Self::InvalidToken(_) => ErrorCategory::Client,
            Self::TokenExpired(_) => ErrorCategory::Client,
            Self::RateLimit(_) => ErrorCategory::Transient,
            Self::RequestLimit(_) => ErrorCategory::Client,
            Self::TryAgain(_) => ErrorCategory::Transient,
            Self::TokenUpdateFailed { .. } => ErrorCategory::External,
            Self::InvalidArgument { .. } => ErrorCategory::Client,
            Self::ArgumentNotFound { .. } => ErrorCategory::Client,
            Self::Configuration { .. } => ErrorCategory::Client,
            Self::ConfigItemNotFound(_) => ErrorCategory::Client,
            Self::ResponseParsing { .. } => ErrorCategory::Internal,
            Self::ReservedField { .. } => ErrorCategory::Internal,
        }
    }

    /// Get the error severity for logging and alerting.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Connection { .. } => ErrorSeverity::Error,
            Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::HttpRequest(_) => ErrorSeverity::Error,
            Self::Api(_) => ErrorSeverity::Error,
            Self::BadRequest(_) => ErrorSeverity::Info,
            Self::InvalidToken(_) => ErrorSeverity::Error,
            Self::TokenExpired(_) => ErrorSeverity::Warning,
            Self::RateLimit(_) => ErrorSeverity::Warning,
            Self::RequestLimit(_) => ErrorSeverity::Error,
            Self::TryAgain(_) => ErrorSeverity::Warning,
            Self::TokenUpdateFailed { .. } => ErrorSeverity::Error,
            Self::InvalidArgument { .. } => ErrorSeverity::Info,
            Self::ArgumentNotFound { .. } => ErrorSeverity::Info,
            Self::Configuration { .. } => ErrorSeverity::Error,
            Self::ConfigItemNotFound(_) => ErrorSeverity::Error,
            Self::ResponseParsing { .. } => ErrorSeverity::Warning,
            Self::ReservedField { .. } => ErrorSeverity::Warning,
        }
    }

    /// Whether the resource layer retries this error.
    ///
    /// Only `TryAgain`, `RateLimit` and `Timeout` qualify. Request-limit
    /// errors signal quota exhaustion and are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TryAgain(_) | Self::RateLimit(_) | Self::Timeout { .. }
        )
    }

    /// Whether the provider rejected the access token.
    ///
    /// A plain HTTP 401 counts as well, so backends with refreshable tokens
    /// can recover from it.
    pub fn is_token_error(&self) -> bool {
        match self {
            Self::InvalidToken(_) | Self::TokenExpired(_) => true,
            Self::HttpRequest(details) => details.status_code == Some(401),
            _ => false,
        }
    }

    /// Provider context, for the variants that carry one.
    pub fn details(&self) -> Option<&ApiErrorDetails> {
        match self {
            Self::HttpRequest(d)
            | Self::Api(d)
            | Self::BadRequest(d)
            | Self::InvalidToken(d)
            | Self::TokenExpired(d)
            | Self::RateLimit(d)
            | Self::RequestLimit(d)
            | Self::TryAgain(d) => Some(d),
            _ => None,
        }
    }

    /// Provider error code, if the provider reported one.
    pub fn error_code(&self) -> Option<i64> {
        self.details().and_then(|d| d.error_code)
    }

    /// HTTP status of the failed exchange, if known.
    pub fn status_code(&self) -> Option<u16> {
        self.details().and_then(|d| d.status_code)
    }

    /// Convert to a user-friendly message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection { .. } => {
                "Unable to reach the ERNIE Bot service. Please check your network".to_string()
            }
            Self::Timeout { .. } => "Request timed out. Please try again".to_string(),
            Self::HttpRequest(_) | Self::Api(_) => {
                "The ERNIE Bot service returned an error".to_string()
            }
            Self::BadRequest(_) => "The request was rejected as invalid".to_string(),
            Self::InvalidToken(_) | Self::TokenExpired(_) | Self::TokenUpdateFailed { .. } => {
                "Authentication failed. Please check your credentials".to_string()
            }
            Self::RateLimit(_) | Self::TryAgain(_) => {
                "Service is busy. Please try again shortly".to_string()
            }
            Self::RequestLimit(_) => "Your request quota has been used up".to_string(),
            Self::InvalidArgument { .. } | Self::ArgumentNotFound { .. } => {
                "Invalid request parameters".to_string()
            }
            Self::Configuration { .. } | Self::ConfigItemNotFound(_) => {
                "SDK configuration issue. Please check your settings".to_string()
            }
            Self::ResponseParsing { .. } | Self::ReservedField { .. } => {
                "Received an invalid response from the ERNIE Bot service".to_string()
            }
        }
    }

    // =========================================================================
    // Constructor methods with automatic logging
    // =========================================================================

    pub fn connection(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let message = message.into();
        log_error!(
            error_type = "connection",
            message = %message,
            has_source = source.is_some(),
            "Connection to provider failed"
        );
        Self::Connection { message, source }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(error_type = "timeout", message = %message, "Request timed out");
        Self::Timeout { message }
    }

    pub fn http_request(details: ApiErrorDetails) -> Self {
        log_error!(
            error_type = "http_request",
            status_code = ?details.status_code,
            message = %details.message,
            "Provider returned non-200 status"
        );
        Self::HttpRequest(Box::new(details))
    }

    pub fn api(details: ApiErrorDetails) -> Self {
        log_error!(
            error_type = "api",
            error_code = ?details.error_code,
            message = %details.message,
            "Provider reported an error"
        );
        Self::Api(Box::new(details))
    }

    pub fn token_update_failed(message: impl Into<String>, source: Option<ErnieError>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "token_update_failed",
            message = %message,
            source = ?source.as_ref().map(|e| e.to_string()),
            "Access token update failed"
        );
        Self::TokenUpdateFailed {
            message,
            source: source.map(Box::new),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(error_type = "invalid_argument", message = %message, "Argument validation failed");
        Self::InvalidArgument { message }
    }

    pub fn argument_not_found(argument: impl Into<String>) -> Self {
        let argument = argument.into();
        log_warn!(
            error_type = "argument_not_found",
            argument = %argument,
            "Required argument missing"
        );
        Self::ArgumentNotFound { argument }
    }

    pub fn configuration_error(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "configuration_error",
            message = %message,
            "SDK configuration validation failed"
        );
        Self::Configuration { message }
    }

    pub fn response_parsing_error(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(
            error_type = "response_parsing_error",
            message = %message,
            "Provider response format invalid"
        );
        Self::ResponseParsing { message }
    }

    pub fn reserved_field(field: impl Into<String>) -> Self {
        let field = field.into();
        log_warn!(
            error_type = "reserved_field",
            field = %field,
            "Response body shadows a reserved envelope field"
        );
        Self::ReservedField { field }
    }
}

/// Which typed error a provider error code maps to.
///
/// Backends keep one static table from code to kind; [`ApiErrorKind::into_error`]
/// attaches the context and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Api,
    BadRequest,
    InvalidToken,
    TokenExpired,
    RateLimit,
    RequestLimit,
    TryAgain,
}

impl ApiErrorKind {
    pub fn into_error(self, details: ApiErrorDetails) -> ErnieError {
        log_warn!(
            error_type = ?self,
            error_code = ?details.error_code,
            status_code = ?details.status_code,
            message = %details.message,
            "Provider error classified"
        );
        let details = Box::new(details);
        match self {
            Self::Api => ErnieError::Api(details),
            Self::BadRequest => ErnieError::BadRequest(details),
            Self::InvalidToken => ErnieError::InvalidToken(details),
            Self::TokenExpired => ErnieError::TokenExpired(details),
            Self::RateLimit => ErnieError::RateLimit(details),
            Self::RequestLimit => ErnieError::RequestLimit(details),
            Self::TryAgain => ErnieError::TryAgain(details),
        }
    }
}
