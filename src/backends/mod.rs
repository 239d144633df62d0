//! Provider backends.
//!
//! A [`Backend`] turns a provider-agnostic [`Request`] into an
//! authenticated [`PreparedRequest`], sends it through the transport and
//! maps provider error payloads onto [`ErnieError`]. Resources only ever
//! see `Arc<dyn Backend>`; [`build_backend`] picks the implementation once,
//! from the configured [`ApiType`].
//!
//! Backends whose tokens can be refreshed recover from one token failure
//! per request: the token is refreshed and the request is sent once more.

mod aistudio;
mod custom;
mod qianfan;
pub(crate) mod qianfan_iam;

pub use aistudio::AiStudioBackend;
pub use custom::CustomBackend;
pub use qianfan::QianfanBackend;
pub use qianfan_iam::{QianfanIamBackend, RequestSigner};

use crate::auth::AuthManager;
use crate::config::{ApiType, Config};
use crate::error::{ApiErrorDetails, ApiErrorKind, ErnieError, ErnieResult};
use crate::http_client::{
    BlockingTransmission, HttpClient, PreparedRequest, ResponseHook, Transmission,
};
use crate::logging::log_warn;
use crate::request::Request;
use crate::response::Envelope;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Static mapping from provider error codes to typed errors.
#[derive(Debug)]
pub struct ErrorTable {
    /// Body field carrying the numeric error code.
    pub code_field: &'static str,
    /// Body field carrying the message.
    pub message_field: &'static str,
    /// Code meaning "no error", if the provider sends one on success.
    pub success_code: Option<i64>,
    pub entries: &'static [(i64, ApiErrorKind)],
}

/// Qianfan family (`qianfan`, `qianfan_iam`, `yinian`, `custom`).
pub static QIANFAN_ERRORS: ErrorTable = ErrorTable {
    code_field: "error_code",
    message_field: "error_msg",
    success_code: None,
    entries: &[
        (4, ApiErrorKind::RequestLimit),
        (17, ApiErrorKind::RequestLimit),
        (18, ApiErrorKind::RateLimit),
        (336501, ApiErrorKind::RateLimit),
        (336502, ApiErrorKind::RateLimit),
        (110, ApiErrorKind::InvalidToken),
        (13, ApiErrorKind::InvalidToken),
        (14, ApiErrorKind::InvalidToken),
        (111, ApiErrorKind::TokenExpired),
        (336001, ApiErrorKind::BadRequest),
        (336002, ApiErrorKind::BadRequest),
        (336003, ApiErrorKind::BadRequest),
        (336006, ApiErrorKind::BadRequest),
        (336007, ApiErrorKind::BadRequest),
        (2, ApiErrorKind::TryAgain),
        (336100, ApiErrorKind::TryAgain),
    ],
};

/// AI Studio.
pub static AISTUDIO_ERRORS: ErrorTable = ErrorTable {
    code_field: "errorCode",
    message_field: "errorMsg",
    success_code: Some(0),
    entries: &[
        (4, ApiErrorKind::RequestLimit),
        (17, ApiErrorKind::RequestLimit),
        (18, ApiErrorKind::RateLimit),
        (110, ApiErrorKind::InvalidToken),
        (111, ApiErrorKind::TokenExpired),
        (336003, ApiErrorKind::BadRequest),
        (336100, ApiErrorKind::TryAgain),
    ],
};

impl ErrorTable {
    /// Kind for `code`; unknown codes are generic API errors.
    pub fn classify(&self, code: i64) -> ApiErrorKind {
        self.entries
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, kind)| *kind)
            .unwrap_or(ApiErrorKind::Api)
    }

    /// Provider error code in `body`, unless it signals success.
    fn error_code(&self, body: &Value) -> Option<i64> {
        let code = body.get(self.code_field)?.as_i64()?;
        (Some(code) != self.success_code).then_some(code)
    }

    fn error_for(&self, code: i64, body: &Value, details: ApiErrorDetails) -> ErnieError {
        let message = body
            .get(self.message_field)
            .and_then(Value::as_str)
            .unwrap_or("Unknown provider error")
            .to_string();
        let details = ApiErrorDetails {
            message,
            error_code: Some(code),
            ..details
        };
        self.classify(code).into_error(details)
    }

    /// Reject an envelope that carries a provider error.
    pub fn check(&self, envelope: Envelope) -> ErnieResult<Envelope> {
        match self.error_code(envelope.body()) {
            Some(code) => Err(self.error_for(
                code,
                envelope.body(),
                ApiErrorDetails::default()
                    .with_status(envelope.status_code())
                    .with_body(envelope.body().to_string())
                    .with_headers(envelope.headers().clone()),
            )),
            None => Ok(envelope),
        }
    }

    /// Reclassify a non-200 response whose body is a provider error payload.
    pub fn reclassify(&self, error: ErnieError) -> ErnieError {
        let ErnieError::HttpRequest(details) = error else {
            return error;
        };
        let body = details
            .body
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok());
        match body.as_ref().and_then(|b| self.error_code(b).map(|c| (c, b))) {
            Some((code, body)) => self.error_for(code, body, *details),
            None => ErnieError::HttpRequest(details),
        }
    }

    pub fn hook(&'static self) -> ResponseHook {
        Arc::new(move |envelope: Envelope| self.check(envelope))
    }
}

/// One provider family.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    fn api_type(&self) -> ApiType;

    fn base_url(&self) -> &str;

    /// Transport, with this backend's response hook installed.
    fn http(&self) -> &HttpClient;

    fn error_table(&self) -> &'static ErrorTable;

    /// Token manager, for backends authenticating with access tokens.
    fn auth(&self) -> Option<&Arc<AuthManager>> {
        None
    }

    /// Resolve the URL and attach credentials.
    fn authorize(&self, request: &Request, token: Option<&str>) -> ErnieResult<PreparedRequest>;

    /// Send `request`, refreshing the token once on a token failure.
    async fn request(&self, request: &Request) -> ErnieResult<Transmission> {
        let token = match self.auth() {
            Some(auth) => Some(auth.get_token_async().await?),
            None => None,
        };
        let prepared = self.authorize(request, token.as_deref())?;
        let result = self
            .http()
            .send(&prepared)
            .await
            .map_err(|e| self.error_table().reclassify(e));

        match (result, self.refreshable_auth()) {
            (Err(error), Some(auth)) if error.is_token_error() => {
                log_token_retry(self.api_type(), &error);
                let token = auth.refresh_token_async().await?;
                let prepared = self.authorize(request, Some(&token))?;
                self.http()
                    .send(&prepared)
                    .await
                    .map_err(|e| self.error_table().reclassify(e))
            }
            (result, _) => result,
        }
    }

    /// Blocking counterpart of [`Backend::request`].
    fn request_blocking(&self, request: &Request) -> ErnieResult<BlockingTransmission> {
        let token = self.auth().map(|auth| auth.get_token()).transpose()?;
        let prepared = self.authorize(request, token.as_deref())?;
        let result = self
            .http()
            .send_blocking(&prepared)
            .map_err(|e| self.error_table().reclassify(e));

        match (result, self.refreshable_auth()) {
            (Err(error), Some(auth)) if error.is_token_error() => {
                log_token_retry(self.api_type(), &error);
                let token = auth.refresh_token()?;
                let prepared = self.authorize(request, Some(&token))?;
                self.http()
                    .send_blocking(&prepared)
                    .map_err(|e| self.error_table().reclassify(e))
            }
            (result, _) => result,
        }
    }

    #[doc(hidden)]
    fn refreshable_auth(&self) -> Option<&Arc<AuthManager>> {
        self.auth().filter(|auth| auth.supports_refresh())
    }
}

fn log_token_retry(api_type: ApiType, error: &ErnieError) {
    log_warn!(
        api_type = %api_type,
        error = %error,
        "Access token rejected, refreshing and retrying once"
    );
}

/// URL, query, headers and body shared by every backend.
pub(crate) fn prepare_base(base_url: &str, request: &Request) -> PreparedRequest {
    let mut headers = BTreeMap::from([(
        "content-type".to_string(),
        "application/json".to_string(),
    )]);
    headers.extend(request.headers().clone());

    PreparedRequest {
        method: request.method().clone(),
        url: format!("{base_url}{}", request.path()),
        query: request.query().to_vec(),
        headers,
        body: request.body().cloned(),
        timeout: request.timeout(),
        stream: request.is_stream(),
    }
}

/// Build the backend for `config.api_type`.
///
/// # Errors
///
/// Returns [`ErnieError::Configuration`] when the credentials or base URL
/// required by the provider family are missing.
pub fn build_backend(config: &Config, http: HttpClient) -> ErnieResult<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match config.api_type {
        ApiType::Qianfan | ApiType::Yinian => Arc::new(QianfanBackend::new(config, http)?),
        ApiType::QianfanIam => Arc::new(QianfanIamBackend::new(config, http)?),
        ApiType::AiStudio => Arc::new(AiStudioBackend::new(config, http)?),
        ApiType::Custom => Arc::new(CustomBackend::new(config, http)?),
    };
    Ok(backend)
}
