//! AI Studio: `Authorization: token <access_token>`.
//!
//! Successful responses wrap the payload as
//! `{"errorCode": 0, "result": {...}}`; the envelope handed upward is
//! rebuilt around `result`.

use super::{prepare_base, Backend, ErrorTable, AISTUDIO_ERRORS};
use crate::auth::{
    AuthManager, CacheKey, EnvTokenSource, StaticTokenSource, TokenSource, ACCESS_TOKEN_ENV,
};
use crate::config::{ApiType, Config};
use crate::error::{ErnieError, ErnieResult};
use crate::http_client::{HttpClient, PreparedRequest};
use crate::logging::log_debug;
use crate::request::Request;
use crate::response::Envelope;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug)]
pub struct AiStudioBackend {
    base_url: String,
    http: HttpClient,
    auth: Arc<AuthManager>,
}

impl AiStudioBackend {
    /// Uses the configured access token, else reads `EB_ACCESS_TOKEN` once.
    /// Neither can be refreshed.
    pub fn new(config: &Config, http: HttpClient) -> ErnieResult<Self> {
        let (key, source): (CacheKey, Arc<dyn TokenSource>) = match config.access_token.as_deref() {
            Some(token) => (
                CacheKey::new(ApiType::AiStudio, &[token]),
                Arc::new(StaticTokenSource::new(token)),
            ),
            None => (
                CacheKey::new(ApiType::AiStudio, &[ACCESS_TOKEN_ENV]),
                Arc::new(EnvTokenSource),
            ),
        };
        log_debug!(
            api_type = %ApiType::AiStudio,
            has_access_token = config.access_token.is_some(),
            "Initialized AI Studio backend"
        );

        Ok(Self {
            base_url: config.resolved_base_url()?,
            http: http.with_response_hook(Arc::new(unwrap_result)),
            auth: Arc::new(AuthManager::new(
                Arc::clone(&config.token_cache),
                key,
                source,
            )),
        })
    }
}

fn unwrap_result(envelope: Envelope) -> ErnieResult<Envelope> {
    let envelope = AISTUDIO_ERRORS.check(envelope)?;
    match envelope.get("result") {
        Some(result) if envelope.contains_key(AISTUDIO_ERRORS.code_field) => {
            let result = result.clone();
            envelope.with_body(result)
        }
        _ => Ok(envelope),
    }
}

#[async_trait]
impl Backend for AiStudioBackend {
    fn api_type(&self) -> ApiType {
        ApiType::AiStudio
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn http(&self) -> &HttpClient {
        &self.http
    }

    fn error_table(&self) -> &'static ErrorTable {
        &AISTUDIO_ERRORS
    }

    fn auth(&self) -> Option<&Arc<AuthManager>> {
        Some(&self.auth)
    }

    fn authorize(&self, request: &Request, token: Option<&str>) -> ErnieResult<PreparedRequest> {
        let token = token.ok_or_else(|| {
            ErnieError::configuration_error("No access token available for AI Studio request")
        })?;
        let mut prepared = prepare_base(&self.base_url, request);
        prepared
            .headers
            .insert("authorization".to_string(), format!("token {token}"));
        Ok(prepared)
    }
}
