//! Any compatible endpoint: explicit base URL, optional bearer token.

use super::{prepare_base, Backend, ErrorTable, QIANFAN_ERRORS};
use crate::auth::{AuthManager, CacheKey, StaticTokenSource};
use crate::config::{ApiType, Config};
use crate::error::ErnieResult;
use crate::http_client::{HttpClient, PreparedRequest};
use crate::logging::log_debug;
use crate::request::Request;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug)]
pub struct CustomBackend {
    base_url: String,
    http: HttpClient,
    auth: Option<Arc<AuthManager>>,
}

impl CustomBackend {
    pub fn new(config: &Config, http: HttpClient) -> ErnieResult<Self> {
        let base_url = config.resolved_base_url()?;
        let auth = config.access_token.as_deref().map(|token| {
            Arc::new(AuthManager::new(
                Arc::clone(&config.token_cache),
                CacheKey::new(ApiType::Custom, &[&base_url, token]),
                Arc::new(StaticTokenSource::new(token)),
            ))
        });
        log_debug!(
            api_type = %ApiType::Custom,
            base_url = %base_url,
            has_access_token = auth.is_some(),
            "Initialized custom backend"
        );

        Ok(Self {
            base_url,
            http: http.with_response_hook(QIANFAN_ERRORS.hook()),
            auth,
        })
    }
}

#[async_trait]
impl Backend for CustomBackend {
    fn api_type(&self) -> ApiType {
        ApiType::Custom
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn http(&self) -> &HttpClient {
        &self.http
    }

    fn error_table(&self) -> &'static ErrorTable {
        &QIANFAN_ERRORS
    }

    fn auth(&self) -> Option<&Arc<AuthManager>> {
        self.auth.as_ref()
    }

    fn authorize(&self, request: &Request, token: Option<&str>) -> ErnieResult<PreparedRequest> {
        let mut prepared = prepare_base(&self.base_url, request);
        if let Some(token) = token {
            prepared
                .headers
                .insert("authorization".to_string(), format!("Bearer {token}"));
        }
        Ok(prepared)
    }
}
