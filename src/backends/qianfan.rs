//! Qianfan and Yinian: OAuth access token in the `access_token` query
//! parameter.

use super::{prepare_base, Backend, ErrorTable, QIANFAN_ERRORS};
use crate::auth::{AuthManager, CacheKey, OAuthTokenSource, StaticTokenSource, TokenSource};
use crate::config::{ApiType, Config};
use crate::error::{ErnieError, ErnieResult};
use crate::http_client::{HttpClient, PreparedRequest};
use crate::logging::log_debug;
use crate::request::Request;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug)]
pub struct QianfanBackend {
    api_type: ApiType,
    base_url: String,
    http: HttpClient,
    auth: Arc<AuthManager>,
}

impl QianfanBackend {
    /// Serves [`ApiType::Qianfan`] and [`ApiType::Yinian`].
    ///
    /// AK/SK enable token refresh; a preset access token alone is used
    /// as-is and cannot be refreshed.
    pub fn new(config: &Config, http: HttpClient) -> ErnieResult<Self> {
        let (key, source): (CacheKey, Arc<dyn TokenSource>) =
            match (config.ak.as_deref(), config.sk.as_deref(), config.access_token.as_deref()) {
                (Some(ak), Some(sk), _) => (
                    CacheKey::new(config.api_type, &[&config.auth_url, ak, sk]),
                    Arc::new(
                        OAuthTokenSource::new(&config.auth_url, ak, sk, http.clone())
                            .with_timeout(config.timeout),
                    ),
                ),
                (_, _, Some(token)) => (
                    CacheKey::new(config.api_type, &[token]),
                    Arc::new(StaticTokenSource::new(token)),
                ),
                _ => {
                    return Err(ErnieError::configuration_error(format!(
                        "Api type `{}` requires either ak and sk or an access token",
                        config.api_type
                    )))
                }
            };

        let auth = AuthManager::new(Arc::clone(&config.token_cache), key, source)
            .with_initial_token(config.access_token.clone());

        log_debug!(
            api_type = %config.api_type,
            has_ak = config.ak.is_some(),
            has_access_token = config.access_token.is_some(),
            "Initialized Qianfan backend"
        );

        Ok(Self {
            api_type: config.api_type,
            base_url: config.resolved_base_url()?,
            http: http.with_response_hook(QIANFAN_ERRORS.hook()),
            auth: Arc::new(auth),
        })
    }
}

#[async_trait]
impl Backend for QianfanBackend {
    fn api_type(&self) -> ApiType {
        self.api_type
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
        Some(&self.auth)
    }

    fn authorize(&self, request: &Request, token: Option<&str>) -> ErnieResult<PreparedRequest> {
        let token = token.ok_or_else(|| {
            ErnieError::configuration_error("No access token available for Qianfan request")
        })?;
        let mut prepared = prepare_base(&self.base_url, request);
        prepared
            .query
            .push(("access_token".to_string(), token.to_string()));
        Ok(prepared)
    }
}
