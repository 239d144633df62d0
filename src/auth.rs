//! Access-token lifecycle.
//!
//! Three pieces cooperate:
//!
//! - [`TokenCache`] is the process-wide store of tokens, one slot per
//!   [`CacheKey`] (provider + credential fingerprint). Each slot has its own
//!   lock, so a fetch for one key never blocks callers of another key, and
//!   concurrent callers of the same key wait for the in-flight fetch and
//!   observe its result instead of issuing a second request.
//! - [`TokenSource`] implementations know how to obtain a token for one
//!   provider family (OAuth client credentials, environment, static value).
//! - [`AuthManager`] ties a source to a cache slot and keeps the token it
//!   last handed out in memory.
//!
//! A slot is only written after a successful fetch; a failed fetch leaves
//! the previous value untouched and surfaces as
//! [`ErnieError::TokenUpdateFailed`].

use crate::config::ApiType;
use crate::error::{ApiErrorDetails, ErnieError, ErnieResult};
use crate::http_client::{HttpClient, PreparedRequest};
use crate::logging::{log_debug, log_info, log_warn};
use once_cell::sync::Lazy;
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Environment variable consulted by [`EnvTokenSource`].
pub const ACCESS_TOKEN_ENV: &str = "EB_ACCESS_TOKEN";

/// A cached token is not re-requested more often than this.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

static PROCESS_CACHE: Lazy<Arc<TokenCache>> = Lazy::new(|| Arc::new(TokenCache::default()));

/// Identifies one cache slot.
///
/// Credentials are reduced to a SHA-256 fingerprint; the key never holds
/// secrets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    api_type: ApiType,
    fingerprint: String,
}

impl CacheKey {
    pub fn new(api_type: ApiType, credentials: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for part in credentials {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        Self {
            api_type,
            fingerprint: hex::encode(hasher.finalize()),
        }
    }

    pub fn api_type(&self) -> ApiType {
        self.api_type
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// One cache slot's content.
#[derive(Clone, Default)]
pub struct CachedToken {
    pub auth_token: Option<String>,
    pub updated_at: Option<Instant>,
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("has_auth_token", &self.auth_token.is_some())
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl CachedToken {
    fn is_fresh(&self, min_refresh_interval: Duration) -> bool {
        self.updated_at
            .is_some_and(|at| at.elapsed() < min_refresh_interval)
    }
}

/// Process-wide token store with per-key locking.
pub struct TokenCache {
    slots: RwLock<HashMap<CacheKey, Arc<Mutex<CachedToken>>>>,
    min_refresh_interval: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_REFRESH_INTERVAL)
    }
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("slots", &self.len())
            .field("min_refresh_interval", &self.min_refresh_interval)
            .finish()
    }
}

impl TokenCache {
    pub fn new(min_refresh_interval: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            min_refresh_interval,
        }
    }

    /// The cache shared by every [`Config`](crate::Config) that does not
    /// supply its own. Created on first use, never torn down.
    pub fn process_default() -> Arc<TokenCache> {
        Arc::clone(&PROCESS_CACHE)
    }

    pub fn min_refresh_interval(&self) -> Duration {
        self.min_refresh_interval
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current slot content, without fetching.
    pub fn peek(&self, key: &CacheKey) -> Option<CachedToken> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(key)
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Cached token for `key`, calling `fetch` if the slot is empty.
    pub fn get_or_fetch<F>(&self, key: &CacheKey, fetch: F) -> ErnieResult<String>
    where
        F: FnOnce() -> ErnieResult<String>,
    {
        let slot = self.slot(key);
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = &entry.auth_token {
            log_debug!(
                api_type = %key.api_type,
                fingerprint = %short(&key.fingerprint),
                "Access token served from cache"
            );
            return Ok(token.clone());
        }
        Self::store(&mut entry, fetch()?, key);
        Ok(entry.auth_token.clone().unwrap_or_default())
    }

    /// Refresh the token for `key`.
    ///
    /// `fetch` only runs if the slot was last updated longer ago than the
    /// minimum refresh interval; otherwise the cached token is returned.
    pub fn refresh<F>(&self, key: &CacheKey, fetch: F) -> ErnieResult<String>
    where
        F: FnOnce() -> ErnieResult<String>,
    {
        let slot = self.slot(key);
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let (Some(token), true) = (&entry.auth_token, entry.is_fresh(self.min_refresh_interval)) {
            log_debug!(
                api_type = %key.api_type,
                fingerprint = %short(&key.fingerprint),
                "Access token updated recently, reusing it"
            );
            return Ok(token.clone());
        }
        Self::store(&mut entry, fetch()?, key);
        Ok(entry.auth_token.clone().unwrap_or_default())
    }

    fn slot(&self, key: &CacheKey) -> Arc<Mutex<CachedToken>> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    fn store(entry: &mut CachedToken, token: String, key: &CacheKey) {
        entry.auth_token = Some(token);
        entry.updated_at = Some(Instant::now());
        log_info!(
            api_type = %key.api_type,
            fingerprint = %short(&key.fingerprint),
            "Access token cached"
        );
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

/// Provider-specific way of obtaining an access token.
///
/// Implementations run on a blocking thread; the async surface offloads
/// them with `spawn_blocking`.
pub trait TokenSource: Send + Sync + fmt::Debug {
    fn request_auth_token(&self) -> ErnieResult<String>;

    /// Whether asking again can yield a different token.
    fn supports_refresh(&self) -> bool {
        true
    }
}

/// OAuth client-credentials exchange of AK/SK for an access token.
#[derive(Clone)]
pub struct OAuthTokenSource {
    auth_url: String,
    ak: String,
    sk: String,
    http: HttpClient,
    timeout: Option<Duration>,
}

impl fmt::Debug for OAuthTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokenSource")
            .field("auth_url", &self.auth_url)
            .field("ak", &self.ak)
            .finish_non_exhaustive()
    }
}

impl OAuthTokenSource {
    pub fn new(
        auth_url: impl Into<String>,
        ak: impl Into<String>,
        sk: impl Into<String>,
        http: HttpClient,
    ) -> Self {
        Self {
            auth_url: auth_url.into(),
            ak: ak.into(),
            sk: sk.into(),
            http,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl TokenSource for OAuthTokenSource {
    fn request_auth_token(&self) -> ErnieResult<String> {
        let request = PreparedRequest {
            method: Method::POST,
            url: self.auth_url.clone(),
            query: vec![
                ("grant_type".to_string(), "client_credentials".to_string()),
                ("client_id".to_string(), self.ak.clone()),
                ("client_secret".to_string(), self.sk.clone()),
            ],
            headers: BTreeMap::from([
                ("content-type".to_string(), "application/json".to_string()),
                ("accept".to_string(), "application/json".to_string()),
            ]),
            body: None,
            timeout: self.timeout,
            stream: false,
        };

        log_info!(auth_url = %self.auth_url, "Requesting access token");
        let envelope = self.http.send_blocking(&request)?.into_single()?;

        if let Some(token) = envelope.get("access_token").and_then(|v| v.as_str()) {
            return Ok(token.to_string());
        }

        let message = envelope
            .get("error_description")
            .or_else(|| envelope.get("error"))
            .and_then(|v| v.as_str())
            .unwrap_or("Token endpoint returned no access_token")
            .to_string();
        Err(ErnieError::api(
            ApiErrorDetails::new(message)
                .with_status(envelope.status_code())
                .with_body(envelope.body().to_string())
                .with_headers(envelope.headers().clone()),
        ))
    }
}

/// Reads the token from `EB_ACCESS_TOKEN`. Cannot refresh.
#[derive(Debug, Clone, Default)]
pub struct EnvTokenSource;

impl TokenSource for EnvTokenSource {
    fn request_auth_token(&self) -> ErnieResult<String> {
        std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                ErnieError::configuration_error(format!(
                    "No access token configured and {ACCESS_TOKEN_ENV} is not set"
                ))
            })
    }

    fn supports_refresh(&self) -> bool {
        false
    }
}

/// A token supplied up front. Cannot refresh.
#[derive(Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticTokenSource(<redacted>)")
    }
}

impl TokenSource for StaticTokenSource {
    fn request_auth_token(&self) -> ErnieResult<String> {
        Ok(self.token.clone())
    }

    fn supports_refresh(&self) -> bool {
        false
    }
}

/// Hands out the access token for one backend instance.
pub struct AuthManager {
    cache: Arc<TokenCache>,
    key: CacheKey,
    source: Arc<dyn TokenSource>,
    token: Mutex<Option<String>>,
}

impl fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthManager")
            .field("key", &self.key)
            .field("source", &self.source)
            .field("has_token", &self.held().is_some())
            .finish()
    }
}

impl AuthManager {
    pub fn new(cache: Arc<TokenCache>, key: CacheKey, source: Arc<dyn TokenSource>) -> Self {
        Self {
            cache,
            key,
            source,
            token: Mutex::new(None),
        }
    }

    /// Start with a preset token; the cache is only consulted on refresh.
    pub fn with_initial_token(self, token: Option<String>) -> Self {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = token;
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn supports_refresh(&self) -> bool {
        self.source.supports_refresh()
    }

    /// The held token, else the cached one, else a freshly requested one.
    pub fn get_token(&self) -> ErnieResult<String> {
        if let Some(token) = self.held() {
            return Ok(token);
        }
        let token = self.cache.get_or_fetch(&self.key, || self.fetch())?;
        self.hold(&token);
        Ok(token)
    }

    /// Ask the cache for a newer token and hold it.
    ///
    /// # Errors
    ///
    /// [`ErnieError::TokenUpdateFailed`] if the source cannot refresh or the
    /// request fails.
    pub fn refresh_token(&self) -> ErnieResult<String> {
        if !self.source.supports_refresh() {
            return Err(ErnieError::token_update_failed(
                format!(
                    "Access tokens for api type `{}` cannot be refreshed",
                    self.key.api_type
                ),
                None,
            ));
        }
        log_warn!(
            api_type = %self.key.api_type,
            fingerprint = %short(&self.key.fingerprint),
            "Refreshing access token"
        );
        let token = self.cache.refresh(&self.key, || self.fetch())?;
        self.hold(&token);
        Ok(token)
    }

    /// [`get_token`](Self::get_token) without blocking the async runtime.
    pub async fn get_token_async(self: &Arc<Self>) -> ErnieResult<String> {
        if let Some(token) = self.held() {
            return Ok(token);
        }
        let manager = Arc::clone(self);
        tokio::task::spawn_blocking(move || manager.get_token())
            .await
            .map_err(|e| ErnieError::token_update_failed(format!("Token task failed: {e}"), None))?
    }

    /// [`refresh_token`](Self::refresh_token) without blocking the async runtime.
    pub async fn refresh_token_async(self: &Arc<Self>) -> ErnieResult<String> {
        let manager = Arc::clone(self);
        tokio::task::spawn_blocking(move || manager.refresh_token())
            .await
            .map_err(|e| ErnieError::token_update_failed(format!("Token task failed: {e}"), None))?
    }

    fn fetch(&self) -> ErnieResult<String> {
        self.source.request_auth_token().map_err(|e| {
            ErnieError::token_update_failed(
                format!("Could not obtain an access token for `{}`", self.key.api_type),
                Some(e),
            )
        })
    }

    fn held(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn hold(&self, token: &str) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
    }
}
