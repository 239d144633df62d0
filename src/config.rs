//! SDK configuration.
//!
//! A [`Config`] selects the provider family ([`ApiType`]), carries the
//! credentials and network settings, and owns the retry policy. It is
//! built once (usually via [`Config::from_env`]) and handed to resources;
//! individual calls may layer a [`ConfigOverride`] on top.

use crate::auth::TokenCache;
use crate::error::{ErnieError, ErnieResult};
use crate::http_client::HttpClient;
use crate::logging::log_debug;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// OAuth endpoint issuing access tokens for AK/SK credentials.
pub const DEFAULT_AUTH_URL: &str = "https://aip.baidubce.com/oauth/2.0/token";

const QIANFAN_BASE_URL: &str = "https://aip.baidubce.com/rpc/2.0/ai_custom/v1/wenxinworkshop";
const YINIAN_BASE_URL: &str = "https://aip.baidubce.com/rpc/2.0/ernievilg/v1";
const AISTUDIO_BASE_URL: &str = "https://aistudio.baidu.com/llm/lmapi/v1";

/// Setting names understood by [`Config::get`].
pub const CONFIG_ITEMS: &[&str] = &[
    "api_type",
    "base_url",
    "access_token",
    "ak",
    "sk",
    "auth_url",
    "proxy",
    "timeout",
    "max_retries",
    "min_retry_delay",
    "max_retry_delay",
];

/// Setting names accepted in a per-call override map.
pub const OVERRIDE_ITEMS: &[&str] = &[
    "api_type",
    "base_url",
    "access_token",
    "ak",
    "sk",
    "proxy",
    "timeout",
    "max_retries",
];

/// A setting name that is not registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Configuration item `{name}` is not registered")]
pub struct ConfigItemNotFound {
    pub name: String,
}

/// Provider family targeted by a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    /// Qianfan with OAuth access tokens passed as a query parameter.
    Qianfan,
    /// Qianfan with `bce-auth-v1` signed requests.
    QianfanIam,
    /// Yinian image generation, same auth as [`ApiType::Qianfan`].
    Yinian,
    /// AI Studio with a pre-issued access token.
    AiStudio,
    /// Any compatible endpoint; base URL required.
    Custom,
}

impl ApiType {
    pub const ALL: [ApiType; 5] = [
        ApiType::Qianfan,
        ApiType::QianfanIam,
        ApiType::Yinian,
        ApiType::AiStudio,
        ApiType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::Qianfan => "qianfan",
            ApiType::QianfanIam => "qianfan_iam",
            ApiType::Yinian => "yinian",
            ApiType::AiStudio => "aistudio",
            ApiType::Custom => "custom",
        }
    }

    /// Built-in base URL; `None` for [`ApiType::Custom`].
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            ApiType::Qianfan | ApiType::QianfanIam => Some(QIANFAN_BASE_URL),
            ApiType::Yinian => Some(YINIAN_BASE_URL),
            ApiType::AiStudio => Some(AISTUDIO_BASE_URL),
            ApiType::Custom => None,
        }
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiType {
    type Err = ErnieError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "qianfan" => Ok(ApiType::Qianfan),
            "qianfan_iam" => Ok(ApiType::QianfanIam),
            "yinian" => Ok(ApiType::Yinian),
            "aistudio" => Ok(ApiType::AiStudio),
            "custom" => Ok(ApiType::Custom),
            other => Err(ErnieError::configuration_error(format!(
                "Unsupported api type: {other}. Supported api types: qianfan, qianfan_iam, yinian, aistudio, custom"
            ))),
        }
    }
}

/// Process-level SDK configuration.
#[derive(Clone)]
pub struct Config {
    pub api_type: ApiType,
    /// Overrides [`ApiType::default_base_url`].
    pub base_url: Option<String>,
    /// Pre-issued access token.
    pub access_token: Option<String>,
    /// API key (OAuth client id / IAM access key).
    pub ak: Option<String>,
    /// Secret key (OAuth client secret / IAM secret key).
    pub sk: Option<String>,
    pub auth_url: String,
    pub proxy: Option<String>,
    /// Per-request network timeout.
    pub timeout: Option<Duration>,
    pub retry_policy: RetryPolicy,
    /// Token cache shared by every resource built from this config.
    pub token_cache: Arc<TokenCache>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_type: ApiType::AiStudio,
            base_url: None,
            access_token: None,
            ak: None,
            sk: None,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            proxy: None,
            timeout: None,
            retry_policy: RetryPolicy::default(),
            token_cache: TokenCache::process_default(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_type", &self.api_type)
            .field("base_url", &self.base_url)
            .field("access_token", &redact(self.access_token.as_deref()))
            .field("ak", &self.ak)
            .field("sk", &redact(self.sk.as_deref()))
            .field("auth_url", &self.auth_url)
            .field("proxy", &self.proxy)
            .field("timeout", &self.timeout)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

fn redact(secret: Option<&str>) -> Option<&'static str> {
    secret.map(|_| "<redacted>")
}

impl Config {
    pub fn new(api_type: ApiType) -> Self {
        Self {
            api_type,
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_credentials(mut self, ak: impl Into<String>, sk: impl Into<String>) -> Self {
        self.ak = Some(ak.into());
        self.sk = Some(sk.into());
        self
    }

    pub fn with_auth_url(mut self, auth_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_token_cache(mut self, cache: Arc<TokenCache>) -> Self {
        self.token_cache = cache;
        self
    }

    /// Base URL to use for requests, without a trailing slash.
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::Configuration`] when neither an explicit base URL
    /// nor a built-in default exists (the `custom` api type).
    pub fn resolved_base_url(&self) -> ErnieResult<String> {
        let base = self
            .base_url
            .as_deref()
            .or_else(|| self.api_type.default_base_url())
            .ok_or_else(|| {
                ErnieError::configuration_error(format!(
                    "A base URL is required for api type `{}`",
                    self.api_type
                ))
            })?;
        Ok(base.trim_end_matches('/').to_string())
    }

    /// Look up a registered setting by name.
    ///
    /// Unset optional settings yield `Ok(None)`; secrets are returned as-is.
    pub fn get(&self, name: &str) -> Result<Option<String>, ConfigItemNotFound> {
        let value = match name {
            "api_type" => Some(self.api_type.to_string()),
            "base_url" => self.base_url.clone(),
            "access_token" => self.access_token.clone(),
            "ak" => self.ak.clone(),
            "sk" => self.sk.clone(),
            "auth_url" => Some(self.auth_url.clone()),
            "proxy" => self.proxy.clone(),
            "timeout" => self.timeout.map(|t| t.as_secs_f64().to_string()),
            "max_retries" => Some(self.retry_policy.max_retries.to_string()),
            "min_retry_delay" => Some(self.retry_policy.min_delay.as_secs_f64().to_string()),
            "max_retry_delay" => Some(self.retry_policy.max_delay.as_secs_f64().to_string()),
            _ => {
                return Err(ConfigItemNotFound {
                    name: name.to_string(),
                })
            }
        };
        Ok(value)
    }

    /// Load configuration from environment variables.
    ///
    /// This is the only place in the crate that reads the environment for
    /// settings. Recognized variables: `EB_API_TYPE`, `EB_BASE_URL`,
    /// `EB_ACCESS_TOKEN`, `EB_AK`, `EB_SK`, `EB_PROXY`, `EB_TIMEOUT`,
    /// `EB_MAX_RETRIES`, `EB_MIN_RETRY_DELAY`, `EB_MAX_RETRY_DELAY`.
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::Configuration`] if `EB_API_TYPE` names an unknown
    /// provider or a numeric variable cannot be parsed.
    pub fn from_env() -> ErnieResult<Self> {
        let mut config = Self::default();

        if let Some(api_type) = env_var("EB_API_TYPE") {
            config.api_type = api_type.parse()?;
        }
        config.base_url = env_var("EB_BASE_URL");
        config.access_token = env_var("EB_ACCESS_TOKEN");
        config.ak = env_var("EB_AK");
        config.sk = env_var("EB_SK");
        config.proxy = env_var("EB_PROXY");
        config.timeout = parse_env::<f64>("EB_TIMEOUT")?
            .map(|secs| secs_to_duration("EB_TIMEOUT", secs))
            .transpose()?;

        if let Some(max_retries) = parse_env::<u32>("EB_MAX_RETRIES")? {
            config.retry_policy.max_retries = max_retries;
        }
        if let Some(secs) = parse_env::<f64>("EB_MIN_RETRY_DELAY")? {
            config.retry_policy.min_delay = secs_to_duration("EB_MIN_RETRY_DELAY", secs)?;
        }
        if let Some(secs) = parse_env::<f64>("EB_MAX_RETRY_DELAY")? {
            config.retry_policy.max_delay = secs_to_duration("EB_MAX_RETRY_DELAY", secs)?;
        }

        log_debug!(
            api_type = %config.api_type,
            has_base_url = config.base_url.is_some(),
            has_access_token = config.access_token.is_some(),
            has_ak = config.ak.is_some(),
            has_sk = config.sk.is_some(),
            has_proxy = config.proxy.is_some(),
            max_retries = config.retry_policy.max_retries,
            "Loaded SDK configuration from environment"
        );

        Ok(config)
    }

    /// A copy of this config with `overrides` applied.
    pub fn merged(&self, overrides: &ConfigOverride) -> Config {
        let mut config = self.clone();
        if let Some(api_type) = overrides.api_type {
            config.api_type = api_type;
            // Base URLs are provider specific; never carry one across providers.
            if api_type != self.api_type {
                config.base_url = None;
            }
        }
        if let Some(base_url) = &overrides.base_url {
            config.base_url = Some(base_url.clone());
        }
        if let Some(token) = &overrides.access_token {
            config.access_token = Some(token.clone());
        }
        if let Some(ak) = &overrides.ak {
            config.ak = Some(ak.clone());
        }
        if let Some(sk) = &overrides.sk {
            config.sk = Some(sk.clone());
        }
        if let Some(proxy) = &overrides.proxy {
            config.proxy = Some(proxy.clone());
        }
        if let Some(timeout) = overrides.timeout {
            config.timeout = Some(timeout);
        }
        if let Some(max_retries) = overrides.max_retries {
            config.retry_policy.max_retries = max_retries;
        }
        config
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(name: &str) -> ErnieResult<Option<T>>
where
    T::Err: fmt::Display,
{
    env_var(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                ErnieError::configuration_error(format!("Invalid value for {name}: {raw} ({e})"))
            })
        })
        .transpose()
}

/// Seconds to a [`Duration`]; negative, non-finite or overflowing values
/// are a configuration error.
pub(crate) fn secs_to_duration(name: &str, secs: f64) -> ErnieResult<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| {
        ErnieError::configuration_error(format!("Invalid value for {name}: {secs} ({e})"))
    })
}

/// Settings that take precedence over [`Config`] for a single call.
#[derive(Clone, Default)]
pub struct ConfigOverride {
    pub api_type: Option<ApiType>,
    pub base_url: Option<String>,
    pub access_token: Option<String>,
    pub ak: Option<String>,
    pub sk: Option<String>,
    pub proxy: Option<String>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    /// Session to send this call through instead of the resource's own.
    pub http_client: Option<HttpClient>,
}

impl fmt::Debug for ConfigOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOverride")
            .field("api_type", &self.api_type)
            .field("base_url", &self.base_url)
            .field("access_token", &redact(self.access_token.as_deref()))
            .field("ak", &self.ak)
            .field("sk", &redact(self.sk.as_deref()))
            .field("proxy", &self.proxy)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("http_client", &self.http_client.is_some())
            .finish()
    }
}

impl ConfigOverride {
    pub fn api_type(api_type: ApiType) -> Self {
        Self {
            api_type: Some(api_type),
            ..Default::default()
        }
    }

    /// Whether the override changes anything that affects backend selection
    /// or authentication.
    pub fn changes_backend(&self) -> bool {
        self.api_type.is_some()
            || self.base_url.is_some()
            || self.access_token.is_some()
            || self.ak.is_some()
            || self.sk.is_some()
            || self.proxy.is_some()
            || self.http_client.is_some()
    }

    /// Parse an override from a loosely typed map (the `_config_` argument).
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::ConfigItemNotFound`] for an unregistered key and
    /// [`ErnieError::Configuration`] for a value of the wrong type.
    pub fn from_map(map: &Map<String, Value>) -> ErnieResult<Self> {
        let mut overrides = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "api_type" => overrides.api_type = Some(string_item(key, value)?.parse()?),
                "base_url" => overrides.base_url = Some(string_item(key, value)?),
                "access_token" => overrides.access_token = Some(string_item(key, value)?),
                "ak" => overrides.ak = Some(string_item(key, value)?),
                "sk" => overrides.sk = Some(string_item(key, value)?),
                "proxy" => overrides.proxy = Some(string_item(key, value)?),
                "timeout" => {
                    let secs = value.as_f64().filter(|s| *s > 0.0).ok_or_else(|| {
                        ErnieError::configuration_error("`timeout` must be a positive number")
                    })?;
                    overrides.timeout = Some(secs_to_duration(key, secs)?);
                }
                "max_retries" => {
                    let retries = value
                        .as_u64()
                        .and_then(|r| u32::try_from(r).ok())
                        .ok_or_else(|| {
                            ErnieError::configuration_error(
                                "`max_retries` must be a non-negative integer",
                            )
                        })?;
                    overrides.max_retries = Some(retries);
                }
                other => {
                    return Err(ConfigItemNotFound {
                        name: other.to_string(),
                    }
                    .into())
                }
            }
        }
        Ok(overrides)
    }
}

fn string_item(key: &str, value: &Value) -> ErnieResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ErnieError::configuration_error(format!("`{key}` must be a string")))
}
