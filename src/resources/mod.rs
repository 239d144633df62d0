//! Concrete API resources.
//!
//! Every resource follows the same three steps:
//!
//! 1. validate typed parameters (or a loose keyword map via `from_kwargs`),
//! 2. `prepare_create`: pure translation into a [`Request`],
//! 3. `create` / `create_blocking`: dispatch through [`Resource`](crate::Resource)
//!    and wrap the envelope into a typed response.
//!
//! Optional parameters that were not given are left out of the request body.

pub mod chat_completion;
pub mod embedding;
pub mod fine_tuning;
pub mod image;

use crate::config::{ApiType, ConfigOverride};
use crate::error::{ErnieError, ErnieResult};
use crate::request::Request;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Keyword arguments accepted by every resource in addition to its own.
pub(crate) const COMMON_KWARGS: &[&str] = &["headers", "request_timeout", "_config_"];

/// Per-call settings that are not part of the request body.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Applied on top of the resource's configuration for this call only.
    pub config: Option<ConfigOverride>,
    /// Extra HTTP headers.
    pub headers: BTreeMap<String, String>,
    /// Network timeout for this call.
    pub request_timeout: Option<Duration>,
}

impl CallOptions {
    pub(crate) fn from_kwargs(kwargs: &Map<String, Value>) -> ErnieResult<Self> {
        let config = match kwargs.get("_config_") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(ConfigOverride::from_map(map)?),
            Some(_) => {
                return Err(ErnieError::invalid_argument(
                    "`_config_` must be a mapping of configuration items",
                ))
            }
        };
        let request_timeout = optional::<f64>(kwargs, "request_timeout")?
            .map(|secs| {
                Duration::try_from_secs_f64(secs)
                    .ok()
                    .filter(|_| secs > 0.0)
                    .ok_or_else(|| {
                        ErnieError::invalid_argument(
                            "`request_timeout` must be a positive number of seconds",
                        )
                    })
            })
            .transpose()?;

        Ok(Self {
            config,
            headers: optional(kwargs, "headers")?.unwrap_or_default(),
            request_timeout,
        })
    }

    pub(crate) fn apply(&self, mut request: Request) -> Request {
        for (name, value) in &self.headers {
            request = request.with_header(name, value.clone());
        }
        if self.request_timeout.is_some() {
            request = request.with_timeout(self.request_timeout);
        }
        request
    }
}

/// Reject keys outside `own` and [`COMMON_KWARGS`].
pub(crate) fn check_kwargs(kwargs: &Map<String, Value>, own: &[&str]) -> ErnieResult<()> {
    for key in kwargs.keys() {
        if !own.contains(&key.as_str()) && !COMMON_KWARGS.contains(&key.as_str()) {
            let mut valid: Vec<&str> = own.iter().chain(COMMON_KWARGS).copied().collect();
            valid.sort_unstable();
            return Err(ErnieError::invalid_argument(format!(
                "Unexpected argument `{key}`. Valid arguments: {}",
                valid.join(", ")
            )));
        }
    }
    Ok(())
}

pub(crate) fn required<T: DeserializeOwned>(kwargs: &Map<String, Value>, name: &str) -> ErnieResult<T> {
    optional(kwargs, name)?.ok_or_else(|| ErnieError::argument_not_found(name))
}

/// `null` counts as absent.
pub(crate) fn optional<T: DeserializeOwned>(
    kwargs: &Map<String, Value>,
    name: &str,
) -> ErnieResult<Option<T>> {
    match kwargs.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| ErnieError::invalid_argument(format!("Invalid value for `{name}`: {e}"))),
    }
}

pub(crate) fn require_non_empty(name: &str, value: &str) -> ErnieResult<()> {
    if value.trim().is_empty() {
        return Err(ErnieError::argument_not_found(name));
    }
    Ok(())
}

pub(crate) fn check_range(name: &str, value: Option<f64>, valid: impl Fn(f64) -> bool, range: &str) -> ErnieResult<()> {
    match value {
        Some(v) if !valid(v) => Err(ErnieError::invalid_argument(format!(
            "`{name}` must be in {range}, got {v}"
        ))),
        _ => Ok(()),
    }
}

/// Static model-name to path table of one resource.
#[derive(Debug)]
pub(crate) struct ModelTable {
    pub resource: &'static str,
    pub api_types: &'static [ApiType],
    pub models: &'static [(&'static str, &'static str)],
}

impl ModelTable {
    pub(crate) fn check_api_type(&self, api_type: ApiType) -> ErnieResult<()> {
        if self.api_types.contains(&api_type) {
            return Ok(());
        }
        Err(ErnieError::configuration_error(format!(
            "{} is not available for api type `{api_type}`",
            self.resource
        )))
    }

    pub(crate) fn path(&self, api_type: ApiType, model: &str) -> ErnieResult<&'static str> {
        self.check_api_type(api_type)?;
        self.models
            .iter()
            .find(|(name, _)| *name == model)
            .map(|(_, path)| *path)
            .ok_or_else(|| {
                let supported: Vec<&str> = self.models.iter().map(|(name, _)| *name).collect();
                ErnieError::invalid_argument(format!(
                    "{model} is not a supported model for {}. Supported models: {}",
                    self.resource,
                    supported.join(", ")
                ))
            })
    }

    pub(crate) fn model_names(&self) -> Vec<&'static str> {
        self.models.iter().map(|(name, _)| *name).collect()
    }
}

/// Insert `value` under `key` unless it is absent.
pub(crate) fn insert_opt<T: Into<Value>>(body: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        body.insert(key.to_string(), value.into());
    }
}
