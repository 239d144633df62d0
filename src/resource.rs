//! Shared machinery of every API resource.
//!
//! [`Resource`] owns the backend chosen for a [`Config`] and wraps each
//! dispatch in the configured [`RetryPolicy`](crate::retry::RetryPolicy).
//! It also drives long-polling of asynchronous provider jobs.

use crate::backends::{build_backend, Backend};
use crate::config::{ApiType, Config, ConfigOverride};
use crate::error::{ErnieError, ErnieResult};
use crate::http_client::{BlockingTransmission, HttpClient, Transmission};
use crate::logging::{log_debug, log_warn};
use crate::request::Request;
use crate::response::Envelope;
use crate::retry::RetryExecutor;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Fixed-interval polling bounded by an overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

#[derive(Clone)]
pub struct Resource {
    config: Config,
    http: HttpClient,
    backend: Arc<dyn Backend>,
    retry: RetryExecutor,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("api_type", &self.config.api_type)
            .field("backend", &self.backend)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Resource {
    /// Build a resource with its own HTTP session.
    pub fn new(config: Config) -> ErnieResult<Self> {
        let http = HttpClient::with_proxy(config.proxy.as_deref())?;
        Self::with_http(config, http)
    }

    /// Build a resource sending through an existing session.
    pub fn with_http(config: Config, http: HttpClient) -> ErnieResult<Self> {
        let backend = build_backend(&config, http.clone())?;
        Ok(Self {
            retry: RetryExecutor::new(config.retry_policy.clone()),
            config,
            http,
            backend,
        })
    }

    /// Build a resource around a ready-made backend.
    pub fn with_backend(config: Config, backend: Arc<dyn Backend>) -> Self {
        Self {
            retry: RetryExecutor::new(config.retry_policy.clone()),
            http: backend.http().clone(),
            config,
            backend,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn api_type(&self) -> ApiType {
        self.backend.api_type()
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// The resource to use for one call carrying `overrides`.
    ///
    /// Overrides touching provider, credentials, proxy or session rebuild
    /// the backend; timeout and retry overrides only adjust this copy.
    pub fn derive(&self, overrides: Option<&ConfigOverride>) -> ErnieResult<Cow<'_, Self>> {
        let Some(overrides) = overrides else {
            return Ok(Cow::Borrowed(self));
        };
        let config = self.config.merged(overrides);

        if !overrides.changes_backend() {
            return Ok(Cow::Owned(Self {
                retry: RetryExecutor::new(config.retry_policy.clone()),
                config,
                http: self.http.clone(),
                backend: Arc::clone(&self.backend),
            }));
        }

        log_debug!(
            api_type = %config.api_type,
            has_session = overrides.http_client.is_some(),
            "Applying per-call configuration override"
        );
        let http = match (&overrides.http_client, &overrides.proxy) {
            (Some(http), _) => http.clone(),
            (None, Some(proxy)) => HttpClient::with_proxy(Some(proxy))?,
            (None, None) => self.http.clone(),
        };
        Self::with_http(config, http).map(Cow::Owned)
    }

    fn with_default_timeout(&self, request: &Request) -> Request {
        request
            .clone()
            .with_timeout(request.timeout().or(self.config.timeout))
    }

    /// Dispatch `request`, retrying transient failures.
    pub async fn request(&self, request: &Request) -> ErnieResult<Transmission> {
        let request = self.with_default_timeout(request);
        self.retry
            .execute(|| self.backend.request(&request))
            .await
    }

    /// Blocking counterpart of [`Resource::request`].
    pub fn request_blocking(&self, request: &Request) -> ErnieResult<BlockingTransmission> {
        let request = self.with_default_timeout(request);
        self.retry
            .execute_blocking(|| self.backend.request_blocking(&request))
    }

    /// Re-send `request` every `policy.interval` until `is_done` accepts the
    /// response.
    ///
    /// # Errors
    ///
    /// Propagates request errors and errors returned by `is_done`; fails with
    /// [`ErnieError::Timeout`] once `policy.timeout` has elapsed.
    pub async fn poll<F>(&self, request: &Request, policy: PollPolicy, mut is_done: F) -> ErnieResult<Envelope>
    where
        F: FnMut(&Envelope) -> ErnieResult<bool>,
    {
        let started = tokio::time::Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let envelope = self.request(request).await?.into_single()?;
            if is_done(&envelope)? {
                log_debug!(attempt = attempt, "Polled job finished");
                return Ok(envelope);
            }
            check_poll_deadline(started.elapsed(), policy, attempt)?;
            tokio::time::sleep(policy.interval).await;
        }
    }

    /// Blocking counterpart of [`Resource::poll`].
    pub fn poll_blocking<F>(&self, request: &Request, policy: PollPolicy, mut is_done: F) -> ErnieResult<Envelope>
    where
        F: FnMut(&Envelope) -> ErnieResult<bool>,
    {
        let started = std::time::Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let envelope = self.request_blocking(request)?.into_single()?;
            if is_done(&envelope)? {
                log_debug!(attempt = attempt, "Polled job finished");
                return Ok(envelope);
            }
            check_poll_deadline(started.elapsed(), policy, attempt)?;
            std::thread::sleep(policy.interval);
        }
    }
}

fn check_poll_deadline(elapsed: Duration, policy: PollPolicy, attempt: u32) -> ErnieResult<()> {
    if elapsed >= policy.timeout {
        log_warn!(
            attempts = attempt,
            timeout_secs = policy.timeout.as_secs_f64(),
            "Polling deadline reached"
        );
        return Err(ErnieError::timeout(format!(
            "Job did not finish within {:.1}s ({attempt} polls)",
            policy.timeout.as_secs_f64()
        )));
    }
    log_debug!(
        attempt = attempt,
        interval_ms = policy.interval.as_millis(),
        "Job still running, polling again"
    );
    Ok(())
}
