//! Test doubles shared by the unit tests.

use crate::auth::TokenCache;
use crate::backends::{prepare_base, Backend, ErrorTable, QIANFAN_ERRORS};
use crate::config::{ApiType, Config};
use crate::error::{ApiErrorDetails, ApiErrorKind, ErnieError, ErnieResult};
use crate::http_client::{BlockingTransmission, HttpClient, PreparedRequest, Transmission};
use crate::request::Request;
use crate::resource::Resource;
use crate::response::Envelope;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Produces the outcome of call number `n` (1-based).
pub type Responder = Box<dyn Fn(usize) -> ErnieResult<Envelope> + Send + Sync>;

/// Backend that answers from a closure instead of the network and records
/// every request it was asked to send.
pub struct StubBackend {
    http: HttpClient,
    calls: AtomicUsize,
    seen: Mutex<Vec<Request>>,
    responder: Responder,
}

impl fmt::Debug for StubBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubBackend")
            .field("calls", &self.calls())
            .finish()
    }
}

impl StubBackend {
    pub fn new(responder: impl Fn(usize) -> ErnieResult<Envelope> + Send + Sync + 'static) -> Self {
        Self {
            http: HttpClient::new().expect("http client"),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Request> {
        self.seen.lock().expect("seen lock").last().cloned()
    }

    fn answer(&self, request: &Request) -> ErnieResult<Envelope> {
        self.seen.lock().expect("seen lock").push(request.clone());
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.responder)(call)
    }
}

#[async_trait]
impl Backend for StubBackend {
    fn api_type(&self) -> ApiType {
        ApiType::Qianfan
    }

    fn base_url(&self) -> &str {
        "http://stub.invalid"
    }

    fn http(&self) -> &HttpClient {
        &self.http
    }

    fn error_table(&self) -> &'static ErrorTable {
        &QIANFAN_ERRORS
    }

    fn authorize(&self, request: &Request, _token: Option<&str>) -> ErnieResult<PreparedRequest> {
        Ok(prepare_base(self.base_url(), request))
    }

    async fn request(&self, request: &Request) -> ErnieResult<Transmission> {
        self.answer(request).map(Transmission::Single)
    }

    fn request_blocking(&self, request: &Request) -> ErnieResult<BlockingTransmission> {
        self.answer(request).map(BlockingTransmission::Single)
    }
}

/// Config with its own token cache so tests never share tokens.
pub fn isolated_config(api_type: ApiType) -> Config {
    Config::new(api_type).with_token_cache(Arc::new(TokenCache::new(Duration::ZERO)))
}

/// Resource over a [`StubBackend`], plus a handle on the stub.
pub fn stub_resource(
    policy: RetryPolicy,
    responder: impl Fn(usize) -> ErnieResult<Envelope> + Send + Sync + 'static,
) -> (Resource, Arc<StubBackend>) {
    let backend = Arc::new(StubBackend::new(responder));
    let config = isolated_config(ApiType::Qianfan).with_retry_policy(policy);
    let resource = Resource::with_backend(config, Arc::clone(&backend) as Arc<dyn Backend>);
    (resource, backend)
}

/// Retries quickly so tests stay fast.
pub fn fast_retry_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        min_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        ..Default::default()
    }
}

pub fn envelope(body: Value) -> Envelope {
    Envelope::new(200, body, BTreeMap::new()).expect("valid envelope")
}

pub fn try_again() -> ErnieError {
    ApiErrorKind::TryAgain.into_error(
        ApiErrorDetails::new("Server busy, please retry").with_error_code(336100),
    )
}

pub fn bad_request() -> ErnieError {
    ApiErrorKind::BadRequest
        .into_error(ApiErrorDetails::new("Invalid argument").with_error_code(336003))
}
