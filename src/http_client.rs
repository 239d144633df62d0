//! Low-level HTTP transport.
//!
//! [`HttpClient`] performs exactly one HTTP exchange per call, in either an
//! async ([`HttpClient::send`]) or blocking ([`HttpClient::send_blocking`])
//! flavour. Both paths share the same decoding rules:
//!
//! - `text/event-stream` responses become a lazy sequence of envelopes, one
//!   per `data:` line, in the order the provider sent them.
//! - Any other response is read fully and decoded into one [`Envelope`].
//! - A non-200 status is rejected with [`ErnieError::HttpRequest`] before
//!   the optional [`ResponseHook`] runs.
//!
//! Streams own the underlying response. Dropping a stream or iterator,
//! exhausted or not, drops the response and releases the connection.

use crate::error::{ApiErrorDetails, ErnieError, ErnieResult};
use crate::internals::sse::{decode_event, parse_event_line, LineBuffer};
use crate::logging::{log_debug, log_trace, log_warn};
use crate::response::Envelope;
use futures_util::{Stream, StreamExt};
use once_cell::sync::OnceCell;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufRead, BufReader};
use std::iter::FusedIterator;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Post-processing applied to every decoded envelope (and stream chunk).
pub type ResponseHook = Arc<dyn Fn(Envelope) -> ErnieResult<Envelope> + Send + Sync>;

/// Async sequence of streamed envelopes.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = ErnieResult<Envelope>> + Send>>;

/// A fully resolved HTTP request, ready to send.
#[derive(Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
    pub stream: bool,
}

impl fmt::Debug for PreparedRequest {
    // Header values and query values may carry credentials.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field(
                "query",
                &self.query.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("has_body", &self.body.is_some())
            .field("timeout", &self.timeout)
            .field("stream", &self.stream)
            .finish()
    }
}

/// Result of an async exchange.
pub enum Transmission {
    Single(Envelope),
    Stream(EnvelopeStream),
}

impl fmt::Debug for Transmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(envelope) => f.debug_tuple("Single").field(envelope).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl Transmission {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// The single envelope of a non-streamed exchange.
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::ResponseParsing`] if the provider streamed.
    pub fn into_single(self) -> ErnieResult<Envelope> {
        match self {
            Self::Single(envelope) => Ok(envelope),
            Self::Stream(_) => Err(ErnieError::response_parsing_error(
                "Expected a single response but the provider returned an event stream",
            )),
        }
    }

    /// View any exchange as a stream; a single envelope yields once.
    pub fn into_stream(self) -> EnvelopeStream {
        match self {
            Self::Single(envelope) => Box::pin(futures_util::stream::iter([Ok(envelope)])),
            Self::Stream(stream) => stream,
        }
    }
}

/// Result of a blocking exchange.
#[derive(Debug)]
pub enum BlockingTransmission {
    Single(Envelope),
    Stream(EnvelopeIter),
}

impl BlockingTransmission {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// # Errors
    ///
    /// Returns [`ErnieError::ResponseParsing`] if the provider streamed.
    pub fn into_single(self) -> ErnieResult<Envelope> {
        match self {
            Self::Single(envelope) => Ok(envelope),
            Self::Stream(_) => Err(ErnieError::response_parsing_error(
                "Expected a single response but the provider returned an event stream",
            )),
        }
    }

    pub fn into_envelopes(self) -> EnvelopeIter {
        match self {
            Self::Single(envelope) => EnvelopeIter::once(envelope),
            Self::Stream(iter) => iter,
        }
    }
}

/// HTTP session shared by all calls of a resource.
///
/// Cloning is cheap and shares the connection pools. The async pool is
/// built eagerly; the blocking pool on first blocking use.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    blocking: Arc<OnceCell<reqwest::blocking::Client>>,
    proxy: Option<String>,
    hook: Option<ResponseHook>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("proxy", &self.proxy)
            .field("blocking_ready", &self.blocking.get().is_some())
            .field("has_response_hook", &self.hook.is_some())
            .finish()
    }
}

impl HttpClient {
    /// Create a client without a proxy.
    pub fn new() -> ErnieResult<Self> {
        Self::with_proxy(None)
    }

    /// Create a client routing all traffic through `proxy`.
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::Configuration`] if the proxy URL is invalid or
    /// the TLS backend cannot be initialised.
    pub fn with_proxy(proxy: Option<&str>) -> ErnieResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy_url) = proxy {
            builder = builder.proxy(build_proxy(proxy_url)?);
        }
        let client = builder.build().map_err(|e| {
            ErnieError::configuration_error(format!("Failed to build HTTP client: {e}"))
        })?;

        Ok(Self {
            client,
            blocking: Arc::new(OnceCell::new()),
            proxy: proxy.map(str::to_string),
            hook: None,
        })
    }

    /// A handle on the same pools that post-processes every envelope.
    pub fn with_response_hook(&self, hook: ResponseHook) -> Self {
        Self {
            hook: Some(hook),
            ..self.clone()
        }
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Send one request asynchronously.
    pub async fn send(&self, request: &PreparedRequest) -> ErnieResult<Transmission> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        log_debug!(
            method = %request.method,
            url = %request.url,
            stream = request.stream,
            "Sending HTTP request"
        );
        let started = Instant::now();
        let response = builder.send().await.map_err(translate_error)?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        log_debug!(
            status = status,
            elapsed_ms = started.elapsed().as_millis(),
            "Received HTTP response"
        );

        if status == 200 && is_event_stream(response.headers()) {
            let state = EventState {
                body: Box::pin(response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()))),
                buffer: LineBuffer::default(),
                ended: false,
                status,
                headers,
                hook: self.hook.clone(),
            };
            return Ok(Transmission::Stream(Box::pin(
                futures_util::stream::unfold(state, next_event),
            )));
        }

        let text = response.text().await.map_err(|e| {
            ErnieError::response_parsing_error(format!("Failed to read response body: {e}"))
        })?;
        let envelope = interpret_body(status, text, headers)?;
        self.apply_hook(envelope).map(Transmission::Single)
    }

    /// Send one request on the caller's thread.
    ///
    /// Must not be called from inside an async runtime worker; the async
    /// surface offloads blocking work with `spawn_blocking` instead.
    pub fn send_blocking(&self, request: &PreparedRequest) -> ErnieResult<BlockingTransmission> {
        let client = self.blocking_client()?;
        let mut builder = client
            .request(request.method.clone(), &request.url)
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        log_debug!(
            method = %request.method,
            url = %request.url,
            stream = request.stream,
            "Sending blocking HTTP request"
        );
        let started = Instant::now();
        let response = builder.send().map_err(translate_error)?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        log_debug!(
            status = status,
            elapsed_ms = started.elapsed().as_millis(),
            "Received HTTP response"
        );

        if status == 200 && is_event_stream(response.headers()) {
            return Ok(BlockingTransmission::Stream(EnvelopeIter {
                source: IterSource::Lines {
                    reader: BufReader::new(response),
                    status,
                    headers,
                    hook: self.hook.clone(),
                },
            }));
        }

        let text = response.text().map_err(|e| {
            ErnieError::response_parsing_error(format!("Failed to read response body: {e}"))
        })?;
        let envelope = interpret_body(status, text, headers)?;
        self.apply_hook(envelope).map(BlockingTransmission::Single)
    }

    fn blocking_client(&self) -> ErnieResult<&reqwest::blocking::Client> {
        self.blocking.get_or_try_init(|| {
            let mut builder = reqwest::blocking::Client::builder().timeout(None::<Duration>);
            if let Some(proxy_url) = self.proxy.as_deref() {
                builder = builder.proxy(build_proxy(proxy_url)?);
            }
            builder.build().map_err(|e| {
                ErnieError::configuration_error(format!("Failed to build blocking HTTP client: {e}"))
            })
        })
    }

    fn apply_hook(&self, envelope: Envelope) -> ErnieResult<Envelope> {
        match &self.hook {
            Some(hook) => hook(envelope),
            None => Ok(envelope),
        }
    }
}

fn build_proxy(proxy_url: &str) -> ErnieResult<reqwest::Proxy> {
    reqwest::Proxy::all(proxy_url)
        .map_err(|e| ErnieError::configuration_error(format!("Invalid proxy URL {proxy_url}: {e}")))
}

fn translate_error(error: reqwest::Error) -> ErnieError {
    if error.is_timeout() {
        ErnieError::timeout(format!("HTTP request timed out: {error}"))
    } else {
        ErnieError::connection(format!("HTTP request failed: {error}"), Some(Box::new(error)))
    }
}

fn translate_io_error(error: std::io::Error) -> ErnieError {
    if error.kind() == std::io::ErrorKind::TimedOut {
        ErnieError::timeout(format!("Reading event stream timed out: {error}"))
    } else {
        ErnieError::connection(format!("Event stream broke: {error}"), Some(Box::new(error)))
    }
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}

/// Decode a complete body and reject non-200 statuses.
pub(crate) fn interpret_body(
    status: u16,
    text: String,
    headers: BTreeMap<String, String>,
) -> ErnieResult<Envelope> {
    if status != 200 {
        return Err(ErnieError::http_request(
            ApiErrorDetails::new(format!("Provider responded with HTTP {status}"))
                .with_status(status)
                .with_body(text)
                .with_headers(headers),
        ));
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => Envelope::new(status, json, headers),
        Err(_) => Ok(Envelope::from_text(status, text, headers)),
    }
}

fn event_envelope(
    data: &str,
    status: u16,
    headers: &BTreeMap<String, String>,
    hook: Option<&ResponseHook>,
) -> ErnieResult<Envelope> {
    log_trace!(bytes = data.len(), "Parsed stream event");
    let envelope = match decode_event(data) {
        Value::String(text) => Envelope::from_text(status, text, headers.clone()),
        json => Envelope::new(status, json, headers.clone())?,
    };
    match hook {
        Some(hook) => hook(envelope),
        None => Ok(envelope),
    }
}

struct EventState {
    body: Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>,
    buffer: LineBuffer,
    ended: bool,
    status: u16,
    headers: BTreeMap<String, String>,
    hook: Option<ResponseHook>,
}

async fn next_event(mut state: EventState) -> Option<(ErnieResult<Envelope>, EventState)> {
    loop {
        while let Some(line) = state.buffer.next_line() {
            if let Some(data) = parse_event_line(&line) {
                let item = event_envelope(data, state.status, &state.headers, state.hook.as_ref());
                return Some((item, state));
            }
        }

        if state.ended {
            let rest = state.buffer.finish()?;
            let data = parse_event_line(&rest)?;
            let item = event_envelope(data, state.status, &state.headers, state.hook.as_ref());
            return Some((item, state));
        }

        match state.body.next().await {
            Some(Ok(chunk)) => state.buffer.push(&chunk),
            Some(Err(e)) => {
                log_warn!(error = %e, "Event stream interrupted");
                state.ended = true;
                state.buffer = LineBuffer::default();
                return Some((Err(translate_error(e)), state));
            }
            None => state.ended = true,
        }
    }
}

enum IterSource {
    Lines {
        reader: BufReader<reqwest::blocking::Response>,
        status: u16,
        headers: BTreeMap<String, String>,
        hook: Option<ResponseHook>,
    },
    Once(Envelope),
    Closed,
}

/// Blocking, forward-only sequence of envelopes.
///
/// The HTTP response is released as soon as the iterator is exhausted,
/// fails, is [closed](EnvelopeIter::close) or is dropped.
pub struct EnvelopeIter {
    source: IterSource,
}

impl fmt::Debug for EnvelopeIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.source {
            IterSource::Lines { .. } => "streaming",
            IterSource::Once(_) => "single",
            IterSource::Closed => "closed",
        };
        f.debug_struct("EnvelopeIter").field("state", &state).finish()
    }
}

impl EnvelopeIter {
    fn once(envelope: Envelope) -> Self {
        Self {
            source: IterSource::Once(envelope),
        }
    }

    /// Release the connection without reading the rest of the stream.
    pub fn close(&mut self) {
        self.source = IterSource::Closed;
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.source, IterSource::Closed)
    }
}

impl Iterator for EnvelopeIter {
    type Item = ErnieResult<Envelope>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (reader, status, headers, hook) = match &mut self.source {
                IterSource::Closed => return None,
                IterSource::Once(_) => {
                    let IterSource::Once(envelope) =
                        std::mem::replace(&mut self.source, IterSource::Closed)
                    else {
                        return None;
                    };
                    return Some(Ok(envelope));
                }
                IterSource::Lines {
                    reader,
                    status,
                    headers,
                    hook,
                } => (reader, *status, headers, hook),
            };

            let mut raw = Vec::new();
            match reader.read_until(b'\n', &mut raw) {
                Ok(0) => {
                    self.close();
                    return None;
                }
                Ok(_) => {
                    if raw.last() == Some(&b'\n') {
                        raw.pop();
                    }
                    let line = String::from_utf8_lossy(&raw);
                    if let Some(data) = parse_event_line(&line) {
                        return Some(event_envelope(data, status, headers, hook.as_ref()));
                    }
                }
                Err(e) => {
                    self.close();
                    return Some(Err(translate_io_error(e)));
                }
            }
        }
    }
}

impl FusedIterator for EnvelopeIter {}
