//! Qianfan with `bce-auth-v1` request signing.
//!
//! Every request is signed with the secret key; there is no token to cache
//! or refresh.

use super::{prepare_base, Backend, ErrorTable, QIANFAN_ERRORS};
use crate::config::{ApiType, Config};
use crate::error::{ErnieError, ErnieResult};
use crate::http_client::{HttpClient, PreparedRequest};
use crate::logging::{log_debug, log_trace};
use crate::request::Request;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Url;
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Signatures stay valid for this many seconds.
pub const SIGNATURE_EXPIRATION_SECS: u32 = 1800;

const SIGNED_HEADERS: [&str; 3] = ["content-type", "host", "x-bce-date"];

/// RFC 3986 unreserved characters pass through.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const PATH: &AsciiSet = &UNRESERVED.remove(b'/');

/// Produces `bce-auth-v1` authorization headers.
#[derive(Clone)]
pub struct RequestSigner {
    ak: String,
    sk: String,
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("ak", &self.ak)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    pub fn new(ak: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            ak: ak.into(),
            sk: sk.into(),
        }
    }

    /// Sign `request` in place with the current time.
    pub fn sign(&self, request: &mut PreparedRequest) -> ErnieResult<()> {
        self.sign_at(request, Utc::now())
    }

    /// Sign `request` in place as of `timestamp`.
    ///
    /// Sets `host`, `x-bce-date` and `authorization`.
    pub fn sign_at(&self, request: &mut PreparedRequest, timestamp: DateTime<Utc>) -> ErnieResult<()> {
        let url = Url::parse(&request.url).map_err(|e| {
            ErnieError::configuration_error(format!("Invalid request URL {}: {e}", request.url))
        })?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ErnieError::configuration_error(format!(
                    "Request URL {} has no host",
                    request.url
                )))
            }
        };
        let date = timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string();

        request.headers.insert("host".to_string(), host);
        request.headers.insert("x-bce-date".to_string(), date.clone());

        let auth_prefix = format!("bce-auth-v1/{}/{date}/{SIGNATURE_EXPIRATION_SECS}", self.ak);
        let signing_key = hmac_hex(self.sk.as_bytes(), &auth_prefix)?;
        let path = percent_decode_str(url.path()).decode_utf8_lossy();
        let canonical = canonical_request(request, &path);
        let signature = hmac_hex(signing_key.as_bytes(), &canonical)?;
        encode_query_into_url(request);

        log_trace!(method = %request.method, path = url.path(), "Signed request");
        request.headers.insert(
            "authorization".to_string(),
            format!("{auth_prefix}/{}/{signature}", SIGNED_HEADERS.join(";")),
        );
        Ok(())
    }
}

fn hmac_hex(key: &[u8], message: &str) -> ErnieResult<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ErnieError::configuration_error(format!("Invalid signing key: {e}")))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

fn encode_pair((key, value): &(String, String)) -> String {
    format!("{}={}", encode(key), encode(value))
}

/// Move the query into the URL with the signer's encoding, so the
/// transport does not re-encode it (form encoding turns spaces into `+`).
fn encode_query_into_url(request: &mut PreparedRequest) {
    if request.query.is_empty() {
        return;
    }
    let query: Vec<String> = request.query.drain(..).map(|pair| encode_pair(&pair)).collect();
    let separator = if request.url.contains('?') { '&' } else { '?' };
    request.url = format!("{}{separator}{}", request.url, query.join("&"));
}

/// `METHOD\nURI\nQUERY\nHEADERS`
pub(crate) fn canonical_request(request: &PreparedRequest, path: &str) -> String {
    let uri = utf8_percent_encode(path, PATH).to_string();

    let mut query: Vec<String> = request
        .query
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("authorization"))
        .map(encode_pair)
        .collect();
    query.sort();

    let mut headers: Vec<String> = SIGNED_HEADERS
        .iter()
        .filter_map(|name| {
            request
                .headers
                .get(*name)
                .map(|value| format!("{}:{}", encode(name), encode(value.trim())))
        })
        .collect();
    headers.sort();

    format!(
        "{}\n{uri}\n{}\n{}",
        request.method.as_str(),
        query.join("&"),
        headers.join("\n")
    )
}

#[derive(Debug)]
pub struct QianfanIamBackend {
    base_url: String,
    http: HttpClient,
    signer: RequestSigner,
}

impl QianfanIamBackend {
    pub fn new(config: &Config, http: HttpClient) -> ErnieResult<Self> {
        let (Some(ak), Some(sk)) = (config.ak.as_deref(), config.sk.as_deref()) else {
            return Err(ErnieError::configuration_error(
                "Api type `qianfan_iam` requires ak and sk",
            ));
        };
        log_debug!(api_type = %ApiType::QianfanIam, "Initialized Qianfan IAM backend");

        Ok(Self {
            base_url: config.resolved_base_url()?,
            http: http.with_response_hook(QIANFAN_ERRORS.hook()),
            signer: RequestSigner::new(ak, sk),
        })
    }
}

#[async_trait]
impl Backend for QianfanIamBackend {
    fn api_type(&self) -> ApiType {
        ApiType::QianfanIam
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

    fn authorize(&self, request: &Request, _token: Option<&str>) -> ErnieResult<PreparedRequest> {
        let mut prepared = prepare_base(&self.base_url, request);
        self.signer.sign(&mut prepared)?;
        Ok(prepared)
    }
}
