//! HTTPS transport for signed reports.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::codec::SignedEnvelope;
use crate::dispatch::DEFAULT_RESPONSE_BUFFER_BUDGET;
use crate::types::NodeIdentity;

pub const HEADER_SENSOR_ID: &str = "X-Sensor-Id";
pub const HEADER_TIMESTAMP: &str = "X-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Signature";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid header {0}: {1}")]
    InvalidHeader(String, String),
    #[error("Response body exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },
}

/// A fully framed report POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ReportRequest {
    /// Frame `envelope` for the identity's endpoint. The body is the payload
    /// bytes exactly.
    pub fn new(identity: &NodeIdentity, envelope: &SignedEnvelope) -> Self {
        let body = envelope.payload().to_string();
        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (HEADER_SENSOR_ID.to_string(), identity.sensor_id().to_string()),
            (HEADER_TIMESTAMP.to_string(), envelope.timestamp().to_string()),
            (HEADER_SIGNATURE.to_string(), envelope.signature().to_string()),
            ("Content-Length".to_string(), body.len().to_string()),
        ];

        Self {
            url: identity.endpoint(),
            headers,
            body,
        }
    }

    /// First value of header `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body returned by the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Sends one report and waits for the answer.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn post(&self, request: &ReportRequest) -> Result<TransportResponse, TransportError>;
}

/// Transport settings
#[derive(Debug, Clone)]
pub struct HttpsConfig {
    /// Overall request timeout
    pub timeout: Duration,
    /// Skip TLS certificate validation. Only for test collectors with
    /// self-signed certificates.
    pub accept_invalid_certs: bool,
    /// Largest response body read into memory
    pub max_response_bytes: usize,
}

impl Default for HttpsConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            accept_invalid_certs: false,
            max_response_bytes: DEFAULT_RESPONSE_BUFFER_BUDGET,
        }
    }
}

/// `reqwest`-backed HTTPS transport
pub struct HttpsTransport {
    client: reqwest::Client,
    max_response_bytes: usize,
}

impl HttpsTransport {
    pub fn new(config: &HttpsConfig) -> Result<Self, TransportError> {
        if config.accept_invalid_certs {
            warn!("⚠️ TLS certificate validation is DISABLED");
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .http1_title_case_headers()
            .build()?;

        Ok(Self {
            client,
            max_response_bytes: config.max_response_bytes,
        })
    }
}

impl Transport for HttpsTransport {
    async fn post(&self, request: &ReportRequest) -> Result<TransportResponse, TransportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidHeader(name.clone(), e.to_string()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidHeader(name.clone(), e.to_string()))?;
            headers.insert(header_name, header_value);
        }

        let mut resp = self
            .client
            .post(&request.url)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await?;

        let status = resp.status().as_u16();
        let limit = self.max_response_bytes;
        if resp.content_length().is_some_and(|len| len > limit as u64) {
            return Err(TransportError::ResponseTooLarge { limit });
        }

        let mut buf = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            append_capped(&mut buf, &chunk, limit)?;
        }
        let body = String::from_utf8_lossy(&buf).into_owned();
        debug!("📥 {} answered HTTP {} ({} bytes)", request.url, status, body.len());

        Ok(TransportResponse { status, body })
    }
}

/// Append `chunk` unless the body would grow past `limit`
fn append_capped(buf: &mut Vec<u8>, chunk: &[u8], limit: usize) -> Result<(), TransportError> {
    if buf.len() + chunk.len() > limit {
        return Err(TransportError::ResponseTooLarge { limit });
    }
    buf.extend_from_slice(chunk);
    Ok(())
}
