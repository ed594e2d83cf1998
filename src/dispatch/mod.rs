//! Reqwest-based delivery of rewritten requests to the spoofing proxy.
//!
//! Hosts that already own an HTTP stack send the rewritten request
//! themselves. [`SpoofProxyClient`] covers hosts that do not: it replays the
//! request against the spoofing proxy's address, keeping the original path,
//! headers and body, and hands back the proxied response.

use bytes::Bytes;
use http::HeaderMap;
use http::header::CONTENT_LENGTH;
use reqwest::redirect::Policy;
use reqwest::{Client, header};
use thiserror::Error;
use url::{Position, Url};

use crate::rewriter::InterceptedRequest;

/// Prefix the spoofing proxy puts on the body of its own 500 responses.
const SPOOF_ERROR_PREFIX: &str = "Awesome TLS error:";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("request has not been rewritten for the spoof proxy")]
    NotRewritten,
    #[error("header conversion failed: {0}")]
    InvalidHeader(String),
}

/// Response relayed back by the spoofing proxy.
#[derive(Debug, Clone)]
pub struct SpoofResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl SpoofResponse {
    /// Error text when the spoofing proxy failed to reach the real target.
    pub fn spoof_error(&self) -> Option<&str> {
        if self.status != 500 {
            return None;
        }
        std::str::from_utf8(&self.body)
            .ok()
            .filter(|text| text.starts_with(SPOOF_ERROR_PREFIX))
    }
}

pub struct SpoofProxyClient {
    client: Client,
}

impl SpoofProxyClient {
    /// The spoofing proxy serves a certificate from its own throwaway CA, so
    /// certificate verification is disabled for this hop only. Redirects are
    /// returned to the caller untouched.
    pub fn new() -> Result<Self, DispatchError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    /// Translate a rewritten request into a reqwest request aimed at its service.
    pub fn build_request(&self, request: &InterceptedRequest) -> Result<reqwest::Request, DispatchError> {
        let service = request.service().ok_or(DispatchError::NotRewritten)?;
        let original = Url::parse(request.url())?;
        let target = Url::parse(&format!(
            "{service}{}",
            &original[Position::BeforePath..Position::AfterQuery]
        ))?;

        let mut headers = header::HeaderMap::new();
        for entry in request.headers() {
            let name = header::HeaderName::from_bytes(entry.name.as_bytes())
                .map_err(|_| DispatchError::InvalidHeader(entry.name.clone()))?;
            // The body we attach determines the length.
            if name == CONTENT_LENGTH {
                continue;
            }
            let value = header::HeaderValue::from_str(&entry.value)
                .map_err(|_| DispatchError::InvalidHeader(entry.name.clone()))?;
            headers.append(name, value);
        }

        let mut builder = self.client.request(request.method().clone(), target).headers(headers);
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }
        Ok(builder.build()?)
    }

    pub async fn send(&self, request: &InterceptedRequest) -> Result<SpoofResponse, DispatchError> {
        let outgoing = self.build_request(request)?;
        log::debug!("dispatching {} {} to spoof proxy", outgoing.method(), outgoing.url());

        let response = self.client.execute(outgoing).await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        let relayed = SpoofResponse {
            status,
            headers,
            body,
        };
        if let Some(error) = relayed.spoof_error() {
            log::warn!("spoof proxy reported: {error}");
        }
        Ok(relayed)
    }
}
