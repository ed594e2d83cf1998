//! Interception hook that redirects outbound requests to the spoofing proxy.
//!
//! For every request about to leave the host proxy the rewriter:
//! 1. Parses the declared destination and pulls out host and scheme.
//! 2. Turns a request addressed to [`ERROR_SENTINEL_HOST`] into an error
//!    whose message is the request body.
//! 3. Records header names in receipt order.
//! 4. Builds a [`TransportConfig`] from the current settings plus the
//!    request's own host, scheme and header order.
//! 5. Points the request at the spoofing proxy over HTTPS and appends the
//!    serialized config as [`CONFIG_HEADER`].
//!
//! Any failure abandons the rewrite for that request only; nothing partial
//! is ever handed back.

mod request;

pub use request::{HttpHeader, HttpService, InterceptedRequest};

use std::sync::Arc;

use http::HeaderValue;
use thiserror::Error;
use url::Url;

use crate::events::{AbandonedEvent, EventDispatcher, ExtensionEvent, RewriteEvent};
use crate::settings::{Settings, SettingsError};
use crate::supervisor::Lifecycle;
use crate::transport::{CONFIG_HEADER, ERROR_SENTINEL_HOST, TransportConfig};

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
    #[error("request url has no host")]
    MissingHost,
    /// Failure reported by the spoofing process; the message is the request body.
    #[error("{0}")]
    Sentinel(String),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("failed to serialize transport config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("transport config is not a valid value for header '{0}'")]
    InvalidHeader(&'static str),
    #[error("invalid spoof proxy address '{0}'")]
    InvalidSpoofAddress(String),
}

/// What the host should do with an intercepted request.
#[derive(Debug, Clone)]
pub enum RequestAction {
    /// Send this (possibly rewritten) request.
    Continue(InterceptedRequest),
    /// The hook gave up on the request; the host's own error handling applies.
    Abandon,
}

impl RequestAction {
    pub fn into_request(self) -> Option<InterceptedRequest> {
        match self {
            RequestAction::Continue(request) => Some(request),
            RequestAction::Abandon => None,
        }
    }
}

/// Hooks a host proxy calls on its own request path.
pub trait ProxyRequestHandler: Send + Sync {
    /// Called when the host first receives a request from the client.
    fn handle_request_received(&self, request: InterceptedRequest) -> RequestAction;

    /// Called just before the host sends a request upstream.
    fn handle_request_to_be_sent(&self, request: InterceptedRequest) -> RequestAction;
}

pub struct RequestRewriter {
    settings: Settings,
    lifecycle: Arc<Lifecycle>,
    events: Arc<EventDispatcher>,
}

impl RequestRewriter {
    pub fn new(settings: Settings, lifecycle: Arc<Lifecycle>, events: Arc<EventDispatcher>) -> Self {
        Self {
            settings,
            lifecycle,
            events,
        }
    }

    /// Rewrite `request` for the spoofing proxy, or explain why it cannot be.
    pub fn rewrite(&self, request: InterceptedRequest) -> Result<InterceptedRequest, RewriteError> {
        self.rewrite_with_config(request).map(|(rewritten, _)| rewritten)
    }

    fn rewrite_with_config(
        &self,
        request: InterceptedRequest,
    ) -> Result<(InterceptedRequest, TransportConfig), RewriteError> {
        let url = Url::parse(request.url())?;
        let host = url.host_str().ok_or(RewriteError::MissingHost)?;

        if host == ERROR_SENTINEL_HOST {
            return Err(RewriteError::Sentinel(
                String::from_utf8_lossy(request.body()).into_owned(),
            ));
        }

        let config = self
            .settings
            .to_transport_config()?
            .with_target(host, url.scheme())
            .with_header_order(request.header_names());

        let serialized = config.to_json()?;
        HeaderValue::from_str(&serialized).map_err(|_| RewriteError::InvalidHeader(CONFIG_HEADER))?;

        let service = spoof_service(&self.settings.spoof_proxy_address())?;
        let rewritten = request
            .with_service(service)
            .with_added_header(CONFIG_HEADER, serialized);
        Ok((rewritten, config))
    }
}

impl ProxyRequestHandler for RequestRewriter {
    fn handle_request_received(&self, request: InterceptedRequest) -> RequestAction {
        RequestAction::Continue(request)
    }

    fn handle_request_to_be_sent(&self, request: InterceptedRequest) -> RequestAction {
        if !self.lifecycle.is_active() {
            return RequestAction::Continue(request);
        }

        let url = request.url().to_string();
        let method = request.method().clone();

        match self.rewrite_with_config(request) {
            Ok((rewritten, config)) => {
                self.events.dispatch(ExtensionEvent::RequestRewritten(RewriteEvent {
                    method,
                    host: config.host,
                    scheme: config.scheme,
                    spoof_proxy: rewritten
                        .service()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                    header_count: config.header_order.len(),
                    timestamp: chrono::Utc::now(),
                }));
                RequestAction::Continue(rewritten)
            }
            Err(err) => {
                self.events.dispatch(ExtensionEvent::RequestAbandoned(AbandonedEvent {
                    url,
                    from_spoof_server: matches!(err, RewriteError::Sentinel(_)),
                    error: err.to_string(),
                    timestamp: chrono::Utc::now(),
                }));
                RequestAction::Abandon
            }
        }
    }
}

/// Secure service for a `host:port` spoof proxy address.
fn spoof_service(address: &str) -> Result<HttpService, RewriteError> {
    let invalid = || RewriteError::InvalidSpoofAddress(address.to_string());
    let url = Url::parse(&format!("https://{address}")).map_err(|_| invalid())?;
    let host = url.host_str().ok_or_else(invalid)?;
    let port = url.port_or_known_default().ok_or_else(invalid)?;
    Ok(HttpService::new(host, port, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{MemoryPreferences, SettingKey};
    use http::Method;

    fn rewriter() -> RequestRewriter {
        let settings = Settings::new(Arc::new(MemoryPreferences::new())).unwrap();
        RequestRewriter::new(
            settings,
            Arc::new(Lifecycle::new()),
            Arc::new(EventDispatcher::new()),
        )
    }

    fn browser_request() -> InterceptedRequest {
        InterceptedRequest::new(Method::GET, "https://example.com/login?next=%2F")
            .with_headers([
                HttpHeader::new("Host", "example.com"),
                HttpHeader::new("sec-ch-ua", "\"Chromium\";v=\"120\""),
                HttpHeader::new("User-Agent", "Mozilla/5.0"),
                HttpHeader::new("Accept", "*/*"),
                HttpHeader::new("cookie", "a=1"),
                HttpHeader::new("Cookie", "b=2"),
            ])
    }

    fn config_of(request: &InterceptedRequest) -> TransportConfig {
        let values: Vec<&str> = request.header_values(CONFIG_HEADER).collect();
        assert_eq!(values.len(), 1);
        TransportConfig::from_json(values[0]).unwrap()
    }

    #[test]
    fn redirects_to_spoof_proxy_with_config_header() {
        let rewriter = rewriter();
        let rewritten = rewriter.rewrite(browser_request()).unwrap();

        assert_eq!(
            rewritten.service(),
            Some(&HttpService::new("127.0.0.1", 8887, true))
        );
        assert_eq!(rewritten.url(), "https://example.com/login?next=%2F");

        let mut expected = rewriter.settings.to_transport_config().unwrap();
        expected.host = "example.com".into();
        expected.scheme = "https".into();
        expected.header_order = browser_request().header_names();
        assert_eq!(config_of(&rewritten), expected);
    }

    #[test]
    fn header_order_matches_receipt_order_exactly() {
        let rewritten = rewriter().rewrite(browser_request()).unwrap();
        let config = config_of(&rewritten);
        assert_eq!(
            config.header_order,
            vec!["Host", "sec-ch-ua", "User-Agent", "Accept", "cookie", "Cookie"]
        );
        assert_eq!(rewritten.headers().len(), 7);
        assert_eq!(rewritten.headers()[6].name, CONFIG_HEADER);
    }

    #[test]
    fn plain_http_target_keeps_its_scheme_in_config() {
        let request = InterceptedRequest::new(Method::POST, "http://intranet.local:8081/api")
            .with_headers([HttpHeader::new("Host", "intranet.local:8081")])
            .with_body("{}");
        let rewritten = rewriter().rewrite(request).unwrap();

        let config = config_of(&rewritten);
        assert_eq!(config.host, "intranet.local");
        assert_eq!(config.scheme, "http");
        assert!(rewritten.service().unwrap().secure);
        assert_eq!(rewritten.body().as_ref(), b"{}");
    }

    #[test]
    fn sentinel_host_raises_body_as_error() {
        let request = InterceptedRequest::new(Method::POST, "https://awesome-tls-error/")
            .with_body("Awesome TLS error: dial tcp: connection refused");
        match rewriter().rewrite(request) {
            Err(err @ RewriteError::Sentinel(_)) => {
                assert_eq!(err.to_string(), "Awesome TLS error: dial tcp: connection refused");
            }
            other => panic!("expected sentinel error, got {other:?}"),
        }
    }

    #[test]
    fn existing_config_header_is_appended_to() {
        let request = browser_request().with_added_header("awesometlsconfig", "{}");
        let rewritten = rewriter().rewrite(request).unwrap();

        let values: Vec<&str> = rewritten.header_values(CONFIG_HEADER).collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], "{}");
        let config = TransportConfig::from_json(values[1]).unwrap();
        assert_eq!(config.header_order.last().map(String::as_str), Some("awesometlsconfig"));
    }

    #[test]
    fn settings_changes_apply_to_next_request() {
        let rewriter = rewriter();
        rewriter.settings.set_spoof_proxy_address("localhost:9443").unwrap();
        rewriter.settings.set_fingerprint("firefox_117").unwrap();

        let rewritten = rewriter.rewrite(browser_request()).unwrap();
        assert_eq!(
            rewritten.service(),
            Some(&HttpService::new("localhost", 9443, true))
        );
        assert_eq!(config_of(&rewritten).fingerprint, "firefox_117");
    }

    #[test]
    fn failures_abandon_the_request() {
        let rewriter = rewriter();
        let relative = InterceptedRequest::new(Method::GET, "/no-host");
        assert!(matches!(
            rewriter.handle_request_to_be_sent(relative),
            RequestAction::Abandon
        ));

        rewriter.settings.write(SettingKey::HttpTimeout, "soon").unwrap();
        assert!(matches!(
            rewriter.rewrite(browser_request()),
            Err(RewriteError::Settings(SettingsError::Parse { .. }))
        ));
        assert!(
            rewriter
                .handle_request_to_be_sent(browser_request())
                .into_request()
                .is_none()
        );
    }

    #[test]
    fn bad_spoof_address_abandons() {
        let rewriter = rewriter();
        rewriter.settings.set_spoof_proxy_address("not an address").unwrap();
        assert!(matches!(
            rewriter.rewrite(browser_request()),
            Err(RewriteError::InvalidSpoofAddress(_))
        ));
    }

    #[test]
    fn non_header_safe_config_is_rejected() {
        let rewriter = rewriter();
        // serde_json leaves DEL unescaped and header values cannot carry it.
        rewriter.settings.set_hex_client_hello("16\u{7f}03").unwrap();
        assert!(matches!(
            rewriter.rewrite(browser_request()),
            Err(RewriteError::InvalidHeader(_))
        ));

        // obs-text is a legal header byte and goes through.
        rewriter.settings.set_hex_client_hello("16é03").unwrap();
        assert!(rewriter.rewrite(browser_request()).is_ok());
    }

    #[test]
    fn received_hook_and_inactive_extension_pass_through() {
        let rewriter = rewriter();
        let action = rewriter.handle_request_received(browser_request());
        assert!(action.into_request().unwrap().service().is_none());

        rewriter
            .lifecycle
            .begin_unload("test", &EventDispatcher::new());
        let untouched = rewriter
            .handle_request_to_be_sent(browser_request())
            .into_request()
            .unwrap();
        assert!(untouched.service().is_none());
        assert_eq!(untouched.header_values(CONFIG_HEADER).count(), 0);
    }
}
