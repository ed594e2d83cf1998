//! Per-request configuration handed to the spoofing proxy.
//!
//! A [`TransportConfig`] is built for every intercepted request, serialized
//! once into the [`CONFIG_HEADER`] value, and thrown away. Field names on the
//! wire are fixed and every field is always present.

use serde::{Deserialize, Serialize};

/// Header carrying the serialized [`TransportConfig`] on rewritten requests.
///
/// The spoofing process looks the header up case-insensitively and strips it
/// before forwarding upstream.
pub const CONFIG_HEADER: &str = "Awesometlsconfig";

/// Reserved destination the spoofing process uses to report its own failures.
/// A request addressed here carries the error text as its body.
pub const ERROR_SENTINEL_HOST: &str = "awesome-tls-error";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransportConfig {
    pub host: String,
    pub scheme: String,
    /// Header names in wire order, duplicates and casing preserved.
    pub header_order: Vec<String>,
    pub fingerprint: String,
    pub hex_client_hello: String,
    pub use_intercepted_fingerprint: bool,
    /// Seconds.
    pub http_timeout: u64,
    pub burp_addr: String,
    pub intercept_proxy_addr: String,
}

impl TransportConfig {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn with_target(mut self, host: impl Into<String>, scheme: impl Into<String>) -> Self {
        self.host = host.into();
        self.scheme = scheme.into();
        self
    }

    pub fn with_header_order(mut self, header_order: Vec<String>) -> Self {
        self.header_order = header_order;
        self
    }
}
