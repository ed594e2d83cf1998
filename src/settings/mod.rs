//! Durable user settings with typed accessors.
//!
//! Settings are persisted as plain strings under a fixed set of keys so the
//! store stays compatible with any flat key/value backend. Typed views parse
//! on every read; a malformed stored value surfaces as
//! [`SettingsError::Parse`] instead of being coerced.

mod store;

pub use store::{MemoryPreferences, PreferenceStore, RedbPreferences, StoreError};

use std::fmt;
use std::num::ParseIntError;
use std::sync::Arc;

use thiserror::Error;

use crate::external_deps::spoof_server::{SpoofServer, SpoofServerError};
use crate::transport::TransportConfig;

pub const DEFAULT_SPOOF_PROXY_ADDRESS: &str = "127.0.0.1:8887";
pub const DEFAULT_INTERCEPT_PROXY_ADDRESS: &str = "127.0.0.1:8886";
pub const DEFAULT_BURP_PROXY_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_HTTP_TIMEOUT: &str = "30";
pub const DEFAULT_TLS_FINGERPRINT: &str = "default";

/// The fixed set of persisted settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    SpoofProxyAddress,
    InterceptProxyAddress,
    BurpProxyAddress,
    Fingerprint,
    HexClientHello,
    UseInterceptedFingerprint,
    HttpTimeout,
}

impl SettingKey {
    pub const ALL: [SettingKey; 7] = [
        SettingKey::SpoofProxyAddress,
        SettingKey::InterceptProxyAddress,
        SettingKey::BurpProxyAddress,
        SettingKey::Fingerprint,
        SettingKey::HexClientHello,
        SettingKey::UseInterceptedFingerprint,
        SettingKey::HttpTimeout,
    ];

    /// Name the value is persisted under.
    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::SpoofProxyAddress => "SpoofProxyAddress",
            SettingKey::InterceptProxyAddress => "InterceptProxyAddress",
            SettingKey::BurpProxyAddress => "BurpProxyAddress",
            SettingKey::Fingerprint => "Fingerprint",
            SettingKey::HexClientHello => "HexClientHello",
            SettingKey::UseInterceptedFingerprint => "UseInterceptedFingerprint",
            SettingKey::HttpTimeout => "HttpTimeout",
        }
    }

    /// Value written on first run when nothing (or an empty string) is stored.
    pub fn default_value(self) -> &'static str {
        match self {
            SettingKey::SpoofProxyAddress => DEFAULT_SPOOF_PROXY_ADDRESS,
            SettingKey::InterceptProxyAddress => DEFAULT_INTERCEPT_PROXY_ADDRESS,
            SettingKey::BurpProxyAddress => DEFAULT_BURP_PROXY_ADDRESS,
            SettingKey::Fingerprint => DEFAULT_TLS_FINGERPRINT,
            SettingKey::HexClientHello => "",
            SettingKey::UseInterceptedFingerprint => "false",
            SettingKey::HttpTimeout => DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("setting {key} holds malformed value {value:?}: {source}")]
    Parse {
        key: SettingKey,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to list fingerprints: {0}")]
    Fingerprints(#[from] SpoofServerError),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Typed façade over a [`PreferenceStore`].
#[derive(Clone)]
pub struct Settings {
    storage: Arc<dyn PreferenceStore>,
}

impl Settings {
    /// Wrap `storage` and fill in defaults for any absent or empty key.
    pub fn new(storage: Arc<dyn PreferenceStore>) -> SettingsResult<Self> {
        let settings = Self { storage };
        settings.apply_defaults()?;
        Ok(settings)
    }

    /// Idempotent: keys that already hold a value are left alone.
    pub fn apply_defaults(&self) -> SettingsResult<()> {
        for key in SettingKey::ALL {
            let current = self.read(key);
            let missing = current.as_deref().is_none_or(str::is_empty);
            if missing && current.as_deref() != Some(key.default_value()) {
                log::debug!("defaulting setting {key} to {:?}", key.default_value());
                self.write(key, key.default_value())?;
            }
        }
        Ok(())
    }

    pub fn read(&self, key: SettingKey) -> Option<String> {
        self.storage.get_string(key.as_str())
    }

    pub fn write(&self, key: SettingKey, value: &str) -> SettingsResult<()> {
        self.storage.set_string(key.as_str(), value)?;
        Ok(())
    }

    fn read_or_default(&self, key: SettingKey) -> String {
        self.read(key)
            .unwrap_or_else(|| key.default_value().to_string())
    }

    pub fn spoof_proxy_address(&self) -> String {
        self.read_or_default(SettingKey::SpoofProxyAddress)
    }

    pub fn set_spoof_proxy_address(&self, address: &str) -> SettingsResult<()> {
        self.write(SettingKey::SpoofProxyAddress, address)
    }

    pub fn intercept_proxy_address(&self) -> String {
        self.read_or_default(SettingKey::InterceptProxyAddress)
    }

    pub fn set_intercept_proxy_address(&self, address: &str) -> SettingsResult<()> {
        self.write(SettingKey::InterceptProxyAddress, address)
    }

    pub fn burp_proxy_address(&self) -> String {
        self.read_or_default(SettingKey::BurpProxyAddress)
    }

    pub fn set_burp_proxy_address(&self, address: &str) -> SettingsResult<()> {
        self.write(SettingKey::BurpProxyAddress, address)
    }

    pub fn fingerprint(&self) -> String {
        self.read_or_default(SettingKey::Fingerprint)
    }

    pub fn set_fingerprint(&self, fingerprint: &str) -> SettingsResult<()> {
        self.write(SettingKey::Fingerprint, fingerprint)
    }

    pub fn hex_client_hello(&self) -> String {
        self.read_or_default(SettingKey::HexClientHello)
    }

    pub fn set_hex_client_hello(&self, hex: &str) -> SettingsResult<()> {
        self.write(SettingKey::HexClientHello, hex)
    }

    /// Permissive: only a case-insensitive `true` reads as enabled.
    pub fn use_intercepted_fingerprint(&self) -> bool {
        self.read(SettingKey::UseInterceptedFingerprint)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    }

    pub fn set_use_intercepted_fingerprint(&self, enabled: bool) -> SettingsResult<()> {
        self.write(SettingKey::UseInterceptedFingerprint, &enabled.to_string())
    }

    /// Timeout in seconds the spoofing process applies to its own upstream connections.
    pub fn http_timeout(&self) -> SettingsResult<u64> {
        let value = self.read_or_default(SettingKey::HttpTimeout);
        value
            .trim()
            .parse::<u64>()
            .map_err(|source| SettingsError::Parse {
                key: SettingKey::HttpTimeout,
                value,
                source,
            })
    }

    pub fn set_http_timeout(&self, seconds: u64) -> SettingsResult<()> {
        self.write(SettingKey::HttpTimeout, &seconds.to_string())
    }

    /// Ask the spoofing process which fingerprint identifiers it knows.
    pub async fn fingerprints(&self, server: &dyn SpoofServer) -> SettingsResult<Vec<String>> {
        let catalog = server.list_fingerprints().await?;
        Ok(parse_fingerprint_catalog(&catalog))
    }

    /// Settings half of a [`TransportConfig`]; target fields are left empty.
    pub fn to_transport_config(&self) -> SettingsResult<TransportConfig> {
        Ok(TransportConfig {
            fingerprint: self.fingerprint(),
            hex_client_hello: self.hex_client_hello(),
            http_timeout: self.http_timeout()?,
            use_intercepted_fingerprint: self.use_intercepted_fingerprint(),
            burp_addr: self.burp_proxy_address(),
            intercept_proxy_addr: self.intercept_proxy_address(),
            ..TransportConfig::default()
        })
    }
}

fn parse_fingerprint_catalog(catalog: &str) -> Vec<String> {
    catalog
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
