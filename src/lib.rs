//! # awesome-tls-rs
//!
//! Routes a web proxy's outbound traffic through a local TLS fingerprint
//! spoofing proxy.
//!
//! Every request the host proxy is about to send is redirected to the
//! spoofing proxy and tagged with a serialized [`TransportConfig`] naming the
//! real target, the original header order, and the fingerprint to imitate.
//! The spoofing proxy performs the forged handshake and relays the response.
//!
//! ## Features
//!
//! - Header-order preserving request rewriting
//! - Durable settings with first-run defaults (redb)
//! - Supervised spoofing server with graceful/fatal exit classification
//! - Error back-channel from the spoofing server through intercepted traffic
//! - Optional reqwest client for hosts without their own HTTP stack
//!
//! ## Example
//!
//! ```no_run
//! use awesome_tls_rs::{Extension, InterceptedRequest, RequestAction};
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let extension = Extension::builder()
//!         .with_preferences_path("awesome-tls.redb")
//!         .with_spoof_binary("/usr/local/bin/awesome-tls-server")
//!         .load()?;
//!
//!     let handler = extension.request_handler();
//!     let request = InterceptedRequest::new(Method::GET, "https://example.com/");
//!     if let RequestAction::Continue(rewritten) = handler.handle_request_to_be_sent(request) {
//!         println!("sending to {:?}", rewritten.service());
//!     }
//!
//!     extension.unload().await;
//!     Ok(())
//! }
//! ```

mod extension;

pub mod dispatch;
pub mod events;
pub mod external_deps;
pub mod rewriter;
pub mod settings;
pub mod supervisor;
pub mod transport;

pub use crate::extension::{
	DEFAULT_SPOOF_BINARY,
	Extension,
	ExtensionBuilder,
	ExtensionConfig,
	ExtensionError,
	ExtensionResult,
};

pub use crate::dispatch::{DispatchError, SpoofProxyClient, SpoofResponse};

pub use crate::events::{
	AbandonedEvent,
	EventDispatcher,
	EventHandler,
	ExtensionEvent,
	LoggingHandler,
	RewriteEvent,
	ServerExitEvent,
	ServerStartingEvent,
	UnloadEvent,
};

pub use crate::external_deps::{
	CommandSpoofServer,
	SpoofServer,
	SpoofServerError,
	SpoofServerResult,
};

pub use crate::rewriter::{
	HttpHeader,
	HttpService,
	InterceptedRequest,
	ProxyRequestHandler,
	RequestAction,
	RequestRewriter,
	RewriteError,
};

pub use crate::settings::{
	MemoryPreferences,
	PreferenceStore,
	RedbPreferences,
	SettingKey,
	Settings,
	SettingsError,
	StoreError,
};

pub use crate::supervisor::{
	ExitClassification,
	Lifecycle,
	ProcessState,
	ProcessSupervisor,
	classify_exit,
};

pub use crate::transport::{CONFIG_HEADER, ERROR_SENTINEL_HOST, TransportConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
