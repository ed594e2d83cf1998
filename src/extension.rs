//! Extension orchestration.
//!
//! Wires the durable settings, the request rewriter, and the spoofing server
//! supervisor together. Loading starts the spoofing server in the background
//! and hands the host a request handler; unloading stops the server and turns
//! the handler into a pass-through.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::dispatch::{DispatchError, SpoofProxyClient, SpoofResponse};
use crate::events::{EventDispatcher, EventHandler, LoggingHandler};
use crate::external_deps::{CommandSpoofServer, SpoofServer};
use crate::rewriter::{InterceptedRequest, ProxyRequestHandler, RequestAction, RequestRewriter};
use crate::settings::{
	MemoryPreferences, PreferenceStore, RedbPreferences, Settings, SettingsError, StoreError,
};
use crate::supervisor::{Lifecycle, ProcessState, ProcessSupervisor};

/// Name of the spoofing proxy binary looked up on `PATH` when no server is configured.
pub const DEFAULT_SPOOF_BINARY: &str = "awesome-tls-server";

/// Result alias used across the orchestration layer.
pub type ExtensionResult<T> = Result<T, ExtensionError>;

/// High-level error surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum ExtensionError {
	#[error("settings error: {0}")]
	Settings(#[from] SettingsError),
	#[error("preference store error: {0}")]
	Store(#[from] StoreError),
	#[error("dispatch error: {0}")]
	Dispatch(#[from] DispatchError),
	#[error("extension must be loaded inside a tokio runtime: {0}")]
	NoRuntime(#[from] tokio::runtime::TryCurrentError),
	#[error("request was not rewritten; see the error log")]
	Abandoned,
}

/// Extension configuration used by the builder.
#[derive(Clone)]
pub struct ExtensionConfig {
	pub name: String,
	pub preferences: Option<Arc<dyn PreferenceStore>>,
	pub preferences_path: Option<PathBuf>,
	pub spoof_server: Option<Arc<dyn SpoofServer>>,
	pub event_handlers: Vec<Arc<dyn EventHandler>>,
	pub enable_logging: bool,
}

impl Default for ExtensionConfig {
	fn default() -> Self {
		Self {
			name: "Awesome TLS".to_string(),
			preferences: None,
			preferences_path: None,
			spoof_server: None,
			event_handlers: Vec::new(),
			enable_logging: true,
		}
	}
}

/// Fluent builder for [`Extension`].
pub struct ExtensionBuilder {
	config: ExtensionConfig,
}

impl ExtensionBuilder {
	pub fn new() -> Self {
		Self {
			config: ExtensionConfig::default(),
		}
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.config.name = name.into();
		self
	}

	/// Use a host-provided preference store. Takes precedence over a path.
	pub fn with_preferences(mut self, store: Arc<dyn PreferenceStore>) -> Self {
		self.config.preferences = Some(store);
		self
	}

	/// Persist settings in a redb database at `path`.
	pub fn with_preferences_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.config.preferences_path = Some(path.into());
		self
	}

	pub fn with_spoof_server(mut self, server: Arc<dyn SpoofServer>) -> Self {
		self.config.spoof_server = Some(server);
		self
	}

	/// Run the spoofing proxy from the binary at `program`.
	pub fn with_spoof_binary(mut self, program: impl Into<PathBuf>) -> Self {
		self.config.spoof_server = Some(Arc::new(CommandSpoofServer::new(program)));
		self
	}

	/// Register a handler; the host's error log plugs in here.
	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.config.event_handlers.push(handler);
		self
	}

	pub fn disable_logging(mut self) -> Self {
		self.config.enable_logging = false;
		self
	}

	pub fn load(self) -> ExtensionResult<Extension> {
		Extension::load(self.config)
	}
}

impl Default for ExtensionBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// A loaded extension instance.
pub struct Extension {
	name: String,
	settings: Settings,
	rewriter: Arc<RequestRewriter>,
	server: Arc<dyn SpoofServer>,
	supervisor: Arc<ProcessSupervisor>,
	lifecycle: Arc<Lifecycle>,
	events: Arc<EventDispatcher>,
	client: SpoofProxyClient,
	startup: Mutex<Option<JoinHandle<ProcessState>>>,
}

impl Extension {
	/// Obtain a builder to customise the extension.
	pub fn builder() -> ExtensionBuilder {
		ExtensionBuilder::new()
	}

	/// Build every component and start the spoofing server in the background.
	///
	/// Must be called from within a Tokio runtime.
	pub fn load(config: ExtensionConfig) -> ExtensionResult<Self> {
		tokio::runtime::Handle::try_current()?;

		let storage: Arc<dyn PreferenceStore> = match (config.preferences, config.preferences_path) {
			(Some(store), _) => store,
			(None, Some(path)) => Arc::new(RedbPreferences::open(path)?),
			(None, None) => {
				log::warn!("no preference store configured; settings will not persist");
				Arc::new(MemoryPreferences::new())
			}
		};
		let settings = Settings::new(storage)?;

		let mut events = EventDispatcher::new();
		if config.enable_logging {
			events.register_handler(Arc::new(LoggingHandler));
		}
		for handler in config.event_handlers {
			events.register_handler(handler);
		}
		let events = Arc::new(events);

		let server: Arc<dyn SpoofServer> = config
			.spoof_server
			.unwrap_or_else(|| Arc::new(CommandSpoofServer::new(DEFAULT_SPOOF_BINARY)));

		let lifecycle = Arc::new(Lifecycle::new());
		let rewriter = Arc::new(RequestRewriter::new(
			settings.clone(),
			lifecycle.clone(),
			events.clone(),
		));
		let supervisor = Arc::new(ProcessSupervisor::new(
			server.clone(),
			lifecycle.clone(),
			events.clone(),
		));
		let client = SpoofProxyClient::new()?;

		let startup = supervisor.start(settings.spoof_proxy_address());
		log::info!("{} loaded", config.name);

		Ok(Self {
			name: config.name,
			settings,
			rewriter,
			server,
			supervisor,
			lifecycle,
			events,
			client,
			startup: Mutex::new(startup),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Settings façade, also used by the host's settings UI.
	pub fn settings(&self) -> &Settings {
		&self.settings
	}

	/// Handler the host registers on its proxy request path.
	pub fn request_handler(&self) -> Arc<dyn ProxyRequestHandler> {
		self.rewriter.clone()
	}

	pub fn is_loaded(&self) -> bool {
		self.lifecycle.is_active()
	}

	pub fn process_state(&self) -> ProcessState {
		self.supervisor.state()
	}

	/// Fingerprint identifiers offered by the spoofing server.
	pub async fn fingerprints(&self) -> ExtensionResult<Vec<String>> {
		Ok(self.settings.fingerprints(self.server.as_ref()).await?)
	}

	/// Rewrite `request` and deliver it through the spoofing proxy.
	pub async fn send(&self, request: InterceptedRequest) -> ExtensionResult<SpoofResponse> {
		match self.rewriter.handle_request_to_be_sent(request) {
			RequestAction::Continue(rewritten) => Ok(self.client.send(&rewritten).await?),
			RequestAction::Abandon => Err(ExtensionError::Abandoned),
		}
	}

	/// Wait for the background startup task to finish and return its final state.
	pub async fn wait_for_server(&self) -> ProcessState {
		let handle = self
			.startup
			.lock()
			.expect("startup handle poisoned")
			.take();
		match handle {
			Some(handle) => match handle.await {
				Ok(state) => state,
				Err(err) => {
					log::error!("spoofing server task aborted: {err}");
					self.supervisor.state()
				}
			},
			None => self.supervisor.wait_for_exit().await,
		}
	}

	/// Stop the spoofing server and stop rewriting. Safe to call repeatedly
	/// and before the server finished starting.
	pub async fn unload(&self) {
		if self.lifecycle.begin_unload("unloaded by host", &self.events) {
			self.supervisor.stop().await;
		}
	}
}
