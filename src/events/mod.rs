//! Event system for the interception layer.
//!
//! Per-request outcomes and spoofing server lifecycle changes are broadcast
//! to registered handlers. The host tool plugs its own error log in as an
//! [`EventHandler`]; [`LoggingHandler`] forwards everything to `log`.

use chrono::{DateTime, Utc};
use http::Method;
use std::sync::Arc;

/// A request was redirected to the spoofing proxy.
#[derive(Debug, Clone)]
pub struct RewriteEvent {
    pub method: Method,
    pub host: String,
    pub scheme: String,
    pub spoof_proxy: String,
    pub header_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// A request could not be rewritten; the host handles it on its own.
#[derive(Debug, Clone)]
pub struct AbandonedEvent {
    pub url: String,
    pub error: String,
    /// Set when the spoofing process reported the failure through the sentinel host.
    pub from_spoof_server: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ServerStartingEvent {
    pub address: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ServerExitEvent {
    pub address: String,
    /// `None` for a clean exit.
    pub error: Option<String>,
    pub fatal: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UnloadEvent {
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ExtensionEvent {
    RequestRewritten(RewriteEvent),
    RequestAbandoned(AbandonedEvent),
    ServerStarting(ServerStartingEvent),
    ServerExited(ServerExitEvent),
    Unloaded(UnloadEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &ExtensionEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: ExtensionEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &ExtensionEvent) {
        match event {
            ExtensionEvent::RequestRewritten(rewrite) => {
                log::debug!(
                    "{} {}://{} -> {} ({} headers)",
                    rewrite.method,
                    rewrite.scheme,
                    rewrite.host,
                    rewrite.spoof_proxy,
                    rewrite.header_count
                );
            }
            ExtensionEvent::RequestAbandoned(abandoned) => {
                if abandoned.from_spoof_server {
                    log::error!("spoofing server error: {}", abandoned.error);
                } else {
                    log::error!("Http request error: {} ({})", abandoned.error, abandoned.url);
                }
            }
            ExtensionEvent::ServerStarting(starting) => {
                log::info!("starting spoofing server on {}", starting.address);
            }
            ExtensionEvent::ServerExited(exit) => match (&exit.error, exit.fatal) {
                (None, _) => log::info!("spoofing server on {} exited", exit.address),
                (Some(error), false) => {
                    log::warn!("spoofing server on {} stopped: {}", exit.address, error)
                }
                (Some(error), true) => {
                    log::error!("spoofing server on {} failed: {}", exit.address, error)
                }
            },
            ExtensionEvent::Unloaded(unload) => {
                log::info!("extension unloaded: {}", unload.reason);
            }
        }
    }
}
