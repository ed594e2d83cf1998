//! Spoofing server supervision.
//!
//! The supervisor is the single owner of the spoofing process. It starts the
//! server on a background task so interception never waits on it, classifies
//! how the server ended, and tears the whole extension down when the exit was
//! not one of the expected ones.

mod lifecycle;

pub use lifecycle::Lifecycle;

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::events::{EventDispatcher, ExtensionEvent, ServerExitEvent, ServerStartingEvent};
use crate::external_deps::spoof_server::{SpoofServer, SpoofServerError};

/// Exit messages that mean the server went away on purpose or could not
/// bind because another instance already owns the port.
static GRACEFUL_EXIT_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"server stopped|address already in use")
        .case_insensitive(true)
        .build()
        .expect("valid graceful exit regex")
});

/// Observable state of the supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    StoppedGracefully,
    Failed(String),
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::StoppedGracefully | ProcessState::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClassification {
    Graceful,
    Fatal,
}

/// Classify an error message returned by the spoofing server.
pub fn classify_exit(message: &str) -> ExitClassification {
    if GRACEFUL_EXIT_RE.is_match(message) {
        ExitClassification::Graceful
    } else {
        ExitClassification::Fatal
    }
}

/// Owns the spoofing server and drives `NotStarted -> Running -> {StoppedGracefully | Failed}`.
pub struct ProcessSupervisor {
    server: Arc<dyn SpoofServer>,
    lifecycle: Arc<Lifecycle>,
    events: Arc<EventDispatcher>,
    state: watch::Sender<ProcessState>,
}

impl ProcessSupervisor {
    pub fn new(
        server: Arc<dyn SpoofServer>,
        lifecycle: Arc<Lifecycle>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        let (state, _) = watch::channel(ProcessState::NotStarted);
        Self {
            server,
            lifecycle,
            events,
            state,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    /// Launch the server on a background task.
    ///
    /// Returns `None` when the server was already started. The returned
    /// handle resolves to the terminal state once classification and, for a
    /// fatal exit, the unload have completed.
    pub fn start(self: &Arc<Self>, address: impl Into<String>) -> Option<JoinHandle<ProcessState>> {
        let address = address.into();
        let claimed = self.state.send_if_modified(|state| {
            if *state == ProcessState::NotStarted {
                *state = ProcessState::Running;
                true
            } else {
                false
            }
        });
        if !claimed {
            log::warn!("spoofing server already started; ignoring start on {address}");
            return None;
        }

        self.events.dispatch(ExtensionEvent::ServerStarting(ServerStartingEvent {
            address: address.clone(),
            timestamp: chrono::Utc::now(),
        }));

        let supervisor = Arc::clone(self);
        Some(tokio::spawn(async move {
            let result = supervisor.server.start(&address).await;
            supervisor.finish(&address, result).await
        }))
    }

    async fn finish(&self, address: &str, result: Result<(), SpoofServerError>) -> ProcessState {
        let (next, error, fatal) = match result {
            Ok(()) => (ProcessState::StoppedGracefully, None, false),
            Err(err) => {
                let message = err.to_string();
                match classify_exit(&message) {
                    ExitClassification::Graceful => {
                        (ProcessState::StoppedGracefully, Some(message), false)
                    }
                    ExitClassification::Fatal => {
                        (ProcessState::Failed(message.clone()), Some(message), true)
                    }
                }
            }
        };

        self.state.send_replace(next.clone());
        self.events.dispatch(ExtensionEvent::ServerExited(ServerExitEvent {
            address: address.to_string(),
            error: error.clone(),
            fatal,
            timestamp: chrono::Utc::now(),
        }));

        if fatal {
            let reason = format!(
                "spoofing server failed: {}",
                error.as_deref().unwrap_or_default()
            );
            if self.lifecycle.begin_unload(&reason, &self.events) {
                self.stop().await;
            }
        }

        next
    }

    /// Ask the server to shut down. Errors are logged and swallowed.
    pub async fn stop(&self) {
        if *self.state.borrow() == ProcessState::NotStarted {
            log::debug!("spoofing server never started; nothing to stop");
            return;
        }

        if let Err(err) = self.server.stop().await {
            log::error!("failed to stop spoofing server: {err}");
        }
    }

    /// Wait until the server reaches a terminal state.
    pub async fn wait_for_exit(&self) -> ProcessState {
        let mut receiver = self.state.subscribe();
        match receiver.wait_for(ProcessState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }
}
