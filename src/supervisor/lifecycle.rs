//! Load/unload state shared by the rewriter and the supervisor.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::events::{EventDispatcher, ExtensionEvent, UnloadEvent};

/// Created when the extension loads, flipped exactly once when it unloads.
#[derive(Debug)]
pub struct Lifecycle {
    active: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark the extension unloaded. Only the first caller gets `true` and is
    /// responsible for the teardown work.
    pub fn begin_unload(&self, reason: &str, events: &EventDispatcher) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }

        events.dispatch(ExtensionEvent::Unloaded(UnloadEvent {
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
        }));
        true
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
