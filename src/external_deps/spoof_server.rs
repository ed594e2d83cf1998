//! Control surface of the spoofing proxy process.

use async_trait::async_trait;
use thiserror::Error;

/// Operations the spoofing process exposes to its supervisor.
#[async_trait]
pub trait SpoofServer: Send + Sync {
    /// Bind to `address` and serve until the server terminates.
    ///
    /// Resolves only once the server is no longer running. `Ok(())` means it
    /// shut down cleanly; an error carries the reason it stopped.
    async fn start(&self, address: &str) -> Result<(), SpoofServerError>;

    /// Ask a running server to shut down.
    async fn stop(&self) -> Result<(), SpoofServerError>;

    /// Newline-separated catalog of fingerprint identifiers.
    async fn list_fingerprints(&self) -> Result<String, SpoofServerError>;
}

/// Failures reported by the spoofing process or while driving it.
#[derive(Debug, Error)]
pub enum SpoofServerError {
    #[error("Server stopped")]
    Stopped,
    #[error("{0}")]
    Reported(String),
    #[error("failed to launch spoofing server: {0}")]
    Launch(#[from] std::io::Error),
}

pub type SpoofServerResult<T> = Result<T, SpoofServerError>;
