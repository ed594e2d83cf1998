//! Integrations with processes outside this crate.
//!
//! The spoofing proxy is the only external collaborator: this crate never
//! performs the forged TLS handshake itself, it only drives the process that
//! does through the [`SpoofServer`] control surface.

pub mod command;
pub mod spoof_server;

pub use command::CommandSpoofServer;
pub use spoof_server::{SpoofServer, SpoofServerError, SpoofServerResult};
