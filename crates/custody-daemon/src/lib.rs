//! Custody Daemon - Isolated key-custody vault
//!
//! This crate provides:
//! - Root seed persistence
//! - Origin binding for trusted and cookie-authenticated callers
//! - Per-session purpose stores over the shared root seed
//! - A request dispatcher and IPC server speaking newline-delimited JSON
//! - A host-side client with a correlation table

pub mod config;
pub mod error;
pub mod ipc;
pub mod seed_store;
pub mod session;
pub mod trust;
pub mod vault;

pub use config::VaultConfig;
pub use error::{DaemonError, Result};
pub use ipc::{Dispatcher, InitOutcome, IpcServer, VaultClient};
pub use seed_store::SeedStore;
pub use session::Session;
pub use trust::{bind_origin, Binding, CookieJar};
pub use vault::Vault;
