//! cm-core: chat-memory core library
//!
//! Retention-bounded per-user conversation log backed by SQLite, with
//! scoped transactions and an async service facade for the agent and
//! session-reset paths.

pub mod config;
pub mod error;
pub mod service;
pub mod store;

pub use config::{AppConfig, Config, DbConfig, LogConfig};
pub use error::{Error, Result};
pub use service::{ChatService, normalize_user_id};
pub use store::{ChatMessage, ChatStore, DEFAULT_RETENTION_LIMIT, Transaction};
