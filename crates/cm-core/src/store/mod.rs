//! Chat message store
//!
//! Keeps the most recent messages of every user in a single SQLite table.
//! Writes go through [`Transaction`]; every insert evicts the user's rows
//! beyond the retention limit inside the same transaction.

mod chat_store;
mod sql;
mod transaction;
mod types;

pub use chat_store::{ChatStore, DEFAULT_RETENTION_LIMIT};
pub use transaction::Transaction;
pub use types::ChatMessage;
