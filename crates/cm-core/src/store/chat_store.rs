//! SQLite-backed chat store: connection lifecycle and reads

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::store::sql;
use crate::store::{ChatMessage, Transaction};
use crate::{Error, Result};

/// Messages kept per user unless configured otherwise
pub const DEFAULT_RETENTION_LIMIT: usize = 5;

/// Retention-bounded chat message store
///
/// Owns one SQLite connection. Reads lock it per call; a [`Transaction`]
/// keeps it locked until it commits, rolls back or is dropped, so other
/// threads only ever observe committed state.
pub struct ChatStore {
    conn: Mutex<Option<Connection>>,
    /// Thread currently holding an open transaction
    tx_owner: Mutex<Option<ThreadId>>,
    location: String,
    retention_limit: usize,
}

impl ChatStore {
    /// Open (or create) the store at `db_path` with the default retention limit
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::open_with_limit(db_path, DEFAULT_RETENTION_LIMIT)
    }

    /// Open (or create) the store at `db_path`, keeping `retention_limit`
    /// messages per user
    pub fn open_with_limit<P: AsRef<Path>>(db_path: P, retention_limit: usize) -> Result<Self> {
        let db_path = db_path.as_ref();
        check_limit(retention_limit)?;
        debug!("Opening chat store at: {}", db_path.display());
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn, db_path.display().to_string(), retention_limit)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, ":memory:".to_string(), DEFAULT_RETENTION_LIMIT)
    }

    fn from_connection(conn: Connection, location: String, retention_limit: usize) -> Result<Self> {
        sql::init_schema(&conn)?;
        info!(
            "ChatStore opened at {} (retention limit {})",
            location, retention_limit
        );
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            tx_owner: Mutex::new(None),
            location,
            retention_limit,
        })
    }

    /// Where the store lives (file path or `:memory:`)
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Maximum messages kept per user
    pub fn retention_limit(&self) -> usize {
        self.retention_limit
    }

    /// Whether the connection is still open
    pub fn is_open(&self) -> bool {
        self.lock_conn().is_some()
    }

    /// Release the connection. Later operations fail with a closed-store error.
    pub fn close(&self) -> Result<()> {
        self.ensure_no_transaction("close the store")?;
        let mut guard = self.lock_conn();
        let Some(conn) = guard.take() else {
            debug!("ChatStore at {} already closed", self.location);
            return Ok(());
        };

        if let Err((conn, e)) = conn.close() {
            *guard = Some(conn);
            return Err(e.into());
        }
        info!("ChatStore at {} closed", self.location);
        Ok(())
    }

    /// Start a transaction.
    ///
    /// Blocks while another thread holds one; fails if the calling thread
    /// already does.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        self.ensure_no_transaction("begin a transaction")?;
        let guard = self.lock_conn();
        Transaction::begin(self, guard)
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`; rolls back and returns the error
    /// unchanged when it returns `Err`. A panic in `f` rolls back as the
    /// transaction is dropped.
    pub fn transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let tx = self.begin()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!("Rollback after failed transaction: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// All messages of `user_id`, most recent first
    pub fn get_messages(&self, user_id: &str) -> Result<Vec<ChatMessage>> {
        self.with_conn("read messages", |conn| sql::select_messages(conn, user_id))
    }

    /// Number of stored messages for `user_id`
    pub fn get_message_count(&self, user_id: &str) -> Result<usize> {
        self.with_conn("count messages", |conn| sql::count_messages(conn, user_id))
    }

    /// Delete every message of `user_id` in its own transaction.
    /// Returns the number of rows removed.
    pub fn delete_all_messages(&self, user_id: &str) -> Result<usize> {
        self.transaction(|tx| tx.delete_all_messages(user_id))
    }

    fn with_conn<T>(&self, op: &str, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.ensure_no_transaction(op)?;
        let guard = self.lock_conn();
        let conn = (*guard).as_ref().ok_or_else(Error::closed)?;
        f(conn)
    }

    /// The connection mutex is not reentrant: going through the store while
    /// this thread holds a transaction would deadlock.
    fn ensure_no_transaction(&self, op: &str) -> Result<()> {
        if *self.lock_owner() == Some(thread::current().id()) {
            return Err(Error::TransactionState(format!(
                "cannot {} while this thread holds an open transaction",
                op
            )));
        }
        Ok(())
    }

    fn lock_conn(&self) -> MutexGuard<'_, Option<Connection>> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn lock_owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        match self.tx_owner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn check_limit(retention_limit: usize) -> Result<()> {
    if retention_limit == 0 {
        return Err(Error::InvalidInput(
            "retention limit must be at least 1".to_string(),
        ));
    }
    Ok(())
}
