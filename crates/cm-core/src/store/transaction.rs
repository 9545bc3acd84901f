//! Scoped write transactions

use std::sync::MutexGuard;
use std::thread;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, warn};

use crate::store::types::{encode_timestamp, stored_precision};
use crate::store::{ChatMessage, ChatStore, sql};
use crate::{Error, Result};

/// An open write transaction on a [`ChatStore`]
///
/// Holds the store's connection until it ends. Dropping it without
/// calling [`commit`](Self::commit) rolls back every write made through it,
/// evictions included.
pub struct Transaction<'a> {
    store: &'a ChatStore,
    guard: MutexGuard<'a, Option<Connection>>,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn begin(
        store: &'a ChatStore,
        guard: MutexGuard<'a, Option<Connection>>,
    ) -> Result<Self> {
        let conn = (*guard).as_ref().ok_or_else(Error::closed)?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        *store.lock_owner() = Some(thread::current().id());
        debug!("Transaction started on {}", store.location());

        Ok(Self {
            store,
            guard,
            finished: false,
        })
    }

    fn conn(&self) -> Result<&Connection> {
        (*self.guard).as_ref().ok_or_else(Error::closed)
    }

    /// Insert a message and evict the user's rows beyond the retention limit
    pub fn add_message(&self, user_id: &str, message: &str) -> Result<ChatMessage> {
        self.add_message_at(user_id, message, Utc::now())
    }

    pub(crate) fn add_message_at(
        &self,
        user_id: &str,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        if user_id.is_empty() {
            return Err(Error::InvalidInput("user_id must not be empty".to_string()));
        }

        let conn = self.conn()?;
        let timestamp = stored_precision(timestamp);
        conn.prepare_cached(sql::INSERT_MESSAGE)?
            .execute(params![user_id, message, encode_timestamp(&timestamp)])?;
        let message_id = conn.last_insert_rowid();

        let evicted = conn
            .prepare_cached(sql::EVICT_BEYOND_LIMIT)?
            .execute(params![user_id, self.store.retention_limit() as i64])?;
        if evicted > 0 {
            debug!("Evicted {} old messages for user {}", evicted, user_id);
        }

        Ok(ChatMessage {
            message_id,
            user_id: user_id.to_string(),
            message: message.to_string(),
            timestamp,
        })
    }

    /// Delete every message of `user_id`; returns the number removed
    pub fn delete_all_messages(&self, user_id: &str) -> Result<usize> {
        let deleted = self.conn()?.execute(sql::DELETE_USER, params![user_id])?;
        debug!("Deleted {} messages for user {}", deleted, user_id);
        Ok(deleted)
    }

    /// Messages of `user_id` as seen by this transaction, most recent first
    pub fn get_messages(&self, user_id: &str) -> Result<Vec<ChatMessage>> {
        sql::select_messages(self.conn()?, user_id)
    }

    /// Row count of `user_id` as seen by this transaction
    pub fn get_message_count(&self, user_id: &str) -> Result<usize> {
        sql::count_messages(self.conn()?, user_id)
    }

    /// Make every write durable
    pub fn commit(mut self) -> Result<()> {
        self.conn()?.execute_batch("COMMIT")?;
        self.finished = true;
        debug!("Transaction committed");
        Ok(())
    }

    /// Discard every write since `begin`
    /// Raw statement on the transaction's connection
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        Ok(self.conn()?.execute_batch(sql)?)
    }

    pub fn rollback(mut self) -> Result<()> {
        self.conn()?.execute_batch("ROLLBACK")?;
        self.finished = true;
        debug!("Transaction rolled back");
        Ok(())
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("location", &self.store.location())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // A failed COMMIT may already have ended the transaction
            if let Some(conn) = (*self.guard).as_ref().filter(|c| !c.is_autocommit()) {
                match conn.execute_batch("ROLLBACK") {
                    Ok(()) => debug!("Transaction dropped without commit; rolled back"),
                    Err(e) => warn!("Failed to roll back dropped transaction: {}", e),
                }
            }
        }
        *self.store.lock_owner() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_makes_writes_visible() {
        let store = ChatStore::in_memory().unwrap();

        let tx = store.begin().unwrap();
        let first = tx.add_message("u1", "Hello, world!").unwrap();
        let second = tx.add_message("u1", "How are you today?").unwrap();
        assert_eq!(tx.get_message_count("u1").unwrap(), 2);
        tx.commit().unwrap();

        assert!(second.message_id > first.message_id);
        assert!(second.timestamp >= first.timestamp);
        assert_eq!(store.get_message_count("u1").unwrap(), 2);
    }

    #[test]
    fn test_explicit_rollback() {
        let store = ChatStore::in_memory().unwrap();

        let tx = store.begin().unwrap();
        tx.add_message("u1", "draft").unwrap();
        tx.rollback().unwrap();

        assert_eq!(store.get_message_count("u1").unwrap(), 0);
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let store = ChatStore::in_memory().unwrap();

        {
            let tx = store.begin().unwrap();
            tx.add_message("u1", "lost").unwrap();
            tx.add_message("u1", "also lost").unwrap();
        }

        assert_eq!(store.get_message_count("u1").unwrap(), 0);
    }

    #[test]
    fn test_transaction_sees_own_writes() {
        let store = ChatStore::in_memory().unwrap();

        let tx = store.begin().unwrap();
        tx.add_message("u1", "a").unwrap();
        tx.add_message("u1", "b").unwrap();
        let seen: Vec<String> = tx
            .get_messages("u1")
            .unwrap()
            .into_iter()
            .map(|m| m.message)
            .collect();
        assert_eq!(seen, vec!["b", "a"]);
        tx.commit().unwrap();
    }

    #[test]
    fn test_nested_begin_on_same_thread_fails() {
        let store = ChatStore::in_memory().unwrap();

        let tx = store.begin().unwrap();
        assert!(matches!(store.begin(), Err(Error::TransactionState(_))));
        assert!(matches!(store.get_messages("u1"), Err(Error::TransactionState(_))));
        assert!(matches!(store.get_message_count("u1"), Err(Error::TransactionState(_))));
        assert!(matches!(store.delete_all_messages("u1"), Err(Error::TransactionState(_))));
        assert!(matches!(store.close(), Err(Error::TransactionState(_))));
        tx.commit().unwrap();

        // The store is usable again once the transaction ends
        let tx = store.begin().unwrap();
        tx.rollback().unwrap();
        assert!(store.is_open());
    }

    #[test]
    fn test_other_threads_wait_for_commit() {
        use std::sync::Arc;
        use std::sync::mpsc;

        let store = Arc::new(ChatStore::in_memory().unwrap());
        let (started_tx, started_rx) = mpsc::channel();

        let tx = store.begin().unwrap();
        tx.add_message("u1", "first").unwrap();

        let reader = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                started_tx.send(()).unwrap();
                store.get_message_count("u1").unwrap()
            })
        };

        started_rx.recv().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        tx.add_message("u1", "second").unwrap();
        tx.commit().unwrap();

        // The reader could only run after commit, so it sees both rows
        assert_eq!(reader.join().unwrap(), 2);
    }

    #[test]
    fn test_concurrent_writers_for_different_users() {
        use std::sync::Arc;

        let store = Arc::new(ChatStore::in_memory().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let user = format!("user-{}", n);
                    for i in 0..20 {
                        store
                            .transaction(|tx| tx.add_message(&user, &format!("m{}", i)))
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for n in 0..4 {
            let user = format!("user-{}", n);
            let messages = store.get_messages(&user).unwrap();
            assert_eq!(messages.len(), 5);
            assert_eq!(messages[0].message, "m19");
            assert!(messages.iter().all(|m| m.user_id == user));
        }
    }
}
