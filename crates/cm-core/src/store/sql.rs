//! Schema and statements shared by the store and its transactions

use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use tracing::debug;

use crate::Result;
use crate::store::ChatMessage;
use crate::store::types::decode_timestamp;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    message TEXT NOT NULL,
    timestamp TEXT NOT NULL
)";

const CREATE_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_user_timestamp
    ON chat_messages(user_id, timestamp DESC)";

pub(crate) const INSERT_MESSAGE: &str =
    "INSERT INTO chat_messages (user_id, message, timestamp) VALUES (?1, ?2, ?3)";

/// Keep the `?2` most recent rows of user `?1`; equal timestamps fall back to id
pub(crate) const EVICT_BEYOND_LIMIT: &str = "DELETE FROM chat_messages
    WHERE user_id = ?1 AND id NOT IN (
        SELECT id FROM chat_messages
        WHERE user_id = ?1
        ORDER BY timestamp DESC, id DESC
        LIMIT ?2
    )";

pub(crate) const DELETE_USER: &str = "DELETE FROM chat_messages WHERE user_id = ?1";

const SELECT_USER: &str = "SELECT id, user_id, message, timestamp FROM chat_messages
    WHERE user_id = ?1
    ORDER BY timestamp DESC, id DESC";

const COUNT_USER: &str = "SELECT COUNT(*) FROM chat_messages WHERE user_id = ?1";

/// Create the table and index if they do not exist yet
pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(CREATE_TABLE, [])?;
    conn.execute(CREATE_INDEX, [])?;
    debug!("chat_messages schema ready");
    Ok(())
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let raw_timestamp: String = row.get(3)?;
    let timestamp = decode_timestamp(&raw_timestamp)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(ChatMessage {
        message_id: row.get(0)?,
        user_id: row.get(1)?,
        message: row.get(2)?,
        timestamp,
    })
}

/// All messages of a user, most recent first
pub(crate) fn select_messages(conn: &Connection, user_id: &str) -> Result<Vec<ChatMessage>> {
    let mut stmt = conn.prepare_cached(SELECT_USER)?;
    let messages = stmt
        .query_map(params![user_id], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(messages)
}

pub(crate) fn count_messages(conn: &Connection, user_id: &str) -> Result<usize> {
    let count: i64 = conn.query_row(COUNT_USER, params![user_id], |row| row.get(0))?;
    Ok(count as usize)
}
