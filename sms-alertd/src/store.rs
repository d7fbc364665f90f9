//! SQLite Message Store
//!
//! Local system-of-record for delivered SMS/MMS content plus a small contact
//! table. The core queries it through the [`MessageStore`] and
//! [`ContactDirectory`] traits; the daemon's event listener writes arrivals
//! into it before they are handed to the pipeline.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE messages (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     thread_id INTEGER NOT NULL DEFAULT 0,
//!     address TEXT NOT NULL,
//!     body TEXT NOT NULL DEFAULT '',
//!     timestamp INTEGER NOT NULL,
//!     read INTEGER NOT NULL DEFAULT 0,
//!     kind TEXT NOT NULL DEFAULT 'sms'
//! );
//!
//! CREATE TABLE contacts (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     address TEXT NOT NULL,
//!     name TEXT,
//!     photo BLOB
//! );
//! ```
//!
//! Default path: `~/.local/share/sms-alertd/messages.db`

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use sms_alert_core::{
    addresses_match, AlertError, ContactDirectory, ContactInfo, Message, MessageKind,
    MessageStore, Result, TIMESTAMP_TOLERANCE_MS,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// SQLite-backed message store
pub struct SqliteMessageStore {
    conn: Arc<Mutex<Connection>>,
}

fn sql_err(e: rusqlite::Error) -> AlertError {
    AlertError::store_write(e.to_string())
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let id: i64 = row.get(0)?;
    let thread_id: i64 = row.get(1)?;
    let address: String = row.get(2)?;
    let body: String = row.get(3)?;
    let timestamp: i64 = row.get(4)?;
    let kind: String = row.get(5)?;
    let kind = MessageKind::from_str(&kind).unwrap_or(MessageKind::Sms);
    Ok(Message::from_store_row(
        id, thread_id, &address, &body, timestamp, 1, kind,
    ))
}

const MESSAGE_COLUMNS: &str = "id, thread_id, address, body, timestamp, kind";

impl SqliteMessageStore {
    /// Open (or create) the store at `db_path`
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).map_err(sql_err)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id INTEGER NOT NULL DEFAULT 0,
                address TEXT NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                timestamp INTEGER NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                kind TEXT NOT NULL DEFAULT 'sms'
            );

            CREATE INDEX IF NOT EXISTS idx_messages_timestamp
                ON messages(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_messages_read
                ON messages(read);
            CREATE INDEX IF NOT EXISTS idx_messages_thread
                ON messages(thread_id);

            CREATE TABLE IF NOT EXISTS contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                name TEXT,
                photo BLOB
            );
            "#,
        )
        .map_err(sql_err)?;
        debug!("message store schema initialized");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Shared handle for the contact directory view over the same database
    pub fn contact_directory(&self) -> SqliteContactDirectory {
        SqliteContactDirectory {
            conn: Arc::clone(&self.conn),
        }
    }

    /// Insert one delivered message, returning its row id
    pub fn insert_message(
        &self,
        thread_id: i64,
        address: &str,
        body: &str,
        timestamp: i64,
        kind: MessageKind,
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO messages (thread_id, address, body, timestamp, read, kind)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![thread_id, address, body, timestamp, kind.as_str()],
        )
        .map_err(sql_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Resolve the conversation thread for an address, allocating a fresh
    /// thread id when the address has no history.
    ///
    /// Address formats vary between sources, so matching happens in code.
    pub fn resolve_thread(&self, address: &str) -> Result<i64> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT DISTINCT thread_id, address FROM messages")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| {
                let thread_id: i64 = row.get(0)?;
                let row_address: String = row.get(1)?;
                Ok((thread_id, row_address))
            })
            .map_err(sql_err)?;
        let mut max_thread = 0;
        for row in rows {
            let (thread_id, row_address) = row.map_err(sql_err)?;
            if addresses_match(&row_address, address) {
                return Ok(thread_id);
            }
            max_thread = max_thread.max(thread_id);
        }
        Ok(max_thread + 1)
    }

    /// Insert one contact, returning its row id
    pub fn insert_contact(
        &self,
        address: &str,
        name: Option<&str>,
        photo: Option<&[u8]>,
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO contacts (address, name, photo) VALUES (?1, ?2, ?3)",
            params![address, name, photo],
        )
        .map_err(sql_err)?;
        Ok(conn.last_insert_rowid())
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn most_recent_unread(
        &self,
        exclude_thread: Option<i64>,
        kind: Option<MessageKind>,
    ) -> Result<Option<Message>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE read = 0
               AND (?1 IS NULL OR thread_id != ?1)
               AND (?2 IS NULL OR kind = ?2)
             ORDER BY timestamp DESC LIMIT 1"
        );
        conn.query_row(
            &sql,
            params![exclude_thread, kind.map(|k| k.as_str())],
            row_to_message,
        )
        .optional()
        .map_err(sql_err)
    }

    async fn most_recent_read(&self) -> Result<Option<Message>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE read = 1 ORDER BY timestamp DESC LIMIT 1"
        );
        conn.query_row(&sql, [], row_to_message)
            .optional()
            .map_err(sql_err)
    }

    async fn messages_for_thread(&self, thread_id: i64) -> Result<Vec<Message>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE thread_id = ?1 ORDER BY timestamp ASC"
        );
        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(params![thread_id], row_to_message)
            .map_err(sql_err)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.map_err(sql_err)?);
        }
        Ok(messages)
    }

    async fn unread_count(&self) -> Result<u32> {
        let conn = self.lock();
        conn.query_row("SELECT COUNT(*) FROM messages WHERE read = 0", [], |row| {
            row.get(0)
        })
        .map_err(sql_err)
    }

    async fn find_persisted_id(
        &self,
        thread_id: i64,
        timestamp: i64,
        kind: MessageKind,
    ) -> Result<i64> {
        let conn = self.lock();
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM messages
                 WHERE thread_id = ?1 AND kind = ?2 AND ABS(timestamp - ?3) <= ?4
                 ORDER BY timestamp DESC LIMIT 1",
                params![thread_id, kind.as_str(), timestamp, TIMESTAMP_TOLERANCE_MS],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        Ok(id.unwrap_or(0))
    }

    async fn mark_message_read(&self, persisted_id: i64, kind: MessageKind) -> Result<()> {
        let conn = self.lock();
        let changed = conn
            .execute(
                "UPDATE messages SET read = 1 WHERE id = ?1 AND kind = ?2",
                params![persisted_id, kind.as_str()],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            warn!(persisted_id, "mark read matched no row");
        }
        Ok(())
    }

    async fn mark_thread_read(&self, thread_id: i64) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE messages SET read = 1 WHERE thread_id = ?1",
            params![thread_id],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    async fn delete_message(&self, persisted_id: i64, kind: MessageKind) -> Result<bool> {
        let conn = self.lock();
        let deleted = conn
            .execute(
                "DELETE FROM messages WHERE id = ?1 AND kind = ?2",
                params![persisted_id, kind.as_str()],
            )
            .map_err(sql_err)?;
        Ok(deleted > 0)
    }
}

/// Contact lookups over the store's contact table
pub struct SqliteContactDirectory {
    conn: Arc<Mutex<Connection>>,
}

#[async_trait]
impl ContactDirectory for SqliteContactDirectory {
    async fn lookup(&self, address: &str) -> Option<ContactInfo> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = match conn.prepare("SELECT id, address, name, photo FROM contacts") {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!(error = %e, "contact query failed");
                return None;
            }
        };
        let rows = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let row_address: String = row.get(1)?;
                let name: Option<String> = row.get(2)?;
                let photo: Option<Vec<u8>> = row.get(3)?;
                Ok((id, row_address, name, photo))
            })
            .ok()?;

        // Addresses arrive in inconsistent formats, so matching happens in
        // code rather than SQL.
        for row in rows.flatten() {
            let (id, row_address, name, photo) = row;
            if addresses_match(&row_address, address) {
                return Some(ContactInfo {
                    id: id.to_string(),
                    name,
                    photo,
                });
            }
        }
        None
    }
}
