//! Persistent SQLite store for the chat log and the users/servers seen.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::{debug, info};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS chat_log (
        time TEXT NOT NULL,
        server_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        message TEXT NOT NULL,
        response TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        first_seen TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS servers (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        first_seen TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chat_log_user_id ON chat_log(user_id);
"#;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Poisoned,
}

/// One processed turn.
#[derive(Debug, Clone)]
pub struct ChatLogEntry {
    pub time: DateTime<Utc>,
    pub server_id: i64,
    pub user_id: i64,
    pub message: String,
    pub response: String,
}

/// A user, as first seen.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub first_seen: DateTime<Utc>,
}

/// A server (guild), as first seen.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub first_seen: DateTime<Utc>,
}

/// What a `record_turn` call added besides the log row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnWrite {
    pub new_user: bool,
    pub new_server: bool,
}

/// Single-connection store shared for the process lifetime.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.ensure_schema()?;

        let (log_rows, users, servers) = (db.chat_log_count()?, db.user_count()?, db.server_count()?);
        info!(
            "Opened database {:?} ({} log rows, {} users, {} servers)",
            path, log_rows, users, servers
        );
        Ok(db)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.ensure_schema()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::Poisoned)
    }

    /// Create all tables if absent. Safe to call on every startup.
    pub fn ensure_schema(&self) -> Result<(), DatabaseError> {
        self.lock()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Write one turn: the log row always, user and server rows only if new.
    /// All three writes commit together.
    pub fn record_turn(
        &self,
        entry: &ChatLogEntry,
        user: &User,
        server: &Server,
    ) -> Result<TurnWrite, DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO chat_log (time, server_id, user_id, message, response) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.time.to_rfc3339(),
                entry.server_id,
                entry.user_id,
                entry.message,
                entry.response
            ],
        )?;

        let new_user = tx.execute(
            "INSERT OR IGNORE INTO users (id, name, first_seen) VALUES (?1, ?2, ?3)",
            params![user.id, user.name, user.first_seen.to_rfc3339()],
        )? > 0;

        let new_server = tx.execute(
            "INSERT OR IGNORE INTO servers (id, name, first_seen) VALUES (?1, ?2, ?3)",
            params![server.id, server.name, server.first_seen.to_rfc3339()],
        )? > 0;

        tx.commit()?;

        if new_user {
            debug!("New user {} ({})", user.name, user.id);
        }
        if new_server {
            debug!("New server {} ({})", server.name, server.id);
        }
        Ok(TurnWrite { new_user, new_server })
    }

    pub fn find_user(&self, id: i64) -> Result<Option<User>, DatabaseError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, name, first_seen FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(id, name, first_seen)| User {
            id,
            name,
            first_seen: parse_timestamp(&first_seen),
        }))
    }

    pub fn find_server(&self, id: i64) -> Result<Option<Server>, DatabaseError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, name, first_seen FROM servers WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(id, name, first_seen)| Server {
            id,
            name,
            first_seen: parse_timestamp(&first_seen),
        }))
    }

    pub fn chat_log_count(&self) -> Result<usize, DatabaseError> {
        self.count("SELECT COUNT(*) FROM chat_log")
    }

    pub fn user_count(&self) -> Result<usize, DatabaseError> {
        self.count("SELECT COUNT(*) FROM users")
    }

    pub fn server_count(&self) -> Result<usize, DatabaseError> {
        self.count("SELECT COUNT(*) FROM servers")
    }

    fn count(&self, sql: &str) -> Result<usize, DatabaseError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Most recent log rows, newest first. Used by tests and debugging.
    pub fn recent_turns(&self, limit: usize) -> Result<Vec<ChatLogEntry>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT time, server_id, user_id, message, response FROM chat_log ORDER BY rowid DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ChatLogEntry {
                time: parse_timestamp(&row.get::<_, String>(0)?),
                server_id: row.get(1)?,
                user_id: row.get(2)?,
                message: row.get(3)?,
                response: row.get(4)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Rows written by older versions may not be RFC 3339; those read as the epoch.
fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}
