//! Peer Registry
//!
//! Durable store of client records backed by SQLite. Usernames and public
//! keys are both unique across the registry.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

const SELECT_CLIENTS: &str =
    "SELECT username, private_key, public_key, allowed_ips, created_at, revoking FROM clients";

/// Writers on other connections hold the database lock briefly
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// A provisioned VPN client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub username: String,
    pub private_key: String,
    pub public_key: String,
    pub allowed_ips: String,
    pub created_at: DateTime<Utc>,
    /// Set once a delete has started; the record only stays behind until
    /// the peer block is gone
    #[serde(default)]
    pub revoking: bool,
}

impl ClientRecord {
    /// Create a record stamped with the current time
    pub fn new(
        username: impl Into<String>,
        private_key: impl Into<String>,
        public_key: impl Into<String>,
        allowed_ips: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            private_key: private_key.into(),
            public_key: public_key.into(),
            allowed_ips: allowed_ips.into(),
            created_at: now(),
            revoking: false,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created: String = row.get(4)?;
        let created_at = DateTime::parse_from_rfc3339(&created)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?;
        Ok(Self {
            username: row.get(0)?,
            private_key: row.get(1)?,
            public_key: row.get(2)?,
            allowed_ips: row.get(3)?,
            created_at,
            revoking: row.get(5)?,
        })
    }
}

/// Second precision keeps stored and in-memory records comparable
fn now() -> DateTime<Utc> {
    let t = Utc::now();
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

/// Persistent client registry backed by SQLite
pub struct PeerRegistry {
    /// Database connection
    conn: Mutex<Connection>,
}

impl PeerRegistry {
    /// Create or open the registry database
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::with_connection(conn)
    }

    /// Registry living only in memory
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Ensure the schema exists. Safe to call any number of times.
    pub async fn init(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        init_schema(&conn)
    }

    /// Insert a new client record
    pub async fn insert(&self, record: &ClientRecord) -> Result<()> {
        let conn = self.conn.lock().await;

        let existing: Option<String> = conn
            .query_row(
                "SELECT username FROM clients WHERE username = ?1",
                params![record.username],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(Error::DuplicateUsername(record.username.clone()));
        }

        let owner: Option<String> = conn
            .query_row(
                "SELECT username FROM clients WHERE public_key = ?1",
                params![record.public_key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(owner) = owner {
            return Err(Error::DuplicatePublicKey(owner));
        }

        conn.execute(
            r#"
            INSERT INTO clients (username, private_key, public_key, allowed_ips, created_at, revoking)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.username,
                record.private_key,
                record.public_key,
                record.allowed_ips,
                record.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                record.revoking,
            ],
        )?;
        Ok(())
    }

    /// Look up a client by username
    pub async fn lookup(&self, username: &str) -> Result<Option<ClientRecord>> {
        let conn = self.conn.lock().await;
        let record = conn
            .query_row(
                &format!("{} WHERE username = ?1", SELECT_CLIENTS),
                params![username],
                ClientRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Look up a client by public key
    pub async fn lookup_by_public_key(&self, public_key: &str) -> Result<Option<ClientRecord>> {
        let conn = self.conn.lock().await;
        let record = conn
            .query_row(
                &format!("{} WHERE public_key = ?1", SELECT_CLIENTS),
                params![public_key],
                ClientRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Get all client records
    pub async fn list_all(&self) -> Result<Vec<ClientRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!("{} ORDER BY username", SELECT_CLIENTS))?;
        let rows = stmt.query_map([], ClientRecord::from_row)?;

        let mut records = Vec::new();
        for result in rows {
            records.push(result?);
        }

        Ok(records)
    }

    /// Flag a client as being revoked. Returns false when the username is
    /// unknown.
    pub async fn mark_revoking(&self, username: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE clients SET revoking = 1 WHERE username = ?1",
            params![username],
        )?;
        Ok(updated > 0)
    }

    /// Remove a client. Returns false when the username is unknown.
    pub async fn delete(&self, username: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM clients WHERE username = ?1", params![username])?;
        Ok(deleted > 0)
    }

    /// Get count of registered clients
    pub async fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS clients (
            username TEXT PRIMARY KEY,
            private_key TEXT NOT NULL,
            public_key TEXT NOT NULL UNIQUE,
            allowed_ips TEXT NOT NULL,
            created_at TEXT NOT NULL,
            revoking INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )?;

    // Databases created before revokes were tracked
    let has_revoking = conn
        .prepare("SELECT 1 FROM pragma_table_info('clients') WHERE name = 'revoking'")?
        .exists([])?;
    if !has_revoking {
        conn.execute_batch("ALTER TABLE clients ADD COLUMN revoking INTEGER NOT NULL DEFAULT 0")?;
    }
    Ok(())
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Registry(format!("SQLite error: {}", e))
    }
}
