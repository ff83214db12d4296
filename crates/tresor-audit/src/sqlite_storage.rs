// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite audit storage.
//
// Schema:
//   audit_log(
//     id          INTEGER PRIMARY KEY AUTOINCREMENT,
//     timestamp   TEXT NOT NULL,   -- RFC 3339 UTC, fixed nanosecond width
//     level       TEXT,            -- NULL for encrypted records
//     event_type  TEXT,
//     user_id     TEXT,
//     resource    TEXT,
//     record      TEXT NOT NULL    -- the full JSON record
//   )
//   chain_state(
//     id            INTEGER PRIMARY KEY CHECK (id = 1),
//     genesis_hash  TEXT NOT NULL,
//     algorithm     TEXT NOT NULL,
//     entries       TEXT NOT NULL,  -- JSON array of chain entries
//     updated_at    TEXT NOT NULL
//   )

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::{debug, instrument};
use tresor_core::config::TresorConfig;
use tresor_core::error::{Result, TresorError};

use crate::chain::{ChainSnapshot, format_timestamp};
use crate::storage::{LogQuery, LogStorageBackend, record_timestamp};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS audit_log (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp   TEXT NOT NULL,
        level       TEXT,
        event_type  TEXT,
        user_id     TEXT,
        resource    TEXT,
        record      TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS audit_log_timestamp ON audit_log (timestamp);
    CREATE TABLE IF NOT EXISTS chain_state (
        id            INTEGER PRIMARY KEY CHECK (id = 1),
        genesis_hash  TEXT NOT NULL,
        algorithm     TEXT NOT NULL,
        entries       TEXT NOT NULL,
        updated_at    TEXT NOT NULL
    );";

/// Convert a `rusqlite::Error` into a `TresorError::Database`.
fn db_err(e: rusqlite::Error) -> TresorError {
    TresorError::Database(e.to_string())
}

/// Audit records and chain state in one SQLite database.
pub struct SqliteLogStorage {
    conn: Mutex<Connection>,
}

impl SqliteLogStorage {
    /// Open (or create) the database at `path`. WAL mode is enabled for
    /// concurrent readers.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        Self::init(conn)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    /// `<log_dir>/audit.db`.
    pub fn from_config(config: &TresorConfig) -> Result<Self> {
        Self::open(config.audit_log_dir().join("audit.db"))
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        debug!("sqlite audit storage opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TresorError::lock_poisoned("audit database"))
    }

    /// Total number of stored records.
    pub fn count(&self) -> Result<u64> {
        self.conn()?
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(db_err)
    }
}

fn text_field<'a>(record: &'a Value, name: &str) -> Option<&'a str> {
    record.get(name).and_then(Value::as_str)
}

impl LogStorageBackend for SqliteLogStorage {
    #[instrument(skip_all, fields(count = entries.len()))]
    fn store_log_entries(&self, entries: &[Value]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO audit_log (timestamp, level, event_type, user_id, resource, record)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(db_err)?;
            for entry in entries {
                let timestamp = record_timestamp(entry).ok_or_else(|| {
                    TresorError::InvalidParameter("audit record has no RFC 3339 timestamp".into())
                })?;
                stmt.execute(params![
                    format_timestamp(&timestamp),
                    text_field(entry, "level"),
                    text_field(entry, "event_type"),
                    text_field(entry, "user_id"),
                    text_field(entry, "resource"),
                    entry.to_string(),
                ])
                .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;
        debug!("audit records inserted");
        Ok(())
    }

    fn retrieve_log_entries(&self, query: &LogQuery) -> Result<Vec<Value>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT record FROM audit_log
                 WHERE (?1 IS NULL OR timestamp >= ?1)
                   AND (?2 IS NULL OR timestamp <= ?2)
                   AND (?3 IS NULL OR level = ?3)
                   AND (?4 IS NULL OR event_type = ?4)
                   AND (?5 IS NULL OR user_id = ?5)
                   AND (?6 IS NULL OR resource = ?6)
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?7",
            )
            .map_err(db_err)?;

        let limit = query
            .max_entries
            .and_then(|n| i64::try_from(n).ok())
            .unwrap_or(-1);
        let rows = stmt
            .query_map(
                params![
                    query.start.as_ref().map(format_timestamp),
                    query.end.as_ref().map(format_timestamp),
                    query.level.map(|l| l.as_str()),
                    query.event_type.as_deref(),
                    query.user_id.as_deref(),
                    query.resource.as_deref(),
                    limit,
                ],
                |row| row.get::<_, String>(0),
            )
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(db_err)?;
            records.push(
                serde_json::from_str(&raw)
                    .map_err(|e| TresorError::InvalidFormat(format!("stored audit record: {e}")))?,
            );
        }
        Ok(records)
    }

    fn get_chain_entries(&self) -> Result<Option<ChainSnapshot>> {
        let row: Option<(String, String, String)> = self
            .conn()?
            .query_row(
                "SELECT genesis_hash, algorithm, entries FROM chain_state WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(db_err)?;

        let Some((genesis_hash, algorithm, entries)) = row else {
            return Ok(None);
        };
        Ok(Some(ChainSnapshot {
            genesis_hash,
            algorithm: algorithm.parse()?,
            entries: serde_json::from_str(&entries)
                .map_err(|e| TresorError::InvalidFormat(format!("stored chain: {e}")))?,
        }))
    }

    #[instrument(skip_all, fields(entries = snapshot.entries.len()))]
    fn store_chain_entries(&self, snapshot: &ChainSnapshot) -> Result<()> {
        let entries = serde_json::to_string(&snapshot.entries)?;
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO chain_state (id, genesis_hash, algorithm, entries, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4)",
                params![
                    snapshot.genesis_hash,
                    snapshot.algorithm.as_str(),
                    entries,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }
}
