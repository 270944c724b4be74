//! Append-only SQLite audit log for risk events, using `rusqlite`.

use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::RiskEventSink;
use crate::risk::{LimitKind, RiskEvent};
use crate::utils::error::{Error, Result};

/// Thread-safe SQLite wrapper.
#[derive(Clone)]
pub struct SqliteAuditLog {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteAuditLog {
    /// Open (or create) the DB file; `None` uses the user data dir.
    pub fn open(db_path: Option<&Path>) -> Result<Self> {
        let path = match db_path {
            | Some(p) => {
                crate::utils::ensure_parent_dir(p)?;
                p.to_path_buf()
            }
            | None => crate::utils::default_audit_db_path()?,
        };
        let conn = Connection::open(&path)?;
        init_schema(&conn)?;
        log::debug!("Opened risk audit log at {}", path.display());
        Ok(Self { conn: Arc::new(Mutex::new(conn)), path: Some(path) })
    }

    /// In-memory database, gone when dropped.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)), path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Other("audit log lock poisoned".into()))
    }

    /// Insert events in one transaction.
    pub fn append(&self, events: &[RiskEvent]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO risk_events (timestamp, instrument, kind, pre_clamp, post_clamp) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for e in events {
                stmt.execute(params![
                    e.timestamp.timestamp_millis(),
                    e.instrument,
                    e.kind.as_str(),
                    e.pre_clamp,
                    e.post_clamp
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// Every event, oldest first.
    pub fn events(&self) -> Result<Vec<RiskEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, instrument, kind, pre_clamp, post_clamp \
             FROM risk_events ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for r in rows {
            let (ts, instrument, kind, pre_clamp, post_clamp) = r?;
            let timestamp = Utc
                .timestamp_millis_opt(ts)
                .single()
                .ok_or_else(|| Error::DataError(format!("bad audit timestamp {ts}")))?;
            out.push(RiskEvent {
                instrument,
                kind: kind.parse::<LimitKind>()?,
                pre_clamp,
                post_clamp,
                timestamp,
            });
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM risk_events", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, so it cannot go through execute_batch
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS risk_events (
             id           INTEGER PRIMARY KEY AUTOINCREMENT,
             timestamp    INTEGER NOT NULL,
             instrument   TEXT NOT NULL,
             kind         TEXT NOT NULL,
             pre_clamp    REAL NOT NULL,
             post_clamp   REAL NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_risk_events_instrument ON risk_events (instrument);",
    )?;
    Ok(())
}

impl RiskEventSink for SqliteAuditLog {
    fn record(&self, event: &RiskEvent) -> anyhow::Result<()> {
        self.append(std::slice::from_ref(event))?;
        Ok(())
    }

    fn record_all(&self, events: &[RiskEvent]) -> anyhow::Result<()> {
        self.append(events)?;
        Ok(())
    }
}
