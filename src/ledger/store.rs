//! Database-backed Ledger Storage
//!
//! Key properties:
//! - WAL mode for concurrent reads during writes
//! - Prepared statement caching
//! - Append-only enforced at the storage engine: UPDATE and DELETE on the
//!   signals table abort inside SQLite itself, so tampering is detectable
//!   even with direct store access
//! - Idempotent appends keyed by content hash

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, types::Type, Connection, OpenFlags};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Regime, RejectionReason, Signal, SignalAction, SignalDraft};

use super::{content_hash, GENESIS_HASH};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS signals (
    sequence_index INTEGER PRIMARY KEY,
    id TEXT NOT NULL,
    instrument TEXT NOT NULL,
    action TEXT NOT NULL,
    entry_price REAL NOT NULL,
    stop_price REAL NOT NULL,
    target_price REAL NOT NULL,
    position_size REAL NOT NULL,
    confidence REAL NOT NULL,
    regime TEXT NOT NULL,
    rationale TEXT NOT NULL,
    content_hash TEXT NOT NULL UNIQUE,
    previous_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    retention_expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_signals_instrument
    ON signals(instrument, sequence_index DESC);

-- The write API has no update/delete methods; these triggers make the
-- storage engine itself reject mutation as well.
CREATE TRIGGER IF NOT EXISTS signals_no_update
    BEFORE UPDATE ON signals
BEGIN
    SELECT RAISE(ABORT, 'signals ledger is append-only');
END;

CREATE TRIGGER IF NOT EXISTS signals_no_delete
    BEFORE DELETE ON signals
BEGIN
    SELECT RAISE(ABORT, 'signals ledger is append-only');
END;

CREATE TABLE IF NOT EXISTS risk_rejections (
    rejection_id INTEGER PRIMARY KEY AUTOINCREMENT,
    instrument TEXT NOT NULL,
    reason TEXT NOT NULL,
    detail TEXT NOT NULL,
    rejected_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_risk_rejections_at
    ON risk_rejections(rejected_at DESC);
"#;

/// Result of an append: either a newly inserted entry or the already-stored
/// entry for an identical draft (idempotency by content hash)
#[derive(Debug, Clone)]
pub enum Appended {
    Inserted(Signal),
    Duplicate(Signal),
}

impl Appended {
    pub fn signal(&self) -> &Signal {
        match self {
            Appended::Inserted(s) | Appended::Duplicate(s) => s,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Appended::Duplicate(_))
    }
}

/// One audited risk rejection
#[derive(Debug, Clone, Serialize)]
pub struct RejectionRecord {
    pub instrument: String,
    pub reason: String,
    pub detail: String,
    pub rejected_at: DateTime<Utc>,
}

pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open ledger database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize ledger schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM signals", [], |row| row.get(0))
            .unwrap_or(0);
        info!("📒 Ledger opened at {} with {} entries", db_path, count);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Append a draft as the next chain entry.
    ///
    /// Hash computation happens outside the lock; chain-link resolution,
    /// sequence assignment and the insert run in one IMMEDIATE transaction
    /// so writes serialize per chain. A draft whose canonical content is
    /// already ledgered returns the stored entry instead of a duplicate.
    pub fn append(&self, draft: &SignalDraft) -> Result<Appended> {
        let hash = content_hash(draft);

        let conn = self.conn.lock();

        if let Some(existing) = Self::find_by_hash(&conn, &hash)? {
            return Ok(Appended::Duplicate(existing));
        }

        conn.execute("BEGIN IMMEDIATE", [])?;

        let head: Option<(i64, String)> = match conn
            .query_row(
                "SELECT sequence_index, content_hash FROM signals
                 ORDER BY sequence_index DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            }) {
            Ok(head) => head,
            Err(e) => {
                conn.execute("ROLLBACK", []).ok();
                return Err(e).context("Failed to read ledger chain head");
            }
        };

        let (sequence_index, previous_hash) = match head {
            Some((last_seq, last_hash)) => (last_seq + 1, last_hash),
            None => (1, GENESIS_HASH.to_string()),
        };

        let insert = conn.execute(
            "INSERT INTO signals
             (sequence_index, id, instrument, action, entry_price, stop_price,
              target_price, position_size, confidence, regime, rationale,
              content_hash, previous_hash, created_at, retention_expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                sequence_index,
                draft.id.to_string(),
                &draft.instrument,
                draft.action.as_str(),
                draft.entry_price,
                draft.stop_price,
                draft.target_price,
                draft.position_size,
                draft.confidence,
                draft.regime.as_str(),
                &draft.rationale,
                &hash,
                &previous_hash,
                draft.created_at.to_rfc3339(),
                draft.retention_expires_at.to_rfc3339(),
            ],
        );

        match insert {
            Ok(_) => {
                conn.execute("COMMIT", [])?;
            }
            Err(e) => {
                conn.execute("ROLLBACK", []).ok();
                return Err(e).context("Failed to append signal to ledger");
            }
        }

        let signal = Signal {
            id: draft.id,
            instrument: draft.instrument.clone(),
            action: draft.action,
            entry_price: draft.entry_price,
            stop_price: draft.stop_price,
            target_price: draft.target_price,
            position_size: draft.position_size,
            confidence: draft.confidence,
            regime: draft.regime,
            rationale: draft.rationale.clone(),
            content_hash: hash,
            previous_hash,
            sequence_index,
            created_at: draft.created_at,
            retention_expires_at: draft.retention_expires_at,
        };

        Ok(Appended::Inserted(signal))
    }

    /// Most recent entries in descending sequence order, optionally filtered
    /// by instrument
    pub fn latest(&self, limit: usize, instrument: Option<&str>) -> Result<Vec<Signal>> {
        let conn = self.conn.lock();

        let signals = if let Some(instrument) = instrument {
            let mut stmt = conn.prepare_cached(
                "SELECT sequence_index, id, instrument, action, entry_price, stop_price,
                        target_price, position_size, confidence, regime, rationale,
                        content_hash, previous_hash, created_at, retention_expires_at
                 FROM signals
                 WHERE instrument = ?1
                 ORDER BY sequence_index DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![instrument, limit], Self::row_to_signal)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        } else {
            let mut stmt = conn.prepare_cached(
                "SELECT sequence_index, id, instrument, action, entry_price, stop_price,
                        target_price, position_size, confidence, regime, rationale,
                        content_hash, previous_hash, created_at, retention_expires_at
                 FROM signals
                 ORDER BY sequence_index DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], Self::row_to_signal)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        Ok(signals)
    }

    /// Every entry in ascending sequence order, for chain verification
    pub fn all_ascending(&self) -> Result<Vec<Signal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT sequence_index, id, instrument, action, entry_price, stop_price,
                    target_price, position_size, confidence, regime, rationale,
                    content_hash, previous_hash, created_at, retention_expires_at
             FROM signals
             ORDER BY sequence_index ASC",
        )?;
        let mut rows = Vec::new();
        for row in stmt.query_map([], Self::row_to_signal)? {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Recompute and verify the whole chain; returns the entry count
    pub fn verify(&self) -> Result<usize> {
        let entries = self.all_ascending()?;
        super::verify_chain(&entries)?;
        Ok(entries.len())
    }

    pub fn chain_head(&self) -> Result<Option<(i64, String)>> {
        let conn = self.conn.lock();
        let head = conn
            .query_row(
                "SELECT sequence_index, content_hash FROM signals
                 ORDER BY sequence_index DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(head)
    }

    /// Record a risk rejection for audit
    pub fn record_rejection(
        &self,
        instrument: &str,
        reason: RejectionReason,
        detail: &str,
        rejected_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO risk_rejections (instrument, reason, detail, rejected_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![instrument, reason.code(), detail, rejected_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn recent_rejections(&self, limit: usize) -> Result<Vec<RejectionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT instrument, reason, detail, rejected_at
             FROM risk_rejections
             ORDER BY rejection_id DESC
             LIMIT ?1",
        )?;
        let records = stmt
            .query_map([limit], |row| {
                let instrument: String = row.get(0)?;
                let reason: String = row.get(1)?;
                let detail: String = row.get(2)?;
                let rejected_at: String = row.get(3)?;
                let rejected_at = parse_timestamp(&rejected_at, 3)?;
                Ok(RejectionRecord {
                    instrument,
                    reason,
                    detail,
                    rejected_at,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    pub fn len(&self) -> usize {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM signals", [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap_or(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_by_hash(conn: &Connection, hash: &str) -> Result<Option<Signal>> {
        let mut stmt = conn.prepare_cached(
            "SELECT sequence_index, id, instrument, action, entry_price, stop_price,
                    target_price, position_size, confidence, regime, rationale,
                    content_hash, previous_hash, created_at, retention_expires_at
             FROM signals WHERE content_hash = ?1",
        )?;
        let mut rows = stmt.query([hash])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_signal(row)?)),
            None => Ok(None),
        }
    }

    fn row_to_signal(row: &rusqlite::Row) -> rusqlite::Result<Signal> {
        let sequence_index: i64 = row.get(0)?;
        let id: String = row.get(1)?;
        let instrument: String = row.get(2)?;
        let action: String = row.get(3)?;
        let entry_price: f64 = row.get(4)?;
        let stop_price: f64 = row.get(5)?;
        let target_price: f64 = row.get(6)?;
        let position_size: f64 = row.get(7)?;
        let confidence: f64 = row.get(8)?;
        let regime: String = row.get(9)?;
        let rationale: String = row.get(10)?;
        let content_hash: String = row.get(11)?;
        let previous_hash: String = row.get(12)?;
        let created_at: String = row.get(13)?;
        let retention_expires_at: String = row.get(14)?;

        let id = Uuid::parse_str(&id)
            .map_err(|_| rusqlite::Error::InvalidColumnType(1, "id".to_string(), Type::Text))?;
        let action = SignalAction::parse(&action).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(3, "action".to_string(), Type::Text)
        })?;
        let regime = Regime::parse(&regime).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(9, "regime".to_string(), Type::Text)
        })?;

        Ok(Signal {
            id,
            instrument,
            action,
            entry_price,
            stop_price,
            target_price,
            position_size,
            confidence,
            regime,
            rationale,
            content_hash,
            previous_hash,
            sequence_index,
            created_at: parse_timestamp(&created_at, 13)?,
            retention_expires_at: parse_timestamp(&retention_expires_at, 14)?,
        })
    }
}

fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidColumnType(column, "timestamp".to_string(), Type::Text))
}
