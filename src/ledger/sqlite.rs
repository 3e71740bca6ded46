// 🗄️ SQLite ledger - durable history + indexed live table
//
// ledger_entries      append-only, hash-chained history (never updated)
// live_registrations  current view, one row per registrant key
//
// Both tables change inside one IMMEDIATE transaction per commit, so the
// precondition check and the writes cannot interleave with another writer,
// even one in a different process sharing the database file.

use super::{CommitReceipt, EntryKind, Ledger, LedgerEntry, LedgerOp, Occupancy, Precondition, GENESIS_HASH};
use crate::error::LedgerError;
use crate::registration::{RegistrantKey, RegistrationRecord, RegistrationStatus};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) a ledger database file.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        tracing::debug!(path = %path.display(), "opened sqlite ledger");
        Ok(SqliteLedger {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteLedger {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn setup_database(conn: &Connection) -> Result<(), LedgerError> {
    // WAL for crash recovery, FULL so a returned commit is on disk
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_entries (
            sequence INTEGER PRIMARY KEY,
            entry_id TEXT UNIQUE NOT NULL,
            kind TEXT NOT NULL,
            class_id TEXT NOT NULL,
            seat_number TEXT NOT NULL,
            display_name TEXT NOT NULL,
            club_id TEXT NOT NULL,
            registered_at TEXT NOT NULL,
            status TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            prev_hash TEXT NOT NULL,
            hash TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS live_registrations (
            class_id TEXT NOT NULL,
            seat_number TEXT NOT NULL,
            display_name TEXT NOT NULL,
            club_id TEXT NOT NULL,
            registered_at TEXT NOT NULL,
            status TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            PRIMARY KEY (class_id, seat_number)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_live_club ON live_registrations(club_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_live_sequence ON live_registrations(sequence)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<RegistrationStatus> {
    let raw: String = row.get(idx)?;
    raw.parse::<RegistrationStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// Columns: class_id, seat_number, display_name, club_id, registered_at, status
fn record_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<RegistrationRecord> {
    let class_id: String = row.get(offset)?;
    let seat_number: String = row.get(offset + 1)?;
    let key = RegistrantKey::new(&class_id, &seat_number).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(offset, Type::Text, Box::new(e))
    })?;

    Ok(RegistrationRecord {
        key,
        display_name: row.get(offset + 2)?,
        club_id: row.get(offset + 3)?,
        timestamp: parse_time(row, offset + 4)?,
        status: parse_status(row, offset + 5)?,
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let kind_raw: String = row.get(2)?;
    let kind = EntryKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown entry kind: {}", kind_raw).into(),
        )
    })?;

    Ok(LedgerEntry {
        sequence: row.get::<_, i64>(0)? as u64,
        entry_id: row.get(1)?,
        kind,
        record: record_from_row(row, 3)?,
        recorded_at: parse_time(row, 9)?,
        prev_hash: row.get(10)?,
        hash: row.get(11)?,
    })
}

fn load_live(conn: &Connection, key: &RegistrantKey) -> rusqlite::Result<Option<RegistrationRecord>> {
    conn.query_row(
        "SELECT class_id, seat_number, display_name, club_id, registered_at, status
         FROM live_registrations
         WHERE class_id = ?1 AND seat_number = ?2",
        params![key.class_id(), key.seat_number()],
        |row| record_from_row(row, 0),
    )
    .optional()
}

fn load_occupancy(conn: &Connection, club_id: &str) -> rusqlite::Result<Occupancy> {
    conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN status = 'primary' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'waitlisted' THEN 1 ELSE 0 END), 0)
         FROM live_registrations
         WHERE club_id = ?1",
        params![club_id],
        |row| {
            Ok(Occupancy {
                primary: row.get::<_, i64>(0)? as usize,
                waitlisted: row.get::<_, i64>(1)? as usize,
            })
        },
    )
}

fn insert_entry(conn: &Connection, entry: &LedgerEntry) -> rusqlite::Result<()> {
    let r = &entry.record;
    conn.execute(
        "INSERT INTO ledger_entries (
            sequence, entry_id, kind, class_id, seat_number, display_name,
            club_id, registered_at, status, recorded_at, prev_hash, hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            entry.sequence as i64,
            entry.entry_id,
            entry.kind.as_str(),
            r.key.class_id(),
            r.key.seat_number(),
            r.display_name,
            r.club_id,
            r.timestamp.to_rfc3339(),
            r.status.as_str(),
            entry.recorded_at.to_rfc3339(),
            entry.prev_hash,
            entry.hash,
        ],
    )?;
    Ok(())
}

// ============================================================================
// LEDGER IMPL
// ============================================================================

impl Ledger for SqliteLedger {
    fn commit(
        &self,
        ops: &[LedgerOp],
        precondition: Option<&Precondition>,
    ) -> Result<CommitReceipt, LedgerError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(pre) = precondition {
            let actual = load_occupancy(&tx, &pre.club_id)?;
            if actual != pre.expected {
                return Err(LedgerError::Conflict {
                    club_id: pre.club_id.clone(),
                    expected: pre.expected,
                    actual,
                });
            }
        }

        let (mut sequence, mut prev_hash) = tx
            .query_row(
                "SELECT sequence, hash FROM ledger_entries ORDER BY sequence DESC LIMIT 1",
                [],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)),
            )
            .optional()?
            .unwrap_or_else(|| (0, GENESIS_HASH.to_string()));

        // Any early return drops `tx`, which rolls everything back
        let mut written = Vec::with_capacity(ops.len());
        for op in ops {
            let entry = match op {
                LedgerOp::Remove(key) => {
                    let record = load_live(&tx, key)?
                        .ok_or_else(|| LedgerError::KeyAbsent { key: key.clone() })?;
                    tx.execute(
                        "DELETE FROM live_registrations WHERE class_id = ?1 AND seat_number = ?2",
                        params![key.class_id(), key.seat_number()],
                    )?;
                    LedgerEntry::seal(sequence + 1, EntryKind::Removed, record, &prev_hash)?
                }
                LedgerOp::Append(record) => {
                    if load_live(&tx, &record.key)?.is_some() {
                        return Err(LedgerError::KeyPresent {
                            key: record.key.clone(),
                        });
                    }
                    tx.execute(
                        "INSERT INTO live_registrations (
                            class_id, seat_number, display_name, club_id,
                            registered_at, status, sequence
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            record.key.class_id(),
                            record.key.seat_number(),
                            record.display_name,
                            record.club_id,
                            record.timestamp.to_rfc3339(),
                            record.status.as_str(),
                            (sequence + 1) as i64,
                        ],
                    )?;
                    LedgerEntry::seal(sequence + 1, EntryKind::Appended, record.clone(), &prev_hash)?
                }
            };

            insert_entry(&tx, &entry)?;
            sequence = entry.sequence;
            prev_hash = entry.hash.clone();
            written.push(entry);
        }

        tx.commit()?;
        Ok(CommitReceipt::from_entries(&written))
    }

    fn read_live(&self) -> Result<Vec<RegistrationRecord>, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT class_id, seat_number, display_name, club_id, registered_at, status
             FROM live_registrations
             ORDER BY sequence ASC",
        )?;

        let records = stmt
            .query_map([], |row| record_from_row(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn find_live(&self, key: &RegistrantKey) -> Result<Option<RegistrationRecord>, LedgerError> {
        let conn = self.conn();
        Ok(load_live(&conn, key)?)
    }

    fn occupancy(&self, club_id: &str) -> Result<Occupancy, LedgerError> {
        let conn = self.conn();
        Ok(load_occupancy(&conn, club_id)?)
    }

    fn history(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT sequence, entry_id, kind,
                    class_id, seat_number, display_name, club_id, registered_at, status,
                    recorded_at, prev_hash, hash
             FROM ledger_entries
             ORDER BY sequence ASC",
        )?;

        let entries = stmt
            .query_map([], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{contract, verify_chain};

    #[test]
    fn test_sqlite_ledger_contract() {
        contract::run_all(|| SqliteLedger::in_memory().unwrap());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registrations.db");

        let a = contract::record("301", "1", "Chess", RegistrationStatus::Primary);
        let b = contract::record("302", "4", "Chess", RegistrationStatus::Waitlisted);
        {
            let ledger = SqliteLedger::open(&path).unwrap();
            ledger
                .commit(&[LedgerOp::Append(a.clone()), LedgerOp::Append(b.clone())], None)
                .unwrap();
            ledger.remove(&a.key).unwrap();
        }

        let reopened = SqliteLedger::open(&path).unwrap();
        assert_eq!(reopened.read_live().unwrap(), vec![b]);
        assert_eq!(
            reopened.occupancy("Chess").unwrap(),
            Occupancy { primary: 0, waitlisted: 1 }
        );

        let history = reopened.history().unwrap();
        assert_eq!(history.len(), 3);
        verify_chain(&history).unwrap();
    }

    #[test]
    fn test_tampered_row_fails_verification() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let a = contract::record("301", "1", "Chess", RegistrationStatus::Primary);
        ledger.commit(&[LedgerOp::Append(a)], None).unwrap();

        ledger
            .conn()
            .execute("UPDATE ledger_entries SET club_id = 'Drama'", [])
            .unwrap();

        let history = ledger.history().unwrap();
        assert!(matches!(verify_chain(&history), Err(LedgerError::Corrupt(_))));
    }
}
