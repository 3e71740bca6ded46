// 📒 Registration Ledger - append-only history + live view
//
// Every change is an entry: a record was Appended or a record was Removed.
// The live view (who is registered where right now) is derived from the
// entries and kept indexed so duplicate checks and per-club counts are cheap.
//
// Entries are hash-chained (SHA-256 over the previous hash + entry contents),
// so a rewritten history fails verify_chain().

mod memory;
mod sqlite;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

use crate::error::LedgerError;
use crate::registration::{RegistrantKey, RegistrationRecord, RegistrationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// prev_hash of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ============================================================================
// OCCUPANCY / PRECONDITION
// ============================================================================

/// Live record counts for one club, split by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupancy {
    pub primary: usize,
    pub waitlisted: usize,
}

impl Occupancy {
    pub fn total(&self) -> usize {
        self.primary + self.waitlisted
    }

    pub fn add(&mut self, status: RegistrationStatus) {
        match status {
            RegistrationStatus::Primary => self.primary += 1,
            RegistrationStatus::Waitlisted => self.waitlisted += 1,
        }
    }

    pub fn sub(&mut self, status: RegistrationStatus) {
        match status {
            RegistrationStatus::Primary => self.primary = self.primary.saturating_sub(1),
            RegistrationStatus::Waitlisted => self.waitlisted = self.waitlisted.saturating_sub(1),
        }
    }
}

impl fmt::Display for Occupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} primary / {} waitlisted", self.primary, self.waitlisted)
    }
}

/// Compare-and-append guard: the commit only applies if the club's live
/// occupancy still equals what the caller observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub club_id: String,
    pub expected: Occupancy,
}

impl Precondition {
    pub fn new(club_id: &str, expected: Occupancy) -> Self {
        Precondition {
            club_id: club_id.to_string(),
            expected,
        }
    }
}

// ============================================================================
// OPERATIONS / ENTRIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOp {
    /// Append a record; the key must not be live
    Append(RegistrationRecord),

    /// Remove the live record for a key; the key must be live
    Remove(RegistrantKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Appended,
    Removed,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Appended => "appended",
            EntryKind::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "appended" => Some(EntryKind::Appended),
            "removed" => Some(EntryKind::Removed),
            _ => None,
        }
    }
}

/// One immutable history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub entry_id: String,
    pub kind: EntryKind,
    pub record: RegistrationRecord,
    pub recorded_at: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

impl LedgerEntry {
    /// Build the next entry in the chain.
    pub fn seal(
        sequence: u64,
        kind: EntryKind,
        record: RegistrationRecord,
        prev_hash: &str,
    ) -> Result<Self, LedgerError> {
        let mut entry = LedgerEntry {
            sequence,
            entry_id: uuid::Uuid::new_v4().to_string(),
            kind,
            record,
            recorded_at: Utc::now(),
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash()?;
        Ok(entry)
    }

    pub fn compute_hash(&self) -> Result<String, LedgerError> {
        let record_json = serde_json::to_string(&self.record)?;

        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(self.entry_id.as_bytes());
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(self.recorded_at.to_rfc3339().as_bytes());
        hasher.update(record_json.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// What a successful commit changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    pub removed: Vec<RegistrationRecord>,
    pub appended: Vec<RegistrationRecord>,
    /// Sequence of the last entry written (0 if nothing was written)
    pub last_sequence: u64,
}

impl CommitReceipt {
    fn from_entries(entries: &[LedgerEntry]) -> Self {
        let mut receipt = CommitReceipt::default();
        for entry in entries {
            match entry.kind {
                EntryKind::Appended => receipt.appended.push(entry.record.clone()),
                EntryKind::Removed => receipt.removed.push(entry.record.clone()),
            }
            receipt.last_sequence = entry.sequence;
        }
        receipt
    }
}

// ============================================================================
// LEDGER CONTRACT
// ============================================================================

/// Durable, append-only store of registration records.
///
/// `commit` is the only write path: it applies every op or none of them.
pub trait Ledger: Send + Sync {
    /// Atomically apply `ops` in order, guarded by an optional precondition.
    /// Must be persisted before returning `Ok`.
    fn commit(
        &self,
        ops: &[LedgerOp],
        precondition: Option<&Precondition>,
    ) -> Result<CommitReceipt, LedgerError>;

    /// Live records in append order.
    fn read_live(&self) -> Result<Vec<RegistrationRecord>, LedgerError>;

    fn find_live(&self, key: &RegistrantKey) -> Result<Option<RegistrationRecord>, LedgerError>;

    fn occupancy(&self, club_id: &str) -> Result<Occupancy, LedgerError>;

    /// Full history, oldest first.
    fn history(&self) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Compare-and-append a single record.
    fn append_if_absent(
        &self,
        record: &RegistrationRecord,
        precondition: &Precondition,
    ) -> Result<(), LedgerError> {
        self.commit(&[LedgerOp::Append(record.clone())], Some(precondition))
            .map(|_| ())
    }

    /// Remove the live record for `key`, returning it.
    fn remove(&self, key: &RegistrantKey) -> Result<RegistrationRecord, LedgerError> {
        let receipt = self.commit(&[LedgerOp::Remove(key.clone())], None)?;
        receipt
            .removed
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::KeyAbsent { key: key.clone() })
    }
}

// ============================================================================
// LIVE INDEX
// ============================================================================

/// Indexed live view: key → record, club → occupancy.
#[derive(Debug, Clone, Default)]
pub struct LiveIndex {
    by_key: HashMap<RegistrantKey, (u64, RegistrationRecord)>,
    by_club: HashMap<String, Occupancy>,
}

impl LiveIndex {
    pub fn get(&self, key: &RegistrantKey) -> Option<&RegistrationRecord> {
        self.by_key.get(key).map(|(_, record)| record)
    }

    pub fn occupancy(&self, club_id: &str) -> Occupancy {
        self.by_club.get(club_id).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Live records ordered by the sequence that appended them.
    pub fn records(&self) -> Vec<RegistrationRecord> {
        let mut rows: Vec<&(u64, RegistrationRecord)> = self.by_key.values().collect();
        rows.sort_by_key(|(sequence, _)| *sequence);
        rows.into_iter().map(|(_, record)| record.clone()).collect()
    }

    /// Validate `ops` against the current view without touching it.
    ///
    /// Returns the entries to write as (kind, record) pairs.
    pub fn plan(
        &self,
        ops: &[LedgerOp],
        precondition: Option<&Precondition>,
    ) -> Result<Vec<(EntryKind, RegistrationRecord)>, LedgerError> {
        if let Some(pre) = precondition {
            let actual = self.occupancy(&pre.club_id);
            if actual != pre.expected {
                return Err(LedgerError::Conflict {
                    club_id: pre.club_id.clone(),
                    expected: pre.expected,
                    actual,
                });
            }
        }

        // Keys touched earlier in this batch shadow the index
        let mut overlay: HashMap<&RegistrantKey, Option<&RegistrationRecord>> = HashMap::new();
        let mut planned = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                LedgerOp::Remove(key) => {
                    let current = match overlay.get(key) {
                        Some(shadowed) => *shadowed,
                        None => self.get(key),
                    };
                    let record = current.ok_or_else(|| LedgerError::KeyAbsent { key: key.clone() })?;
                    planned.push((EntryKind::Removed, record.clone()));
                    overlay.insert(key, None);
                }
                LedgerOp::Append(record) => {
                    let present = match overlay.get(&record.key) {
                        Some(shadowed) => shadowed.is_some(),
                        None => self.by_key.contains_key(&record.key),
                    };
                    if present {
                        return Err(LedgerError::KeyPresent {
                            key: record.key.clone(),
                        });
                    }
                    planned.push((EntryKind::Appended, record.clone()));
                    overlay.insert(&record.key, Some(record));
                }
            }
        }

        Ok(planned)
    }

    /// Apply one entry. Fails if the entry contradicts the view.
    pub fn apply(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let record = &entry.record;
        match entry.kind {
            EntryKind::Appended => {
                if self.by_key.contains_key(&record.key) {
                    return Err(LedgerError::Corrupt(format!(
                        "entry {} appends {} which is already live",
                        entry.sequence, record.key
                    )));
                }
                self.by_club
                    .entry(record.club_id.clone())
                    .or_default()
                    .add(record.status);
                self.by_key
                    .insert(record.key.clone(), (entry.sequence, record.clone()));
            }
            EntryKind::Removed => {
                let (_, live) = self.by_key.remove(&record.key).ok_or_else(|| {
                    LedgerError::Corrupt(format!(
                        "entry {} removes {} which is not live",
                        entry.sequence, record.key
                    ))
                })?;
                if let Some(occupancy) = self.by_club.get_mut(&live.club_id) {
                    occupancy.sub(live.status);
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// HISTORY CHECKS
// ============================================================================

/// Check sequence continuity and hash chaining of a full history.
pub fn verify_chain(entries: &[LedgerEntry]) -> Result<(), LedgerError> {
    let mut prev_hash = GENESIS_HASH.to_string();

    for (i, entry) in entries.iter().enumerate() {
        let expected_sequence = i as u64 + 1;
        if entry.sequence != expected_sequence {
            return Err(LedgerError::Corrupt(format!(
                "expected sequence {}, found {}",
                expected_sequence, entry.sequence
            )));
        }
        if entry.prev_hash != prev_hash {
            return Err(LedgerError::Corrupt(format!(
                "entry {} does not link to its predecessor",
                entry.sequence
            )));
        }
        if entry.compute_hash()? != entry.hash {
            return Err(LedgerError::Corrupt(format!(
                "entry {} hash mismatch",
                entry.sequence
            )));
        }
        prev_hash = entry.hash.clone();
    }

    Ok(())
}

/// Rebuild the live view from history.
pub fn replay(entries: &[LedgerEntry]) -> Result<LiveIndex, LedgerError> {
    let mut index = LiveIndex::default();
    for entry in entries {
        index.apply(entry)?;
    }
    Ok(index)
}

// ============================================================================
// CONTRACT TESTS (shared by both backends)
// ============================================================================


#[cfg(test)]
mod tests {
    use super::contract::record;
    use super::*;

    fn sample_history() -> Vec<LedgerEntry> {
        let a = record("301", "1", "Chess", RegistrationStatus::Primary);
        let first = LedgerEntry::seal(1, EntryKind::Appended, a.clone(), GENESIS_HASH).unwrap();
        let second = LedgerEntry::seal(2, EntryKind::Removed, a, &first.hash).unwrap();
        vec![first, second]
    }

    #[test]
    fn test_verify_chain_accepts_valid_history() {
        let history = sample_history();
        verify_chain(&history).unwrap();
        assert!(replay(&history).unwrap().is_empty());
    }

    #[test]
    fn test_verify_chain_detects_tampering() {
        let mut history = sample_history();
        history[0].record.club_id = "Drama".to_string();
        assert!(matches!(verify_chain(&history), Err(LedgerError::Corrupt(_))));

        let mut history = sample_history();
        history[1].prev_hash = GENESIS_HASH.to_string();
        assert!(verify_chain(&history).is_err());

        let mut history = sample_history();
        history.remove(0);
        assert!(verify_chain(&history).is_err());
    }

    #[test]
    fn test_replay_rejects_double_append() {
        let a = record("301", "1", "Chess", RegistrationStatus::Primary);
        let first = LedgerEntry::seal(1, EntryKind::Appended, a.clone(), GENESIS_HASH).unwrap();
        let second = LedgerEntry::seal(2, EntryKind::Appended, a, &first.hash).unwrap();
        assert!(matches!(replay(&[first, second]), Err(LedgerError::Corrupt(_))));
    }

    #[test]
    fn test_plan_sees_earlier_ops_in_batch() {
        let index = LiveIndex::default();
        let a = record("301", "1", "Chess", RegistrationStatus::Primary);

        // append → remove → append of the same key is legal within one batch
        let ops = vec![
            LedgerOp::Append(a.clone()),
            LedgerOp::Remove(a.key.clone()),
            LedgerOp::Append(a.clone()),
        ];
        let planned = index.plan(&ops, None).unwrap();
        assert_eq!(planned.len(), 3);

        let twice = vec![LedgerOp::Append(a.clone()), LedgerOp::Append(a)];
        assert!(matches!(
            index.plan(&twice, None),
            Err(LedgerError::KeyPresent { .. })
        ));
    }
}
