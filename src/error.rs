// ⚠️ Error taxonomy for allocation, ledger and configuration failures

use crate::ledger::Occupancy;
use crate::registration::RegistrantKey;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AllocationError>;

/// Every way an engine operation can fail.
///
/// All variants are recoverable and meant to be surfaced to the caller as-is.
#[derive(Debug, Error)]
pub enum AllocationError {
    // ========================================================================
    // Allocation errors
    // ========================================================================
    #[error("club not found: {club_id}")]
    ClubNotFound { club_id: String },

    #[error("{key} already holds a registration (club {club_id})")]
    DuplicateRegistration { key: RegistrantKey, club_id: String },

    #[error("club {club_id} is full ({primary_capacity} primary + {waitlist_capacity} waitlist)")]
    CapacityExceeded {
        club_id: String,
        primary_capacity: u32,
        waitlist_capacity: u32,
    },

    #[error("club {club_id} has {remaining} free slots, {requested} requested")]
    InvalidTransferTarget {
        club_id: String,
        requested: usize,
        remaining: usize,
    },

    #[error("no live registration for {key}")]
    RecordNotFound { key: RegistrantKey },

    // ========================================================================
    // Validation / storage
    // ========================================================================
    #[error("invalid registrant: {reason}")]
    InvalidRegistrant { reason: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl AllocationError {
    /// Stable machine-readable kind, used by the HTTP and CLI layers.
    pub fn kind(&self) -> &'static str {
        match self {
            AllocationError::ClubNotFound { .. } => "club_not_found",
            AllocationError::DuplicateRegistration { .. } => "duplicate_registration",
            AllocationError::CapacityExceeded { .. } => "capacity_exceeded",
            AllocationError::InvalidTransferTarget { .. } => "invalid_transfer_target",
            AllocationError::RecordNotFound { .. } => "record_not_found",
            AllocationError::InvalidRegistrant { .. } => "invalid_registrant",
            AllocationError::Ledger(LedgerError::Conflict { .. }) => "contention",
            AllocationError::Ledger(_) => "ledger_failure",
        }
    }

    /// Another writer changed the club between read and commit; retrying
    /// the same request may succeed.
    pub fn is_contention(&self) -> bool {
        matches!(self, AllocationError::Ledger(LedgerError::Conflict { .. }))
    }
}

/// Failures reported by a [`crate::ledger::Ledger`] backend.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Append refused: the key already has a live record.
    #[error("{key} already has a live record")]
    KeyPresent { key: RegistrantKey },

    /// Remove refused: the key has no live record.
    #[error("{key} has no live record")]
    KeyAbsent { key: RegistrantKey },

    /// Compare-and-append precondition failed.
    #[error("occupancy of {club_id} changed: expected {expected}, found {actual}")]
    Conflict {
        club_id: String,
        expected: Occupancy,
        actual: Occupancy,
    },

    #[error("ledger history is corrupt: {0}")]
    Corrupt(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Failures while loading or validating the JSON configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("club already exists: {0}")]
    ClubExists(String),

    #[error("club not found: {0}")]
    ClubNotFound(String),
}
