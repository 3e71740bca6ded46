// Club Registration System - Core Library
// Exposes the allocation engine, ledgers and projections for the CLI, API server and tests

pub mod error;
pub mod registration;
pub mod club;
pub mod config;
pub mod admission;
pub mod ledger;
pub mod engine;
pub mod query;
pub mod services;

// Re-export commonly used types
pub use error::{AllocationError, ConfigError, LedgerError};
pub use registration::{Registrant, RegistrantKey, RegistrationRecord, RegistrationStatus};
pub use club::{Club, ClubRegistry, ConfigStore};
pub use config::Settings;
pub use admission::{AdmissionError, AdmissionWindow, WindowPhase};
pub use ledger::{
    verify_chain, replay,
    CommitReceipt, EntryKind, Ledger, LedgerEntry, LedgerOp, MemoryLedger, Occupancy,
    Precondition, SqliteLedger,
};
pub use engine::{next_status, remaining_slots, AllocationEngine};
pub use query::{ClubAvailability, QueryService, RankedRegistration, RegistrationSummary};
pub use services::Services;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
