use super::{CommitReceipt, Ledger, LedgerEntry, LedgerOp, LiveIndex, Occupancy, Precondition, GENESIS_HASH};
use crate::error::LedgerError;
use crate::registration::{RegistrantKey, RegistrationRecord};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Volatile ledger for tests and embedding. One mutex guards both the
/// history and the live index, so every commit is trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: Vec<LedgerEntry>,
    live: LiveIndex,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Ledger for MemoryLedger {
    fn commit(
        &self,
        ops: &[LedgerOp],
        precondition: Option<&Precondition>,
    ) -> Result<CommitReceipt, LedgerError> {
        let mut state = self.state();
        let planned = state.live.plan(ops, precondition)?;

        let mut sequence = state.entries.len() as u64;
        let mut prev_hash = state
            .entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let mut sealed = Vec::with_capacity(planned.len());
        for (kind, record) in planned {
            sequence += 1;
            let entry = LedgerEntry::seal(sequence, kind, record, &prev_hash)?;
            prev_hash = entry.hash.clone();
            sealed.push(entry);
        }

        // plan() already validated the batch, so apply cannot fail halfway
        for entry in &sealed {
            state.live.apply(entry)?;
        }
        state.entries.extend(sealed.iter().cloned());

        Ok(CommitReceipt::from_entries(&sealed))
    }

    fn read_live(&self) -> Result<Vec<RegistrationRecord>, LedgerError> {
        Ok(self.state().live.records())
    }

    fn find_live(&self, key: &RegistrantKey) -> Result<Option<RegistrationRecord>, LedgerError> {
        Ok(self.state().live.get(key).cloned())
    }

    fn occupancy(&self, club_id: &str) -> Result<Occupancy, LedgerError> {
        Ok(self.state().live.occupancy(club_id))
    }

    fn history(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.state().entries.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::contract;

    #[test]
    fn test_memory_ledger_contract() {
        contract::run_all(MemoryLedger::new);
    }
}
