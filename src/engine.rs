// 🎯 Allocation Engine - accept, waitlist or reject under concurrency
//
// Rules:
// - A registrant holds at most one live registration.
// - A club admits Primary while primary seats remain, then Waitlisted while
//   waitlist seats remain, then rejects.
// - Every read-count-then-write sequence runs while holding the lock of each
//   club it touches, and the ledger write carries the observed occupancy as
//   a compare-and-append precondition.
// - Batches are validated completely before the single atomic commit.

use crate::club::{Club, ConfigStore};
use crate::error::{AllocationError, LedgerError, Result};
use crate::ledger::{Ledger, LedgerOp, Occupancy, Precondition};
use crate::registration::{
    validate_display_name, Registrant, RegistrantKey, RegistrationRecord, RegistrationStatus,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ============================================================================
// ADMISSION RULE
// ============================================================================

/// Status the next registrant would receive, or None if the club is full.
pub fn next_status(club: &Club, occupancy: Occupancy) -> Option<RegistrationStatus> {
    if occupancy.primary < club.primary_capacity as usize {
        Some(RegistrationStatus::Primary)
    } else if occupancy.waitlisted < club.waitlist_capacity as usize {
        Some(RegistrationStatus::Waitlisted)
    } else {
        None
    }
}

/// Free primary + waitlist slots.
pub fn remaining_slots(club: &Club, occupancy: Occupancy) -> usize {
    (club.primary_capacity as usize).saturating_sub(occupancy.primary)
        + (club.waitlist_capacity as usize).saturating_sub(occupancy.waitlisted)
}

// ============================================================================
// CLUB LOCKS
// ============================================================================

/// One mutex per club id, created on first use.
#[derive(Debug, Default)]
struct ClubLocks {
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ClubLocks {
    /// Handles in sorted club order; locking them in this order cannot deadlock.
    fn handles(&self, clubs: &BTreeSet<String>) -> Vec<Arc<Mutex<()>>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        clubs
            .iter()
            .map(|id| Arc::clone(table.entry(id.clone()).or_default()))
            .collect()
    }
}

fn lock_all(handles: &[Arc<Mutex<()>>]) -> Vec<MutexGuard<'_, ()>> {
    handles
        .iter()
        .map(|handle| handle.lock().unwrap_or_else(PoisonError::into_inner))
        .collect()
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct AllocationEngine {
    config: Arc<dyn ConfigStore>,
    ledger: Arc<dyn Ledger>,
    locks: ClubLocks,
}

impl AllocationEngine {
    pub fn new(config: Arc<dyn ConfigStore>, ledger: Arc<dyn Ledger>) -> Self {
        AllocationEngine {
            config,
            ledger,
            locks: ClubLocks::default(),
        }
    }

    pub fn config(&self) -> &Arc<dyn ConfigStore> {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    fn club(&self, club_id: &str) -> Result<Club> {
        self.config
            .get_club(club_id)
            .ok_or_else(|| AllocationError::ClubNotFound {
                club_id: club_id.to_string(),
            })
    }

    fn duplicate(&self, key: &RegistrantKey) -> Result<AllocationError> {
        let club_id = self
            .ledger
            .find_live(key)?
            .map(|record| record.club_id)
            .unwrap_or_default();
        Ok(AllocationError::DuplicateRegistration {
            key: key.clone(),
            club_id,
        })
    }

    /// Clubs currently holding a live record for any of `keys`.
    fn clubs_of(&self, keys: &[RegistrantKey]) -> Result<BTreeSet<String>> {
        let mut clubs = BTreeSet::new();
        for key in keys {
            if let Some(record) = self.ledger.find_live(key)? {
                clubs.insert(record.club_id);
            }
        }
        Ok(clubs)
    }

    /// Run `f` while holding the locks of `extra` and of every club that
    /// holds one of `keys`. If a key moves to another club between the
    /// lookup and the locking, the lock set is widened and taken again.
    fn with_clubs_locked<T>(
        &self,
        keys: &[RegistrantKey],
        extra: Option<&str>,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let mut clubs: BTreeSet<String> = extra.map(str::to_string).into_iter().collect();
        clubs.extend(self.clubs_of(keys)?);

        loop {
            let handles = self.locks.handles(&clubs);
            let _guards = lock_all(&handles);

            let current = self.clubs_of(keys)?;
            if current.is_subset(&clubs) {
                return f();
            }

            tracing::debug!(
                held = clubs.len(),
                needed = current.len(),
                "registrant moved while locking, widening lock set"
            );
            clubs.extend(current);
        }
    }

    // ========================================================================
    // SUBMIT
    // ========================================================================

    /// Register `key` for `club_id`.
    ///
    /// Returns the status the registrant was admitted with. Writes exactly
    /// one ledger entry on success and nothing on failure.
    pub fn submit(
        &self,
        key: &RegistrantKey,
        club_id: &str,
        display_name: &str,
    ) -> Result<RegistrationStatus> {
        let display_name = validate_display_name(display_name)?;
        let club = self.club(club_id)?;

        let handles = self.locks.handles(&BTreeSet::from([club.id.clone()]));
        let _guards = lock_all(&handles);

        if let Some(existing) = self.ledger.find_live(key)? {
            return Err(AllocationError::DuplicateRegistration {
                key: key.clone(),
                club_id: existing.club_id,
            });
        }

        let occupancy = self.ledger.occupancy(&club.id)?;
        let status = next_status(&club, occupancy).ok_or_else(|| {
            AllocationError::CapacityExceeded {
                club_id: club.id.clone(),
                primary_capacity: club.primary_capacity,
                waitlist_capacity: club.waitlist_capacity,
            }
        })?;

        let record = RegistrationRecord::new(key.clone(), &display_name, &club.id, status);
        match self
            .ledger
            .append_if_absent(&record, &Precondition::new(&club.id, occupancy))
        {
            Ok(()) => {
                tracing::info!(registrant = %key, club = %club.id, %status, "registration accepted");
                Ok(status)
            }
            // Same registrant submitted to another club at the same moment
            Err(LedgerError::KeyPresent { .. }) => Err(self.duplicate(key)?),
            Err(e) => {
                tracing::warn!(registrant = %key, club = %club.id, error = %e, "ledger rejected append");
                Err(e.into())
            }
        }
    }

    // ========================================================================
    // CANCEL
    // ========================================================================

    /// Remove the live registration for `key`, freeing its slot.
    ///
    /// Waitlisted registrants are not promoted; the next submit to the club
    /// simply sees the free slot.
    pub fn cancel(&self, key: &RegistrantKey) -> Result<RegistrationRecord> {
        self.with_clubs_locked(std::slice::from_ref(key), None, || {
            match self.ledger.remove(key) {
                Ok(record) => {
                    tracing::info!(registrant = %key, club = %record.club_id, "registration cancelled");
                    Ok(record)
                }
                Err(LedgerError::KeyAbsent { .. }) => {
                    Err(AllocationError::RecordNotFound { key: key.clone() })
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    // ========================================================================
    // BATCH OPERATIONS
    // ========================================================================

    /// Move every registrant in `keys` to `target_club_id` in one commit.
    ///
    /// Fails without writing if the target lacks room for all of them or
    /// if any key has no live registration.
    pub fn batch_move(
        &self,
        keys: &[RegistrantKey],
        target_club_id: &str,
    ) -> Result<Vec<RegistrationRecord>> {
        let keys = dedup_keys(keys);
        let target = self.club(target_club_id)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        self.with_clubs_locked(&keys, Some(&target.id), || {
            let mut current = Vec::with_capacity(keys.len());
            for key in &keys {
                let record = self
                    .ledger
                    .find_live(key)?
                    .ok_or_else(|| AllocationError::RecordNotFound { key: key.clone() })?;
                current.push(record);
            }

            let observed = self.ledger.occupancy(&target.id)?;

            // Registrants already in the target give their slot back first
            let mut occupancy = observed;
            for record in current.iter().filter(|r| r.club_id == target.id) {
                occupancy.sub(record.status);
            }

            let remaining = remaining_slots(&target, occupancy);
            if remaining < keys.len() {
                tracing::warn!(club = %target.id, remaining, requested = keys.len(), "batch move rejected");
                return Err(AllocationError::InvalidTransferTarget {
                    club_id: target.id.clone(),
                    requested: keys.len(),
                    remaining,
                });
            }

            let mut ops: Vec<LedgerOp> = keys.iter().cloned().map(LedgerOp::Remove).collect();
            ops.extend(self.place(&target, &mut occupancy, current.iter().map(|r| (&r.key, r.display_name.as_str())))?);

            let receipt = self
                .ledger
                .commit(&ops, Some(&Precondition::new(&target.id, observed)))?;

            tracing::info!(club = %target.id, moved = receipt.appended.len(), "batch move committed");
            Ok(receipt.appended)
        })
    }

    /// Enroll registrants who have no live registration into `target_club_id`.
    ///
    /// All-or-nothing: any registrant already registered (or listed twice)
    /// fails the batch with `DuplicateRegistration`.
    pub fn batch_force_add(
        &self,
        registrants: &[Registrant],
        target_club_id: &str,
    ) -> Result<Vec<RegistrationRecord>> {
        let target = self.club(target_club_id)?;
        if registrants.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let mut entrants = Vec::with_capacity(registrants.len());
        for registrant in registrants {
            let display_name = validate_display_name(registrant.display_name())?;
            if !seen.insert(registrant.key()) {
                return Err(AllocationError::DuplicateRegistration {
                    key: registrant.key().clone(),
                    club_id: target.id.clone(),
                });
            }
            entrants.push((registrant.key().clone(), display_name));
        }

        let keys: Vec<RegistrantKey> = entrants.iter().map(|(key, _)| key.clone()).collect();
        self.with_clubs_locked(&keys, Some(&target.id), || {
            for key in &keys {
                if let Some(existing) = self.ledger.find_live(key)? {
                    return Err(AllocationError::DuplicateRegistration {
                        key: key.clone(),
                        club_id: existing.club_id,
                    });
                }
            }

            let observed = self.ledger.occupancy(&target.id)?;
            let remaining = remaining_slots(&target, observed);
            if remaining < registrants.len() {
                tracing::warn!(club = %target.id, remaining, requested = registrants.len(), "force add rejected");
                return Err(AllocationError::InvalidTransferTarget {
                    club_id: target.id.clone(),
                    requested: registrants.len(),
                    remaining,
                });
            }

            let mut occupancy = observed;
            let ops = self.place(
                &target,
                &mut occupancy,
                entrants.iter().map(|(key, name)| (key, name.as_str())),
            )?;

            match self
                .ledger
                .commit(&ops, Some(&Precondition::new(&target.id, observed)))
            {
                Ok(receipt) => {
                    tracing::info!(club = %target.id, added = receipt.appended.len(), "force add committed");
                    Ok(receipt.appended)
                }
                Err(LedgerError::KeyPresent { key }) => Err(self.duplicate(&key)?),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Remove every live registration among `keys` in one commit.
    /// Keys without a live registration are skipped.
    pub fn batch_delete(&self, keys: &[RegistrantKey]) -> Result<Vec<RegistrationRecord>> {
        let keys = dedup_keys(keys);
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        self.with_clubs_locked(&keys, None, || {
            let mut ops = Vec::new();
            for key in &keys {
                if self.ledger.find_live(key)?.is_some() {
                    ops.push(LedgerOp::Remove(key.clone()));
                }
            }
            if ops.is_empty() {
                return Ok(Vec::new());
            }

            let receipt = self.ledger.commit(&ops, None)?;
            tracing::info!(removed = receipt.removed.len(), "batch delete committed");
            Ok(receipt.removed)
        })
    }

    /// Build append ops for `entrants`, assigning statuses in order by the
    /// submit rule and advancing `occupancy` as it goes.
    fn place<'a>(
        &self,
        club: &Club,
        occupancy: &mut Occupancy,
        entrants: impl Iterator<Item = (&'a RegistrantKey, &'a str)>,
    ) -> Result<Vec<LedgerOp>> {
        let mut ops = Vec::new();
        for (key, display_name) in entrants {
            let status = next_status(club, *occupancy).ok_or_else(|| {
                AllocationError::CapacityExceeded {
                    club_id: club.id.clone(),
                    primary_capacity: club.primary_capacity,
                    waitlist_capacity: club.waitlist_capacity,
                }
            })?;
            occupancy.add(status);
            ops.push(LedgerOp::Append(RegistrationRecord::new(
                key.clone(),
                display_name,
                &club.id,
                status,
            )));
        }
        Ok(ops)
    }
}

/// Drop repeated keys, keeping first occurrence order.
fn dedup_keys(keys: &[RegistrantKey]) -> Vec<RegistrantKey> {
    let mut seen = HashSet::new();
    keys.iter()
        .filter(|key| seen.insert(*key))
        .cloned()
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::club::ClubRegistry;
    use crate::ledger::{verify_chain, MemoryLedger, SqliteLedger};
    use std::sync::Barrier;
    use std::thread;

    fn key(class_id: &str, seat: &str) -> RegistrantKey {
        RegistrantKey::new(class_id, seat).unwrap()
    }

    fn engine_with(clubs: Vec<Club>, ledger: Arc<dyn Ledger>) -> AllocationEngine {
        let registry = ClubRegistry::from_clubs(clubs).unwrap();
        AllocationEngine::new(Arc::new(registry), ledger)
    }

    fn engine(clubs: Vec<Club>) -> AllocationEngine {
        engine_with(clubs, Arc::new(MemoryLedger::new()))
    }

    /// Capacity and uniqueness invariants over the live view.
    fn assert_invariants(engine: &AllocationEngine) {
        let live = engine.ledger().read_live().unwrap();

        let mut keys = HashSet::new();
        for record in &live {
            assert!(keys.insert(record.key.clone()), "duplicate live key {}", record.key);
        }

        for club in engine.config().list_clubs() {
            let primary = live
                .iter()
                .filter(|r| r.club_id == club.id && r.status == RegistrationStatus::Primary)
                .count();
            let waitlisted = live
                .iter()
                .filter(|r| r.club_id == club.id && r.status == RegistrationStatus::Waitlisted)
                .count();
            assert!(primary <= club.primary_capacity as usize, "{} primary over capacity", club.id);
            assert!(waitlisted <= club.waitlist_capacity as usize, "{} waitlist over capacity", club.id);
        }
    }

    #[test]
    fn test_science_scenario() {
        let engine = engine(vec![Club::new("Science", 1, 1)]);
        let (a, b, c, d) = (key("301", "1"), key("301", "2"), key("301", "3"), key("301", "4"));

        assert_eq!(engine.submit(&a, "Science", "A").unwrap(), RegistrationStatus::Primary);
        assert_eq!(engine.submit(&b, "Science", "B").unwrap(), RegistrationStatus::Waitlisted);
        assert!(matches!(
            engine.submit(&c, "Science", "C"),
            Err(AllocationError::CapacityExceeded { .. })
        ));

        engine.cancel(&a).unwrap();
        assert_eq!(engine.submit(&d, "Science", "D").unwrap(), RegistrationStatus::Primary);

        let b_record = engine.ledger().find_live(&b).unwrap().unwrap();
        assert_eq!(b_record.status, RegistrationStatus::Waitlisted);
        assert_invariants(&engine);

        println!("✅ Science scenario PASSED");
    }

    #[test]
    fn test_duplicate_submit_leaves_ledger_unchanged() {
        let engine = engine(vec![Club::new("Chess", 5, 0), Club::new("Drama", 5, 0)]);
        let a = key("301", "1");

        engine.submit(&a, "Chess", "A").unwrap();
        let before = engine.ledger().history().unwrap();

        match engine.submit(&a, "Drama", "A") {
            Err(AllocationError::DuplicateRegistration { club_id, .. }) => assert_eq!(club_id, "Chess"),
            other => panic!("expected duplicate, got {:?}", other),
        }
        assert!(matches!(
            engine.submit(&a, "Chess", "A"),
            Err(AllocationError::DuplicateRegistration { .. })
        ));

        assert_eq!(engine.ledger().history().unwrap(), before);
    }

    #[test]
    fn test_submit_rejects_unknown_club_and_blank_name() {
        let engine = engine(vec![Club::new("Chess", 5, 0)]);
        let a = key("301", "1");

        assert!(matches!(
            engine.submit(&a, "Drama", "A"),
            Err(AllocationError::ClubNotFound { .. })
        ));
        assert!(matches!(
            engine.submit(&a, "Chess", "  "),
            Err(AllocationError::InvalidRegistrant { .. })
        ));
        assert!(engine.ledger().history().unwrap().is_empty());
    }

    #[test]
    fn test_zero_capacity_club_rejects() {
        let engine = engine(vec![Club::new("Closed", 0, 0)]);
        assert!(matches!(
            engine.submit(&key("301", "1"), "Closed", "A"),
            Err(AllocationError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_cancel_unknown_key() {
        let engine = engine(vec![Club::new("Chess", 5, 0)]);
        assert!(matches!(
            engine.cancel(&key("301", "1")),
            Err(AllocationError::RecordNotFound { .. })
        ));
    }

    fn run_concurrent_submits(engine: Arc<AllocationEngine>, count: usize) -> Vec<Result<RegistrationStatus>> {
        let barrier = Arc::new(Barrier::new(count));
        let handles: Vec<_> = (0..count)
            .map(|i| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let k = key("301", &(i + 1).to_string());
                    barrier.wait();
                    engine.submit(&k, "Robotics", &format!("Student {}", i + 1))
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    fn check_two_one_outcome(engine: &AllocationEngine, results: &[Result<RegistrationStatus>]) {
        let primary = results
            .iter()
            .filter(|r| matches!(r, Ok(RegistrationStatus::Primary)))
            .count();
        let waitlisted = results
            .iter()
            .filter(|r| matches!(r, Ok(RegistrationStatus::Waitlisted)))
            .count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(AllocationError::CapacityExceeded { .. })))
            .count();

        assert_eq!((primary, waitlisted, rejected), (2, 1, 2));
        assert_eq!(engine.ledger().read_live().unwrap().len(), 3);
        assert_eq!(
            engine.ledger().occupancy("Robotics").unwrap(),
            Occupancy { primary: 2, waitlisted: 1 }
        );
        assert_invariants(engine);
    }

    #[test]
    fn test_concurrent_submits_respect_capacity() {
        for _ in 0..50 {
            let engine = Arc::new(engine(vec![Club::new("Robotics", 2, 1)]));
            let results = run_concurrent_submits(Arc::clone(&engine), 5);
            check_two_one_outcome(&engine, &results);
        }
    }

    #[test]
    fn test_concurrent_submits_respect_capacity_sqlite() {
        for _ in 0..10 {
            let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::in_memory().unwrap());
            let engine = Arc::new(engine_with(vec![Club::new("Robotics", 2, 1)], ledger));
            let results = run_concurrent_submits(Arc::clone(&engine), 5);
            check_two_one_outcome(&engine, &results);
            verify_chain(&engine.ledger().history().unwrap()).unwrap();
        }
    }

    #[test]
    fn test_same_registrant_racing_into_two_clubs() {
        for _ in 0..50 {
            let engine = Arc::new(engine(vec![Club::new("Chess", 5, 0), Club::new("Drama", 5, 0)]));
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = ["Chess", "Drama"]
                .into_iter()
                .map(|club| {
                    let engine = Arc::clone(&engine);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        engine.submit(&key("301", "1"), club, "A")
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(AllocationError::DuplicateRegistration { .. }))));
            assert_eq!(engine.ledger().read_live().unwrap().len(), 1);
        }
    }

    #[test]
    fn test_mixed_concurrent_workload_keeps_invariants() {
        let engine = Arc::new(engine(vec![
            Club::new("Chess", 3, 2),
            Club::new("Drama", 2, 0),
            Club::new("Robotics", 4, 1),
        ]));
        let clubs = ["Chess", "Drama", "Robotics"];

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for i in 0..40 {
                        let k = key(&format!("{}", 300 + t), &format!("{}", i % 10 + 1));
                        let club = clubs[(t + i) % clubs.len()];
                        match i % 4 {
                            0 | 1 => {
                                let _ = engine.submit(&k, club, "Student");
                            }
                            2 => {
                                let _ = engine.batch_move(std::slice::from_ref(&k), club);
                            }
                            _ => {
                                let _ = engine.cancel(&k);
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_invariants(&engine);
        verify_chain(&engine.ledger().history().unwrap()).unwrap();
    }

    #[test]
    fn test_batch_move_without_room_changes_nothing() {
        let engine = engine(vec![Club::new("Chess", 5, 0), Club::new("Drama", 1, 1)]);
        let movers = vec![key("301", "1"), key("301", "2"), key("301", "3")];
        for k in &movers {
            engine.submit(k, "Chess", "Mover").unwrap();
        }
        engine.submit(&key("302", "1"), "Drama", "Resident").unwrap();
        let before = engine.ledger().read_live().unwrap();

        match engine.batch_move(&movers, "Drama") {
            Err(AllocationError::InvalidTransferTarget { requested, remaining, .. }) => {
                assert_eq!((requested, remaining), (3, 1));
            }
            other => panic!("expected InvalidTransferTarget, got {:?}", other),
        }
        assert_eq!(engine.ledger().read_live().unwrap(), before);
    }

    #[test]
    fn test_batch_move_assigns_statuses_in_order() {
        let engine = engine(vec![Club::new("Chess", 5, 0), Club::new("Drama", 1, 2)]);
        let movers = vec![key("301", "1"), key("301", "2"), key("301", "3")];
        for k in &movers {
            engine.submit(k, "Chess", "Mover").unwrap();
        }

        let moved = engine.batch_move(&movers, "Drama").unwrap();
        let statuses: Vec<RegistrationStatus> = moved.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                RegistrationStatus::Primary,
                RegistrationStatus::Waitlisted,
                RegistrationStatus::Waitlisted
            ]
        );
        assert!(moved.iter().all(|r| r.club_id == "Drama" && r.display_name == "Mover"));
        assert_eq!(engine.ledger().occupancy("Chess").unwrap(), Occupancy::default());
        assert_invariants(&engine);
    }

    #[test]
    fn test_batch_move_within_target_reuses_own_slot() {
        let engine = engine(vec![Club::new("Drama", 1, 0)]);
        let a = key("301", "1");
        engine.submit(&a, "Drama", "A").unwrap();

        let moved = engine.batch_move(&[a.clone(), a.clone()], "Drama").unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].status, RegistrationStatus::Primary);
    }

    #[test]
    fn test_batch_move_requires_live_records() {
        let engine = engine(vec![Club::new("Chess", 5, 0), Club::new("Drama", 5, 0)]);
        let a = key("301", "1");
        engine.submit(&a, "Chess", "A").unwrap();

        assert!(matches!(
            engine.batch_move(&[a.clone(), key("301", "9")], "Drama"),
            Err(AllocationError::RecordNotFound { .. })
        ));
        assert!(matches!(
            engine.batch_move(&[a.clone()], "Nowhere"),
            Err(AllocationError::ClubNotFound { .. })
        ));
        assert_eq!(engine.ledger().find_live(&a).unwrap().unwrap().club_id, "Chess");
    }

    #[test]
    fn test_batch_force_add() {
        let engine = engine(vec![Club::new("Chess", 1, 1), Club::new("Drama", 5, 0)]);
        let registered = key("301", "1");
        engine.submit(&registered, "Drama", "Busy").unwrap();

        let newcomer = |seat: &str, name: &str| Registrant::new(key("302", seat), name).unwrap();

        // already registered elsewhere
        let err = engine
            .batch_force_add(
                &[newcomer("1", "X"), Registrant::new(registered.clone(), "Busy").unwrap()],
                "Chess",
            )
            .unwrap_err();
        assert!(matches!(err, AllocationError::DuplicateRegistration { .. }));

        // listed twice
        let err = engine
            .batch_force_add(&[newcomer("1", "X"), newcomer("1", "X")], "Chess")
            .unwrap_err();
        assert!(matches!(err, AllocationError::DuplicateRegistration { .. }));

        // too many
        let err = engine
            .batch_force_add(&[newcomer("1", "X"), newcomer("2", "Y"), newcomer("3", "Z")], "Chess")
            .unwrap_err();
        assert!(matches!(err, AllocationError::InvalidTransferTarget { .. }));
        assert_eq!(engine.ledger().occupancy("Chess").unwrap(), Occupancy::default());

        let added = engine
            .batch_force_add(&[newcomer("1", "X"), newcomer("2", "Y")], "Chess")
            .unwrap();
        assert_eq!(added[0].status, RegistrationStatus::Primary);
        assert_eq!(added[1].status, RegistrationStatus::Waitlisted);
        assert_invariants(&engine);
    }

    #[test]
    fn test_force_add_from_json_blocks_second_registration() {
        let engine = engine(vec![Club::new("Chess", 5, 0), Club::new("Drama", 5, 0)]);
        let registrant: Registrant = serde_json::from_str(
            r#"{"key":{"class_id":"301","seat_number":"7"},"display_name":"  Lin  "}"#,
        )
        .unwrap();

        let added = engine.batch_force_add(&[registrant], "Chess").unwrap();
        assert_eq!(added[0].display_name, "Lin");
        assert_eq!(added[0].key.to_string(), "301-07");

        assert!(matches!(
            engine.submit(&key("301", "07"), "Drama", "Lin"),
            Err(AllocationError::DuplicateRegistration { .. })
        ));
        assert_eq!(engine.ledger().read_live().unwrap().len(), 1);
    }

    #[test]
    fn test_batch_delete_is_idempotent() {
        let engine = engine(vec![Club::new("Chess", 5, 0), Club::new("Drama", 5, 0)]);
        let (a, b) = (key("301", "1"), key("301", "2"));
        engine.submit(&a, "Chess", "A").unwrap();
        engine.submit(&b, "Drama", "B").unwrap();

        let removed = engine
            .batch_delete(&[a.clone(), key("309", "9"), b.clone(), a.clone()])
            .unwrap();
        assert_eq!(removed.len(), 2);
        assert!(engine.ledger().read_live().unwrap().is_empty());

        assert!(engine.batch_delete(&[a.clone(), b]).unwrap().is_empty());

        // key is free again
        assert_eq!(engine.submit(&a, "Drama", "A").unwrap(), RegistrationStatus::Primary);
    }

    #[test]
    fn test_admission_rule() {
        let club = Club::new("Chess", 2, 1);
        let at = |primary, waitlisted| Occupancy { primary, waitlisted };

        assert_eq!(next_status(&club, at(0, 0)), Some(RegistrationStatus::Primary));
        assert_eq!(next_status(&club, at(2, 0)), Some(RegistrationStatus::Waitlisted));
        assert_eq!(next_status(&club, at(1, 1)), Some(RegistrationStatus::Primary));
        assert_eq!(next_status(&club, at(2, 1)), None);

        assert_eq!(remaining_slots(&club, at(0, 0)), 3);
        assert_eq!(remaining_slots(&club, at(1, 1)), 1);
        assert_eq!(remaining_slots(&club, at(5, 5)), 0);
    }
}
