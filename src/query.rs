// 🔍 Query Service - read-only projections over the ledger
// Lookup, ranked rosters, club availability and dashboard totals.
// Nothing here writes; callers poll these on their own cadence.

use crate::club::{Club, ConfigStore};
use crate::engine::{next_status, remaining_slots};
use crate::error::LedgerError;
use crate::ledger::{Ledger, Occupancy};
use crate::registration::{RegistrantKey, RegistrationRecord, RegistrationStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// PROJECTIONS
// ============================================================================

/// A live record plus its position within (club, status), 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedRegistration {
    pub record: RegistrationRecord,
    pub rank: usize,
}

impl RankedRegistration {
    /// e.g. "Primary 03", "Waitlisted 01"
    pub fn rank_label(&self) -> String {
        format!("{} {:02}", self.record.status.label(), self.rank)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClubAvailability {
    pub club: Club,
    pub occupancy: Occupancy,
    /// Share of primary seats taken (0.0 - 1.0; 0.0 for zero-capacity clubs)
    pub fill_ratio: f64,
    pub remaining: usize,
    /// What the next submit would get; None when full
    pub next_status: Option<RegistrationStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClubCount {
    pub club_id: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationSummary {
    pub total_registrations: usize,
    pub remaining_primary_seats: usize,
    pub by_club: Vec<ClubCount>,
}

// ============================================================================
// QUERY SERVICE
// ============================================================================

pub struct QueryService {
    config: Arc<dyn ConfigStore>,
    ledger: Arc<dyn Ledger>,
}

impl QueryService {
    pub fn new(config: Arc<dyn ConfigStore>, ledger: Arc<dyn Ledger>) -> Self {
        QueryService { config, ledger }
    }

    /// Every live record ranked within its (club, status), in ledger order.
    pub fn ranked(&self) -> Result<Vec<RankedRegistration>, LedgerError> {
        let mut counters: HashMap<(String, RegistrationStatus), usize> = HashMap::new();

        Ok(self
            .ledger
            .read_live()?
            .into_iter()
            .map(|record| {
                let counter = counters
                    .entry((record.club_id.clone(), record.status))
                    .or_insert(0);
                *counter += 1;
                RankedRegistration {
                    rank: *counter,
                    record,
                }
            })
            .collect())
    }

    pub fn lookup_by_name(&self, name: &str) -> Result<Vec<RankedRegistration>, LedgerError> {
        let name = name.trim();
        Ok(self
            .ranked()?
            .into_iter()
            .filter(|r| r.record.display_name == name)
            .collect())
    }

    pub fn lookup_by_key(&self, key: &RegistrantKey) -> Result<Option<RankedRegistration>, LedgerError> {
        Ok(self.ranked()?.into_iter().find(|r| &r.record.key == key))
    }

    /// Ranked roster of one club, primary list first.
    pub fn roster(&self, club_id: &str) -> Result<Vec<RankedRegistration>, LedgerError> {
        let mut roster: Vec<RankedRegistration> = self
            .ranked()?
            .into_iter()
            .filter(|r| r.record.club_id == club_id)
            .collect();
        roster.sort_by_key(|r| (r.record.status != RegistrationStatus::Primary, r.rank));
        Ok(roster)
    }

    pub fn availability(&self) -> Result<Vec<ClubAvailability>, LedgerError> {
        self.config
            .list_clubs()
            .into_iter()
            .map(|club| -> Result<ClubAvailability, LedgerError> {
                let occupancy = self.ledger.occupancy(&club.id)?;
                let fill_ratio = if club.primary_capacity > 0 {
                    (occupancy.primary as f64 / club.primary_capacity as f64).min(1.0)
                } else {
                    0.0
                };
                Ok(ClubAvailability {
                    remaining: remaining_slots(&club, occupancy),
                    next_status: next_status(&club, occupancy),
                    fill_ratio,
                    occupancy,
                    club,
                })
            })
            .collect()
    }

    pub fn summary(&self) -> Result<RegistrationSummary, LedgerError> {
        let total_registrations = self.ledger.read_live()?.len();

        let mut remaining_primary_seats = 0;
        let mut by_club = Vec::new();
        for club in self.config.list_clubs() {
            let occupancy = self.ledger.occupancy(&club.id)?;
            remaining_primary_seats +=
                (club.primary_capacity as usize).saturating_sub(occupancy.primary);
            by_club.push(ClubCount {
                count: occupancy.total(),
                club_id: club.id,
            });
        }
        by_club.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.club_id.cmp(&b.club_id)));

        Ok(RegistrationSummary {
            total_registrations,
            remaining_primary_seats,
            by_club,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::club::ClubRegistry;
    use crate::engine::AllocationEngine;
    use crate::ledger::MemoryLedger;

    fn setup() -> (AllocationEngine, QueryService) {
        let config: Arc<dyn ConfigStore> = Arc::new(
            ClubRegistry::from_clubs(vec![Club::new("Chess", 2, 2), Club::new("Drama", 0, 1)])
                .unwrap(),
        );
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
        let engine = AllocationEngine::new(Arc::clone(&config), Arc::clone(&ledger));
        (engine, QueryService::new(config, ledger))
    }

    fn key(class_id: &str, seat: &str) -> RegistrantKey {
        RegistrantKey::new(class_id, seat).unwrap()
    }

    #[test]
    fn test_rank_is_per_club_and_status() {
        let (engine, query) = setup();
        engine.submit(&key("301", "1"), "Chess", "Lin").unwrap();
        engine.submit(&key("301", "2"), "Chess", "Wang").unwrap();
        engine.submit(&key("301", "3"), "Chess", "Chen").unwrap();
        engine.submit(&key("301", "4"), "Drama", "Chen").unwrap();

        let chen = query.lookup_by_name(" Chen ").unwrap();
        let labels: Vec<(String, String)> = chen
            .iter()
            .map(|r| (r.record.club_id.clone(), r.rank_label()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("Chess".to_string(), "Waitlisted 01".to_string()),
                ("Drama".to_string(), "Waitlisted 01".to_string()),
            ]
        );

        let wang = query.lookup_by_key(&key("301", "2")).unwrap().unwrap();
        assert_eq!(wang.rank_label(), "Primary 02");
        assert!(query.lookup_by_name("Nobody").unwrap().is_empty());
    }

    #[test]
    fn test_rank_closes_gaps_after_cancel() {
        let (engine, query) = setup();
        engine.submit(&key("301", "1"), "Chess", "Lin").unwrap();
        engine.submit(&key("301", "2"), "Chess", "Wang").unwrap();
        engine.cancel(&key("301", "1")).unwrap();

        let wang = query.lookup_by_key(&key("301", "2")).unwrap().unwrap();
        assert_eq!(wang.rank, 1);
    }

    #[test]
    fn test_roster_lists_primary_first() {
        let (engine, query) = setup();
        engine.submit(&key("301", "1"), "Chess", "A").unwrap();
        engine.submit(&key("301", "2"), "Chess", "B").unwrap();
        engine.submit(&key("301", "3"), "Chess", "C").unwrap();
        engine.cancel(&key("301", "1")).unwrap();
        engine.submit(&key("301", "4"), "Chess", "D").unwrap();

        let names: Vec<String> = query
            .roster("Chess")
            .unwrap()
            .into_iter()
            .map(|r| r.record.display_name)
            .collect();
        assert_eq!(names, vec!["B", "D", "C"]);
    }

    #[test]
    fn test_availability_and_summary() {
        let (engine, query) = setup();
        engine.submit(&key("301", "1"), "Chess", "A").unwrap();
        engine.submit(&key("301", "2"), "Drama", "B").unwrap();

        let availability = query.availability().unwrap();
        let chess = availability.iter().find(|a| a.club.id == "Chess").unwrap();
        assert_eq!(chess.remaining, 3);
        assert!((chess.fill_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(chess.next_status, Some(RegistrationStatus::Primary));

        let drama = availability.iter().find(|a| a.club.id == "Drama").unwrap();
        assert_eq!(drama.fill_ratio, 0.0);
        assert_eq!(drama.next_status, None);

        let summary = query.summary().unwrap();
        assert_eq!(summary.total_registrations, 2);
        assert_eq!(summary.remaining_primary_seats, 1);
        assert_eq!(
            summary.by_club,
            vec![
                ClubCount { club_id: "Chess".to_string(), count: 1 },
                ClubCount { club_id: "Drama".to_string(), count: 1 },
            ]
        );
    }
}
