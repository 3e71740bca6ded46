// 🏆 Club definitions + ConfigStore
//
// Clubs are configuration: the engine only ever reads a snapshot of them.
// Administrative edits go through ClubRegistry, never through the engine.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

// ============================================================================
// CLUB
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Club {
    /// Unique name, also the key registrations refer to
    pub id: String,

    /// Advisory grouping label (e.g. "Sports"); never used for allocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub primary_capacity: u32,

    /// Overflow slots (default: 0, i.e. no waitlist)
    #[serde(default)]
    pub waitlist_capacity: u32,
}

impl Club {
    pub fn new(id: &str, primary_capacity: u32, waitlist_capacity: u32) -> Self {
        Club {
            id: id.to_string(),
            category: None,
            description: None,
            primary_capacity,
            waitlist_capacity,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::Invalid("club id is empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// CONFIG STORE CONTRACT
// ============================================================================

/// Read-only view of club definitions consumed by the engine.
pub trait ConfigStore: Send + Sync {
    fn get_club(&self, id: &str) -> Option<Club>;

    fn list_clubs(&self) -> Vec<Club>;
}

// ============================================================================
// CLUB REGISTRY
// ============================================================================

/// In-memory club registry shared between the engine and admin tooling.
#[derive(Debug, Clone, Default)]
pub struct ClubRegistry {
    clubs: Arc<RwLock<BTreeMap<String, Club>>>,
}

impl ClubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of clubs, validating each once.
    pub fn from_clubs(clubs: Vec<Club>) -> Result<Self, ConfigError> {
        let registry = ClubRegistry::new();
        for club in clubs {
            club.validate()?;
            let id = club.id.clone();
            let mut map = registry.write();
            if map.insert(id.clone(), club).is_some() {
                return Err(ConfigError::ClubExists(id));
            }
        }
        Ok(registry)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Club>> {
        self.clubs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Club>> {
        self.clubs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a club definition.
    pub fn upsert(&self, club: Club) -> Result<(), ConfigError> {
        club.validate()?;
        self.write().insert(club.id.clone(), club);
        Ok(())
    }

    /// Rename a club. Existing registrations keep the old id, so callers
    /// should only rename clubs nobody has registered for yet.
    pub fn rename(&self, old_id: &str, new_id: &str) -> Result<(), ConfigError> {
        let mut clubs = self.write();
        if clubs.contains_key(new_id) {
            return Err(ConfigError::ClubExists(new_id.to_string()));
        }
        let mut club = clubs
            .remove(old_id)
            .ok_or_else(|| ConfigError::ClubNotFound(old_id.to_string()))?;
        club.id = new_id.to_string();
        if let Err(e) = club.validate() {
            club.id = old_id.to_string();
            clubs.insert(old_id.to_string(), club);
            return Err(e);
        }
        clubs.insert(new_id.to_string(), club);
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<Club, ConfigError> {
        self.write()
            .remove(id)
            .ok_or_else(|| ConfigError::ClubNotFound(id.to_string()))
    }

    pub fn set_capacity(
        &self,
        id: &str,
        primary_capacity: u32,
        waitlist_capacity: u32,
    ) -> Result<(), ConfigError> {
        let mut clubs = self.write();
        let club = clubs
            .get_mut(id)
            .ok_or_else(|| ConfigError::ClubNotFound(id.to_string()))?;
        club.primary_capacity = primary_capacity;
        club.waitlist_capacity = waitlist_capacity;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }
}

impl ConfigStore for ClubRegistry {
    fn get_club(&self, id: &str) -> Option<Club> {
        self.read().get(id).cloned()
    }

    fn list_clubs(&self) -> Vec<Club> {
        self.read().values().cloned().collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
