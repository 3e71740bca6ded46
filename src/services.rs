// Wiring shared by the CLI and the API server

use crate::admission::AdmissionWindow;
use crate::club::{ClubRegistry, ConfigStore};
use crate::config::Settings;
use crate::engine::AllocationEngine;
use crate::error::LedgerError;
use crate::ledger::{Ledger, SqliteLedger};
use crate::query::QueryService;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Everything built from one Settings: the club registry, the engine, the
/// query service and the admission window, all over one ledger.
pub struct Services {
    pub clubs: ClubRegistry,
    pub engine: AllocationEngine,
    pub query: QueryService,
    pub window: AdmissionWindow,
}

impl Services {
    /// Open the SQLite ledger named in `settings`.
    pub fn open(settings: &Settings) -> Result<Self> {
        let ledger = SqliteLedger::open(&settings.database_path).with_context(|| {
            format!("Failed to open ledger {}", settings.database_path.display())
        })?;
        Self::with_ledger(settings, Arc::new(ledger))
    }

    pub fn with_ledger(settings: &Settings, ledger: Arc<dyn Ledger>) -> Result<Self> {
        let clubs = settings.club_registry().context("Invalid club table")?;
        let window = settings
            .admission_window()
            .context("Invalid admission window")?;

        let config: Arc<dyn ConfigStore> = Arc::new(clubs.clone());
        let engine = AllocationEngine::new(Arc::clone(&config), Arc::clone(&ledger));
        let query = QueryService::new(config, ledger);

        Ok(Services {
            clubs,
            engine,
            query,
            window,
        })
    }

    /// True while any live registration points at `club_id`.
    pub fn club_in_use(&self, club_id: &str) -> Result<bool, LedgerError> {
        Ok(self.engine.ledger().occupancy(club_id)?.total() > 0)
    }
}
