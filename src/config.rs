// ⚙️ Settings - JSON configuration file
// Clubs, admission window and storage location, validated once at load time

use crate::admission::AdmissionWindow;
use crate::club::{Club, ClubRegistry};
use crate::error::ConfigError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Format used for `start_time` / `end_time`.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Env var that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "CLUB_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "club_config.json";

// ============================================================================
// CLUB SPEC (file shape)
// ============================================================================

/// One club entry as written in the config file. The map key is the id.
///
/// Older files use `limit`, `wait_limit` and `desc`; those still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClubSpec {
    #[serde(alias = "limit")]
    pub primary_capacity: u32,

    #[serde(default, alias = "wait_limit")]
    pub waitlist_capacity: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, alias = "desc", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ClubSpec {
    fn into_club(self, id: &str) -> Club {
        Club {
            id: id.to_string(),
            category: self.category,
            description: self.description,
            primary_capacity: self.primary_capacity,
            waitlist_capacity: self.waitlist_capacity,
        }
    }
}

impl From<&Club> for ClubSpec {
    fn from(club: &Club) -> Self {
        ClubSpec {
            primary_capacity: club.primary_capacity,
            waitlist_capacity: club.waitlist_capacity,
            category: club.category.clone(),
            description: club.description.clone(),
        }
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub clubs: BTreeMap<String, ClubSpec>,

    /// Local time the admission window opens
    #[serde(with = "naive_time")]
    pub start_time: NaiveDateTime,

    /// Local time the admission window closes
    #[serde(with = "naive_time")]
    pub end_time: NaiveDateTime,

    /// Offset of the local clock from UTC (default: +8)
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_utc_offset() -> i32 {
    8
}

fn default_database_path() -> PathBuf {
    PathBuf::from("registrations.db")
}

impl Default for Settings {
    fn default() -> Self {
        let mut clubs = BTreeMap::new();
        clubs.insert(
            "Table Tennis".to_string(),
            ClubSpec {
                primary_capacity: 10,
                waitlist_capacity: 5,
                category: None,
                description: Some("Most popular club on campus".to_string()),
            },
        );

        Settings {
            clubs,
            start_time: default_day_at(8),
            end_time: default_day_at(17),
            utc_offset_hours: default_utc_offset(),
            database_path: default_database_path(),
        }
    }
}

fn default_day_at(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 2, 9)
        .and_then(|day| day.and_hms_opt(hour, 0, 0))
        .unwrap_or_default()
}

impl Settings {
    /// Config path from `CLUB_CONFIG`, or `club_config.json`.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load and validate. A missing file yields the default settings.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file missing, using defaults");
            return Ok(Settings::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(id) = self.clubs.keys().find(|id| id.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("club id {:?} is empty", id)));
        }
        if self.start_time >= self.end_time {
            return Err(ConfigError::Invalid(format!(
                "start_time {} is not before end_time {}",
                self.start_time, self.end_time
            )));
        }
        if !(-23..=23).contains(&self.utc_offset_hours) {
            return Err(ConfigError::Invalid(format!(
                "utc_offset_hours {} out of range",
                self.utc_offset_hours
            )));
        }
        Ok(())
    }

    pub fn clubs(&self) -> Vec<Club> {
        self.clubs
            .iter()
            .map(|(id, spec)| spec.clone().into_club(id))
            .collect()
    }

    pub fn club_registry(&self) -> Result<ClubRegistry, ConfigError> {
        ClubRegistry::from_clubs(self.clubs())
    }

    /// Replace the club table with the registry's current contents.
    pub fn sync_clubs(&mut self, registry: &ClubRegistry) {
        use crate::club::ConfigStore;

        self.clubs = registry
            .list_clubs()
            .iter()
            .map(|club| (club.id.clone(), ClubSpec::from(club)))
            .collect();
    }

    /// Edit the club table through a registry and keep the result.
    /// A failed edit leaves the settings untouched.
    pub fn edit_clubs<T>(
        &mut self,
        edit: impl FnOnce(&ClubRegistry) -> Result<T, ConfigError>,
    ) -> Result<T, ConfigError> {
        let registry = self.club_registry()?;
        let out = edit(&registry)?;
        self.sync_clubs(&registry);
        Ok(out)
    }

    pub fn admission_window(&self) -> Result<AdmissionWindow, ConfigError> {
        AdmissionWindow::from_local(self.start_time, self.end_time, self.utc_offset_hours)
    }
}

mod naive_time {
    use super::TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TESTS
// ============================================================================
