// 🎫 Registration data model
// Registrant keys, statuses and the immutable record stored in the ledger

use crate::error::{AllocationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// REGISTRANT KEY
// ============================================================================

/// Identifies one person: (class, seat).
///
/// Seat numbers that are purely numeric are zero-padded to two digits so
/// `"7"` and `"07"` name the same seat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawKey")]
pub struct RegistrantKey {
    class_id: String,
    seat_number: String,
}

/// Wire shape of a key before normalization.
#[derive(Deserialize)]
struct RawKey {
    class_id: String,
    seat_number: String,
}

impl TryFrom<RawKey> for RegistrantKey {
    type Error = AllocationError;

    fn try_from(raw: RawKey) -> Result<Self> {
        RegistrantKey::new(&raw.class_id, &raw.seat_number)
    }
}

impl RegistrantKey {
    /// Build a normalized key. Fails on empty components.
    pub fn new(class_id: &str, seat_number: &str) -> Result<Self> {
        let class_id = class_id.trim();
        let seat = seat_number.trim();

        if class_id.is_empty() {
            return Err(AllocationError::InvalidRegistrant {
                reason: "class id is empty".to_string(),
            });
        }
        if seat.is_empty() {
            return Err(AllocationError::InvalidRegistrant {
                reason: "seat number is empty".to_string(),
            });
        }

        let seat_number = if seat.chars().all(|c| c.is_ascii_digit()) && seat.len() < 2 {
            format!("{:0>2}", seat)
        } else {
            seat.to_string()
        };

        Ok(RegistrantKey {
            class_id: class_id.to_string(),
            seat_number,
        })
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn seat_number(&self) -> &str {
        &self.seat_number
    }
}

impl fmt::Display for RegistrantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.class_id, self.seat_number)
    }
}

/// Parses `class:seat` (CLI / admin batch syntax).
impl FromStr for RegistrantKey {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((class_id, seat)) => RegistrantKey::new(class_id, seat),
            None => Err(AllocationError::InvalidRegistrant {
                reason: format!("expected class:seat, got {:?}", s),
            }),
        }
    }
}

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Counted against the club's main capacity
    Primary,

    /// Counted against the overflow capacity
    Waitlisted,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Primary => "primary",
            RegistrationStatus::Waitlisted => "waitlisted",
        }
    }

    /// Human label used in ranked listings ("Primary 03").
    pub fn label(&self) -> &'static str {
        match self {
            RegistrationStatus::Primary => "Primary",
            RegistrationStatus::Waitlisted => "Waitlisted",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "primary" => Ok(RegistrationStatus::Primary),
            "waitlisted" => Ok(RegistrationStatus::Waitlisted),
            other => Err(format!("unknown registration status: {}", other)),
        }
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// One registration. Never mutated after it is appended; corrections are a
/// remove plus a fresh append.
///
/// Field order is the persisted shape: class, seat, name, club, time, status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    #[serde(flatten)]
    pub key: RegistrantKey,
    pub display_name: String,
    pub club_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: RegistrationStatus,
}

impl RegistrationRecord {
    pub fn new(
        key: RegistrantKey,
        display_name: &str,
        club_id: &str,
        status: RegistrationStatus,
    ) -> Self {
        RegistrationRecord {
            key,
            display_name: display_name.to_string(),
            club_id: club_id.to_string(),
            timestamp: Utc::now(),
            status,
        }
    }
}

/// Input for administrative force-adds. The name is always trimmed and
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRegistrant")]
pub struct Registrant {
    key: RegistrantKey,
    display_name: String,
}

#[derive(Deserialize)]
struct RawRegistrant {
    key: RegistrantKey,
    display_name: String,
}

impl TryFrom<RawRegistrant> for Registrant {
    type Error = AllocationError;

    fn try_from(raw: RawRegistrant) -> Result<Self> {
        Registrant::new(raw.key, &raw.display_name)
    }
}

impl Registrant {
    pub fn new(key: RegistrantKey, display_name: &str) -> Result<Self> {
        let display_name = validate_display_name(display_name)?;
        Ok(Registrant { key, display_name })
    }

    pub fn key(&self) -> &RegistrantKey {
        &self.key
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// Trim and reject empty display names.
pub fn validate_display_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AllocationError::InvalidRegistrant {
            reason: "display name is empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

// ============================================================================
// TESTS
// ============================================================================
