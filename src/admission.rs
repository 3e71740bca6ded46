// ⏰ Admission window
// Decides whether submissions may reach the engine at a given instant.
// The engine itself never looks at the clock for gating.

use crate::error::ConfigError;
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("registration has not opened yet (opens in {} days {} hours)", .opens_in.num_days(), .opens_in.num_hours() % 24)]
    NotYetOpen { opens_in: Duration },

    #[error("registration is closed")]
    Closed,
}

/// Open/close instants, both inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionWindow {
    pub opens_at: DateTime<FixedOffset>,
    pub closes_at: DateTime<FixedOffset>,
}

/// Where `now` falls relative to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPhase {
    Upcoming,
    Open,
    Closed,
}

impl AdmissionWindow {
    /// Interpret naive local times at a fixed UTC offset.
    pub fn from_local(
        start: NaiveDateTime,
        end: NaiveDateTime,
        utc_offset_hours: i32,
    ) -> Result<Self, ConfigError> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            ConfigError::Invalid(format!("utc offset {}h out of range", utc_offset_hours))
        })?;

        let opens_at = offset
            .from_local_datetime(&start)
            .single()
            .ok_or_else(|| ConfigError::Invalid(format!("ambiguous start time {}", start)))?;
        let closes_at = offset
            .from_local_datetime(&end)
            .single()
            .ok_or_else(|| ConfigError::Invalid(format!("ambiguous end time {}", end)))?;

        if opens_at >= closes_at {
            return Err(ConfigError::Invalid(
                "admission window opens after it closes".to_string(),
            ));
        }

        Ok(AdmissionWindow { opens_at, closes_at })
    }

    pub fn phase(&self, now: DateTime<Utc>) -> WindowPhase {
        if now < self.opens_at {
            WindowPhase::Upcoming
        } else if now > self.closes_at {
            WindowPhase::Closed
        } else {
            WindowPhase::Open
        }
    }

    /// Gate check performed by callers before invoking the engine.
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), AdmissionError> {
        match self.phase(now) {
            WindowPhase::Open => Ok(()),
            WindowPhase::Closed => Err(AdmissionError::Closed),
            WindowPhase::Upcoming => Err(AdmissionError::NotYetOpen {
                opens_in: self.opens_at.with_timezone(&Utc) - now,
            }),
        }
    }

    pub fn check_now(&self) -> Result<(), AdmissionError> {
        self.check(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TIME_FORMAT;

    fn window() -> AdmissionWindow {
        AdmissionWindow::from_local(
            NaiveDateTime::parse_from_str("2026-02-09 08:00:00", TIME_FORMAT).unwrap(),
            NaiveDateTime::parse_from_str("2026-02-09 17:00:00", TIME_FORMAT).unwrap(),
            8,
        )
        .unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_window_applies_offset() {
        let w = window();
        // 08:00 at +08:00 is 00:00 UTC
        assert_eq!(w.opens_at.with_timezone(&Utc), utc("2026-02-09T00:00:00Z"));
        assert_eq!(w.closes_at.with_timezone(&Utc), utc("2026-02-09T09:00:00Z"));
    }

    #[test]
    fn test_check_phases() {
        let w = window();

        match w.check(utc("2026-02-07T22:00:00Z")) {
            Err(AdmissionError::NotYetOpen { opens_in }) => {
                assert_eq!(opens_in, Duration::hours(26));
            }
            other => panic!("expected NotYetOpen, got {:?}", other),
        }
        assert_eq!(w.check(utc("2026-02-09T00:00:00Z")), Ok(()));
        assert_eq!(w.check(utc("2026-02-09T09:00:00Z")), Ok(()));
        assert_eq!(w.check(utc("2026-02-09T09:00:01Z")), Err(AdmissionError::Closed));
    }

    #[test]
    fn test_not_yet_open_message() {
        let err = AdmissionError::NotYetOpen {
            opens_in: Duration::hours(26),
        };
        assert_eq!(
            err.to_string(),
            "registration has not opened yet (opens in 1 days 2 hours)"
        );
    }

    #[test]
    fn test_rejects_inverted_window() {
        let start = NaiveDateTime::parse_from_str("2026-02-09 17:00:00", TIME_FORMAT).unwrap();
        let end = NaiveDateTime::parse_from_str("2026-02-09 08:00:00", TIME_FORMAT).unwrap();
        assert!(AdmissionWindow::from_local(start, end, 8).is_err());
    }
}
