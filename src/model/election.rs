use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::mongodb::optional_chrono_datetime;

/// Fixed ID of the singleton election configuration document.
pub const ELECTION_CONFIG_ID: &str = "election_config";

/// Fixed ID of the singleton origin ledger document.
pub const ELECTION_LEDGER_ID: &str = "election_ledger";

/// The singleton election configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionConfig {
    pub is_active: bool,
    #[serde(with = "optional_chrono_datetime")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(with = "optional_chrono_datetime")]
    pub end_time: Option<DateTime<Utc>>,
    pub admin_set_duration_minutes: i64,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl ElectionConfig {
    /// The configuration that exists before any election has been started.
    pub fn inactive(now: DateTime<Utc>) -> Self {
        Self {
            is_active: false,
            start_time: None,
            end_time: None,
            admin_set_duration_minutes: 0,
            updated_at: now,
        }
    }

    /// Has the scheduled end passed? An election with no end time has not ended.
    pub fn has_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.end_time.map_or(false, |end| now >= end)
    }

    /// Derive the lifecycle state at `now`. Never mutates.
    pub fn state_at(&self, now: DateTime<Utc>) -> LifecycleState {
        if self.start_time.is_none() {
            LifecycleState::NotStarted
        } else if self.has_expired_at(now) {
            LifecycleState::Ended
        } else if self.is_active {
            LifecycleState::Active
        } else {
            LifecycleState::Paused
        }
    }

    /// Read-only status projection.
    pub fn status_at(&self, now: DateTime<Utc>) -> ElectionStatus {
        let status = self.state_at(now);
        let end_time = match status {
            LifecycleState::Active | LifecycleState::Paused => self.end_time,
            LifecycleState::NotStarted | LifecycleState::Ended => None,
        };
        ElectionStatus {
            status,
            is_active: status == LifecycleState::Active,
            is_paused: status == LifecycleState::Paused,
            end_time,
        }
    }

    /// Check that ballots may be cast at `now`.
    pub fn ensure_voting_open(&self, now: DateTime<Utc>) -> Result<()> {
        if self.start_time.is_none() {
            return Err(Error::Ineligible("Election has not started".to_string()));
        }
        if !self.is_active {
            return Err(Error::Ineligible("Voting is currently paused".to_string()));
        }
        match self.end_time {
            Some(end) if now <= end => Ok(()),
            _ => Err(Error::Ineligible("Election has ended".to_string())),
        }
    }
}

/// Lifecycle state, derived from stored flags, timestamps and the current time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    Active,
    Paused,
    Ended,
}

/// What `GET /election/status` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionStatus {
    pub status: LifecycleState,
    pub is_active: bool,
    pub is_paused: bool,
    pub end_time: Option<DateTime<Utc>>,
}

/// Network origins that have completed a vote in the current election.
///
/// This is a deterrent, not an authority: the check happens before the
/// per-voter lock and the write happens after commit, so two voters racing
/// from one origin can both get through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionLedger {
    #[serde(default)]
    pub voted_ips: BTreeSet<String>,
}

impl ElectionLedger {
    pub fn has_voted_from(&self, origin: &str) -> bool {
        self.voted_ips.contains(origin)
    }
}
