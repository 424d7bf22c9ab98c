//! The election lifecycle: administrator transitions over the singleton
//! configuration, plus time-based expiry.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::events::{Notification, Notifier};
use crate::model::{
    election::{ElectionConfig, ElectionStatus, LifecycleState},
    store::ElectionStore,
};

mod monitor;

pub use monitor::{ElectionMonitor, ElectionMonitorFairing};

/// Reason given when the monitor ends an election.
pub const EXPIRED_REASON: &str = "Election duration expired";

/// Reason given when an administrator ends an election.
pub const STOPPED_REASON: &str = "Election has ended permanently";

/// An administrator command.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionAction {
    Start,
    Pause,
    Resume,
    Stop,
}

impl FromStr for ElectionAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "stop" => Ok(Self::Stop),
            _ => Err(Error::BadRequest(
                "Invalid action. Use \"start\", \"pause\", \"resume\", or \"stop\"".to_string(),
            )),
        }
    }
}

/// What a transition did, for the administrator who asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub action: ElectionAction,
    pub is_active: bool,
    pub is_paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Transition {
    fn new(action: ElectionAction, config: &ElectionConfig) -> Self {
        Self {
            action,
            is_active: config.is_active,
            is_paused: !config.is_active && action == ElectionAction::Pause,
            start_time: None,
            end_time: config.end_time,
            remaining_ms: None,
            duration_minutes: None,
            message: None,
        }
    }
}

fn remaining_ms(end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    end.map_or(0, |end| (end - now).num_milliseconds().max(0))
}

/// Drives the election state machine. Cheap to clone.
#[derive(Clone)]
pub struct ElectionLifecycle {
    store: Arc<dyn ElectionStore>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
}

impl ElectionLifecycle {
    pub fn new(store: Arc<dyn ElectionStore>, clock: Arc<dyn Clock>, notifier: Notifier) -> Self {
        Self {
            store,
            clock,
            notifier,
        }
    }

    /// Read-only view of where the election stands right now.
    pub async fn status(&self) -> Result<ElectionStatus> {
        let now = self.clock.now();
        Ok(self.store.config(now).await?.status_at(now))
    }

    /// Dispatch an administrator command. `duration_minutes` is only used by
    /// [`ElectionAction::Start`].
    pub async fn apply(
        &self,
        action: ElectionAction,
        duration_minutes: Option<i64>,
    ) -> Result<Transition> {
        match action {
            ElectionAction::Start => {
                let minutes = duration_minutes.ok_or_else(|| {
                    Error::BadRequest("Duration must be a positive number of minutes".to_string())
                })?;
                self.start(minutes).await
            }
            ElectionAction::Pause => self.pause().await,
            ElectionAction::Resume => self.resume().await,
            ElectionAction::Stop => self.stop().await,
        }
    }

    /// Open voting for `duration_minutes` from now.
    pub async fn start(&self, duration_minutes: i64) -> Result<Transition> {
        if duration_minutes <= 0 {
            return Err(Error::BadRequest(
                "Duration must be a positive number of minutes".to_string(),
            ));
        }
        let now = self.clock.now();
        let mut config = self.store.config(now).await?;
        match config.state_at(now) {
            LifecycleState::NotStarted | LifecycleState::Ended => {}
            LifecycleState::Active | LifecycleState::Paused => {
                return Err(Error::Ineligible(
                    "An election is already in progress".to_string(),
                ))
            }
        }

        let duration = Duration::minutes(duration_minutes);
        let end_time = now + duration;
        config.is_active = true;
        config.start_time = Some(now);
        config.end_time = Some(end_time);
        config.admin_set_duration_minutes = duration_minutes;
        config.updated_at = now;
        self.store.save_config(&config).await?;

        info!("Election started, ends at {end_time}");
        self.notifier
            .emit(Notification::ElectionStarted { end_time });
        Ok(Transition {
            start_time: config.start_time,
            remaining_ms: Some(duration.num_milliseconds()),
            duration_minutes: Some(duration_minutes),
            ..Transition::new(ElectionAction::Start, &config)
        })
    }

    /// Suspend voting without moving the end time.
    pub async fn pause(&self) -> Result<Transition> {
        let now = self.clock.now();
        let mut config = self.store.config(now).await?;
        if !config.is_active {
            return Err(Error::Ineligible(
                "Election is not currently active".to_string(),
            ));
        }
        if config.has_expired_at(now) {
            return Err(Error::Ineligible(
                "Election has already ended - cannot pause".to_string(),
            ));
        }

        config.is_active = false;
        config.updated_at = now;
        self.store.save_config(&config).await?;

        info!("Election paused");
        self.notifier.emit(Notification::ElectionPaused {
            end_time: config.end_time,
        });
        Ok(Transition {
            remaining_ms: Some(remaining_ms(config.end_time, now)),
            ..Transition::new(ElectionAction::Pause, &config)
        })
    }

    /// Reopen a paused election that still has time left.
    pub async fn resume(&self) -> Result<Transition> {
        let now = self.clock.now();
        let mut config = self.store.config(now).await?;
        if config.is_active {
            return Err(Error::Ineligible("Election is already active".to_string()));
        }
        let end_time = match (config.start_time, config.end_time) {
            (Some(_), Some(end)) if now < end => end,
            (None, _) => {
                return Err(Error::Ineligible("Election has not started".to_string()))
            }
            _ => {
                return Err(Error::Ineligible(
                    "Cannot resume - election duration has expired".to_string(),
                ))
            }
        };

        config.is_active = true;
        config.updated_at = now;
        self.store.save_config(&config).await?;

        info!("Election resumed, ends at {end_time}");
        self.notifier
            .emit(Notification::ElectionResumed { end_time });
        Ok(Transition {
            remaining_ms: Some(remaining_ms(Some(end_time), now)),
            ..Transition::new(ElectionAction::Resume, &config)
        })
    }

    /// End the election for good, whatever state it is in.
    pub async fn stop(&self) -> Result<Transition> {
        let now = self.clock.now();
        let mut config = self.store.config(now).await?;
        config.is_active = false;
        config.end_time = Some(now);
        config.updated_at = now;
        self.store.save_config(&config).await?;

        info!("Election stopped by administrator");
        self.notifier.emit(Notification::ElectionEnded {
            reason: Some(STOPPED_REASON.to_string()),
        });
        Ok(Transition {
            end_time: None,
            message: Some(STOPPED_REASON.to_string()),
            ..Transition::new(ElectionAction::Stop, &config)
        })
    }

    /// Deactivate the election if it is flagged active but past its end.
    /// Returns whether anything changed.
    pub async fn expire_if_due(&self) -> Result<bool> {
        let now = self.clock.now();
        let mut config = self.store.config(now).await?;
        let overdue = matches!(config.end_time, Some(end) if now > end);
        if !config.is_active || !overdue {
            return Ok(false);
        }

        config.is_active = false;
        config.updated_at = now;
        self.store.save_config(&config).await?;

        info!("Election automatically ended at {now}");
        self.notifier.emit(Notification::ElectionEnded {
            reason: Some(EXPIRED_REASON.to_string()),
        });
        Ok(true)
    }
}
