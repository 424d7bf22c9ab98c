use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, Receiver, Sender};

use crate::model::api::VoterDescription;

/// Capacity of the broadcast buffer; slow subscribers past this lag and skip.
const CHANNEL_CAPACITY: usize = 256;

/// Something other parts of the system (dashboards, kiosks) may want to hear about.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Notification {
    ElectionStarted {
        end_time: DateTime<Utc>,
    },
    ElectionPaused {
        end_time: Option<DateTime<Utc>>,
    },
    ElectionResumed {
        end_time: DateTime<Utc>,
    },
    ElectionEnded {
        reason: Option<String>,
    },
    NewVote {
        candidate_id: String,
        new_count: u64,
    },
    VoterStatusUpdate(VoterDescription),
}

impl Notification {
    /// Event name, as used for the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ElectionStarted { .. } => "election_started",
            Self::ElectionPaused { .. } => "election_paused",
            Self::ElectionResumed { .. } => "election_resumed",
            Self::ElectionEnded { .. } => "election_ended",
            Self::NewVote { .. } => "new_vote",
            Self::VoterStatusUpdate(_) => "voter_status_update",
        }
    }
}

/// Fire-and-forget notification channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: Sender<Notification>,
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish a notification. Having nobody listening is not an error.
    pub fn emit(&self, notification: Notification) {
        let name = notification.name();
        match self.sender.send(notification) {
            Ok(receivers) => trace!("Emitted {name} to {receivers} subscriber(s)"),
            Err(_) => trace!("Emitted {name} with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
