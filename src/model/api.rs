//! API-friendly views and request bodies.
//!
//! IDs and timestamps are rendered as plain strings here rather than in
//! MongoDB's extended JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    mongodb::Id,
    voter::{VerificationStatus, Voter},
};

/// A voter, as shown to API consumers and event subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoterDescription {
    pub id: String,
    pub matric_number: String,
    pub full_name: String,
    pub department: String,
    pub verification_status: VerificationStatus,
    pub has_voted: bool,
    pub ocr_confidence_score: f64,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Voter> for VoterDescription {
    fn from(voter: Voter) -> Self {
        Self {
            id: voter.id.to_string(),
            matric_number: voter.voter.matric_number,
            full_name: voter.voter.full_name,
            department: voter.voter.department,
            verification_status: voter.voter.verification_status,
            has_voted: voter.voter.has_voted,
            ocr_confidence_score: voter.voter.ocr_confidence_score,
            rejection_reason: voter.voter.rejection_reason,
            created_at: voter.voter.created_at,
        }
    }
}

/// Body of `POST /votes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotRequest {
    pub voter_id: String,
    pub candidate_id: String,
}

impl BallotRequest {
    /// Parse both IDs, rejecting malformed ones as bad requests.
    pub fn ids(&self) -> Result<(Id, Id)> {
        let parse = |field: &str, value: &str| {
            value
                .parse::<Id>()
                .map_err(|_| Error::BadRequest(format!("Invalid {field}: {value:?}")))
        };
        Ok((
            parse("voter_id", &self.voter_id)?,
            parse("candidate_id", &self.candidate_id)?,
        ))
    }
}

/// Result of a successfully cast vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub success: bool,
    pub message: String,
}

/// Details supplied by a student registering with an ID document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromForm)]
pub struct Registration {
    pub matric_number: String,
    pub full_name: String,
    pub email: String,
    pub department: String,
}

/// Body of `POST /voters/access-code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCodeLogin {
    pub code: String,
    pub full_name: String,
}

/// Body of `POST /admin/election`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionCommand {
    pub action: String,
    #[serde(default, alias = "duration")]
    pub duration_minutes: Option<i64>,
}
