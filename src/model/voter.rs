use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, Document};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::mongodb::Id;

/// Where a voter stands with respect to identity verification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Verified,
    PendingManualReview,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Verified => "verified",
            Self::PendingManualReview => "pending_manual_review",
            Self::Rejected => "rejected",
        }
    }
}

/// Core voter data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoterCore {
    /// Student identification number, as printed on the ID card. Unique.
    pub matric_number: String,
    pub full_name: String,
    pub email: String,
    pub department: String,
    pub verification_status: VerificationStatus,
    /// Set exactly once, by the vote-casting transaction.
    pub has_voted: bool,
    pub ocr_confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl VoterCore {
    /// Check this voter may cast a ballot.
    pub fn ensure_can_vote(&self) -> Result<()> {
        if self.has_voted {
            return Err(Error::Ineligible("Voter has already voted".to_string()));
        }
        if self.verification_status != VerificationStatus::Verified {
            return Err(Error::Ineligible(format!(
                "Voter is not verified (status: {})",
                self.verification_status.as_str()
            )));
        }
        Ok(())
    }

    /// Apply a verification update in place, with the same semantics as
    /// [`VerificationUpdate::to_update_doc`].
    pub fn apply(&mut self, update: &VerificationUpdate) {
        self.verification_status = update.status;
        if let Some(confidence) = update.confidence {
            self.ocr_confidence_score = confidence;
        }
        if update.status == VerificationStatus::Verified {
            self.rejection_reason = None;
        } else if let Some(ref reason) = update.reason {
            self.rejection_reason = Some(reason.clone());
        }
    }
}

/// A voter without an ID.
pub type NewVoter = VoterCore;

/// A voter from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

impl DerefMut for Voter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voter
    }
}

/// A change to a voter's verification state.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationUpdate {
    pub status: VerificationStatus,
    /// New confidence score; `None` leaves the stored one alone.
    pub confidence: Option<f64>,
    /// Reason for a non-verified outcome. Ignored (and cleared) when verified.
    pub reason: Option<String>,
}

impl VerificationUpdate {
    /// A manual status change by an administrator.
    pub fn manual(status: VerificationStatus) -> Self {
        Self {
            status,
            confidence: None,
            reason: None,
        }
    }

    pub fn to_update_doc(&self) -> Document {
        let mut set = doc! { "verification_status": self.status.as_str() };
        if let Some(confidence) = self.confidence {
            set.insert("ocr_confidence_score", confidence);
        }
        if self.status == VerificationStatus::Verified {
            return doc! {
                "$set": set,
                "$unset": { "rejection_reason": "" },
            };
        }
        if let Some(ref reason) = self.reason {
            set.insert("rejection_reason", reason.clone());
        }
        doc! { "$set": set }
    }
}

/// Example data for tests.
#[cfg(test)]
pub(crate) mod examples {
    use super::*;

    impl VoterCore {
        pub fn example(matric_number: &str, status: VerificationStatus) -> Self {
            Self {
                matric_number: matric_number.to_string(),
                full_name: "Adaeze Okonkwo Bello".to_string(),
                email: format!("{}@students.example.edu", matric_number.to_lowercase()),
                department: "Nursing Science".to_string(),
                verification_status: status,
                has_voted: false,
                ocr_confidence_score: 0.0,
                rejection_reason: None,
                created_at: Utc::now(),
            }
        }
    }
}
