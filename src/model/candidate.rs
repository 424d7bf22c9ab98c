use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core candidate data, as stored in the database.
///
/// Candidates are managed elsewhere; this crate only reads them and bumps
/// `vote_count` inside the vote transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    pub name: String,
    pub position: String,
    pub vote_count: u64,
}

/// A candidate without an ID.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

#[cfg(test)]
pub(crate) mod examples {
    use super::*;

    impl CandidateCore {
        pub fn example(name: &str) -> Self {
            Self {
                name: name.to_string(),
                position: "President".to_string(),
                vote_count: 0,
            }
        }
    }
}
