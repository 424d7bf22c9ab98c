//! An in-process store for exercising the services without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{
    candidate::{Candidate, NewCandidate},
    election::{ElectionConfig, ElectionLedger},
    lease::Lease,
    mongodb::Id,
    store::{ElectionStore, LeaseStore, TallyStore, VoterStore},
    voter::{NewVoter, VerificationStatus, VerificationUpdate, Voter},
};

#[derive(Default)]
struct State {
    leases: HashMap<String, Lease>,
    config: Option<ElectionConfig>,
    ledger: ElectionLedger,
    voters: HashMap<Id, Voter>,
    candidates: HashMap<Id, Candidate>,
    /// Access codes and whether each has been used.
    access_codes: HashMap<String, bool>,
}

/// Every repository trait over a single mutex. Each call is atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_ledger_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `record_origin` fail.
    pub fn fail_ledger_writes(&self) {
        self.fail_ledger_writes.store(true, Ordering::SeqCst);
    }

    pub fn add_voter(&self, voter: NewVoter) -> Id {
        let id = Id::new();
        self.state
            .lock()
            .unwrap()
            .voters
            .insert(id, Voter { id, voter });
        id
    }

    pub fn add_candidate(&self, candidate: NewCandidate) -> Id {
        let id = Id::new();
        self.state
            .lock()
            .unwrap()
            .candidates
            .insert(id, Candidate { id, candidate });
        id
    }

    pub fn add_access_code(&self, code: &str) {
        self.state
            .lock()
            .unwrap()
            .access_codes
            .insert(code.to_string(), false);
    }

    /// Whether `code` has been used, or `None` if there is no such code.
    pub fn access_code_used(&self, code: &str) -> Option<bool> {
        self.state.lock().unwrap().access_codes.get(code).copied()
    }

    pub fn candidate(&self, id: Id) -> Option<Candidate> {
        self.state.lock().unwrap().candidates.get(&id).cloned()
    }

    pub fn lease(&self, key: &str) -> Option<Lease> {
        self.state.lock().unwrap().leases.get(key).cloned()
    }

    pub fn total_votes(&self) -> u64 {
        self.state
            .lock()
            .unwrap()
            .candidates
            .values()
            .map(|c| c.vote_count)
            .sum()
    }

    pub fn voters_marked_voted(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .voters
            .values()
            .filter(|v| v.has_voted)
            .count()
    }

    pub fn set_config(&self, config: ElectionConfig) {
        self.state.lock().unwrap().config = Some(config);
    }

    pub fn stored_config(&self) -> Option<ElectionConfig> {
        self.state.lock().unwrap().config.clone()
    }
}

#[rocket::async_trait]
impl LeaseStore for MemoryStore {
    async fn create(&self, lease: &Lease) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.leases.contains_key(&lease.key) {
            return Ok(false);
        }
        state.leases.insert(lease.key.clone(), lease.clone());
        Ok(true)
    }

    async fn take_over(&self, lease: &Lease, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        match state.leases.get(&lease.key) {
            Some(existing) if !existing.is_expired_at(now) => Ok(false),
            _ => {
                state.leases.insert(lease.key.clone(), lease.clone());
                Ok(true)
            }
        }
    }

    async fn remove(&self, key: &str, token: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        match state.leases.get(key) {
            Some(existing) if existing.token == token => {
                state.leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[rocket::async_trait]
impl ElectionStore for MemoryStore {
    async fn config(&self, now: DateTime<Utc>) -> Result<ElectionConfig> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .config
            .get_or_insert_with(|| ElectionConfig::inactive(now))
            .clone())
    }

    async fn save_config(&self, config: &ElectionConfig) -> Result<()> {
        self.state.lock().unwrap().config = Some(config.clone());
        Ok(())
    }

    async fn ledger(&self) -> Result<ElectionLedger> {
        Ok(self.state.lock().unwrap().ledger.clone())
    }

    async fn record_origin(&self, origin: &str, _now: DateTime<Utc>) -> Result<()> {
        if self.fail_ledger_writes.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("ledger write failed".to_string()));
        }
        self.state
            .lock()
            .unwrap()
            .ledger
            .voted_ips
            .insert(origin.to_string());
        Ok(())
    }
}

#[rocket::async_trait]
impl VoterStore for MemoryStore {
    async fn voter(&self, id: Id) -> Result<Option<Voter>> {
        Ok(self.state.lock().unwrap().voters.get(&id).cloned())
    }

    async fn voter_by_matric(&self, matric_number: &str) -> Result<Option<Voter>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .voters
            .values()
            .find(|v| v.matric_number == matric_number)
            .cloned())
    }

    async fn insert_voter(&self, voter: &NewVoter) -> Result<Voter> {
        let mut state = self.state.lock().unwrap();
        if state
            .voters
            .values()
            .any(|v| v.matric_number == voter.matric_number)
        {
            return Err(Error::BadRequest(format!(
                "Matric number {} already registered",
                voter.matric_number
            )));
        }
        let voter = Voter {
            id: Id::new(),
            voter: voter.clone(),
        };
        state.voters.insert(voter.id, voter.clone());
        Ok(voter)
    }

    async fn update_verification(
        &self,
        id: Id,
        update: &VerificationUpdate,
    ) -> Result<Option<Voter>> {
        let mut state = self.state.lock().unwrap();
        Ok(state.voters.get_mut(&id).map(|voter| {
            voter.apply(update);
            voter.clone()
        }))
    }

    async fn pending_review(&self) -> Result<Vec<Voter>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .voters
            .values()
            .filter(|v| v.verification_status == VerificationStatus::PendingManualReview)
            .cloned()
            .collect())
    }

    async fn redeem_access_code(&self, code: &str, voter: &NewVoter) -> Result<Voter> {
        let mut state = self.state.lock().unwrap();
        let is_used = *state
            .access_codes
            .get(code)
            .ok_or_else(|| Error::BadRequest("Invalid access code".to_string()))?;
        if is_used {
            return Err(Error::BadRequest(
                "This access code has already been used".to_string(),
            ));
        }
        if state
            .voters
            .values()
            .any(|v| v.matric_number == voter.matric_number)
        {
            return Err(Error::BadRequest(
                "This access code has already been registered".to_string(),
            ));
        }
        state.access_codes.insert(code.to_string(), true);
        let voter = Voter {
            id: Id::new(),
            voter: voter.clone(),
        };
        state.voters.insert(voter.id, voter.clone());
        Ok(voter)
    }
}

#[rocket::async_trait]
impl TallyStore for MemoryStore {
    async fn commit_vote(&self, voter_id: Id, candidate_id: Id) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let voter = state
            .voters
            .get_mut(&voter_id)
            .ok_or_else(|| Error::not_found(format!("Voter {voter_id}")))?;
        voter.ensure_can_vote()?;
        let candidate = state
            .candidates
            .get_mut(&candidate_id)
            .ok_or_else(|| Error::not_found(format!("Candidate {candidate_id}")))?;
        voter.has_voted = true;
        candidate.candidate.vote_count += 1;
        Ok(candidate.vote_count)
    }
}
