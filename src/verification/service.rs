use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::events::{Notification, Notifier};
use crate::gate::OcrGate;
use crate::lock::{LockManager, LockPolicy};
use crate::model::{
    access_code::{validate_code, ACCESS_CODE_DEPARTMENT, ACCESS_CODE_EMAIL_DOMAIN},
    api::{AccessCodeLogin, Registration, VoterDescription},
    mongodb::Id,
    store::VoterStore,
    voter::{NewVoter, VerificationStatus, VerificationUpdate, Voter},
};
use crate::verification::{DocumentVerifier, ExpectedIdentity, Verdict};
use crate::voting::voter_lock_key;

/// Reason recorded when a check fails without saying why.
const DEFAULT_REJECTION_REASON: &str = "OCR check failed";

/// What [`VerificationService::persist`] did.
enum Persisted {
    Written(Voter),
    /// The voter's status moved on after the update was prepared, so the
    /// update was dropped.
    Superseded(Voter),
}

/// Voter-facing verification workflows: self-service document checks,
/// registration, and manual review.
#[derive(Clone)]
pub struct VerificationService {
    gate: OcrGate,
    verifier: DocumentVerifier,
    voters: Arc<dyn VoterStore>,
    locks: LockManager,
    lock_policy: LockPolicy,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl VerificationService {
    pub fn new(
        gate: OcrGate,
        verifier: DocumentVerifier,
        voters: Arc<dyn VoterStore>,
        locks: LockManager,
        lock_policy: LockPolicy,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate,
            verifier,
            voters,
            locks,
            lock_policy,
            notifier,
            clock,
        }
    }

    /// Check an uploaded ID document against an existing voter and record
    /// the outcome. A failed check leaves the voter awaiting manual review.
    pub async fn verify_voter(&self, voter_id: Id, image: &[u8]) -> Result<VoterDescription> {
        let (seen, verdict) = {
            let _permit = self.gate.acquire().await?;
            let voter = self
                .voters
                .voter(voter_id)
                .await?
                .ok_or_else(|| Error::not_found(format!("Voter {voter_id}")))?;
            let verdict = self.verifier.verify(image, &expected_identity(&voter)).await?;
            (voter.verification_status, verdict)
        };

        let update = update_for(&verdict);
        info!(
            "Document check for voter {voter_id}: {} (confidence {:.2})",
            update.status.as_str(),
            verdict.confidence
        );
        match self.persist(voter_id, &update, Some(seen)).await? {
            Persisted::Written(voter) => Ok(self.announce(voter)),
            Persisted::Superseded(voter) => {
                warn!(
                    "Voter {voter_id} became {} during the document check; result discarded",
                    voter.verification_status.as_str()
                );
                Ok(VoterDescription::from(voter))
            }
        }
    }

    /// Register a voter without a document. They stay unverified until
    /// [`verify_voter`](Self::verify_voter) checks one.
    pub async fn enroll(&self, registration: Registration) -> Result<VoterDescription> {
        validate_registration(&registration)?;
        let new_voter = self.new_voter(&registration, VerificationStatus::Unverified, 0.0);
        let voter = self.voters.insert_voter(&new_voter).await?;
        info!(
            "Enrolled unverified voter {} ({})",
            voter.id, voter.matric_number
        );
        Ok(VoterDescription::from(voter))
    }

    /// Admit a pre-approved voter with a single-use access code. The code
    /// becomes their matric number.
    pub async fn redeem_access_code(&self, login: AccessCodeLogin) -> Result<VoterDescription> {
        let code = login.code.trim();
        validate_code(code)?;
        let full_name = login.full_name.trim();
        if !(2..=100).contains(&full_name.chars().count()) {
            return Err(Error::BadRequest(
                "Full name must be between 2 and 100 characters".to_string(),
            ));
        }

        let new_voter = NewVoter {
            matric_number: code.to_string(),
            full_name: full_name.to_string(),
            email: format!("{code}@{ACCESS_CODE_EMAIL_DOMAIN}"),
            department: ACCESS_CODE_DEPARTMENT.to_string(),
            verification_status: VerificationStatus::Verified,
            has_voted: false,
            ocr_confidence_score: 1.0,
            rejection_reason: None,
            created_at: self.clock.now(),
        };
        let voter = self.voters.redeem_access_code(code, &new_voter).await?;
        info!("Admitted voter {} with access code {code}", voter.id);
        Ok(self.announce(voter))
    }

    /// Register a new voter, admitting them only if their document checks out.
    pub async fn register(
        &self,
        registration: Registration,
        image: &[u8],
    ) -> Result<VoterDescription> {
        validate_registration(&registration)?;
        if self
            .voters
            .voter_by_matric(registration.matric_number.trim())
            .await?
            .is_some()
        {
            return Err(Error::BadRequest(
                "Matric number already registered".to_string(),
            ));
        }

        let expected = ExpectedIdentity {
            matric_number: registration.matric_number.trim().to_string(),
            full_name: registration.full_name.trim().to_string(),
            department: registration.department.trim().to_string(),
        };
        let verdict = {
            let _permit = self.gate.acquire().await?;
            self.verifier.verify(image, &expected).await?
        };
        if !verdict.success {
            return Err(Error::Unreadable(
                verdict
                    .reason
                    .unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_string()),
            ));
        }

        let new_voter =
            self.new_voter(&registration, VerificationStatus::Verified, verdict.confidence);
        let voter = self.voters.insert_voter(&new_voter).await?;
        info!("Registered voter {} ({})", voter.id, voter.matric_number);
        Ok(self.announce(voter))
    }

    /// Voters awaiting manual review.
    pub async fn pending_review(&self) -> Result<Vec<VoterDescription>> {
        Ok(self
            .voters
            .pending_review()
            .await?
            .into_iter()
            .map(VoterDescription::from)
            .collect())
    }

    pub async fn approve(&self, voter_id: Id) -> Result<VoterDescription> {
        self.review(voter_id, VerificationStatus::Verified).await
    }

    pub async fn reject(&self, voter_id: Id) -> Result<VoterDescription> {
        self.review(voter_id, VerificationStatus::Rejected).await
    }

    async fn review(&self, voter_id: Id, status: VerificationStatus) -> Result<VoterDescription> {
        let voter = match self
            .persist(voter_id, &VerificationUpdate::manual(status), None)
            .await?
        {
            Persisted::Written(voter) | Persisted::Superseded(voter) => voter,
        };
        info!("Voter {voter_id} manually set to {}", status.as_str());
        Ok(self.announce(voter))
    }

    /// Write a verification update while holding the voter's lock, so it
    /// cannot interleave with a vote or a review of the same voter.
    ///
    /// With `seen`, the update is dropped if the voter's status is no longer
    /// `seen` once the lock is held.
    async fn persist(
        &self,
        voter_id: Id,
        update: &VerificationUpdate,
        seen: Option<VerificationStatus>,
    ) -> Result<Persisted> {
        let key = voter_lock_key(voter_id);
        let token = self
            .locks
            .acquire(&key, &self.lock_policy)
            .await
            .ok_or_else(|| {
                Error::Busy("Another action is in progress for this voter".to_string())
            })?;
        let result = self.write_locked(voter_id, update, seen).await;
        self.locks.release(&key, &token).await;
        result
    }

    async fn write_locked(
        &self,
        voter_id: Id,
        update: &VerificationUpdate,
        seen: Option<VerificationStatus>,
    ) -> Result<Persisted> {
        let not_found = || Error::not_found(format!("Voter {voter_id}"));
        if let Some(seen) = seen {
            let current = self.voters.voter(voter_id).await?.ok_or_else(not_found)?;
            if current.verification_status != seen {
                return Ok(Persisted::Superseded(current));
            }
        }
        self.voters
            .update_verification(voter_id, update)
            .await?
            .map(Persisted::Written)
            .ok_or_else(not_found)
    }

    fn new_voter(
        &self,
        registration: &Registration,
        status: VerificationStatus,
        confidence: f64,
    ) -> NewVoter {
        NewVoter {
            matric_number: registration.matric_number.trim().to_string(),
            full_name: registration.full_name.trim().to_string(),
            email: registration.email.trim().to_string(),
            department: registration.department.trim().to_string(),
            verification_status: status,
            has_voted: false,
            ocr_confidence_score: confidence,
            rejection_reason: None,
            created_at: self.clock.now(),
        }
    }

    fn announce(&self, voter: Voter) -> VoterDescription {
        let description = VoterDescription::from(voter);
        self.notifier
            .emit(Notification::VoterStatusUpdate(description.clone()));
        description
    }
}

fn expected_identity(voter: &Voter) -> ExpectedIdentity {
    ExpectedIdentity {
        matric_number: voter.matric_number.clone(),
        full_name: voter.full_name.clone(),
        department: voter.department.clone(),
    }
}

fn update_for(verdict: &Verdict) -> VerificationUpdate {
    if verdict.success {
        VerificationUpdate {
            status: VerificationStatus::Verified,
            confidence: Some(verdict.confidence),
            reason: None,
        }
    } else {
        VerificationUpdate {
            status: VerificationStatus::PendingManualReview,
            confidence: Some(verdict.confidence),
            reason: Some(
                verdict
                    .reason
                    .clone()
                    .unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_string()),
            ),
        }
    }
}

fn validate_registration(registration: &Registration) -> Result<()> {
    let fields = [
        ("matric_number", &registration.matric_number),
        ("full_name", &registration.full_name),
        ("email", &registration.email),
        ("department", &registration.department),
    ];
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(Error::BadRequest(format!("Missing {name}")));
        }
    }
    if !registration.email.contains('@') {
        return Err(Error::BadRequest(format!(
            "Invalid email: {}",
            registration.email
        )));
    }
    Ok(())
}
