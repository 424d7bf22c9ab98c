use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::events::{Notification, Notifier};
use crate::lock::{LockManager, LockPolicy};
use crate::model::{
    api::VoteReceipt,
    mongodb::Id,
    store::{ElectionStore, TallyStore},
};

/// The lease key serialising everything that changes one voter.
pub fn voter_lock_key(voter_id: Id) -> String {
    format!("voter:{voter_id}")
}

/// Casts ballots. Cheap to clone.
#[derive(Clone)]
pub struct VoteService {
    elections: Arc<dyn ElectionStore>,
    tally: Arc<dyn TallyStore>,
    locks: LockManager,
    lock_policy: LockPolicy,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl VoteService {
    pub fn new(
        elections: Arc<dyn ElectionStore>,
        tally: Arc<dyn TallyStore>,
        locks: LockManager,
        lock_policy: LockPolicy,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            elections,
            tally,
            locks,
            lock_policy,
            notifier,
            clock,
        }
    }

    /// Record one vote by `voter_id` for `candidate_id`, cast from `origin`.
    ///
    /// The origin check is advisory: it runs before the voter lock and the
    /// origin is only recorded after commit, so concurrent voters from one
    /// origin can both succeed. Exactly-once counting per voter does not
    /// depend on it.
    pub async fn cast_vote(
        &self,
        voter_id: Id,
        candidate_id: Id,
        origin: &str,
    ) -> Result<VoteReceipt> {
        let now = self.clock.now();
        self.elections.config(now).await?.ensure_voting_open(now)?;

        if self.elections.ledger().await?.has_voted_from(origin) {
            return Err(Error::OriginAlreadyUsed);
        }

        let key = voter_lock_key(voter_id);
        let token = self
            .locks
            .acquire(&key, &self.lock_policy)
            .await
            .ok_or_else(|| {
                Error::Busy("Another voting action is in progress for this voter".to_string())
            })?;

        let committed = self.tally.commit_vote(voter_id, candidate_id).await;
        if committed.is_ok() {
            if let Err(e) = self.elections.record_origin(origin, self.clock.now()).await {
                warn!("Failed to record origin {origin} for voter {voter_id}: {e}");
            }
        }
        self.locks.release(&key, &token).await;

        let new_count = committed?;
        info!("Voter {voter_id} voted for candidate {candidate_id} (now {new_count})");
        self.notifier.emit(Notification::NewVote {
            candidate_id: candidate_id.to_string(),
            new_count,
        });
        Ok(VoteReceipt {
            success: true,
            message: "Vote Cast Successfully".to_string(),
        })
    }
}
