//! Repository traits over the persistence engine.
//!
//! Services only ever see these traits, so the vote protocol and lifecycle
//! can be exercised against [`MongoStore`](crate::model::mongodb::MongoStore)
//! in production and an in-process store in tests.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    election::{ElectionConfig, ElectionLedger},
    lease::Lease,
    mongodb::Id,
    voter::{NewVoter, VerificationUpdate, Voter},
};

/// Storage for lock leases. Keys are unique.
#[rocket::async_trait]
pub trait LeaseStore: Send + Sync {
    /// Unconditionally create `lease`. Returns `false` if a lease already
    /// exists for the key, expired or not.
    async fn create(&self, lease: &Lease) -> Result<bool>;

    /// Overwrite the lease for `lease.key` if the existing one has expired
    /// as of `now`, creating it if there is none. Returns `false` if an
    /// unexpired lease is in the way.
    async fn take_over(&self, lease: &Lease, now: DateTime<Utc>) -> Result<bool>;

    /// Delete the lease for `key` only if it still carries `token`.
    /// Returns whether anything was deleted.
    async fn remove(&self, key: &str, token: &str) -> Result<bool>;
}

/// Storage for the election singletons.
#[rocket::async_trait]
pub trait ElectionStore: Send + Sync {
    /// Load the election configuration, creating an inactive one if absent.
    async fn config(&self, now: DateTime<Utc>) -> Result<ElectionConfig>;

    async fn save_config(&self, config: &ElectionConfig) -> Result<()>;

    /// Load the origin ledger, creating an empty one if absent.
    async fn ledger(&self) -> Result<ElectionLedger>;

    /// Add `origin` to the ledger. Idempotent.
    async fn record_origin(&self, origin: &str, now: DateTime<Utc>) -> Result<()>;
}

/// Storage for voter identity records.
#[rocket::async_trait]
pub trait VoterStore: Send + Sync {
    async fn voter(&self, id: Id) -> Result<Option<Voter>>;

    async fn voter_by_matric(&self, matric_number: &str) -> Result<Option<Voter>>;

    /// Insert a new voter. Fails with a bad request if the matric number is taken.
    async fn insert_voter(&self, voter: &NewVoter) -> Result<Voter>;

    /// Apply `update` and return the updated voter, or `None` if there is no such voter.
    async fn update_verification(
        &self,
        id: Id,
        update: &VerificationUpdate,
    ) -> Result<Option<Voter>>;

    /// All voters awaiting manual review.
    async fn pending_review(&self) -> Result<Vec<Voter>>;

    /// In one atomic transaction: check `code` exists and is unused, check
    /// no voter already holds `voter.matric_number`, mark the code used and
    /// insert `voter`. Every refusal is a bad request and changes nothing.
    async fn redeem_access_code(&self, code: &str, voter: &NewVoter) -> Result<Voter>;
}

/// Storage for the vote tally.
#[rocket::async_trait]
pub trait TallyStore: Send + Sync {
    /// In one atomic transaction: check the voter exists, has not voted and
    /// is verified; check the candidate exists; mark the voter as having
    /// voted and increment the candidate's count by one.
    ///
    /// Returns the candidate's new vote count.
    async fn commit_vote(&self, voter: Id, candidate: Id) -> Result<u64>;
}
