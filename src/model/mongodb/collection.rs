use std::ops::Deref;
use std::time::Duration;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::{
    access_code::{AccessCode, AccessCodeCore},
    candidate::{Candidate, CandidateCore},
    election::{ElectionConfig, ElectionLedger},
    lease::Lease,
    voter::{Voter, VoterCore},
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        req.guard::<&State<Database>>()
            .await
            .map(|db| Coll::from_db(db))
    }
}

// Lease collection
impl MongoCollection for Lease {
    const NAME: &'static str = "leases";
}

// Election singletons
impl MongoCollection for ElectionConfig {
    const NAME: &'static str = "election_config";
}
impl MongoCollection for ElectionLedger {
    const NAME: &'static str = "election_ledger";
}

// Voter collections
const VOTERS: &str = "voters";
impl MongoCollection for Voter {
    const NAME: &'static str = VOTERS;
}
impl MongoCollection for VoterCore {
    const NAME: &'static str = VOTERS;
}

// Candidate collections
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}
impl MongoCollection for CandidateCore {
    const NAME: &'static str = CANDIDATES;
}

// Access code collections
const ACCESS_CODES: &str = "access_codes";
impl MongoCollection for AccessCode {
    const NAME: &'static str = ACCESS_CODES;
}
impl MongoCollection for AccessCodeCore {
    const NAME: &'static str = ACCESS_CODES;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Lease collection: one row per key, and the server reaps expired rows.
    let lease_key_index = IndexModel::builder()
        .keys(doc! {"key": 1})
        .options(unique.clone())
        .build();
    let lease_ttl_index = IndexModel::builder()
        .keys(doc! {"expires_at": 1})
        .options(
            IndexOptions::builder()
                .expire_after(Duration::from_secs(0))
                .build(),
        )
        .build();
    let leases = Coll::<Lease>::from_db(db);
    leases.create_index(lease_key_index, None).await?;
    leases.create_index(lease_ttl_index, None).await?;

    // Voter collection.
    let voter_index = IndexModel::builder()
        .keys(doc! {"matric_number": 1})
        .options(unique.clone())
        .build();
    Coll::<Voter>::from_db(db)
        .create_index(voter_index, None)
        .await?;

    // Access code collection.
    let code_index = IndexModel::builder()
        .keys(doc! {"code": 1})
        .options(unique)
        .build();
    Coll::<AccessCode>::from_db(db)
        .create_index(code_index, None)
        .await?;

    Ok(())
}
