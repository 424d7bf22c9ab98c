use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, to_document, DateTime as BsonDateTime},
    options::{FindOneAndUpdateOptions, ReplaceOptions, ReturnDocument, UpdateOptions},
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;

use crate::error::{Error, Result};
use crate::model::{
    access_code::AccessCode,
    candidate::Candidate,
    election::{ElectionConfig, ElectionLedger, ELECTION_CONFIG_ID, ELECTION_LEDGER_ID},
    lease::Lease,
    mongodb::{errors::is_duplicate_key_error, Coll, Id},
    store::{ElectionStore, LeaseStore, TallyStore, VoterStore},
    voter::{NewVoter, VerificationStatus, VerificationUpdate, Voter},
};

/// The MongoDB-backed implementation of every repository trait.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    pub fn new(client: Client, db: Database) -> Self {
        Self { client, db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    fn leases(&self) -> Coll<Lease> {
        Coll::from_db(&self.db)
    }

    fn configs(&self) -> Coll<ElectionConfig> {
        Coll::from_db(&self.db)
    }

    fn ledgers(&self) -> Coll<ElectionLedger> {
        Coll::from_db(&self.db)
    }

    fn voters(&self) -> Coll<Voter> {
        Coll::from_db(&self.db)
    }

    fn new_voters(&self) -> Coll<NewVoter> {
        Coll::from_db(&self.db)
    }

    fn candidates(&self) -> Coll<Candidate> {
        Coll::from_db(&self.db)
    }

    fn access_codes(&self) -> Coll<AccessCode> {
        Coll::from_db(&self.db)
    }

    /// The body of the vote transaction. Any error aborts the whole thing.
    async fn apply_vote(
        &self,
        voter_id: Id,
        candidate_id: Id,
        session: &mut ClientSession,
    ) -> Result<u64> {
        let voter = self
            .voters()
            .find_one_with_session(voter_id.as_doc(), None, session)
            .await?
            .ok_or_else(|| Error::not_found(format!("Voter {voter_id}")))?;
        voter.ensure_can_vote()?;

        // Make sure the candidate exists before touching anything.
        self.candidates()
            .find_one_with_session(candidate_id.as_doc(), None, session)
            .await?
            .ok_or_else(|| Error::not_found(format!("Candidate {candidate_id}")))?;

        // Guard on `has_voted` again so the write itself cannot double count.
        let filter = doc! {
            "_id": *voter_id,
            "has_voted": false,
        };
        let update = doc! { "$set": { "has_voted": true } };
        let result = self
            .voters()
            .update_one_with_session(filter, update, None, session)
            .await?;
        if result.modified_count != 1 {
            return Err(Error::Ineligible("Voter has already voted".to_string()));
        }

        let update = doc! { "$inc": { "vote_count": 1_i64 } };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let candidate = self
            .candidates()
            .find_one_and_update_with_session(candidate_id.as_doc(), update, options, session)
            .await?
            .ok_or_else(|| Error::not_found(format!("Candidate {candidate_id}")))?;
        Ok(candidate.vote_count)
    }

    /// The body of the access code transaction. Any error aborts the whole thing.
    async fn apply_redemption(
        &self,
        code: &str,
        voter: &NewVoter,
        session: &mut ClientSession,
    ) -> Result<Voter> {
        let access_code = self
            .access_codes()
            .find_one_with_session(doc! { "code": code }, None, session)
            .await?
            .ok_or_else(|| Error::BadRequest("Invalid access code".to_string()))?;
        access_code.ensure_unused()?;

        let existing = self
            .voters()
            .find_one_with_session(doc! { "matric_number": &voter.matric_number }, None, session)
            .await?;
        if existing.is_some() {
            return Err(Error::BadRequest(
                "This access code has already been registered".to_string(),
            ));
        }

        // Guard on `is_used` again so two redemptions cannot both claim it.
        let filter = doc! {
            "_id": *access_code.id,
            "is_used": false,
        };
        let update = doc! { "$set": { "is_used": true } };
        let result = self
            .access_codes()
            .update_one_with_session(filter, update, None, session)
            .await?;
        if result.modified_count != 1 {
            return Err(Error::BadRequest(
                "This access code has already been used".to_string(),
            ));
        }

        let id: Id = match self
            .new_voters()
            .insert_one_with_session(voter, None, session)
            .await
        {
            Ok(result) => result
                .inserted_id
                .as_object_id()
                .ok_or_else(|| Error::Unavailable("Inserted voter has no ObjectId".to_string()))?
                .into(),
            Err(e) if is_duplicate_key_error(&e) => {
                return Err(Error::BadRequest(
                    "This access code has already been registered".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Voter {
            id,
            voter: voter.clone(),
        })
    }
}

#[rocket::async_trait]
impl LeaseStore for MongoStore {
    async fn create(&self, lease: &Lease) -> Result<bool> {
        match self.leases().insert_one(lease, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key_error(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn take_over(&self, lease: &Lease, now: DateTime<Utc>) -> Result<bool> {
        // Matches only an expired row; if there is no row at all the upsert
        // creates one, and if an unexpired row exists the upsert collides
        // with the unique key index.
        let filter = doc! {
            "key": &lease.key,
            "expires_at": { "$lte": BsonDateTime::from_chrono(now) },
        };
        let update = doc! {
            "$set": {
                "token": &lease.token,
                "expires_at": BsonDateTime::from_chrono(lease.expires_at),
            }
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        match self
            .leases()
            .find_one_and_update(filter, update, options)
            .await
        {
            Ok(Some(row)) => Ok(row.token == lease.token),
            Ok(None) => Ok(false),
            Err(e) if is_duplicate_key_error(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &str, token: &str) -> Result<bool> {
        let filter = doc! {
            "key": key,
            "token": token,
        };
        let result = self.leases().delete_one(filter, None).await?;
        Ok(result.deleted_count == 1)
    }
}

#[rocket::async_trait]
impl ElectionStore for MongoStore {
    async fn config(&self, now: DateTime<Utc>) -> Result<ElectionConfig> {
        let filter = doc! { "_id": ELECTION_CONFIG_ID };
        let defaults = to_document(&ElectionConfig::inactive(now))
            .map_err(|e| Error::Unavailable(format!("Failed to encode election config: {e}")))?;
        let update = doc! { "$setOnInsert": defaults };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        self.configs()
            .find_one_and_update(filter, update, options)
            .await?
            .ok_or_else(|| Error::Unavailable("Election config upsert returned nothing".to_string()))
    }

    async fn save_config(&self, config: &ElectionConfig) -> Result<()> {
        let filter = doc! { "_id": ELECTION_CONFIG_ID };
        let options = ReplaceOptions::builder().upsert(true).build();
        self.configs().replace_one(filter, config, options).await?;
        Ok(())
    }

    async fn ledger(&self) -> Result<ElectionLedger> {
        let filter = doc! { "_id": ELECTION_LEDGER_ID };
        let update = doc! { "$setOnInsert": { "voted_ips": [] } };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .ledgers()
            .find_one_and_update(filter, update, options)
            .await?
            .unwrap_or_default())
    }

    async fn record_origin(&self, origin: &str, now: DateTime<Utc>) -> Result<()> {
        let filter = doc! { "_id": ELECTION_LEDGER_ID };
        let update = doc! {
            "$addToSet": { "voted_ips": origin },
            "$set": { "updated_at": BsonDateTime::from_chrono(now) },
        };
        let options = UpdateOptions::builder().upsert(true).build();
        self.ledgers().update_one(filter, update, options).await?;
        Ok(())
    }
}

#[rocket::async_trait]
impl VoterStore for MongoStore {
    async fn voter(&self, id: Id) -> Result<Option<Voter>> {
        Ok(self.voters().find_one(id.as_doc(), None).await?)
    }

    async fn voter_by_matric(&self, matric_number: &str) -> Result<Option<Voter>> {
        let filter = doc! { "matric_number": matric_number };
        Ok(self.voters().find_one(filter, None).await?)
    }

    async fn insert_voter(&self, voter: &NewVoter) -> Result<Voter> {
        let id: Id = match self.new_voters().insert_one(voter, None).await {
            Ok(result) => result
                .inserted_id
                .as_object_id()
                .ok_or_else(|| Error::Unavailable("Inserted voter has no ObjectId".to_string()))?
                .into(),
            Err(e) if is_duplicate_key_error(&e) => {
                return Err(Error::BadRequest(format!(
                    "Matric number {} already registered",
                    voter.matric_number
                )))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Voter {
            id,
            voter: voter.clone(),
        })
    }

    async fn update_verification(
        &self,
        id: Id,
        update: &VerificationUpdate,
    ) -> Result<Option<Voter>> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .voters()
            .find_one_and_update(id.as_doc(), update.to_update_doc(), options)
            .await?)
    }

    async fn pending_review(&self) -> Result<Vec<Voter>> {
        let filter = doc! {
            "verification_status": VerificationStatus::PendingManualReview.as_str(),
        };
        Ok(self.voters().find(filter, None).await?.try_collect().await?)
    }

    async fn redeem_access_code(&self, code: &str, voter: &NewVoter) -> Result<Voter> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;

        match self.apply_redemption(code, voter, &mut session).await {
            Ok(voter) => {
                session.commit_transaction().await?;
                Ok(voter)
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!("Failed to abort access code transaction for {code}: {abort_err}");
                }
                Err(e)
            }
        }
    }
}

#[rocket::async_trait]
impl TallyStore for MongoStore {
    async fn commit_vote(&self, voter: Id, candidate: Id) -> Result<u64> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;

        match self.apply_vote(voter, candidate, &mut session).await {
            Ok(new_count) => {
                session.commit_transaction().await?;
                Ok(new_count)
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!("Failed to abort vote transaction for voter {voter}: {abort_err}");
                }
                Err(e)
            }
        }
    }
}
