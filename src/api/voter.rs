use rocket::{data::Data, serde::json::Json, Route, State};

use crate::config::Config;
use crate::error::Result;
use crate::model::{
    api::{AccessCodeLogin, BallotRequest, Registration, VoteReceipt, VoterDescription},
    mongodb::Id,
};
use crate::verification::VerificationService;
use crate::voting::VoteService;

use super::common::{read_document, ClientOrigin};

pub fn routes() -> Vec<Route> {
    routes![
        cast_vote,
        verify_voter,
        register_voter,
        enroll_voter,
        redeem_access_code
    ]
}

#[post("/votes", data = "<ballot>", format = "json")]
async fn cast_vote(
    ballot: Json<BallotRequest>,
    origin: ClientOrigin,
    votes: &State<VoteService>,
) -> Result<Json<VoteReceipt>> {
    let (voter_id, candidate_id) = ballot.ids()?;
    let receipt = votes.cast_vote(voter_id, candidate_id, &origin.0).await?;
    Ok(Json(receipt))
}

#[post("/voters/<voter_id>/verify", data = "<document>")]
async fn verify_voter(
    voter_id: Id,
    document: Data<'_>,
    config: &State<Config>,
    verification: &State<VerificationService>,
) -> Result<Json<VoterDescription>> {
    let document = read_document(document, config).await?;
    let voter = verification.verify_voter(voter_id, &document).await?;
    Ok(Json(voter))
}

#[post("/voters?<registration..>", data = "<document>")]
async fn register_voter(
    registration: Registration,
    document: Data<'_>,
    config: &State<Config>,
    verification: &State<VerificationService>,
) -> Result<Json<VoterDescription>> {
    let document = read_document(document, config).await?;
    let voter = verification.register(registration, &document).await?;
    Ok(Json(voter))
}

#[post("/voters/enroll", data = "<registration>", format = "json")]
async fn enroll_voter(
    registration: Json<Registration>,
    verification: &State<VerificationService>,
) -> Result<Json<VoterDescription>> {
    Ok(Json(verification.enroll(registration.into_inner()).await?))
}

#[post("/voters/access-code", data = "<login>", format = "json")]
async fn redeem_access_code(
    login: Json<AccessCodeLogin>,
    verification: &State<VerificationService>,
) -> Result<Json<VoterDescription>> {
    Ok(Json(verification.redeem_access_code(login.into_inner()).await?))
}

#[cfg(test)]
mod tests {
    use mongodb::{bson::doc, Database};
    use rocket::{
        http::{ContentType, Header, Status},
        local::asynchronous::Client,
        serde::json::{json, serde_json, Value},
    };

    use super::*;
    use crate::model::{
        access_code::AccessCodeCore,
        candidate::{Candidate, NewCandidate},
        mongodb::Coll,
        voter::{NewVoter, VerificationStatus, VoterCore},
    };

    async fn start_election(client: &Client) {
        let response = client
            .post("/admin/election")
            .header(ContentType::JSON)
            .body(json!({"action": "start", "duration": 30}).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
    }

    async fn vote(client: &Client, voter: Id, candidate: Id, origin: &str) -> (Status, Value) {
        let response = client
            .post(uri!(cast_vote))
            .header(ContentType::JSON)
            .header(Header::new("X-Forwarded-For", origin.to_string()))
            .body(
                json!({
                    "voter_id": voter.to_string(),
                    "candidate_id": candidate.to_string(),
                })
                .to_string(),
            )
            .dispatch()
            .await;
        let status = response.status();
        let body = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        (status, body)
    }

    async fn insert_voter(voters: &Coll<VoterCore>, matric: &str) -> Id {
        voters
            .insert_one(NewVoter::example(matric, VerificationStatus::Verified), None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into()
    }

    #[backend_test]
    async fn cast_votes(
        client: Client,
        db: Database,
        voters: Coll<VoterCore>,
        candidates: Coll<NewCandidate>,
    ) {
        let alice = insert_voter(&voters, "MAT/2021/0001").await;
        let bob = insert_voter(&voters, "MAT/2021/0002").await;
        let candidate: Id = candidates
            .insert_one(NewCandidate::example("Chidi"), None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();

        // Voting is closed until the election starts.
        let (status, body) = vote(&client, alice, candidate, "10.0.0.1").await;
        assert_eq!(Status::Forbidden, status);
        assert_eq!(body["code"], "NOT_ELIGIBLE");

        start_election(&client).await;
        let (status, body) = vote(&client, alice, candidate, "10.0.0.1, 172.16.0.1").await;
        assert_eq!(Status::Ok, status);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Vote Cast Successfully");

        // Not twice by the same voter, nor by anyone from the same origin.
        let (status, _) = vote(&client, alice, candidate, "10.0.0.2").await;
        assert_eq!(Status::Forbidden, status);
        let (status, body) = vote(&client, bob, candidate, "10.0.0.1").await;
        assert_eq!(Status::Forbidden, status);
        assert_eq!(body["code"], "ORIGIN_ALREADY_USED");

        let tallied = Coll::<Candidate>::from_db(&db)
            .find_one(candidate.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tallied.vote_count, 1);
        let alice = voters.find_one(alice.as_doc(), None).await.unwrap().unwrap();
        assert!(alice.has_voted);
    }

    #[backend_test]
    async fn malformed_ballots(client: Client) {
        let response = client
            .post(uri!(cast_vote))
            .header(ContentType::JSON)
            .header(Header::new("X-Forwarded-For", "10.0.0.1"))
            .body(
                json!({"voter_id": "nope", "candidate_id": Id::new().to_string()}).to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test]
    async fn verify_rejects_pdfs(client: Client, voters: Coll<VoterCore>) {
        let voter = insert_voter(&voters, "MAT/2021/0003").await;
        voters
            .update_one(
                voter.as_doc(),
                doc! {"$set": {"verification_status": "unverified"}},
                None,
            )
            .await
            .unwrap();

        let response = client
            .post(uri!(verify_voter(voter)))
            .body(b"%PDF-1.7\n...".as_slice())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());

        // Nothing was persisted.
        let stored = voters.find_one(voter.as_doc(), None).await.unwrap().unwrap();
        assert_eq!(stored.verification_status, VerificationStatus::Unverified);

        let response = client
            .post(uri!(verify_voter(Id::new())))
            .body(b"%PDF-1.7\n...".as_slice())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn empty_uploads(client: Client) {
        let response = client
            .post(
                "/voters?matric_number=MAT%2F1&full_name=A%20B&email=a%40b.c&department=Pharmacy",
            )
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test]
    async fn enroll_then_verify(client: Client, voters: Coll<VoterCore>) {
        let registration = json!({
            "matric_number": "MAT/2021/0042",
            "full_name": "Adaeze Okonkwo Bello",
            "email": "adaeze@students.example.edu",
            "department": "Nursing Science",
        });
        let response = client
            .post(uri!(enroll_voter))
            .header(ContentType::JSON)
            .body(registration.to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let enrolled: VoterDescription =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(
            enrolled.verification_status,
            VerificationStatus::Unverified
        );
        let stored = voters
            .find_one(doc! {"matric_number": "MAT/2021/0042"}, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.verification_status, VerificationStatus::Unverified);

        let response = client
            .post(uri!(enroll_voter))
            .header(ContentType::JSON)
            .body(registration.to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());

        // The enrolled voter can now upload a document.
        let id = enrolled.id.parse::<Id>().unwrap();
        let response = client
            .post(uri!(verify_voter(id)))
            .body(b"%PDF-1.7\n...".as_slice())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test]
    async fn access_code_login(client: Client, codes: Coll<AccessCodeCore>) {
        codes
            .insert_one(AccessCodeCore::example("VIP-0007"), None)
            .await
            .unwrap();
        let login = json!({"code": "VIP-0007", "full_name": "Ngozi Eze"});

        let response = client
            .post(uri!(redeem_access_code))
            .header(ContentType::JSON)
            .body(login.to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let voter: VoterDescription =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(voter.verification_status, VerificationStatus::Verified);
        assert_eq!(voter.matric_number, "VIP-0007");

        let response = client
            .post(uri!(redeem_access_code))
            .header(ContentType::JSON)
            .body(login.to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
        let body: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("already been used"));
    }
}
