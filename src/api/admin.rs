use rocket::{serde::json::Json, Route, State};

use crate::election::{ElectionAction, ElectionLifecycle, Transition};
use crate::error::Result;
use crate::model::{
    api::{ElectionCommand, VoterDescription},
    mongodb::Id,
};
use crate::verification::VerificationService;

pub fn routes() -> Vec<Route> {
    routes![control_election, pending_voters, approve_voter, reject_voter]
}

#[post("/admin/election", data = "<command>", format = "json")]
async fn control_election(
    command: Json<ElectionCommand>,
    lifecycle: &State<ElectionLifecycle>,
) -> Result<Json<Transition>> {
    let action = command.action.parse::<ElectionAction>()?;
    let transition = lifecycle.apply(action, command.duration_minutes).await?;
    Ok(Json(transition))
}

#[get("/admin/voters/pending")]
async fn pending_voters(
    verification: &State<VerificationService>,
) -> Result<Json<Vec<VoterDescription>>> {
    Ok(Json(verification.pending_review().await?))
}

#[post("/admin/voters/<voter_id>/approve")]
async fn approve_voter(
    voter_id: Id,
    verification: &State<VerificationService>,
) -> Result<Json<VoterDescription>> {
    Ok(Json(verification.approve(voter_id).await?))
}

#[post("/admin/voters/<voter_id>/reject")]
async fn reject_voter(
    voter_id: Id,
    verification: &State<VerificationService>,
) -> Result<Json<VoterDescription>> {
    Ok(Json(verification.reject(voter_id).await?))
}
