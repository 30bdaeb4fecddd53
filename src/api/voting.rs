use rocket::{serde::json::Json, Route, State};

use crate::coordinator::VoteCoordinator;
use crate::error::Result;
use crate::model::{
    api::{BallotSpec, MyVote, VoteReceipt},
    auth::Voter,
};

pub fn routes() -> Vec<Route> {
    routes![cast_vote, my_vote]
}

#[post("/votes", data = "<ballot>", format = "json")]
async fn cast_vote(
    voter: Voter,
    ballot: Json<BallotSpec>,
    coordinator: &State<VoteCoordinator>,
) -> Result<Json<VoteReceipt>> {
    let candidate = coordinator.cast_vote(&voter.0, &ballot.candidate).await?;
    Ok(Json(VoteReceipt { candidate }))
}

#[get("/votes/mine")]
async fn my_vote(voter: Voter, coordinator: &State<VoteCoordinator>) -> Result<Json<MyVote>> {
    let candidate = coordinator.my_vote(&voter.0).await?;
    Ok(Json(MyVote { candidate }))
}
