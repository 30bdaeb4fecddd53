use rocket::{serde::json::Json, Route, State};

use crate::coordinator::VoteCoordinator;
use crate::error::Result;
use crate::model::{api::CandidateTally, results::Standing};

pub fn routes() -> Vec<Route> {
    routes![candidates, leaderboard]
}

/// The live tally, in the order candidates were added.
#[get("/candidates")]
async fn candidates(coordinator: &State<VoteCoordinator>) -> Result<Json<Vec<CandidateTally>>> {
    Ok(Json(coordinator.live_tally().await?))
}

#[get("/leaderboard")]
async fn leaderboard(coordinator: &State<VoteCoordinator>) -> Result<Json<Vec<Standing>>> {
    Ok(Json(coordinator.leaderboard().await?))
}
