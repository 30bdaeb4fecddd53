use log::info;
use rocket::{http::ContentType, serde::json::Json, Route, State};

use crate::coordinator::VoteCoordinator;
use crate::error::{Error, Result};
use crate::model::{
    api::{CandidateSpec, CandidateTally},
    auth::Admin,
    results::Standing,
    settings::VotingSettings,
};

pub fn routes() -> Vec<Route> {
    routes![
        add_candidate,
        remove_candidate,
        winner,
        get_settings,
        set_voting_open,
        set_multi_vote,
        reset,
        export,
    ]
}

#[post("/candidates", data = "<spec>", format = "json")]
async fn add_candidate(
    admin: Admin,
    spec: Json<CandidateSpec>,
    coordinator: &State<VoteCoordinator>,
) -> Result<Json<CandidateTally>> {
    let name = spec.name.trim();
    if name.is_empty() {
        return Err(Error::BadRequest("candidate name must not be empty".to_string()));
    }

    let candidate = coordinator.add_candidate(name).await?;
    info!("{} added candidate `{}`", admin.0, candidate.name);
    Ok(Json(candidate.into()))
}

#[delete("/candidates/<name>")]
async fn remove_candidate(
    admin: Admin,
    name: &str,
    coordinator: &State<VoteCoordinator>,
) -> Result<()> {
    coordinator.remove_candidate(name).await?;
    info!("{} removed candidate `{name}`", admin.0);
    Ok(())
}

#[get("/winner")]
async fn winner(_admin: Admin, coordinator: &State<VoteCoordinator>) -> Result<Json<Standing>> {
    Ok(Json(coordinator.winner().await?))
}

#[get("/settings")]
async fn get_settings(
    _admin: Admin,
    coordinator: &State<VoteCoordinator>,
) -> Result<Json<VotingSettings>> {
    Ok(Json(coordinator.settings().await?))
}

#[put("/settings/voting-open", data = "<open>", format = "json")]
async fn set_voting_open(
    admin: Admin,
    open: Json<bool>,
    coordinator: &State<VoteCoordinator>,
) -> Result<()> {
    coordinator.set_voting_open(*open).await?;
    info!("{} set voting_open={}", admin.0, *open);
    Ok(())
}

#[put("/settings/multi-vote", data = "<allowed>", format = "json")]
async fn set_multi_vote(
    admin: Admin,
    allowed: Json<bool>,
    coordinator: &State<VoteCoordinator>,
) -> Result<()> {
    coordinator.set_multi_vote(*allowed).await?;
    info!("{} set multi_vote_allowed={}", admin.0, *allowed);
    Ok(())
}

/// Zero every tally and forget every ballot. Candidates and settings are kept.
#[post("/reset")]
async fn reset(admin: Admin, coordinator: &State<VoteCoordinator>) -> Result<()> {
    coordinator.reset_all().await?;
    info!("{} reset all votes", admin.0);
    Ok(())
}

#[get("/export")]
async fn export(
    _admin: Admin,
    coordinator: &State<VoteCoordinator>,
) -> Result<(ContentType, String)> {
    Ok((ContentType::CSV, coordinator.export_csv().await?))
}
