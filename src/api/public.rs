use rocket::{serde::json::Json, Route, State};

use crate::error::Result;
use crate::model::{
    api::{BallotReceipt, VerifyRequest, VerifyResponse, VoteRequest},
    ballot::ChoiceId,
    election::Tally,
    outcome::CommitOutcome,
    pagination::{Paginated, PaginationRequest},
    service::SharedService,
    workflow::WorkflowError,
};

use super::body;

pub fn routes() -> Vec<Route> {
    routes![verify, vote, choices, results, ledger]
}

/// Check an identity without starting a session.
#[post("/verify", data = "<request>", format = "json")]
async fn verify(
    request: std::result::Result<Json<VerifyRequest>, rocket::serde::json::Error<'_>>,
    service: &State<SharedService>,
) -> Result<Json<VerifyResponse>> {
    let request = body(request)?;
    if !request.consent {
        return Err(WorkflowError::ConsentMissing.into());
    }
    let outcome = service.verify(&request.identity).await?;
    Ok(Json(outcome.into()))
}

/// Verify and commit in one call.
#[post("/vote", data = "<request>", format = "json")]
async fn vote(
    request: std::result::Result<Json<VoteRequest>, rocket::serde::json::Error<'_>>,
    service: &State<SharedService>,
) -> Result<Json<BallotReceipt>> {
    let request = body(request)?;
    match service.commit_vote(&request.identity, &request.choice).await? {
        CommitOutcome::Committed(record) => Ok(Json(record.into())),
        CommitOutcome::Rejected(rejected) => Err(rejected.into()),
    }
}

#[get("/choices")]
fn choices(service: &State<SharedService>) -> Json<Vec<ChoiceId>> {
    Json(service.choices().to_vec())
}

#[get("/results")]
async fn results(service: &State<SharedService>) -> Result<Json<Tally>> {
    Ok(Json(service.tally().await?))
}

/// Committed ballots, oldest first. Only fingerprints are ever listed.
#[get("/ledger?<pagination..>")]
async fn ledger(
    pagination: PaginationRequest,
    service: &State<SharedService>,
) -> Result<Json<Paginated<BallotReceipt>>> {
    let records = service
        .records(pagination.skip(), u64::from(pagination.page_size()))
        .await?
        .into_iter()
        .map(BallotReceipt::from)
        .collect();
    let total = service.total_committed().await?;
    Ok(Json(pagination.to_paginated(total, records)))
}
