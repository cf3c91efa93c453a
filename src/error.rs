use mongodb::error::Error as DbError;
use rocket::{
    http::{Status, StatusClass},
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::model::{
    ballot::ChoiceId,
    election::ElectionPhase,
    identity::InvalidFormat,
    ledger::{AlreadyCommitted, LedgerError},
    workflow::{WorkflowError, WorkflowState},
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    InvalidFormat(#[from] InvalidFormat),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    AlreadyCommitted(#[from] AlreadyCommitted),
    #[error("Identity number not found in voter database")]
    NotEligible,
    #[error("Voting is not open, the election is in the '{0}' phase")]
    VotingClosed(ElectionPhase),
    #[error("Unknown choice '{0}'")]
    UnknownChoice(ChoiceId),
    #[error("The {0} step did not complete in time, please try again")]
    Timeout(WorkflowState),
    #[error("No active verification session")]
    NoSession,
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AlreadyCommitted(e) => Self::AlreadyCommitted(e),
            LedgerError::Db(e) => Self::Db(e),
        }
    }
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Self::Db(_) => Status::InternalServerError,
            Self::InvalidFormat(_) | Self::UnknownChoice(_) | Self::BadRequest(_) => {
                Status::BadRequest
            }
            Self::Workflow(err) => match err {
                WorkflowError::ConsentMissing
                | WorkflowError::InvalidFormat(_)
                | WorkflowError::NoSelection => Status::BadRequest,
                WorkflowError::NotEligible => Status::Forbidden,
                WorkflowError::AlreadyVoted | WorkflowError::InvalidTransition { .. } => {
                    Status::Conflict
                }
            },
            Self::AlreadyCommitted(_) => Status::Conflict,
            Self::NotEligible => Status::Forbidden,
            Self::VotingClosed(_) => Status::Locked,
            Self::Timeout(_) => Status::GatewayTimeout,
            Self::NoSession => Status::Unauthorized,
        }
    }

    /// Stable machine-readable reason, distinct for every failure a caller can act on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(_) => "storage_failure",
            Self::InvalidFormat(_) => "invalid_format",
            Self::Workflow(err) => match err {
                WorkflowError::ConsentMissing => "consent_missing",
                WorkflowError::InvalidFormat(_) => "invalid_format",
                WorkflowError::NotEligible => "not_eligible",
                WorkflowError::AlreadyVoted => "already_voted",
                WorkflowError::NoSelection => "no_selection",
                WorkflowError::InvalidTransition { .. } => "invalid_transition",
            },
            Self::AlreadyCommitted(_) => "already_committed",
            Self::NotEligible => "not_eligible",
            Self::VotingClosed(_) => "voting_closed",
            Self::UnknownChoice(_) => "unknown_choice",
            Self::Timeout(_) => "timeout",
            Self::NoSession => "no_session",
            Self::BadRequest(_) => "bad_request",
        }
    }
}

/// JSON body sent with every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        if status.class() == StatusClass::ServerError {
            error!("{self}");
        } else {
            debug!("{self}");
        }
        // Storage errors may carry server details; don't echo them to callers.
        let message = match self {
            Self::Db(_) => "Internal storage failure".to_string(),
            _ => self.to_string(),
        };
        let body = ErrorBody {
            error: self.code(),
            message,
        };
        (status, Json(body)).respond_to(req)
    }
}
