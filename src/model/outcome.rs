use serde::{Deserialize, Serialize};

use super::{ballot::BallotRecord, ledger::AlreadyCommitted};

pub const ELIGIBLE_MESSAGE: &str = "You are eligible to vote. Please proceed.";
pub const ALREADY_VOTED_MESSAGE: &str = "This identity number has already been used to vote.";
pub const NOT_ELIGIBLE_MESSAGE: &str = "Identity number not found in voter database.";

/// Result of checking an identity against the ledger and the registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityOutcome {
    Eligible,
    /// A ballot exists for this identity. Takes precedence over registry
    /// membership, since a ledger entry implies the identity was eligible.
    AlreadyVoted,
    NotEligible,
}

impl EligibilityOutcome {
    /// User-facing explanation of the outcome.
    pub fn message(self) -> &'static str {
        match self {
            Self::Eligible => ELIGIBLE_MESSAGE,
            Self::AlreadyVoted => ALREADY_VOTED_MESSAGE,
            Self::NotEligible => NOT_ELIGIBLE_MESSAGE,
        }
    }
}

/// Result of attempting to commit a ballot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(BallotRecord),
    Rejected(AlreadyCommitted),
}
