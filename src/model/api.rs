//! API-friendly request and response bodies.

use std::fmt::{Debug, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{
    ballot::{BallotRecord, ChoiceId},
    identity::Fingerprint,
    outcome::EligibilityOutcome,
};

/// An identity number to check, with the caller's consent to check it.
#[derive(Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct VerifyRequest {
    pub identity: Zeroizing<String>,
    #[serde(default)]
    pub consent: bool,
}

#[derive(Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct VoteRequest {
    pub identity: Zeroizing<String>,
    pub choice: ChoiceId,
}

impl Debug for VerifyRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifyRequest")
            .field("identity", &"<redacted>")
            .field("consent", &self.consent)
            .finish()
    }
}

impl Debug for VoteRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteRequest")
            .field("identity", &"<redacted>")
            .field("choice", &self.choice)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectRequest {
    pub choice: ChoiceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub outcome: EligibilityOutcome,
    pub message: String,
}

impl From<EligibilityOutcome> for VerifyResponse {
    fn from(outcome: EligibilityOutcome) -> Self {
        Self {
            outcome,
            message: outcome.message().to_string(),
        }
    }
}

/// Proof of a committed ballot, as returned to the voter and listed for auditors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotReceipt {
    pub fingerprint: Fingerprint,
    pub choice: ChoiceId,
    pub committed_at: DateTime<Utc>,
}

impl From<BallotRecord> for BallotReceipt {
    fn from(record: BallotRecord) -> Self {
        Self {
            fingerprint: record.fingerprint,
            choice: record.choice,
            committed_at: record.committed_at,
        }
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl VerifyRequest {
        pub fn example(identity: &str, consent: bool) -> Self {
            Self {
                identity: Zeroizing::new(identity.to_string()),
                consent,
            }
        }
    }

    impl VoteRequest {
        pub fn example(identity: &str, choice: &str) -> Self {
            Self {
                identity: Zeroizing::new(identity.to_string()),
                choice: choice.into(),
            }
        }
    }
}
