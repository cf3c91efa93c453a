use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::Fingerprint;

/// Identifies one of the options on the ballot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChoiceId(String);

impl ChoiceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChoiceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChoiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for ChoiceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A committed vote. Created exactly once per fingerprint and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotRecord {
    pub fingerprint: Fingerprint,
    pub choice: ChoiceId,
    pub committed_at: DateTime<Utc>,
}

impl BallotRecord {
    pub fn new(fingerprint: Fingerprint, choice: ChoiceId) -> Self {
        Self {
            fingerprint,
            choice,
            committed_at: Utc::now(),
        }
    }
}
