use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use super::ballot::ChoiceId;

/// Phases in the election lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionPhase {
    /// Before voting opens; verification is possible but votes are refused.
    Pre,
    /// Voting is open.
    Live,
    /// Voting has closed.
    Post,
}

impl ElectionPhase {
    pub fn accepts_votes(self) -> bool {
        self == Self::Live
    }
}

impl Display for ElectionPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pre => "pre",
            Self::Live => "live",
            Self::Post => "post",
        };
        f.write_str(name)
    }
}

/// Read-only aggregate view of the ballot ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    /// Committed votes per choice. Every configured choice is present, even at zero.
    pub counts_by_choice: BTreeMap<ChoiceId, u64>,
    pub total_committed: u64,
    /// Duplicate commit attempts refused since the ledger was opened.
    pub blocked_duplicates: u64,
    pub eligible_voters: u64,
    pub turnout_percentage: f64,
    pub phase: ElectionPhase,
}

/// Percentage of the eligible population that has voted, to one decimal place.
pub fn turnout_percentage(total_committed: u64, eligible_voters: u64) -> f64 {
    if eligible_voters == 0 {
        return 0.0;
    }
    let raw = total_committed as f64 * 100.0 / eligible_voters as f64;
    (raw * 10.0).round() / 10.0
}
