//! The append-only ballot ledger.
//!
//! Every backend guarantees that at most one [`BallotRecord`] ever exists per
//! [`Fingerprint`]: [`BallotLedger::try_commit`] is a single indivisible
//! check-and-insert, so of any number of racing commits for one fingerprint
//! exactly one succeeds. There is no update or delete.

use std::collections::HashMap;

use mongodb::error::Error as DbError;
use thiserror::Error;

use super::{
    ballot::{BallotRecord, ChoiceId},
    identity::Fingerprint,
};

mod memory;
mod mongo;

pub use memory::MemoryLedger;
pub use mongo::{ensure_indexes_exist, MongoLedger};

/// A ballot has already been committed for this fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("A vote has already been recorded for fingerprint {fingerprint}")]
pub struct AlreadyCommitted {
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    AlreadyCommitted(#[from] AlreadyCommitted),
    #[error(transparent)]
    Db(#[from] DbError),
}

#[rocket::async_trait]
pub trait BallotLedger: Send + Sync {
    /// Has a ballot been committed for this fingerprint?
    async fn has_voted(&self, fingerprint: &Fingerprint) -> Result<bool, DbError>;

    /// Atomically record a ballot, unless one already exists for the fingerprint.
    async fn try_commit(
        &self,
        fingerprint: &Fingerprint,
        choice: &ChoiceId,
    ) -> Result<BallotRecord, LedgerError>;

    /// Number of committed ballots per choice. Choices with no votes are absent.
    async fn counts_by_choice(&self) -> Result<HashMap<ChoiceId, u64>, DbError>;

    async fn total_committed(&self) -> Result<u64, DbError>;

    /// A page of committed ballots, oldest first.
    async fn records(&self, skip: u64, limit: u64) -> Result<Vec<BallotRecord>, DbError>;

    /// Number of commits refused as duplicates since this ledger was opened.
    fn blocked_duplicates(&self) -> u64;
}
