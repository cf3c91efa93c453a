use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{mapref::entry::Entry, DashMap};
use mongodb::error::Error as DbError;

use crate::model::{
    ballot::{BallotRecord, ChoiceId},
    identity::Fingerprint,
};

use super::{AlreadyCommitted, BallotLedger, LedgerError};

/// An in-process ledger.
///
/// The check-and-insert for a fingerprint happens under the map's entry lock
/// for that key, so concurrent commits for one voter settle on exactly one.
#[derive(Default)]
pub struct MemoryLedger {
    ballots: DashMap<Fingerprint, BallotRecord>,
    blocked: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[rocket::async_trait]
impl BallotLedger for MemoryLedger {
    async fn has_voted(&self, fingerprint: &Fingerprint) -> Result<bool, DbError> {
        Ok(self.ballots.contains_key(fingerprint))
    }

    async fn try_commit(
        &self,
        fingerprint: &Fingerprint,
        choice: &ChoiceId,
    ) -> Result<BallotRecord, LedgerError> {
        match self.ballots.entry(fingerprint.clone()) {
            Entry::Occupied(_) => {
                self.blocked.fetch_add(1, Ordering::Relaxed);
                Err(AlreadyCommitted {
                    fingerprint: fingerprint.clone(),
                }
                .into())
            }
            Entry::Vacant(entry) => {
                let record = BallotRecord::new(fingerprint.clone(), choice.clone());
                entry.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn counts_by_choice(&self) -> Result<HashMap<ChoiceId, u64>, DbError> {
        let mut counts = HashMap::new();
        for ballot in self.ballots.iter() {
            *counts.entry(ballot.choice.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn total_committed(&self) -> Result<u64, DbError> {
        Ok(self.ballots.len() as u64)
    }

    async fn records(&self, skip: u64, limit: u64) -> Result<Vec<BallotRecord>, DbError> {
        let mut records = self
            .ballots
            .iter()
            .map(|ballot| ballot.value().clone())
            .collect::<Vec<_>>();
        records.sort_by(|a, b| {
            a.committed_at
                .cmp(&b.committed_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        Ok(records
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }

    fn blocked_duplicates(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }
}
