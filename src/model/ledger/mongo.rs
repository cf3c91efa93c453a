use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, from_document, serde_helpers::chrono_datetime_as_bson_datetime},
    error::{Error as DbError, ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions},
    Collection, Database, IndexModel,
};
use rocket::futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::model::{
    ballot::{BallotRecord, ChoiceId},
    identity::Fingerprint,
};

use super::{AlreadyCommitted, BallotLedger, LedgerError};

const BALLOTS: &str = "ballots";

/// The mongodb crate doesn't export server error codes.
const DUPLICATE_KEY: i32 = 11000;

/// A ballot as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbBallot {
    fingerprint: Fingerprint,
    choice: ChoiceId,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    committed_at: DateTime<Utc>,
}

impl From<BallotRecord> for DbBallot {
    fn from(record: BallotRecord) -> Self {
        Self {
            fingerprint: record.fingerprint,
            choice: record.choice,
            committed_at: record.committed_at,
        }
    }
}

impl From<DbBallot> for BallotRecord {
    fn from(ballot: DbBallot) -> Self {
        Self {
            fingerprint: ballot.fingerprint,
            choice: ballot.choice,
            committed_at: ballot.committed_at,
        }
    }
}

/// One row of the per-choice aggregation.
#[derive(Debug, Deserialize)]
struct ChoiceCount {
    #[serde(rename = "_id")]
    choice: ChoiceId,
    count: u64,
}

/// Return true if the given error is a duplicate key write error.
fn is_duplicate_key_error(err: &DbError) -> bool {
    if let ErrorKind::Write(WriteFailure::WriteError(ref e)) = *err.kind {
        return e.code == DUPLICATE_KEY;
    }
    false
}

/// Ensure that the unique fingerprint index exists on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring ballot ledger indexes exist");

    let unique = IndexOptions::builder().unique(true).build();
    let fingerprint_index = IndexModel::builder()
        .keys(doc! {"fingerprint": 1})
        .options(unique)
        .build();
    db.collection::<DbBallot>(BALLOTS)
        .create_index(fingerprint_index, None)
        .await?;

    Ok(())
}

/// A ledger backed by a MongoDB collection.
///
/// Atomicity comes from the unique index on `fingerprint`: each commit is a
/// single insert, and the server rejects a second insert for the same key.
pub struct MongoLedger {
    ballots: Collection<DbBallot>,
    blocked: AtomicU64,
}

impl MongoLedger {
    /// Open the ledger, creating its index if necessary.
    pub async fn open(db: &Database) -> Result<Self, DbError> {
        ensure_indexes_exist(db).await?;
        Ok(Self {
            ballots: db.collection(BALLOTS),
            blocked: AtomicU64::new(0),
        })
    }
}

#[rocket::async_trait]
impl BallotLedger for MongoLedger {
    async fn has_voted(&self, fingerprint: &Fingerprint) -> Result<bool, DbError> {
        let existing = self
            .ballots
            .find_one(doc! {"fingerprint": fingerprint.as_str()}, None)
            .await?;
        Ok(existing.is_some())
    }

    async fn try_commit(
        &self,
        fingerprint: &Fingerprint,
        choice: &ChoiceId,
    ) -> Result<BallotRecord, LedgerError> {
        let record = BallotRecord::new(fingerprint.clone(), choice.clone());
        match self
            .ballots
            .insert_one(DbBallot::from(record.clone()), None)
            .await
        {
            Ok(_) => Ok(record),
            Err(err) if is_duplicate_key_error(&err) => {
                self.blocked.fetch_add(1, Ordering::Relaxed);
                Err(AlreadyCommitted {
                    fingerprint: fingerprint.clone(),
                }
                .into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn counts_by_choice(&self) -> Result<HashMap<ChoiceId, u64>, DbError> {
        let pipeline = [doc! {
            "$group": {
                "_id": "$choice",
                "count": { "$sum": 1 },
            }
        }];
        let mut cursor = self.ballots.aggregate(pipeline, None).await?;
        let mut counts = HashMap::new();
        while let Some(row) = cursor.try_next().await? {
            let row: ChoiceCount = from_document(row)?;
            counts.insert(row.choice, row.count);
        }
        Ok(counts)
    }

    async fn total_committed(&self) -> Result<u64, DbError> {
        self.ballots.count_documents(None, None).await
    }

    async fn records(&self, skip: u64, limit: u64) -> Result<Vec<BallotRecord>, DbError> {
        let options = FindOptions::builder()
            .sort(doc! {"committed_at": 1, "fingerprint": 1})
            .skip(skip)
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .build();
        self.ballots
            .find(None, options)
            .await?
            .map_ok(BallotRecord::from)
            .try_collect()
            .await
    }

    fn blocked_duplicates(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }
}
