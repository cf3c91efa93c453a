use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rocket::tokio::time::timeout;

use crate::error::{Error, Result};

use super::{
    ballot::{BallotRecord, ChoiceId},
    election::{turnout_percentage, ElectionPhase, Tally},
    identity::{Fingerprint, Fingerprinter, IdentityNumber},
    ledger::{BallotLedger, LedgerError},
    outcome::{CommitOutcome, EligibilityOutcome},
    registry::EligibilityRegistry,
    workflow::{VerificationSession, WorkflowState},
};

pub type SharedService = Arc<VerificationService>;

/// The single entry point for eligibility checks and ballot commits.
///
/// Raw identity numbers are accepted as strings, validated on every call, and
/// reduced to a [`Fingerprint`] before anything is stored, compared, or logged.
pub struct VerificationService {
    fingerprinter: Fingerprinter,
    registry: EligibilityRegistry,
    ledger: Arc<dyn BallotLedger>,
    choices: Vec<ChoiceId>,
    phase: RwLock<ElectionPhase>,
    step_timeout: Duration,
}

impl VerificationService {
    pub fn new(
        fingerprinter: Fingerprinter,
        registry: EligibilityRegistry,
        ledger: Arc<dyn BallotLedger>,
        choices: Vec<ChoiceId>,
        phase: ElectionPhase,
        step_timeout: Duration,
    ) -> Self {
        Self {
            fingerprinter,
            registry,
            ledger,
            choices,
            phase: RwLock::new(phase),
            step_timeout,
        }
    }

    pub fn choices(&self) -> &[ChoiceId] {
        &self.choices
    }

    pub fn phase(&self) -> ElectionPhase {
        *self.phase.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move the election to a new phase. Only `Live` accepts votes.
    pub fn set_phase(&self, phase: ElectionPhase) {
        let mut current = self.phase.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current != phase {
            info!("Election phase changed from {} to {}", *current, phase);
            *current = phase;
        }
    }

    fn fingerprint(&self, identity: &str) -> Result<Fingerprint> {
        let identity = identity.parse::<IdentityNumber>()?;
        Ok(self.fingerprinter.fingerprint(&identity))
    }

    /// Check an identity against the ledger, then the registry. Never mutates anything.
    pub async fn verify(&self, identity: &str) -> Result<EligibilityOutcome> {
        let fingerprint = self.fingerprint(identity)?;
        let outcome = if self.ledger.has_voted(&fingerprint).await? {
            EligibilityOutcome::AlreadyVoted
        } else if self.registry.contains(&fingerprint) {
            EligibilityOutcome::Eligible
        } else {
            EligibilityOutcome::NotEligible
        };
        info!("Verified {fingerprint}: {outcome:?}");
        Ok(outcome)
    }

    /// Commit a ballot for an identity.
    ///
    /// Refuses before touching the ledger if the identity is malformed, voting
    /// is not open, the choice is unknown, or the identity is not registered.
    /// A second commit for the same identity is `Rejected`, never retried.
    pub async fn commit_vote(&self, identity: &str, choice: &ChoiceId) -> Result<CommitOutcome> {
        let fingerprint = self.fingerprint(identity)?;

        let phase = self.phase();
        if !phase.accepts_votes() {
            warn!("Refused ballot for {fingerprint}: election phase is {phase}");
            return Err(Error::VotingClosed(phase));
        }
        if !self.choices.contains(choice) {
            return Err(Error::UnknownChoice(choice.clone()));
        }
        if !self.registry.contains(&fingerprint) {
            warn!("Refused ballot for {fingerprint}: not in registry");
            return Err(Error::NotEligible);
        }

        match self.ledger.try_commit(&fingerprint, choice).await {
            Ok(record) => {
                info!("Committed ballot for {fingerprint}");
                Ok(CommitOutcome::Committed(record))
            }
            Err(LedgerError::AlreadyCommitted(rejected)) => {
                warn!("Refused duplicate ballot for {fingerprint}");
                Ok(CommitOutcome::Rejected(rejected))
            }
            Err(LedgerError::Db(e)) => Err(e.into()),
        }
    }

    pub async fn tally(&self) -> Result<Tally> {
        let mut counts_by_choice = self
            .choices
            .iter()
            .map(|choice| (choice.clone(), 0))
            .collect::<BTreeMap<_, _>>();
        counts_by_choice.extend(self.ledger.counts_by_choice().await?);
        let total_committed = self.ledger.total_committed().await?;
        let eligible_voters = self.registry.len() as u64;

        Ok(Tally {
            counts_by_choice,
            total_committed,
            blocked_duplicates: self.ledger.blocked_duplicates(),
            eligible_voters,
            turnout_percentage: turnout_percentage(total_committed, eligible_voters),
            phase: self.phase(),
        })
    }

    pub async fn total_committed(&self) -> Result<u64> {
        Ok(self.ledger.total_committed().await?)
    }

    /// A page of committed ballots, oldest first.
    pub async fn records(&self, skip: u64, limit: u64) -> Result<Vec<BallotRecord>> {
        Ok(self.ledger.records(skip, limit).await?)
    }

    /// Drive a session from `Input` through `Verifying` to `Result`.
    ///
    /// If the lookup fails or exceeds the step timeout, the session returns to
    /// `Input` with everything it held, so the caller can simply retry.
    pub async fn run_verify(&self, session: &mut VerificationSession) -> Result<EligibilityOutcome> {
        let identity = session.submit_verify()?;
        match timeout(self.step_timeout, self.verify(&identity)).await {
            Ok(Ok(outcome)) => {
                session.complete_verify(outcome)?;
                Ok(outcome)
            }
            Ok(Err(e)) => {
                session.abort_verify()?;
                Err(e)
            }
            Err(_) => {
                session.abort_verify()?;
                warn!("Verification timed out after {:?}", self.step_timeout);
                Err(Error::Timeout(WorkflowState::Verifying))
            }
        }
    }

    /// Drive a session from `Selecting` through `Committing` to `Success`, or
    /// back to `Result` if a ballot already exists for the identity.
    ///
    /// If the commit fails or exceeds the step timeout, the session returns to
    /// `Selecting`. A duplicate is reported as [`Error::AlreadyCommitted`].
    pub async fn run_commit(&self, session: &mut VerificationSession) -> Result<BallotRecord> {
        let (identity, choice) = session.confirm_vote()?;
        match timeout(self.step_timeout, self.commit_vote(&identity, &choice)).await {
            Ok(Ok(outcome)) => {
                session.complete_commit(&outcome)?;
                match outcome {
                    CommitOutcome::Committed(record) => Ok(record),
                    CommitOutcome::Rejected(rejected) => Err(rejected.into()),
                }
            }
            Ok(Err(e)) => {
                session.abort_commit()?;
                Err(e)
            }
            Err(_) => {
                session.abort_commit()?;
                warn!("Ballot commit timed out after {:?}", self.step_timeout);
                Err(Error::Timeout(WorkflowState::Committing))
            }
        }
    }
}

/// Example data for tests.
#[cfg(test)]
pub(crate) mod examples {
    use crate::model::ledger::MemoryLedger;

    use super::*;

    pub const CHOICES: &[&str] = &["bjp", "inc", "aap", "nota"];

    impl VerificationService {
        pub fn example() -> Self {
            Self::with_ledger(Arc::new(MemoryLedger::new()), Duration::from_secs(5))
        }

        pub fn with_ledger(ledger: Arc<dyn BallotLedger>, step_timeout: Duration) -> Self {
            let fingerprinter = Fingerprinter::example();
            let registry = EligibilityRegistry::example(&fingerprinter);
            Self::new(
                fingerprinter,
                registry,
                ledger,
                CHOICES.iter().copied().map(ChoiceId::from).collect(),
                ElectionPhase::Live,
                step_timeout,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use mongodb::error::Error as DbError;
    use rocket::tokio;

    use crate::model::{
        ledger::MemoryLedger,
        registry::examples::{ELIGIBLE, NOT_ELIGIBLE},
        workflow::WorkflowError,
    };

    use super::*;

    const IDENTITY: &str = "123456789012";

    fn bjp() -> ChoiceId {
        ChoiceId::from("bjp")
    }

    /// A ledger that stalls before every operation.
    struct SlowLedger {
        inner: MemoryLedger,
        delay: Duration,
    }

    #[rocket::async_trait]
    impl BallotLedger for SlowLedger {
        async fn has_voted(&self, fingerprint: &Fingerprint) -> std::result::Result<bool, DbError> {
            tokio::time::sleep(self.delay).await;
            self.inner.has_voted(fingerprint).await
        }

        async fn try_commit(
            &self,
            fingerprint: &Fingerprint,
            choice: &ChoiceId,
        ) -> std::result::Result<BallotRecord, LedgerError> {
            tokio::time::sleep(self.delay).await;
            self.inner.try_commit(fingerprint, choice).await
        }

        async fn counts_by_choice(&self) -> std::result::Result<HashMap<ChoiceId, u64>, DbError> {
            self.inner.counts_by_choice().await
        }

        async fn total_committed(&self) -> std::result::Result<u64, DbError> {
            self.inner.total_committed().await
        }

        async fn records(
            &self,
            skip: u64,
            limit: u64,
        ) -> std::result::Result<Vec<BallotRecord>, DbError> {
            self.inner.records(skip, limit).await
        }

        fn blocked_duplicates(&self) -> u64 {
            self.inner.blocked_duplicates()
        }
    }

    #[rocket::async_test]
    async fn eligible_commit_then_rejected() {
        let service = VerificationService::example();

        assert_eq!(service.verify(IDENTITY).await.unwrap(), EligibilityOutcome::Eligible);
        let record = match service.commit_vote(IDENTITY, &bjp()).await.unwrap() {
            CommitOutcome::Committed(record) => record,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(record.choice, bjp());

        match service.commit_vote(IDENTITY, &bjp()).await.unwrap() {
            CommitOutcome::Rejected(rejected) => assert_eq!(rejected.fingerprint, record.fingerprint),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(service.verify(IDENTITY).await.unwrap(), EligibilityOutcome::AlreadyVoted);
        assert_eq!(service.records(0, 10).await.unwrap(), vec![record]);
    }

    #[rocket::async_test]
    async fn not_eligible_never_reaches_ledger() {
        let ledger = Arc::new(MemoryLedger::new());
        let service = VerificationService::with_ledger(ledger.clone(), Duration::from_secs(5));

        assert_eq!(
            service.verify(NOT_ELIGIBLE).await.unwrap(),
            EligibilityOutcome::NotEligible
        );
        assert!(matches!(
            service.commit_vote(NOT_ELIGIBLE, &bjp()).await,
            Err(Error::NotEligible)
        ));
        assert_eq!(ledger.total_committed().await.unwrap(), 0);
        assert_eq!(ledger.blocked_duplicates(), 0);
    }

    #[rocket::async_test]
    async fn malformed_identity_is_invalid_format() {
        let ledger = Arc::new(MemoryLedger::new());
        let service = VerificationService::with_ledger(ledger.clone(), Duration::from_secs(5));

        for bad in ["", "12345678901", "1234567890123", "12345678901a", "abcdefghijkl"] {
            assert!(matches!(service.verify(bad).await, Err(Error::InvalidFormat(_))));
            assert!(matches!(
                service.commit_vote(bad, &bjp()).await,
                Err(Error::InvalidFormat(_))
            ));
        }
        assert_eq!(ledger.total_committed().await.unwrap(), 0);
    }

    #[rocket::async_test]
    async fn verify_is_idempotent() {
        let service = VerificationService::example();
        for identity in [IDENTITY, NOT_ELIGIBLE] {
            let first = service.verify(identity).await.unwrap();
            let second = service.verify(identity).await.unwrap();
            assert_eq!(first, second);
        }
        assert_eq!(service.tally().await.unwrap().total_committed, 0);
    }

    #[rocket::async_test]
    async fn phase_gates_commits() {
        let service = VerificationService::example();

        for phase in [ElectionPhase::Pre, ElectionPhase::Post] {
            service.set_phase(phase);
            assert!(matches!(
                service.commit_vote(IDENTITY, &bjp()).await,
                Err(Error::VotingClosed(p)) if p == phase
            ));
            // Verification stays available.
            assert_eq!(service.verify(IDENTITY).await.unwrap(), EligibilityOutcome::Eligible);
        }

        service.set_phase(ElectionPhase::Live);
        assert!(matches!(
            service.commit_vote(IDENTITY, &bjp()).await,
            Ok(CommitOutcome::Committed(_))
        ));
    }

    #[rocket::async_test]
    async fn unknown_choice_refused() {
        let service = VerificationService::example();
        assert!(matches!(
            service.commit_vote(IDENTITY, &ChoiceId::from("nobody")).await,
            Err(Error::UnknownChoice(_))
        ));
        assert_eq!(service.verify(IDENTITY).await.unwrap(), EligibilityOutcome::Eligible);
    }

    #[rocket::async_test]
    async fn tally_counts_each_commit_once() {
        let service = VerificationService::example();
        let before = service.tally().await.unwrap();
        assert_eq!(before.counts_by_choice.len(), examples::CHOICES.len());
        assert!(before.counts_by_choice.values().all(|&c| c == 0));
        assert_eq!(before.eligible_voters, ELIGIBLE.len() as u64);

        service.commit_vote(ELIGIBLE[0], &bjp()).await.unwrap();
        service.commit_vote(ELIGIBLE[1], &ChoiceId::from("inc")).await.unwrap();
        service.commit_vote(ELIGIBLE[0], &ChoiceId::from("inc")).await.unwrap();

        let after = service.tally().await.unwrap();
        assert_eq!(after.counts_by_choice[&bjp()], 1);
        assert_eq!(after.counts_by_choice[&ChoiceId::from("inc")], 1);
        assert_eq!(after.total_committed, 2);
        assert_eq!(after.blocked_duplicates, 1);
        assert_eq!(after.turnout_percentage, 13.3);
        assert_eq!(after.phase, ElectionPhase::Live);
    }

    #[rocket::async_test]
    async fn concurrent_commits_for_one_identity() {
        for attempts in [1usize, 8, 64] {
            let service = Arc::new(VerificationService::example());
            let handles = (0..attempts)
                .map(|_| {
                    let service = service.clone();
                    tokio::spawn(async move { service.commit_vote(IDENTITY, &bjp()).await })
                })
                .collect::<Vec<_>>();

            let mut committed = 0;
            let mut rejected = 0;
            for handle in handles {
                match handle.await.unwrap().unwrap() {
                    CommitOutcome::Committed(_) => committed += 1,
                    CommitOutcome::Rejected(_) => rejected += 1,
                }
            }
            assert_eq!(committed, 1);
            assert_eq!(rejected, attempts - 1);
            assert_eq!(service.tally().await.unwrap().counts_by_choice[&bjp()], 1);
        }
    }

    #[rocket::async_test]
    async fn session_flow_through_service() {
        let service = VerificationService::example();
        let mut session = VerificationSession::new();

        session.set_input(IDENTITY, true).unwrap();
        assert_eq!(
            service.run_verify(&mut session).await.unwrap(),
            EligibilityOutcome::Eligible
        );
        session.proceed_to_vote().unwrap();
        session.select_choice(bjp()).unwrap();
        let record = service.run_commit(&mut session).await.unwrap();
        assert_eq!(record.choice, bjp());
        assert_eq!(session.state(), WorkflowState::Success);
    }

    #[rocket::async_test]
    async fn session_without_consent_never_verifies() {
        let ledger = Arc::new(MemoryLedger::new());
        let service = VerificationService::with_ledger(ledger.clone(), Duration::from_secs(5));
        let mut session = VerificationSession::new();

        session.set_input(IDENTITY, false).unwrap();
        assert!(matches!(
            service.run_verify(&mut session).await,
            Err(Error::Workflow(WorkflowError::ConsentMissing))
        ));
        assert_eq!(session.state(), WorkflowState::Input);
    }

    #[rocket::async_test]
    async fn racing_sessions_commit_once() {
        let service = VerificationService::example();
        let mut first = VerificationSession::new();
        let mut second = VerificationSession::new();

        // Both sessions verify before either commits.
        for session in [&mut first, &mut second] {
            session.set_input(IDENTITY, true).unwrap();
            service.run_verify(session).await.unwrap();
            session.proceed_to_vote().unwrap();
            session.select_choice(bjp()).unwrap();
        }

        service.run_commit(&mut first).await.unwrap();
        assert!(matches!(
            service.run_commit(&mut second).await,
            Err(Error::AlreadyCommitted(_))
        ));
        assert_eq!(first.state(), WorkflowState::Success);
        assert_eq!(second.state(), WorkflowState::Result);
        assert!(second.eligibility().unwrap().has_voted);
        let tally = service.tally().await.unwrap();
        assert_eq!(tally.total_committed, 1);
        assert_eq!(tally.blocked_duplicates, 1);
    }

    #[rocket::async_test]
    async fn closed_phase_outranks_duplicate_confirm() {
        let service = VerificationService::example();
        let mut first = VerificationSession::new();
        let mut second = VerificationSession::new();
        for session in [&mut first, &mut second] {
            session.set_input(IDENTITY, true).unwrap();
            service.run_verify(session).await.unwrap();
            session.proceed_to_vote().unwrap();
            session.select_choice(bjp()).unwrap();
        }
        service.run_commit(&mut first).await.unwrap();

        service.set_phase(ElectionPhase::Post);
        let err = service.run_commit(&mut second).await.unwrap_err();
        assert!(matches!(err, Error::VotingClosed(ElectionPhase::Post)));
        assert_eq!(err.code(), "voting_closed");
        assert_eq!(second.state(), WorkflowState::Selecting);
        assert_eq!(service.total_committed().await.unwrap(), 1);
        assert_eq!(service.tally().await.unwrap().blocked_duplicates, 0);
    }

    #[rocket::async_test]
    async fn closed_phase_returns_session_to_selecting() {
        let service = VerificationService::example();
        let mut session = VerificationSession::new();
        session.set_input(IDENTITY, true).unwrap();
        service.run_verify(&mut session).await.unwrap();
        session.proceed_to_vote().unwrap();
        session.select_choice(bjp()).unwrap();

        service.set_phase(ElectionPhase::Post);
        assert!(matches!(
            service.run_commit(&mut session).await,
            Err(Error::VotingClosed(ElectionPhase::Post))
        ));
        assert_eq!(session.state(), WorkflowState::Selecting);
    }

    #[rocket::async_test]
    async fn slow_steps_time_out_and_are_retryable() {
        let slow = Arc::new(SlowLedger {
            inner: MemoryLedger::new(),
            delay: Duration::from_millis(200),
        });
        let service = VerificationService::with_ledger(slow, Duration::from_millis(20));
        let mut session = VerificationSession::new();

        session.set_input(IDENTITY, true).unwrap();
        assert!(matches!(
            service.run_verify(&mut session).await,
            Err(Error::Timeout(WorkflowState::Verifying))
        ));
        assert_eq!(session.state(), WorkflowState::Input);

        // Retry the same step against a responsive ledger.
        let service = VerificationService::example();
        service.run_verify(&mut session).await.unwrap();
        assert_eq!(session.state(), WorkflowState::Result);

        session.proceed_to_vote().unwrap();
        session.select_choice(bjp()).unwrap();
        let slow = Arc::new(SlowLedger {
            inner: MemoryLedger::new(),
            delay: Duration::from_millis(200),
        });
        let slow_service = VerificationService::with_ledger(slow, Duration::from_millis(20));
        assert!(matches!(
            slow_service.run_commit(&mut session).await,
            Err(Error::Timeout(WorkflowState::Committing))
        ));
        assert_eq!(session.state(), WorkflowState::Selecting);

        service.run_commit(&mut session).await.unwrap();
        assert_eq!(session.state(), WorkflowState::Success);
    }
}
