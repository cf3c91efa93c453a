//! The per-caller verification and voting workflow.
//!
//! ```text
//! Input --submit_verify--> Verifying --complete_verify--> Result
//! Result --proceed_to_vote--> Selecting --confirm_vote--> Committing
//! Selecting --back--> Result
//! Committing --complete_commit--> Success | Result (already committed)
//! any --cancel--> Input
//! ```
//!
//! The state machine is synchronous and knows nothing about storage; the
//! service drives it around the actual lookups and commits.

use std::fmt::{Debug, Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use super::{
    ballot::ChoiceId,
    identity::{IdentityNumber, InvalidFormat},
    outcome::{CommitOutcome, EligibilityOutcome, ALREADY_VOTED_MESSAGE},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    #[default]
    Input,
    Verifying,
    Result,
    Selecting,
    Committing,
    Success,
}

impl Display for WorkflowState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Input => "input",
            Self::Verifying => "verifying",
            Self::Result => "result",
            Self::Selecting => "selecting",
            Self::Committing => "committing",
            Self::Success => "success",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    SetInput,
    SubmitVerify,
    CompleteVerify,
    ProceedToVote,
    SelectChoice,
    Back,
    ConfirmVote,
    CompleteCommit,
}

impl Display for WorkflowEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SetInput => "enter identity",
            Self::SubmitVerify => "submit for verification",
            Self::CompleteVerify => "complete verification",
            Self::ProceedToVote => "proceed to vote",
            Self::SelectChoice => "select a choice",
            Self::Back => "go back",
            Self::ConfirmVote => "confirm vote",
            Self::CompleteCommit => "complete commit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("Consent to identity verification is required")]
    ConsentMissing,
    #[error(transparent)]
    InvalidFormat(#[from] InvalidFormat),
    #[error("This identity number is not eligible to vote")]
    NotEligible,
    #[error("A vote has already been recorded for this identity number")]
    AlreadyVoted,
    #[error("No choice has been selected")]
    NoSelection,
    #[error("Cannot {event} while in the {state} step")]
    InvalidTransition {
        state: WorkflowState,
        event: WorkflowEvent,
    },
}

/// What the session learned from the last eligibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub is_eligible: bool,
    pub has_voted: bool,
    pub message: String,
}

impl From<EligibilityOutcome> for EligibilityResult {
    fn from(outcome: EligibilityOutcome) -> Self {
        let (is_eligible, has_voted) = match outcome {
            EligibilityOutcome::Eligible => (true, false),
            EligibilityOutcome::AlreadyVoted => (true, true),
            EligibilityOutcome::NotEligible => (false, false),
        };
        Self {
            is_eligible,
            has_voted,
            message: outcome.message().to_string(),
        }
    }
}

/// One caller's progress through verification and voting.
///
/// The entered identity is kept only as long as the session and is wiped on
/// cancel or drop. It is never serialized; see [`SessionView`].
#[derive(Default)]
pub struct VerificationSession {
    identity: Option<Zeroizing<String>>,
    consent: bool,
    eligibility: Option<EligibilityResult>,
    selected: Option<ChoiceId>,
    state: WorkflowState,
}

/// The caller-visible part of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub state: WorkflowState,
    pub identity_entered: bool,
    pub consent_given: bool,
    pub eligibility: Option<EligibilityResult>,
    pub selected_choice: Option<ChoiceId>,
    /// Whether `proceed_to_vote` would currently succeed.
    pub can_cast: bool,
}

impl Debug for VerificationSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationSession")
            .field("identity", &self.identity.as_ref().map(|_| "<redacted>"))
            .field("consent", &self.consent)
            .field("eligibility", &self.eligibility)
            .field("selected", &self.selected)
            .field("state", &self.state)
            .finish()
    }
}

impl VerificationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn eligibility(&self) -> Option<&EligibilityResult> {
        self.eligibility.as_ref()
    }

    pub fn selected_choice(&self) -> Option<&ChoiceId> {
        self.selected.as_ref()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state,
            identity_entered: self.identity.is_some(),
            consent_given: self.consent,
            eligibility: self.eligibility.clone(),
            selected_choice: self.selected.clone(),
            can_cast: self.state == WorkflowState::Result && self.cast_available(),
        }
    }

    fn require(&self, state: WorkflowState, event: WorkflowEvent) -> Result<(), WorkflowError> {
        if self.state == state {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition {
                state: self.state,
                event,
            })
        }
    }

    fn cast_available(&self) -> bool {
        matches!(
            self.eligibility,
            Some(EligibilityResult {
                is_eligible: true,
                has_voted: false,
                ..
            })
        )
    }

    /// Record what the caller typed and whether they consented. Input only.
    pub fn set_input(
        &mut self,
        identity: impl Into<String>,
        consent: bool,
    ) -> Result<(), WorkflowError> {
        self.require(WorkflowState::Input, WorkflowEvent::SetInput)?;
        self.identity = Some(Zeroizing::new(identity.into()));
        self.consent = consent;
        Ok(())
    }

    /// Input -> Verifying.
    ///
    /// Consent is checked before format. On success returns a copy of the
    /// entered identity for the eligibility lookup, which must validate it
    /// again itself.
    pub fn submit_verify(&mut self) -> Result<Zeroizing<String>, WorkflowError> {
        self.require(WorkflowState::Input, WorkflowEvent::SubmitVerify)?;
        if !self.consent {
            return Err(WorkflowError::ConsentMissing);
        }
        let identity = self.identity.clone().ok_or(InvalidFormat)?;
        identity.parse::<IdentityNumber>()?;
        self.state = WorkflowState::Verifying;
        Ok(identity)
    }

    /// Verifying -> Result.
    pub fn complete_verify(&mut self, outcome: EligibilityOutcome) -> Result<(), WorkflowError> {
        self.require(WorkflowState::Verifying, WorkflowEvent::CompleteVerify)?;
        self.eligibility = Some(outcome.into());
        self.state = WorkflowState::Result;
        Ok(())
    }

    /// Verifying -> Input, keeping what was entered so the caller can retry.
    pub fn abort_verify(&mut self) -> Result<(), WorkflowError> {
        self.require(WorkflowState::Verifying, WorkflowEvent::CompleteVerify)?;
        self.state = WorkflowState::Input;
        Ok(())
    }

    /// Result -> Selecting, only for an eligible identity that has not voted.
    pub fn proceed_to_vote(&mut self) -> Result<(), WorkflowError> {
        self.require(WorkflowState::Result, WorkflowEvent::ProceedToVote)?;
        match &self.eligibility {
            Some(result) if !result.is_eligible => Err(WorkflowError::NotEligible),
            Some(result) if result.has_voted => Err(WorkflowError::AlreadyVoted),
            Some(_) => {
                self.state = WorkflowState::Selecting;
                Ok(())
            }
            None => Err(WorkflowError::InvalidTransition {
                state: self.state,
                event: WorkflowEvent::ProceedToVote,
            }),
        }
    }

    /// Choose (or change) the selection. Selecting only.
    pub fn select_choice(&mut self, choice: ChoiceId) -> Result<(), WorkflowError> {
        self.require(WorkflowState::Selecting, WorkflowEvent::SelectChoice)?;
        self.selected = Some(choice);
        Ok(())
    }

    /// Selecting -> Result.
    pub fn back(&mut self) -> Result<(), WorkflowError> {
        self.require(WorkflowState::Selecting, WorkflowEvent::Back)?;
        self.state = WorkflowState::Result;
        Ok(())
    }

    /// Selecting -> Committing.
    ///
    /// Re-checks the session's own view of `has_voted`. This is only a fast
    /// path; the ledger's atomic commit is what actually prevents double votes.
    pub fn confirm_vote(&mut self) -> Result<(Zeroizing<String>, ChoiceId), WorkflowError> {
        self.require(WorkflowState::Selecting, WorkflowEvent::ConfirmVote)?;
        let choice = self.selected.clone().ok_or(WorkflowError::NoSelection)?;
        if !self.cast_available() {
            return Err(WorkflowError::AlreadyVoted);
        }
        let identity = self.identity.clone().ok_or(InvalidFormat)?;
        self.state = WorkflowState::Committing;
        Ok((identity, choice))
    }

    /// Committing -> Success, or back to Result marked as already voted.
    pub fn complete_commit(&mut self, outcome: &CommitOutcome) -> Result<(), WorkflowError> {
        self.require(WorkflowState::Committing, WorkflowEvent::CompleteCommit)?;
        match outcome {
            CommitOutcome::Committed(_) => {
                self.state = WorkflowState::Success;
                // Nothing further needs the number.
                self.identity = None;
            }
            CommitOutcome::Rejected(_) => {
                let eligibility = self.eligibility.get_or_insert_with(|| {
                    EligibilityResult::from(EligibilityOutcome::AlreadyVoted)
                });
                eligibility.has_voted = true;
                eligibility.message = ALREADY_VOTED_MESSAGE.to_string();
                self.state = WorkflowState::Result;
            }
        }
        Ok(())
    }

    /// Committing -> Selecting, keeping the selection so the caller can retry.
    pub fn abort_commit(&mut self) -> Result<(), WorkflowError> {
        self.require(WorkflowState::Committing, WorkflowEvent::CompleteCommit)?;
        self.state = WorkflowState::Selecting;
        Ok(())
    }

    /// Any state -> Input, discarding everything entered or learned.
    pub fn cancel(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::model::{ballot::BallotRecord, identity::Fingerprinter, ledger::AlreadyCommitted};

    use super::*;

    const IDENTITY: &str = "123456789012";

    fn at_result(outcome: EligibilityOutcome) -> VerificationSession {
        let mut session = VerificationSession::new();
        session.set_input(IDENTITY, true).unwrap();
        session.submit_verify().unwrap();
        session.complete_verify(outcome).unwrap();
        session
    }

    fn at_committing() -> VerificationSession {
        let mut session = at_result(EligibilityOutcome::Eligible);
        session.proceed_to_vote().unwrap();
        session.select_choice(ChoiceId::from("bjp")).unwrap();
        session.confirm_vote().unwrap();
        session
    }

    fn fingerprint() -> crate::model::identity::Fingerprint {
        Fingerprinter::example().fingerprint(&IDENTITY.parse().unwrap())
    }

    #[test]
    fn happy_path() {
        let mut session = VerificationSession::new();
        assert_eq!(session.state(), WorkflowState::Input);

        session.set_input(IDENTITY, true).unwrap();
        let identity = session.submit_verify().unwrap();
        assert_eq!(identity.as_str(), IDENTITY);
        assert_eq!(session.state(), WorkflowState::Verifying);

        session.complete_verify(EligibilityOutcome::Eligible).unwrap();
        assert_eq!(session.state(), WorkflowState::Result);
        assert!(session.view().can_cast);

        session.proceed_to_vote().unwrap();
        assert_eq!(session.state(), WorkflowState::Selecting);

        session.select_choice(ChoiceId::from("bjp")).unwrap();
        let (identity, choice) = session.confirm_vote().unwrap();
        assert_eq!(identity.as_str(), IDENTITY);
        assert_eq!(choice, ChoiceId::from("bjp"));
        assert_eq!(session.state(), WorkflowState::Committing);

        let record = BallotRecord {
            fingerprint: fingerprint(),
            choice,
            committed_at: Utc::now(),
        };
        session
            .complete_commit(&CommitOutcome::Committed(record))
            .unwrap();
        assert_eq!(session.state(), WorkflowState::Success);
        assert!(!session.view().identity_entered);
    }

    #[test]
    fn consent_checked_before_format() {
        let mut session = VerificationSession::new();
        session.set_input("not a number", false).unwrap();
        assert_eq!(session.submit_verify(), Err(WorkflowError::ConsentMissing));
        assert_eq!(session.state(), WorkflowState::Input);

        let mut session = VerificationSession::new();
        session.set_input(IDENTITY, false).unwrap();
        assert_eq!(session.submit_verify(), Err(WorkflowError::ConsentMissing));
        assert_eq!(session.state(), WorkflowState::Input);
    }

    #[test]
    fn bad_format_does_not_advance() {
        for bad in ["", "12345678901", "1234567890123", "12345678901x"] {
            let mut session = VerificationSession::new();
            session.set_input(bad, true).unwrap();
            assert_eq!(
                session.submit_verify(),
                Err(WorkflowError::InvalidFormat(InvalidFormat))
            );
            assert_eq!(session.state(), WorkflowState::Input);
        }

        // Nothing entered at all.
        let mut session = VerificationSession::new();
        assert_eq!(session.submit_verify(), Err(WorkflowError::ConsentMissing));
    }

    #[test]
    fn cannot_proceed_unless_eligible_and_unvoted() {
        let mut session = at_result(EligibilityOutcome::NotEligible);
        assert!(!session.view().can_cast);
        assert_eq!(session.proceed_to_vote(), Err(WorkflowError::NotEligible));
        assert_eq!(session.state(), WorkflowState::Result);

        let mut session = at_result(EligibilityOutcome::AlreadyVoted);
        assert!(!session.view().can_cast);
        assert_eq!(session.proceed_to_vote(), Err(WorkflowError::AlreadyVoted));
        assert_eq!(session.state(), WorkflowState::Result);
    }

    #[test]
    fn confirm_requires_selection() {
        let mut session = at_result(EligibilityOutcome::Eligible);
        session.proceed_to_vote().unwrap();
        assert_eq!(session.confirm_vote(), Err(WorkflowError::NoSelection));
        assert_eq!(session.state(), WorkflowState::Selecting);
    }

    #[test]
    fn back_keeps_result_and_selection() {
        let mut session = at_result(EligibilityOutcome::Eligible);
        session.proceed_to_vote().unwrap();
        session.select_choice(ChoiceId::from("inc")).unwrap();
        session.back().unwrap();
        assert_eq!(session.state(), WorkflowState::Result);
        assert!(session.eligibility().unwrap().is_eligible);

        session.proceed_to_vote().unwrap();
        assert_eq!(session.selected_choice(), Some(&ChoiceId::from("inc")));
    }

    #[test]
    fn rejected_commit_returns_to_result_as_voted() {
        let mut session = at_committing();
        let rejected = CommitOutcome::Rejected(AlreadyCommitted {
            fingerprint: fingerprint(),
        });
        session.complete_commit(&rejected).unwrap();

        assert_eq!(session.state(), WorkflowState::Result);
        let eligibility = session.eligibility().unwrap();
        assert!(eligibility.has_voted);
        assert_eq!(eligibility.message, ALREADY_VOTED_MESSAGE);
        assert_eq!(session.proceed_to_vote(), Err(WorkflowError::AlreadyVoted));
    }

    #[test]
    fn aborted_steps_return_to_interactive_state() {
        let mut session = VerificationSession::new();
        session.set_input(IDENTITY, true).unwrap();
        session.submit_verify().unwrap();
        session.abort_verify().unwrap();
        assert_eq!(session.state(), WorkflowState::Input);
        // Still retryable without re-entering anything.
        session.submit_verify().unwrap();

        let mut session = at_committing();
        session.abort_commit().unwrap();
        assert_eq!(session.state(), WorkflowState::Selecting);
        assert_eq!(session.selected_choice(), Some(&ChoiceId::from("bjp")));
        session.confirm_vote().unwrap();
    }

    #[test]
    fn cancel_resets_from_every_state() {
        let mut sessions = vec![VerificationSession::new()];
        let mut s = VerificationSession::new();
        s.set_input(IDENTITY, true).unwrap();
        s.submit_verify().unwrap();
        sessions.push(s);
        sessions.push(at_result(EligibilityOutcome::Eligible));
        let mut s = at_result(EligibilityOutcome::Eligible);
        s.proceed_to_vote().unwrap();
        s.select_choice(ChoiceId::from("bjp")).unwrap();
        sessions.push(s);
        sessions.push(at_committing());

        for mut session in sessions {
            session.cancel();
            let view = session.view();
            assert_eq!(view.state, WorkflowState::Input);
            assert!(!view.identity_entered);
            assert!(!view.consent_given);
            assert_eq!(view.eligibility, None);
            assert_eq!(view.selected_choice, None);
        }
    }

    #[test]
    fn out_of_order_events_are_rejected_without_change() {
        let mut session = VerificationSession::new();
        assert_eq!(
            session.proceed_to_vote(),
            Err(WorkflowError::InvalidTransition {
                state: WorkflowState::Input,
                event: WorkflowEvent::ProceedToVote,
            })
        );
        assert!(session.select_choice(ChoiceId::from("bjp")).is_err());
        assert!(session.confirm_vote().is_err());
        assert!(session.back().is_err());
        assert!(session.complete_verify(EligibilityOutcome::Eligible).is_err());
        assert_eq!(session.state(), WorkflowState::Input);

        // Cannot skip from Result straight to committing.
        let mut session = at_result(EligibilityOutcome::Eligible);
        assert!(session.confirm_vote().is_err());
        // Cannot edit the identity once it has been verified.
        assert!(session.set_input("234567890123", true).is_err());
        assert_eq!(session.state(), WorkflowState::Result);
    }

    #[test]
    fn view_never_contains_identity() {
        let session = at_result(EligibilityOutcome::Eligible);
        let json = rocket::serde::json::serde_json::to_string(&session.view()).unwrap();
        assert!(!json.contains(IDENTITY));
    }
}
