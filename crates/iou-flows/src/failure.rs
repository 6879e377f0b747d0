//! Run outcomes and operational failures.

use std::time::Duration;

use iou_contract::{CommittedTransition, Rejection, StateRef};

use crate::collaborators::{CollaboratorError, ConflictInfo};
use crate::initiator::TransitionError;

// ---------------------------------------------------------------------------
// FlowFailure
// ---------------------------------------------------------------------------

/// Operational failure of one run. Disjoint from a business [`Rejection`]:
/// nothing was committed, so the caller may start a fresh run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowFailure {
    /// The previous version was consumed by another transition first.
    /// Refetch, rebuild and retry.
    Conflict(ConflictInfo),
    /// A counter-party holds a newer version than the one the proposal
    /// consumes. Refetch, rebuild and retry.
    StalePrevious { party: String, current: StateRef },
    /// A collaborator (ledger, transport, finality, signer) failed.
    Collaborator(CollaboratorError),
    /// A counter-party could not evaluate the request.
    CounterpartyUnavailable { party: String, reason: String },
    /// A counter-party returned a signature that does not verify, or is not
    /// by the key it was asked for.
    InvalidCounterSignature { party: String },
    /// Required signer keys with no party to ask.
    IncompleteSignatures { missing: usize },
    /// Caller-imposed deadline elapsed.
    Timeout { after: Duration },
    /// The driver fed the state machine an event it cannot accept.
    IllegalTransition(TransitionError),
}

impl FlowFailure {
    /// Lost a race for the previous version, at finality or at a
    /// counter-party.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            FlowFailure::Conflict(_) | FlowFailure::StalePrevious { .. }
        )
    }

    /// Every failure except an internal state-machine fault may be retried
    /// from a fresh lookup.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FlowFailure::IllegalTransition(_))
    }
}

impl std::fmt::Display for FlowFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowFailure::Conflict(c) => write!(f, "FAILED[CONFLICT]: {c}"),
            FlowFailure::StalePrevious { party, current } => {
                write!(f, "FAILED[STALE]: {party} already holds version {current}")
            }
            FlowFailure::Collaborator(e) => write!(f, "FAILED[COLLABORATOR]: {e}"),
            FlowFailure::CounterpartyUnavailable { party, reason } => {
                write!(f, "FAILED[UNAVAILABLE]: {party}: {reason}")
            }
            FlowFailure::InvalidCounterSignature { party } => {
                write!(f, "FAILED[BAD_SIGNATURE]: invalid signature from {party}")
            }
            FlowFailure::IncompleteSignatures { missing } => {
                write!(f, "FAILED[INCOMPLETE]: {missing} required signer(s) cannot be reached")
            }
            FlowFailure::Timeout { after } => {
                write!(f, "FAILED[TIMEOUT]: run exceeded {}ms", after.as_millis())
            }
            FlowFailure::IllegalTransition(e) => write!(f, "FAILED[INTERNAL]: {e}"),
        }
    }
}

impl std::error::Error for FlowFailure {}

impl From<CollaboratorError> for FlowFailure {
    fn from(e: CollaboratorError) -> Self {
        FlowFailure::Collaborator(e)
    }
}

// ---------------------------------------------------------------------------
// FlowOutcome
// ---------------------------------------------------------------------------

/// How one initiator run resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Committed(CommittedTransition),
    Rejected(Rejection),
    Failed(FlowFailure),
}

impl FlowOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, FlowOutcome::Committed(_))
    }

    pub fn committed(&self) -> Option<&CommittedTransition> {
        match self {
            FlowOutcome::Committed(tx) => Some(tx),
            _ => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            FlowOutcome::Rejected(r) => Some(r),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FlowFailure> {
        match self {
            FlowOutcome::Failed(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowOutcome::Committed(_) => "COMMITTED",
            FlowOutcome::Rejected(_) => "REJECTED",
            FlowOutcome::Failed(_) => "FAILED",
        }
    }
}
