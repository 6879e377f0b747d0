//! Initiator state machine.
//!
//! One machine per run. The async driver in [`super::flow`] performs the I/O
//! for the current state and feeds the result back through
//! [`InitiatorMachine::apply`]; tests drive the same machine by hand.
//!
//! ```text
//!   Building ──Built(ok)──► LocallyValidated ──SelfSigned──► AwaitingCounterSignatures
//!      │  └─Built(invalid)/BuildRejected──► Rejected            │        │
//!      │                                                       │   CounterpartyRejected ──► Rejected
//!      │                                   CounterSigned (last)│
//!      │                                                       ▼
//!      │                                              AwaitingFinality ──Finalised──► Committed
//!      │                                                       └──FinalityConflict──► Failed
//!      └──────── OperationalFailure (any live state) ─────────────────────────────► Failed
//! ```
//!
//! Validation happens on entry to `LocallyValidated`, so a proposal can only
//! be signed after it passed the local rules, and can only reach finality
//! once every required signature is present.

use iou_contract::{
    validate_proposal, CommittedTransition, OwningKey, PartySignature, Proposal, Rejection,
    SignedProposal,
};

use crate::collaborators::ConflictInfo;
use crate::failure::{FlowFailure, FlowOutcome};

// ---------------------------------------------------------------------------
// InitiatorPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitiatorPhase {
    Building,
    LocallyValidated,
    AwaitingCounterSignatures,
    AwaitingFinality,
    Committed,
    Rejected,
    Failed,
}

impl InitiatorPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Rejected | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "BUILDING",
            Self::LocallyValidated => "LOCALLY_VALIDATED",
            Self::AwaitingCounterSignatures => "AWAITING_COUNTER_SIGNATURES",
            Self::AwaitingFinality => "AWAITING_FINALITY",
            Self::Committed => "COMMITTED",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
        }
    }
}

// ---------------------------------------------------------------------------
// InitiatorState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiatorState {
    Building,
    LocallyValidated { proposal: Proposal },
    AwaitingCounterSignatures { signed: SignedProposal },
    AwaitingFinality { signed: SignedProposal },
    Committed { tx: CommittedTransition },
    Rejected { rejection: Rejection },
    Failed { failure: FlowFailure },
}

impl InitiatorState {
    pub fn phase(&self) -> InitiatorPhase {
        match self {
            Self::Building => InitiatorPhase::Building,
            Self::LocallyValidated { .. } => InitiatorPhase::LocallyValidated,
            Self::AwaitingCounterSignatures { .. } => InitiatorPhase::AwaitingCounterSignatures,
            Self::AwaitingFinality { .. } => InitiatorPhase::AwaitingFinality,
            Self::Committed { .. } => InitiatorPhase::Committed,
            Self::Rejected { .. } => InitiatorPhase::Rejected,
            Self::Failed { .. } => InitiatorPhase::Failed,
        }
    }
}

// ---------------------------------------------------------------------------
// InitiatorEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiatorEvent {
    /// The builder produced a proposal; the machine validates it on entry.
    Built(Proposal),
    /// The builder refused (authorization, unknown instrument, bad amount).
    BuildRejected(Rejection),
    /// The initiator's own signature over the proposal id.
    SelfSigned(PartySignature),
    CounterSigned(PartySignature),
    CounterpartyRejected { party: String, rejection: Rejection },
    Finalised(CommittedTransition),
    FinalityConflict(ConflictInfo),
    OperationalFailure(FlowFailure),
}

impl InitiatorEvent {
    fn label(&self) -> &'static str {
        match self {
            Self::Built(_) => "Built",
            Self::BuildRejected(_) => "BuildRejected",
            Self::SelfSigned(_) => "SelfSigned",
            Self::CounterSigned(_) => "CounterSigned",
            Self::CounterpartyRejected { .. } => "CounterpartyRejected",
            Self::Finalised(_) => "Finalised",
            Self::FinalityConflict(_) => "FinalityConflict",
            Self::OperationalFailure(_) => "OperationalFailure",
        }
    }
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// An event arrived in a state that cannot accept it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: InitiatorPhase,
    pub event: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal initiator transition: {} + {}",
            self.from.as_str(),
            self.event
        )
    }
}

impl std::error::Error for TransitionError {}

// ---------------------------------------------------------------------------
// InitiatorMachine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct InitiatorMachine {
    initiator_key: OwningKey,
    state: InitiatorState,
}

impl InitiatorMachine {
    pub fn new(initiator_key: OwningKey) -> Self {
        Self {
            initiator_key,
            state: InitiatorState::Building,
        }
    }

    pub fn state(&self) -> &InitiatorState {
        &self.state
    }

    pub fn phase(&self) -> InitiatorPhase {
        self.state.phase()
    }

    /// The resolved outcome, once the machine is in a terminal state.
    pub fn outcome(&self) -> Option<FlowOutcome> {
        match &self.state {
            InitiatorState::Committed { tx } => Some(FlowOutcome::Committed(tx.clone())),
            InitiatorState::Rejected { rejection } => {
                Some(FlowOutcome::Rejected(rejection.clone()))
            }
            InitiatorState::Failed { failure } => Some(FlowOutcome::Failed(failure.clone())),
            _ => None,
        }
    }

    /// Apply one event.
    ///
    /// # Errors
    /// [`TransitionError`] when the event is not legal in the current state.
    /// The state is left unchanged in that case.
    pub fn apply(&mut self, event: InitiatorEvent) -> Result<(), TransitionError> {
        use InitiatorEvent as E;
        use InitiatorState as S;

        let from = self.phase();
        let label = event.label();
        let current = std::mem::replace(&mut self.state, S::Building);

        let next = match (current, event) {
            // --------------------------------------------------------------
            // Building
            // --------------------------------------------------------------
            (S::Building, E::Built(proposal)) => match validate_proposal(&proposal) {
                Ok(()) => S::LocallyValidated { proposal },
                Err(rejection) => S::Rejected { rejection },
            },
            (S::Building, E::BuildRejected(rejection)) => S::Rejected { rejection },

            // --------------------------------------------------------------
            // LocallyValidated: only the initiator's own key may sign here.
            // --------------------------------------------------------------
            (S::LocallyValidated { proposal }, E::SelfSigned(sig))
                if sig.by == self.initiator_key =>
            {
                let mut signed = SignedProposal::new(proposal);
                signed.add_signature(sig);
                if signed.missing_signers().is_empty() {
                    S::AwaitingFinality { signed }
                } else {
                    S::AwaitingCounterSignatures { signed }
                }
            }

            // --------------------------------------------------------------
            // AwaitingCounterSignatures
            // --------------------------------------------------------------
            (S::AwaitingCounterSignatures { mut signed }, E::CounterSigned(sig)) => {
                if !signed.proposal.signers.contains(&sig.by) {
                    S::Failed {
                        failure: FlowFailure::InvalidCounterSignature {
                            party: sig.by.to_string(),
                        },
                    }
                } else {
                    signed.add_signature(sig);
                    if signed.missing_signers().is_empty() {
                        S::AwaitingFinality { signed }
                    } else {
                        S::AwaitingCounterSignatures { signed }
                    }
                }
            }
            (S::AwaitingCounterSignatures { .. }, E::CounterpartyRejected { rejection, .. }) => {
                S::Rejected { rejection }
            }

            // --------------------------------------------------------------
            // AwaitingFinality
            // --------------------------------------------------------------
            (S::AwaitingFinality { .. }, E::Finalised(tx)) => S::Committed { tx },
            (S::AwaitingFinality { .. }, E::FinalityConflict(conflict)) => S::Failed {
                failure: FlowFailure::Conflict(conflict),
            },

            // --------------------------------------------------------------
            // Operational failure from any live state.
            // --------------------------------------------------------------
            (
                S::Building
                | S::LocallyValidated { .. }
                | S::AwaitingCounterSignatures { .. }
                | S::AwaitingFinality { .. },
                E::OperationalFailure(failure),
            ) => S::Failed { failure },

            // --------------------------------------------------------------
            // Everything else is illegal; restore and report.
            // --------------------------------------------------------------
            (state, _) => {
                self.state = state;
                return Err(TransitionError {
                    from,
                    event: label.to_string(),
                });
            }
        };

        self.state = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
