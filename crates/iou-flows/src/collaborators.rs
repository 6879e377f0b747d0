//! Collaborator interfaces consumed by the flows.
//!
//! Storage, transport, finality and key material all live behind these
//! traits. The flows never reach past them; tests and the testkit provide
//! in-memory implementations.

use std::collections::BTreeSet;

use async_trait::async_trait;
use iou_contract::{
    CommittedTransition, LinearId, OwningKey, Party, PartySignature, ProposalId, RecordedState,
    Rejection, SignedProposal, StateRef,
};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CollaboratorError
// ---------------------------------------------------------------------------

/// Infrastructure failure reported by a collaborator.
///
/// Never a business verdict: a run that hits one of these ends `Failed`, and
/// the caller may start a fresh run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// No session could be opened to the party.
    Unreachable { party: String },
    /// The session dropped before a reply arrived.
    Disconnected { party: String },
    Ledger(String),
    Finality(String),
    Signing(String),
}

impl std::fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollaboratorError::Unreachable { party } => {
                write!(f, "COLLABORATOR: party {party} unreachable")
            }
            CollaboratorError::Disconnected { party } => {
                write!(f, "COLLABORATOR: session with {party} disconnected")
            }
            CollaboratorError::Ledger(msg) => write!(f, "COLLABORATOR: ledger error: {msg}"),
            CollaboratorError::Finality(msg) => write!(f, "COLLABORATOR: finality error: {msg}"),
            CollaboratorError::Signing(msg) => write!(f, "COLLABORATOR: signing error: {msg}"),
        }
    }
}

impl std::error::Error for CollaboratorError {}

// ---------------------------------------------------------------------------
// Ledger lookup
// ---------------------------------------------------------------------------

/// One party's private view of the ledger.
#[async_trait]
pub trait LedgerView: Send + Sync {
    /// Current (unconsumed) version of the instrument, if this view tracks it.
    async fn fetch_current(&self, id: LinearId) -> Result<Option<RecordedState>, CollaboratorError>;

    /// Apply a committed transition. Must be idempotent per proposal id.
    async fn record_committed(&self, tx: &CommittedTransition) -> Result<(), CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Transport / session
// ---------------------------------------------------------------------------

/// Session message sent from the initiator to each counter-party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub from: Party,
    pub signed: SignedProposal,
}

/// A counter-party's answer to a [`SignatureRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcceptorReply {
    Signed(PartySignature),
    Rejected(Rejection),
    /// The counter-party could not evaluate the request (its own collaborator
    /// failed). Operational, not a verdict.
    Unavailable { reason: String },
    /// The proposal consumes a version the counter-party has already seen
    /// superseded. `current` is the version in its view.
    Stale { current: StateRef },
}

#[async_trait]
pub trait CounterpartyTransport: Send + Sync {
    /// Deliver `request` to `to` and wait for its reply.
    async fn send(
        &self,
        to: &Party,
        request: SignatureRequest,
    ) -> Result<AcceptorReply, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Finality
// ---------------------------------------------------------------------------

/// Why the finality service refused a fully signed proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub linear_id: LinearId,
    /// The version both proposals tried to consume (`None` for a duplicate Create).
    pub consumed: Option<StateRef>,
    /// The transition that got there first.
    pub winner: ProposalId,
}

impl std::fmt::Display for ConflictInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.consumed {
            Some(r) => write!(f, "version {r} already consumed by {}", self.winner.short()),
            None => write!(
                f,
                "instrument {} already issued by {}",
                self.linear_id,
                self.winner.short()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalityOutcome {
    Committed(CommittedTransition),
    Conflict(ConflictInfo),
}

/// Global uniqueness and durable commitment.
///
/// Implementations guarantee at most one committed successor per version.
#[async_trait]
pub trait FinalityService: Send + Sync {
    async fn commit(&self, signed: &SignedProposal) -> Result<FinalityOutcome, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// Key material for one party plus signature verification.
pub trait SigningService: Send + Sync {
    /// Public key this service signs with.
    fn owning_key(&self) -> OwningKey;

    fn sign(&self, id: &ProposalId) -> Result<PartySignature, CollaboratorError>;

    /// `true` iff `sig` is a valid signature over `id` by `sig.by`.
    fn verify(&self, id: &ProposalId, sig: &PartySignature) -> bool;

    /// `true` iff every key in `required` has a valid signature in `signatures`.
    fn verify_signatures(
        &self,
        id: &ProposalId,
        signatures: &[PartySignature],
        required: &BTreeSet<OwningKey>,
    ) -> bool {
        required.iter().all(|key| {
            signatures
                .iter()
                .any(|s| &s.by == key && self.verify(id, s))
        })
    }
}
