//! Instrument data model: parties, versions, proposals and commitments.
//!
//! Every type here is plain data. Nothing performs I/O; the only computation
//! is the deterministic [`Proposal::id`] digest that all parties sign.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// Ed25519 public key that must sign on behalf of a party.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwningKey(#[serde(with = "hex")] pub [u8; 32]);

impl OwningKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for OwningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for OwningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwningKey({}…)", &hex::encode(self.0)[..12])
    }
}

/// A ledger participant: a display name bound to the key that signs for it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub owning_key: OwningKey,
}

impl Party {
    pub fn new(name: impl Into<String>, owning_key: OwningKey) -> Self {
        Self {
            name: name.into(),
            owning_key,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Identifier shared by every version of one instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinearId(pub Uuid);

impl LinearId {
    /// Fresh random identifier, assigned once at issuance.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LinearId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LinearId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// IouState
// ---------------------------------------------------------------------------

/// One immutable version of an IOU.
///
/// Amounts are integer units; `principal` is fixed at issuance and `paid`
/// only ever grows. Invariants are enforced by the transition rules, not by
/// construction, so that invalid candidates can be expressed and rejected.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IouState {
    pub linear_id: LinearId,
    pub lender: Party,
    pub borrower: Party,
    pub principal: i64,
    pub paid: i64,
}

impl IouState {
    /// First version of a new instrument: fresh id, nothing paid.
    pub fn issue(lender: Party, borrower: Party, principal: i64) -> Self {
        Self {
            linear_id: LinearId::new(),
            lender,
            borrower,
            principal,
            paid: 0,
        }
    }

    /// `[lender, borrower]`.
    pub fn participants(&self) -> [&Party; 2] {
        [&self.lender, &self.borrower]
    }

    pub fn participant_keys(&self) -> BTreeSet<OwningKey> {
        self.participants().iter().map(|p| p.owning_key).collect()
    }

    pub fn is_participant(&self, party: &Party) -> bool {
        self.participants().contains(&party)
    }

    /// Debt still owed (`principal - paid`).
    pub fn outstanding(&self) -> i64 {
        self.principal - self.paid
    }

    pub fn is_settled(&self) -> bool {
        self.paid == self.principal
    }

    pub fn with_paid(&self, paid: i64) -> Self {
        Self {
            paid,
            ..self.clone()
        }
    }

    pub fn with_lender(&self, lender: Party) -> Self {
        Self {
            lender,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Intended effect of a transition; selects the rule set that applies.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Create,
    Pay,
    Transfer,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Create => "CREATE",
            Command::Pay => "PAY",
            Command::Transfer => "TRANSFER",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// SHA-256 digest of a proposal. Signed by every party and used as the
/// transaction id of the version it produces.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalId(#[serde(with = "hex")] pub [u8; 32]);

impl ProposalId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProposalId({}…)", self.short())
    }
}

/// Names one version of an instrument: the instrument plus the transition
/// that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateRef {
    pub linear_id: LinearId,
    pub tx: ProposalId,
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.linear_id, self.tx.short())
    }
}

/// A version as held in a ledger view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedState {
    pub state: IouState,
    pub state_ref: StateRef,
}

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

/// Candidate transition for one protocol run. Never persisted.
///
/// `previous` travels with the proposal so that a party which has never seen
/// the instrument (an incoming lender) can evaluate it; parties that do track
/// the instrument compare `previous.state_ref` against their own view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub command: Command,
    pub previous: Option<RecordedState>,
    pub candidate: IouState,
    /// Keys that must sign before the transition can be finalised.
    pub signers: BTreeSet<OwningKey>,
}

impl Proposal {
    /// Deterministic digest over every field of the proposal.
    ///
    /// Encoding: command tag, optional previous (ref + state), candidate,
    /// then signer keys in sorted order. Strings are length-prefixed.
    pub fn id(&self) -> ProposalId {
        let mut h = Sha256::new();
        h.update(b"iou-proposal/v1");
        h.update(self.command.as_str().as_bytes());
        match &self.previous {
            Some(prev) => {
                h.update([1u8]);
                h.update(prev.state_ref.linear_id.0.as_bytes());
                h.update(prev.state_ref.tx.0);
                digest_state(&mut h, &prev.state);
            }
            None => h.update([0u8]),
        }
        digest_state(&mut h, &self.candidate);
        h.update((self.signers.len() as u64).to_be_bytes());
        for key in &self.signers {
            h.update(key.0);
        }
        ProposalId(h.finalize().into())
    }

    pub fn previous_ref(&self) -> Option<&StateRef> {
        self.previous.as_ref().map(|p| &p.state_ref)
    }

    pub fn previous_state(&self) -> Option<&IouState> {
        self.previous.as_ref().map(|p| &p.state)
    }

    /// The version this proposal produces once committed.
    pub fn output(&self) -> RecordedState {
        RecordedState {
            state: self.candidate.clone(),
            state_ref: StateRef {
                linear_id: self.candidate.linear_id,
                tx: self.id(),
            },
        }
    }

    /// Parties from the previous and candidate versions whose key is a
    /// required signer, deduplicated by key.
    pub fn signing_parties(&self) -> Vec<Party> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let prev = self.previous_state().map(|s| s.participants());
        let candidates = self
            .candidate
            .participants()
            .into_iter()
            .chain(prev.into_iter().flatten());
        for party in candidates {
            if self.signers.contains(&party.owning_key) && seen.insert(party.owning_key) {
                out.push(party.clone());
            }
        }
        out
    }
}

fn digest_state(h: &mut Sha256, s: &IouState) {
    h.update(s.linear_id.0.as_bytes());
    digest_party(h, &s.lender);
    digest_party(h, &s.borrower);
    h.update(s.principal.to_be_bytes());
    h.update(s.paid.to_be_bytes());
}

fn digest_party(h: &mut Sha256, p: &Party) {
    h.update((p.name.len() as u64).to_be_bytes());
    h.update(p.name.as_bytes());
    h.update(p.owning_key.0);
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// A signature over a [`ProposalId`], tagged with the key that made it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySignature {
    pub by: OwningKey,
    #[serde(with = "hex")]
    pub bytes: Vec<u8>,
}

/// A proposal together with the signatures gathered so far.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    pub proposal: Proposal,
    pub signatures: Vec<PartySignature>,
}

impl SignedProposal {
    pub fn new(proposal: Proposal) -> Self {
        Self {
            proposal,
            signatures: Vec::new(),
        }
    }

    pub fn id(&self) -> ProposalId {
        self.proposal.id()
    }

    pub fn signed_by(&self) -> BTreeSet<OwningKey> {
        self.signatures.iter().map(|s| s.by).collect()
    }

    /// Required signer keys that have not signed yet.
    pub fn missing_signers(&self) -> BTreeSet<OwningKey> {
        let signed = self.signed_by();
        self.proposal
            .signers
            .difference(&signed)
            .copied()
            .collect()
    }

    /// Adds a signature, replacing any earlier one by the same key.
    pub fn add_signature(&mut self, sig: PartySignature) {
        self.signatures.retain(|s| s.by != sig.by);
        self.signatures.push(sig);
    }
}

// ---------------------------------------------------------------------------
// CommittedTransition
// ---------------------------------------------------------------------------

/// A transition acknowledged by the finality service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedTransition {
    pub proposal_id: ProposalId,
    pub command: Command,
    /// The version this transition consumed (`None` for Create).
    pub consumed: Option<RecordedState>,
    pub output: RecordedState,
    pub signatures: Vec<PartySignature>,
    pub committed_at: DateTime<Utc>,
}

impl CommittedTransition {
    /// Build the committed record for a fully signed proposal.
    pub fn from_signed(signed: &SignedProposal, committed_at: DateTime<Utc>) -> Self {
        let proposal = &signed.proposal;
        Self {
            proposal_id: proposal.id(),
            command: proposal.command,
            consumed: proposal.previous.clone(),
            output: proposal.output(),
            signatures: signed.signatures.clone(),
            committed_at,
        }
    }

    pub fn linear_id(&self) -> LinearId {
        self.output.state.linear_id
    }

    /// Every party named by the consumed or the produced version.
    pub fn involved_parties(&self) -> Vec<Party> {
        let mut seen = BTreeSet::new();
        let consumed = self.consumed.as_ref().map(|c| c.state.participants());
        self.output
            .state
            .participants()
            .into_iter()
            .chain(consumed.into_iter().flatten())
            .filter(|p| seen.insert(p.owning_key))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
