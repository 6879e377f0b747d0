//! iou-contract
//!
//! Bilateral IOU instrument: data model, transition rules and the
//! role-specific acceptance rules a counter-party applies before signing.
//!
//! - `validate` is the rule set every party runs on every proposal
//! - `check_acceptance` layers per-role business rules on top
//! - `Proposal::id` is the digest all parties sign
//!
//! Deterministic, pure logic. No IO, no clocks except the caller-supplied
//! `committed_at`, no network.

mod acceptance;
mod reject;
mod types;
mod verify;

pub use acceptance::{
    check_acceptance, check_create_acceptance, check_payment_acceptance,
    check_transfer_acceptance, meets_half_minimum, AcceptancePolicy,
    DEFAULT_TRANSFER_DEBT_CEILING,
};
pub use reject::{RejectCode, Rejection, Verdict};
pub use types::{
    Command, CommittedTransition, IouState, LinearId, OwningKey, Party, PartySignature, Proposal,
    ProposalId, RecordedState, SignedProposal, StateRef,
};
pub use verify::{check_invariants, validate, validate_proposal};
