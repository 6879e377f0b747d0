//! Transition rules shared by every party.
//!
//! [`validate`] is pure and deterministic: each party runs it independently
//! against its own copy of the previous version, and all of them must reach
//! the same verdict from the same inputs.

use std::collections::BTreeSet;

use crate::reject::{ensure, RejectCode, Rejection, Verdict};
use crate::types::{Command, IouState, OwningKey, Proposal};

/// Check a proposed transition against the rule set selected by `command`.
///
/// `signers` is the set of keys the proposal declares as required; the rules
/// check it covers everyone who must consent. Whether those keys actually
/// signed is checked separately by the signing service.
pub fn validate(
    command: Command,
    previous: Option<&IouState>,
    candidate: &IouState,
    signers: &BTreeSet<OwningKey>,
) -> Verdict {
    match command {
        Command::Create => verify_create(previous, candidate, signers),
        Command::Pay => verify_pay(previous, candidate, signers),
        Command::Transfer => verify_transfer(previous, candidate, signers),
    }
}

/// [`validate`] applied to a whole proposal.
pub fn validate_proposal(proposal: &Proposal) -> Verdict {
    validate(
        proposal.command,
        proposal.previous_state(),
        &proposal.candidate,
        &proposal.signers,
    )
}

/// Invariants every accepted version must satisfy.
pub fn check_invariants(state: &IouState) -> Verdict {
    ensure(state.lender != state.borrower, RejectCode::SameParty)?;
    ensure(state.principal > 0, RejectCode::NonPositivePrincipal)?;
    ensure(state.paid >= 0, RejectCode::NegativePaid)?;
    ensure(state.paid <= state.principal, RejectCode::Overpaid)
}

fn verify_create(
    previous: Option<&IouState>,
    candidate: &IouState,
    signers: &BTreeSet<OwningKey>,
) -> Verdict {
    ensure(previous.is_none(), RejectCode::UnexpectedPrevious)?;
    ensure(candidate.lender != candidate.borrower, RejectCode::SameParty)?;
    ensure(
        signers.is_superset(&candidate.participant_keys()),
        RejectCode::MissingSigners,
    )?;
    if candidate.principal <= 0 {
        return Err(Rejection::with_detail(
            RejectCode::NonPositivePrincipal,
            format!("principal={}", candidate.principal),
        ));
    }
    ensure(candidate.paid == 0, RejectCode::NonZeroInitialPayment)?;
    check_invariants(candidate)
}

fn verify_pay(
    previous: Option<&IouState>,
    candidate: &IouState,
    signers: &BTreeSet<OwningKey>,
) -> Verdict {
    let prev = previous.ok_or_else(|| Rejection::new(RejectCode::MissingPrevious))?;
    ensure(
        prev.linear_id == candidate.linear_id,
        RejectCode::IdentifierChanged,
    )?;
    ensure(
        signers.is_superset(&candidate.participant_keys()),
        RejectCode::MissingSigners,
    )?;
    if candidate.paid <= prev.paid {
        return Err(Rejection::with_detail(
            RejectCode::PaidNotIncreasing,
            format!("previous={} candidate={}", prev.paid, candidate.paid),
        ));
    }
    if candidate.paid > candidate.principal {
        return Err(Rejection::with_detail(
            RejectCode::Overpaid,
            format!("paid={} principal={}", candidate.paid, candidate.principal),
        ));
    }
    ensure(
        prev.lender == candidate.lender
            && prev.borrower == candidate.borrower
            && prev.principal == candidate.principal,
        RejectCode::PaymentChangedTerms,
    )?;
    check_invariants(candidate)
}

fn verify_transfer(
    previous: Option<&IouState>,
    candidate: &IouState,
    signers: &BTreeSet<OwningKey>,
) -> Verdict {
    let prev = previous.ok_or_else(|| Rejection::new(RejectCode::MissingPrevious))?;
    ensure(
        prev.linear_id == candidate.linear_id,
        RejectCode::IdentifierChanged,
    )?;
    ensure(
        prev.paid == candidate.paid
            && prev.principal == candidate.principal
            && prev.borrower == candidate.borrower,
        RejectCode::TransferChangedTerms,
    )?;
    ensure(
        prev.lender != candidate.lender,
        RejectCode::TransferToCurrentLender,
    )?;

    let mut required = candidate.participant_keys();
    required.insert(prev.lender.owning_key);
    ensure(signers.is_superset(&required), RejectCode::MissingSigners)?;

    check_invariants(candidate)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
