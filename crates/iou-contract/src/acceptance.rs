//! Role-specific acceptance rules.
//!
//! These are not part of the shared transition rules: each counter-party
//! applies them for its own role, on top of [`crate::validate`], before it
//! agrees to sign.

use serde::{Deserialize, Serialize};

use crate::reject::{ensure, RejectCode, Rejection, Verdict};
use crate::types::{Command, IouState, Party};

/// Outstanding debt must be strictly below this for a transfer to be accepted.
pub const DEFAULT_TRANSFER_DEBT_CEILING: i64 = 100;

/// Per-node acceptance settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptancePolicy {
    pub transfer_debt_ceiling: i64,
}

impl Default for AcceptancePolicy {
    fn default() -> Self {
        Self {
            transfer_debt_ceiling: DEFAULT_TRANSFER_DEBT_CEILING,
        }
    }
}

/// Dispatch to the role rule for `command`.
///
/// `own_previous` is the previous version from the acceptor's *own* ledger
/// view, or `None` when the acceptor does not track the instrument.
pub fn check_acceptance(
    command: Command,
    me: &Party,
    own_previous: Option<&IouState>,
    candidate: &IouState,
    policy: &AcceptancePolicy,
) -> Verdict {
    match command {
        Command::Create => check_create_acceptance(me, own_previous, candidate),
        Command::Pay => {
            let prev =
                own_previous.ok_or_else(|| Rejection::new(RejectCode::UnknownInstrument))?;
            check_payment_acceptance(me, prev, candidate)
        }
        Command::Transfer => check_transfer_acceptance(me, own_previous, candidate, policy),
    }
}

/// The acceptor must be a participant and must not already track the id.
pub fn check_create_acceptance(
    me: &Party,
    own_previous: Option<&IouState>,
    candidate: &IouState,
) -> Verdict {
    ensure(own_previous.is_none(), RejectCode::AlreadyIssued)?;
    ensure(candidate.is_participant(me), RejectCode::NotRequiredSigner)
}

/// Lender-side payment rules.
///
/// A partial payment must bring `paid` to at least half the principal, and
/// once any partial payment exists the next one must clear the debt: at most
/// one partial payment per instrument.
pub fn check_payment_acceptance(me: &Party, previous: &IouState, candidate: &IouState) -> Verdict {
    ensure(&candidate.lender == me, RejectCode::AcceptorNotLender)?;

    if candidate.is_settled() {
        return Ok(());
    }
    if !meets_half_minimum(candidate) {
        return Err(Rejection::with_detail(
            RejectCode::PartialBelowHalf,
            format!("paid={} principal={}", candidate.paid, candidate.principal),
        ));
    }
    if previous.paid > 0 {
        return Err(Rejection::with_detail(
            RejectCode::MustClearAfterPartial,
            format!(
                "previously_paid={} paid={} principal={}",
                previous.paid, candidate.paid, candidate.principal
            ),
        ));
    }
    Ok(())
}

/// Transfer rules for the borrower (who tracks the instrument) and for the
/// incoming lender (who does not). Both refuse debts at or above the ceiling.
pub fn check_transfer_acceptance(
    me: &Party,
    own_previous: Option<&IouState>,
    candidate: &IouState,
    policy: &AcceptancePolicy,
) -> Verdict {
    match own_previous {
        Some(prev) => ensure(
            &candidate.borrower == me && &prev.borrower == me,
            RejectCode::AcceptorNotBorrower,
        )?,
        None => ensure(&candidate.lender == me, RejectCode::AcceptorNotNewLender)?,
    }
    if candidate.outstanding() >= policy.transfer_debt_ceiling {
        return Err(Rejection::with_detail(
            RejectCode::DebtAboveCeiling,
            format!(
                "outstanding={} ceiling={}",
                candidate.outstanding(),
                policy.transfer_debt_ceiling
            ),
        ));
    }
    Ok(())
}

/// `paid >= principal / 2`, integer division.
pub fn meets_half_minimum(candidate: &IouState) -> bool {
    candidate.paid >= candidate.principal / 2
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
