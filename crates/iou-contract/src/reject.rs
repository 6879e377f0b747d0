//! Business rejections.
//!
//! A rejection fails exactly one proposal. It is never retried as-is and never
//! escalates beyond the run that produced it. Every [`RejectCode`] maps to one
//! fixed reason string so that logs, tests and counter-parties can match on it.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectCode {
    // -- Shared transition rules ---------------------------------------------
    UnexpectedPrevious,
    MissingPrevious,
    IdentifierChanged,
    SameParty,
    NonPositivePrincipal,
    NonZeroInitialPayment,
    MissingSigners,
    PaidNotIncreasing,
    Overpaid,
    NegativePaid,
    PaymentChangedTerms,
    TransferChangedTerms,
    TransferToCurrentLender,

    // -- Initiator authorization ---------------------------------------------
    NotParticipant,
    NotBorrower,
    NotLender,
    NonPositivePayment,
    UnknownInstrument,

    // -- Acceptor role rules -------------------------------------------------
    NotRequiredSigner,
    InvalidProposalSignature,
    AlreadyIssued,
    AcceptorNotLender,
    AcceptorNotBorrower,
    AcceptorNotNewLender,
    PartialBelowHalf,
    MustClearAfterPartial,
    DebtAboveCeiling,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCode::UnexpectedPrevious => "UNEXPECTED_PREVIOUS",
            RejectCode::MissingPrevious => "MISSING_PREVIOUS",
            RejectCode::IdentifierChanged => "IDENTIFIER_CHANGED",
            RejectCode::SameParty => "SAME_PARTY",
            RejectCode::NonPositivePrincipal => "NON_POSITIVE_PRINCIPAL",
            RejectCode::NonZeroInitialPayment => "NON_ZERO_INITIAL_PAYMENT",
            RejectCode::MissingSigners => "MISSING_SIGNERS",
            RejectCode::PaidNotIncreasing => "PAID_NOT_INCREASING",
            RejectCode::Overpaid => "OVERPAID",
            RejectCode::NegativePaid => "NEGATIVE_PAID",
            RejectCode::PaymentChangedTerms => "PAYMENT_CHANGED_TERMS",
            RejectCode::TransferChangedTerms => "TRANSFER_CHANGED_TERMS",
            RejectCode::TransferToCurrentLender => "TRANSFER_TO_CURRENT_LENDER",
            RejectCode::NotParticipant => "NOT_PARTICIPANT",
            RejectCode::NotBorrower => "NOT_BORROWER",
            RejectCode::NotLender => "NOT_LENDER",
            RejectCode::NonPositivePayment => "NON_POSITIVE_PAYMENT",
            RejectCode::UnknownInstrument => "UNKNOWN_INSTRUMENT",
            RejectCode::NotRequiredSigner => "NOT_REQUIRED_SIGNER",
            RejectCode::InvalidProposalSignature => "INVALID_PROPOSAL_SIGNATURE",
            RejectCode::AlreadyIssued => "ALREADY_ISSUED",
            RejectCode::AcceptorNotLender => "ACCEPTOR_NOT_LENDER",
            RejectCode::AcceptorNotBorrower => "ACCEPTOR_NOT_BORROWER",
            RejectCode::AcceptorNotNewLender => "ACCEPTOR_NOT_NEW_LENDER",
            RejectCode::PartialBelowHalf => "PARTIAL_BELOW_HALF",
            RejectCode::MustClearAfterPartial => "MUST_CLEAR_AFTER_PARTIAL",
            RejectCode::DebtAboveCeiling => "DEBT_ABOVE_CEILING",
        }
    }

    /// Fixed human-readable reason for this code.
    pub fn reason(&self) -> &'static str {
        match self {
            RejectCode::UnexpectedPrevious => {
                "no previous state may be consumed when issuing an IOU"
            }
            RejectCode::MissingPrevious => "exactly one previous state must be consumed",
            RejectCode::IdentifierChanged => {
                "previous and candidate states must share the same linear id"
            }
            RejectCode::SameParty => "the lender and the borrower cannot be the same entity",
            RejectCode::NonPositivePrincipal => "the IOU's principal must be positive",
            RejectCode::NonZeroInitialPayment => "a new IOU must have nothing paid",
            RejectCode::MissingSigners => "all of the participants must be signers",
            RejectCode::PaidNotIncreasing => "the paid amount must strictly increase",
            RejectCode::Overpaid => "the paid amount cannot exceed the principal",
            RejectCode::NegativePaid => "the paid amount cannot be negative",
            RejectCode::PaymentChangedTerms => "only the paid amount may change on payment",
            RejectCode::TransferChangedTerms => "only the lender may change on transfer",
            RejectCode::TransferToCurrentLender => {
                "the new lender must differ from the current lender"
            }
            RejectCode::NotParticipant => "only the lender or the borrower may issue the IOU",
            RejectCode::NotBorrower => "only the borrower may pay the IOU",
            RejectCode::NotLender => "only current lender may transfer the IOU",
            RejectCode::NonPositivePayment => "the payment amount must be positive",
            RejectCode::UnknownInstrument => "no current state is known for this instrument",
            RejectCode::NotRequiredSigner => "this party is not a required signer",
            RejectCode::InvalidProposalSignature => {
                "the proposal is not validly signed by its initiator"
            }
            RejectCode::AlreadyIssued => "an instrument with this linear id already exists",
            RejectCode::AcceptorNotLender => "the acceptor must be the lender of this IOU",
            RejectCode::AcceptorNotBorrower => "the acceptor must be the borrower of this IOU",
            RejectCode::AcceptorNotNewLender => "the acceptor must be the new lender of this IOU",
            RejectCode::PartialBelowHalf => {
                "partial payments must be at least half of the principal"
            }
            RejectCode::MustClearAfterPartial => "must fully clear after a partial payment",
            RejectCode::DebtAboveCeiling => "only debts below the transfer ceiling are accepted",
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A business rejection of one proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: RejectCode,
    /// Optional context (amounts, party names). Never part of the stable reason.
    pub detail: Option<String>,
}

impl Rejection {
    pub fn new(code: RejectCode) -> Self {
        Self { code, detail: None }
    }

    pub fn with_detail(code: RejectCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: Some(detail.into()),
        }
    }

    pub fn reason(&self) -> &'static str {
        self.code.reason()
    }
}

impl From<RejectCode> for Rejection {
    fn from(code: RejectCode) -> Self {
        Self::new(code)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(d) => write!(f, "REJECTED[{}]: {} ({})", self.code, self.reason(), d),
            None => write!(f, "REJECTED[{}]: {}", self.code, self.reason()),
        }
    }
}

impl std::error::Error for Rejection {}

/// Result of evaluating a transition or a role rule.
pub type Verdict = Result<(), Rejection>;

/// `Ok(())` when `cond` holds, otherwise a rejection with `code`.
pub(crate) fn ensure(cond: bool, code: RejectCode) -> Verdict {
    if cond {
        Ok(())
    } else {
        Err(Rejection::new(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_code_reason_and_detail() {
        let r = Rejection::with_detail(RejectCode::MustClearAfterPartial, "paid=7 principal=10");
        let s = r.to_string();
        assert!(s.contains("MUST_CLEAR_AFTER_PARTIAL"));
        assert!(s.contains("must fully clear after a partial payment"));
        assert!(s.contains("paid=7"));
    }

    #[test]
    fn reason_is_independent_of_detail() {
        let a = Rejection::new(RejectCode::NotLender);
        let b = Rejection::with_detail(RejectCode::NotLender, "initiator=B");
        assert_eq!(a.reason(), b.reason());
        assert_eq!(a.reason(), "only current lender may transfer the IOU");
    }
}
