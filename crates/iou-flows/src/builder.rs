//! Proposal construction.
//!
//! Copies the previous version and changes only the fields the command may
//! change. Authorization of the initiating party is checked here, before any
//! network round-trip.

use std::collections::BTreeSet;

use iou_contract::{
    Command, IouState, LinearId, OwningKey, Party, Proposal, RecordedState, RejectCode, Rejection,
};
use serde::{Deserialize, Serialize};

/// What the caller wants to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Issue {
        lender: Party,
        borrower: Party,
        principal: i64,
    },
    /// `amount` is added to what has already been paid.
    Pay { linear_id: LinearId, amount: i64 },
    Transfer {
        linear_id: LinearId,
        new_lender: Party,
    },
}

impl Intent {
    pub fn command(&self) -> Command {
        match self {
            Intent::Issue { .. } => Command::Create,
            Intent::Pay { .. } => Command::Pay,
            Intent::Transfer { .. } => Command::Transfer,
        }
    }

    /// Instrument whose current version must be fetched first, if any.
    pub fn linear_id(&self) -> Option<LinearId> {
        match self {
            Intent::Issue { .. } => None,
            Intent::Pay { linear_id, .. } | Intent::Transfer { linear_id, .. } => {
                Some(*linear_id)
            }
        }
    }
}

/// Builds proposals on behalf of one initiating party.
#[derive(Debug, Clone)]
pub struct ProposalBuilder {
    initiator: Party,
}

impl ProposalBuilder {
    pub fn new(initiator: Party) -> Self {
        Self { initiator }
    }

    pub fn initiator(&self) -> &Party {
        &self.initiator
    }

    /// Build the proposal for `intent`.
    ///
    /// `previous` is the current version fetched from the initiator's own
    /// view; it is ignored for `Issue` and required otherwise.
    pub fn build(
        &self,
        intent: &Intent,
        previous: Option<RecordedState>,
    ) -> Result<Proposal, Rejection> {
        match intent {
            Intent::Issue {
                lender,
                borrower,
                principal,
            } => {
                if &self.initiator != lender && &self.initiator != borrower {
                    return Err(Rejection::new(RejectCode::NotParticipant));
                }
                let candidate = IouState::issue(lender.clone(), borrower.clone(), *principal);
                let signers = candidate.participant_keys();
                Ok(Proposal {
                    command: Command::Create,
                    previous: None,
                    candidate,
                    signers,
                })
            }

            Intent::Pay { amount, .. } => {
                let prev = previous.ok_or_else(|| Rejection::new(RejectCode::UnknownInstrument))?;
                if prev.state.borrower != self.initiator {
                    return Err(Rejection::new(RejectCode::NotBorrower));
                }
                if *amount <= 0 {
                    return Err(Rejection::with_detail(
                        RejectCode::NonPositivePayment,
                        format!("amount={amount}"),
                    ));
                }
                let paid = prev.state.paid.checked_add(*amount).ok_or_else(|| {
                    Rejection::with_detail(
                        RejectCode::Overpaid,
                        format!("paid={} amount={amount}", prev.state.paid),
                    )
                })?;
                let candidate = prev.state.with_paid(paid);
                let signers = candidate.participant_keys();
                Ok(Proposal {
                    command: Command::Pay,
                    previous: Some(prev),
                    candidate,
                    signers,
                })
            }

            Intent::Transfer { new_lender, .. } => {
                let prev = previous.ok_or_else(|| Rejection::new(RejectCode::UnknownInstrument))?;
                if prev.state.lender != self.initiator {
                    return Err(Rejection::new(RejectCode::NotLender));
                }
                let candidate = prev.state.with_lender(new_lender.clone());
                let signers = transfer_signers(&prev.state, &candidate);
                Ok(Proposal {
                    command: Command::Transfer,
                    previous: Some(prev),
                    candidate,
                    signers,
                })
            }
        }
    }
}

/// New participants plus the outgoing lender.
fn transfer_signers(previous: &IouState, candidate: &IouState) -> BTreeSet<OwningKey> {
    let mut keys = candidate.participant_keys();
    keys.insert(previous.lender.owning_key);
    keys
}
