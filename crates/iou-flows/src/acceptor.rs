//! Acceptor protocol: the counter-party side of a run.
//!
//! Every request is re-evaluated from this party's own ledger view. The
//! initiator's copy of the previous version is only used when this party has
//! never tracked the instrument (an incoming lender).

use std::sync::Arc;

use iou_contract::{
    check_acceptance, validate, AcceptancePolicy, Command, IouState, Party, RecordedState,
    RejectCode, Rejection, SignedProposal, StateRef,
};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::collaborators::{AcceptorReply, LedgerView, SignatureRequest, SigningService};

#[derive(Clone)]
pub struct AcceptorFlow {
    me: Party,
    ledger: Arc<dyn LedgerView>,
    signer: Arc<dyn SigningService>,
    policy: AcceptancePolicy,
}

impl AcceptorFlow {
    pub fn new(
        me: Party,
        ledger: Arc<dyn LedgerView>,
        signer: Arc<dyn SigningService>,
        policy: AcceptancePolicy,
    ) -> Self {
        Self {
            me,
            ledger,
            signer,
            policy,
        }
    }

    pub fn party(&self) -> &Party {
        &self.me
    }

    pub fn policy(&self) -> &AcceptancePolicy {
        &self.policy
    }

    /// Evaluate one signature request and answer it.
    ///
    /// Order: required signer, initiator signature, own view lookup, shared
    /// transition rules, role rules, sign. Nothing is written to the ledger.
    pub async fn respond(&self, request: SignatureRequest) -> AcceptorReply {
        let span = info_span!(
            "acceptor",
            party = %self.me,
            from = %request.from,
            command = %request.signed.proposal.command,
        );
        self.evaluate(request).instrument(span).await
    }

    async fn evaluate(&self, request: SignatureRequest) -> AcceptorReply {
        let SignatureRequest { from, signed } = request;
        let proposal = &signed.proposal;
        let id = proposal.id();

        if !proposal.signers.contains(&self.me.owning_key) {
            return self.reject(Rejection::new(RejectCode::NotRequiredSigner));
        }
        if !self.signatures_valid(&from, &signed) {
            return self.reject(Rejection::new(RejectCode::InvalidProposalSignature));
        }

        let own = match self.ledger.fetch_current(proposal.candidate.linear_id).await {
            Ok(own) => own,
            Err(e) => {
                warn!(error = %e, "ledger lookup failed");
                return AcceptorReply::Unavailable {
                    reason: e.to_string(),
                };
            }
        };

        let tracked = own.as_ref().map(|r| r.state.clone());
        let previous = match resolve_previous(proposal.command, own, proposal.previous.as_ref()) {
            Ok(previous) => previous,
            Err(Unresolved::Rejected(rejection)) => return self.reject(rejection),
            Err(Unresolved::Stale { current }) => {
                info!(current = %current, "proposal consumes a superseded version");
                return AcceptorReply::Stale { current };
            }
        };

        if let Err(rejection) = validate(
            proposal.command,
            previous.as_ref(),
            &proposal.candidate,
            &proposal.signers,
        ) {
            return self.reject(rejection);
        }
        if let Err(rejection) = check_acceptance(
            proposal.command,
            &self.me,
            tracked.as_ref(),
            &proposal.candidate,
            &self.policy,
        ) {
            return self.reject(rejection);
        }

        match self.signer.sign(&id) {
            Ok(sig) => {
                info!(
                    linear_id = %proposal.candidate.linear_id,
                    proposal_id = %id.short(),
                    "proposal accepted and signed"
                );
                AcceptorReply::Signed(sig)
            }
            Err(e) => {
                warn!(error = %e, "signing failed");
                AcceptorReply::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// The initiator must be a required signer with a valid signature, and
    /// every other signature already attached must verify too.
    fn signatures_valid(&self, from: &Party, signed: &SignedProposal) -> bool {
        let id = signed.id();
        let signers = &signed.proposal.signers;
        let by_initiator = signed
            .signatures
            .iter()
            .any(|s| s.by == from.owning_key && signers.contains(&s.by));
        by_initiator
            && signed
                .signatures
                .iter()
                .all(|s| signers.contains(&s.by) && self.signer.verify(&id, s))
    }

    fn reject(&self, rejection: Rejection) -> AcceptorReply {
        info!(code = rejection.code.as_str(), reason = rejection.reason(), "proposal rejected");
        debug!(detail = ?rejection.detail);
        AcceptorReply::Rejected(rejection)
    }
}

/// Why no previous version could be settled on.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Unresolved {
    Rejected(Rejection),
    /// The proposal consumes a version this view has already moved past.
    Stale { current: StateRef },
}

/// Pick the previous version to validate against.
///
/// `own` always wins when present, and must be the version the proposal
/// claims to consume.
fn resolve_previous(
    command: Command,
    own: Option<RecordedState>,
    shipped: Option<&RecordedState>,
) -> Result<Option<IouState>, Unresolved> {
    let reject = |code| Err(Unresolved::Rejected(Rejection::new(code)));
    match (command, own) {
        (Command::Create, None) => Ok(None),
        (Command::Create, Some(_)) => reject(RejectCode::AlreadyIssued),
        (Command::Pay, None) => reject(RejectCode::UnknownInstrument),
        (Command::Pay | Command::Transfer, Some(own)) => {
            if shipped.map(|s| s.state_ref) != Some(own.state_ref) {
                return Err(Unresolved::Stale {
                    current: own.state_ref,
                });
            }
            Ok(Some(own.state))
        }
        (Command::Transfer, None) => Ok(shipped.map(|s| s.state.clone())),
    }
}
