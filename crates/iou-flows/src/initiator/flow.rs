//! Async driver for the initiator state machine.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use iou_contract::{Party, Proposal, SignedProposal};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::builder::{Intent, ProposalBuilder};
use crate::collaborators::{
    AcceptorReply, CounterpartyTransport, FinalityOutcome, FinalityService, LedgerView,
    SignatureRequest, SigningService,
};
use crate::failure::{FlowFailure, FlowOutcome};

use super::state_machine::{InitiatorEvent, InitiatorMachine, InitiatorState};

/// Runs proposals on behalf of one party.
///
/// Holds no lock across any await: each run owns its own machine, and all
/// shared state lives behind the collaborators.
#[derive(Clone)]
pub struct InitiatorFlow {
    builder: ProposalBuilder,
    ledger: Arc<dyn LedgerView>,
    transport: Arc<dyn CounterpartyTransport>,
    finality: Arc<dyn FinalityService>,
    signer: Arc<dyn SigningService>,
}

impl InitiatorFlow {
    pub fn new(
        me: Party,
        ledger: Arc<dyn LedgerView>,
        transport: Arc<dyn CounterpartyTransport>,
        finality: Arc<dyn FinalityService>,
        signer: Arc<dyn SigningService>,
    ) -> Self {
        Self {
            builder: ProposalBuilder::new(me),
            ledger,
            transport,
            finality,
            signer,
        }
    }

    pub fn party(&self) -> &Party {
        self.builder.initiator()
    }

    /// Drive one run to a terminal state.
    pub async fn run(&self, intent: Intent) -> FlowOutcome {
        let span = info_span!(
            "initiator",
            party = %self.party(),
            command = %intent.command(),
        );
        self.drive(intent).instrument(span).await
    }

    /// [`run`](Self::run) under a caller-imposed deadline. An elapsed
    /// deadline is reported as `Failed(Timeout)`.
    pub async fn run_with_timeout(&self, intent: Intent, after: Duration) -> FlowOutcome {
        match tokio::time::timeout(after, self.run(intent)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(party = %self.party(), timeout_ms = after.as_millis() as u64, "run timed out");
                FlowOutcome::Failed(FlowFailure::Timeout { after })
            }
        }
    }

    async fn drive(&self, intent: Intent) -> FlowOutcome {
        let mut machine = InitiatorMachine::new(self.signer.owning_key());

        let outcome = loop {
            let events = match machine.state() {
                InitiatorState::Building => vec![self.build(&intent).await],
                InitiatorState::LocallyValidated { proposal } => vec![self.self_sign(proposal)],
                InitiatorState::AwaitingCounterSignatures { signed } => {
                    self.collect_signatures(signed).await
                }
                InitiatorState::AwaitingFinality { signed } => vec![self.finalise(signed).await],
                InitiatorState::Committed { tx } => break FlowOutcome::Committed(tx.clone()),
                InitiatorState::Rejected { rejection } => {
                    break FlowOutcome::Rejected(rejection.clone())
                }
                InitiatorState::Failed { failure } => break FlowOutcome::Failed(failure.clone()),
            };

            for event in events {
                if let Err(e) = machine.apply(event) {
                    warn!(error = %e, "initiator state machine refused event");
                    return FlowOutcome::Failed(FlowFailure::IllegalTransition(e));
                }
            }
            debug!(phase = machine.phase().as_str(), "initiator advanced");
        };

        match &outcome {
            FlowOutcome::Committed(tx) => info!(
                linear_id = %tx.linear_id(),
                proposal_id = %tx.proposal_id.short(),
                "run committed"
            ),
            FlowOutcome::Rejected(r) => info!(code = r.code.as_str(), reason = r.reason(), "run rejected"),
            FlowOutcome::Failed(f) => warn!(failure = %f, "run failed"),
        }
        outcome
    }

    // -----------------------------------------------------------------------
    // Building
    // -----------------------------------------------------------------------

    async fn build(&self, intent: &Intent) -> InitiatorEvent {
        let previous = match intent.linear_id() {
            Some(id) => match self.ledger.fetch_current(id).await {
                Ok(prev) => prev,
                Err(e) => return InitiatorEvent::OperationalFailure(e.into()),
            },
            None => None,
        };
        match self.builder.build(intent, previous) {
            Ok(proposal) => {
                debug!(
                    linear_id = %proposal.candidate.linear_id,
                    proposal_id = %proposal.id().short(),
                    "proposal built"
                );
                InitiatorEvent::Built(proposal)
            }
            Err(rejection) => InitiatorEvent::BuildRejected(rejection),
        }
    }

    // -----------------------------------------------------------------------
    // LocallyValidated
    // -----------------------------------------------------------------------

    fn self_sign(&self, proposal: &Proposal) -> InitiatorEvent {
        match self.signer.sign(&proposal.id()) {
            Ok(sig) => InitiatorEvent::SelfSigned(sig),
            Err(e) => InitiatorEvent::OperationalFailure(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // AwaitingCounterSignatures
    // -----------------------------------------------------------------------

    /// Ask every missing signer concurrently. Returns either one
    /// `CounterSigned` per counter-party, or the single event that ends the
    /// run: the first rejection or failure to arrive wins.
    async fn collect_signatures(&self, signed: &SignedProposal) -> Vec<InitiatorEvent> {
        let id = signed.id();
        let missing = signed.missing_signers();
        let counterparties: Vec<Party> = signed
            .proposal
            .signing_parties()
            .into_iter()
            .filter(|p| missing.contains(&p.owning_key))
            .collect();

        if counterparties.len() != missing.len() {
            return vec![InitiatorEvent::OperationalFailure(
                FlowFailure::IncompleteSignatures {
                    missing: missing.len() - counterparties.len(),
                },
            )];
        }

        let request = SignatureRequest {
            from: self.party().clone(),
            signed: signed.clone(),
        };
        let mut pending: FuturesUnordered<_> = counterparties
            .iter()
            .map(|party| {
                let request = request.clone();
                async move { (party, self.transport.send(party, request).await) }
            })
            .collect();

        let mut events = Vec::with_capacity(counterparties.len());
        while let Some((party, reply)) = pending.next().await {
            match reply {
                Ok(AcceptorReply::Signed(sig)) => {
                    if sig.by != party.owning_key || !self.signer.verify(&id, &sig) {
                        warn!(party = %party, "counter-signature does not verify");
                        return vec![InitiatorEvent::OperationalFailure(
                            FlowFailure::InvalidCounterSignature {
                                party: party.name.clone(),
                            },
                        )];
                    }
                    debug!(party = %party, "counter-signature received");
                    events.push(InitiatorEvent::CounterSigned(sig));
                }
                Ok(AcceptorReply::Rejected(rejection)) => {
                    info!(party = %party, code = rejection.code.as_str(), "counter-party rejected");
                    return vec![InitiatorEvent::CounterpartyRejected {
                        party: party.name.clone(),
                        rejection,
                    }];
                }
                Ok(AcceptorReply::Stale { current }) => {
                    info!(party = %party, current = %current, "counter-party holds a newer version");
                    return vec![InitiatorEvent::OperationalFailure(
                        FlowFailure::StalePrevious {
                            party: party.name.clone(),
                            current,
                        },
                    )];
                }
                Ok(AcceptorReply::Unavailable { reason }) => {
                    return vec![InitiatorEvent::OperationalFailure(
                        FlowFailure::CounterpartyUnavailable {
                            party: party.name.clone(),
                            reason,
                        },
                    )];
                }
                Err(e) => return vec![InitiatorEvent::OperationalFailure(e.into())],
            }
        }
        events
    }

    // -----------------------------------------------------------------------
    // AwaitingFinality
    // -----------------------------------------------------------------------

    async fn finalise(&self, signed: &SignedProposal) -> InitiatorEvent {
        match self.finality.commit(signed).await {
            Ok(FinalityOutcome::Committed(tx)) => {
                // Already final; a local recording failure does not undo it.
                if let Err(e) = self.ledger.record_committed(&tx).await {
                    warn!(error = %e, proposal_id = %tx.proposal_id.short(), "local recording failed");
                }
                InitiatorEvent::Finalised(tx)
            }
            Ok(FinalityOutcome::Conflict(conflict)) => {
                info!(conflict = %conflict, "finality conflict");
                InitiatorEvent::FinalityConflict(conflict)
            }
            Err(e) => InitiatorEvent::OperationalFailure(e.into()),
        }
    }
}
