//! Scenario: Initiator fail-fast and failure classification
//!
//! # Invariants under test
//!
//! 1. An initiator that is not allowed to make a transition is rejected
//!    before any counter-party or finality call is made.
//! 2. A locally invalid proposal never leaves the initiator.
//! 3. A counter-party rejection surfaces as `Rejected` with its reason; a
//!    transport error surfaces as `Failed`; a finality conflict surfaces as a
//!    conflict `Failed`, never as `Rejected`.
//! 4. A counter-signature that does not verify fails the run before finality.
//! 5. A counter-party that already holds a newer version fails the run as a
//!    retryable conflict, before finality and without a rejection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use iou_contract::{
    CommittedTransition, IouState, LinearId, Party, PartySignature, ProposalId, RecordedState,
    RejectCode, Rejection, SignedProposal, StateRef,
};
use iou_flows::{
    AcceptorReply, CollaboratorError, ConflictInfo, CounterpartyTransport, Ed25519Signer,
    FinalityOutcome, FinalityService, FlowFailure, FlowOutcome, InitiatorFlow, Intent, LedgerView,
    SignatureRequest, SigningService,
};

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StubLedger {
    states: Mutex<HashMap<LinearId, RecordedState>>,
    recorded: AtomicUsize,
}

#[async_trait]
impl LedgerView for StubLedger {
    async fn fetch_current(&self, id: LinearId) -> Result<Option<RecordedState>, CollaboratorError> {
        Ok(self.states.lock().unwrap().get(&id).cloned())
    }

    async fn record_committed(&self, _tx: &CommittedTransition) -> Result<(), CollaboratorError> {
        self.recorded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Replies with whatever `respond` produces and counts calls.
struct StubTransport {
    calls: AtomicUsize,
    respond: Box<dyn Fn(&Party, &SignatureRequest) -> Result<AcceptorReply, CollaboratorError> + Send + Sync>,
}

#[async_trait]
impl CounterpartyTransport for StubTransport {
    async fn send(
        &self,
        to: &Party,
        request: SignatureRequest,
    ) -> Result<AcceptorReply, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(to, &request)
    }
}

enum FinalityMode {
    Commit,
    Conflict,
}

struct StubFinality {
    calls: AtomicUsize,
    mode: FinalityMode,
}

#[async_trait]
impl FinalityService for StubFinality {
    async fn commit(&self, signed: &SignedProposal) -> Result<FinalityOutcome, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            FinalityMode::Commit => Ok(FinalityOutcome::Committed(
                CommittedTransition::from_signed(signed, Utc::now()),
            )),
            FinalityMode::Conflict => Ok(FinalityOutcome::Conflict(ConflictInfo {
                linear_id: signed.proposal.candidate.linear_id,
                consumed: signed.proposal.previous_ref().copied(),
                winner: ProposalId([9; 32]),
            })),
        }
    }
}

struct Harness {
    ledger: Arc<StubLedger>,
    transport: Arc<StubTransport>,
    finality: Arc<StubFinality>,
    flow: InitiatorFlow,
}

fn party_of(signer: &Ed25519Signer, name: &str) -> Party {
    Party::new(name, signer.owning_key())
}

fn harness(
    me: &str,
    finality: FinalityMode,
    respond: impl Fn(&Party, &SignatureRequest) -> Result<AcceptorReply, CollaboratorError>
        + Send
        + Sync
        + 'static,
) -> Harness {
    let signer = Arc::new(Ed25519Signer::derive(me));
    let ledger = Arc::new(StubLedger::default());
    let transport = Arc::new(StubTransport {
        calls: AtomicUsize::new(0),
        respond: Box::new(respond),
    });
    let finality = Arc::new(StubFinality {
        calls: AtomicUsize::new(0),
        mode: finality,
    });
    let flow = InitiatorFlow::new(
        party_of(&signer, me),
        ledger.clone(),
        transport.clone(),
        finality.clone(),
        signer,
    );
    Harness {
        ledger,
        transport,
        finality,
        flow,
    }
}

/// Counter-party that signs honestly with a key derived from its name.
fn honest(to: &Party, req: &SignatureRequest) -> Result<AcceptorReply, CollaboratorError> {
    let signer = Ed25519Signer::derive(&to.name);
    Ok(AcceptorReply::Signed(signer.sign(&req.signed.id())?))
}

fn lender() -> Party {
    party_of(&Ed25519Signer::derive("lender"), "lender")
}

fn borrower() -> Party {
    party_of(&Ed25519Signer::derive("borrower"), "borrower")
}

fn seed(ledger: &StubLedger, state: IouState) -> LinearId {
    let id = state.linear_id;
    let recorded = RecordedState {
        state_ref: StateRef {
            linear_id: id,
            tx: ProposalId([1; 32]),
        },
        state,
    };
    ledger.states.lock().unwrap().insert(id, recorded);
    id
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unauthorized_pay_never_touches_network() {
    let h = harness("lender", FinalityMode::Commit, honest);
    let id = seed(&h.ledger, IouState::issue(lender(), borrower(), 10));

    let outcome = h.flow.run(Intent::Pay { linear_id: id, amount: 5 }).await;

    assert_eq!(
        outcome.rejection().map(|r| r.code),
        Some(RejectCode::NotBorrower)
    );
    assert_eq!(h.transport.calls.load(Ordering::SeqCst), 0, "no session opened");
    assert_eq!(h.finality.calls.load(Ordering::SeqCst), 0, "no finality call");
}

#[tokio::test]
async fn locally_invalid_create_never_leaves_initiator() {
    let h = harness("borrower", FinalityMode::Commit, honest);

    let outcome = h
        .flow
        .run(Intent::Issue {
            lender: lender(),
            borrower: borrower(),
            principal: 0,
        })
        .await;

    assert_eq!(
        outcome.rejection().map(|r| r.code),
        Some(RejectCode::NonPositivePrincipal)
    );
    assert_eq!(h.transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn happy_create_commits_and_records_locally() {
    let h = harness("borrower", FinalityMode::Commit, honest);

    let outcome = h
        .flow
        .run(Intent::Issue {
            lender: lender(),
            borrower: borrower(),
            principal: 10,
        })
        .await;

    let tx = outcome.committed().expect("create must commit");
    assert_eq!(tx.output.state.principal, 10);
    assert_eq!(tx.output.state.paid, 0);
    assert_eq!(tx.signatures.len(), 2);
    assert_eq!(h.transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.ledger.recorded.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn counterparty_rejection_is_surfaced() {
    let h = harness("borrower", FinalityMode::Commit, |_, _| {
        Ok(AcceptorReply::Rejected(Rejection::new(
            RejectCode::MustClearAfterPartial,
        )))
    });
    let id = seed(
        &h.ledger,
        IouState::issue(lender(), borrower(), 10).with_paid(5),
    );

    let outcome = h.flow.run(Intent::Pay { linear_id: id, amount: 2 }).await;

    let rejection = outcome.rejection().expect("must be Rejected");
    assert_eq!(rejection.reason(), "must fully clear after a partial payment");
    assert_eq!(h.finality.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transport_error_is_failure_not_rejection() {
    let h = harness("borrower", FinalityMode::Commit, |to, _| {
        Err(CollaboratorError::Unreachable {
            party: to.name.clone(),
        })
    });

    let outcome = h
        .flow
        .run(Intent::Issue {
            lender: lender(),
            borrower: borrower(),
            principal: 10,
        })
        .await;

    assert!(outcome.rejection().is_none());
    assert!(matches!(
        outcome.failure(),
        Some(FlowFailure::Collaborator(CollaboratorError::Unreachable { .. }))
    ));
    assert!(outcome.failure().map(FlowFailure::is_retryable).unwrap_or(false));
}

#[tokio::test]
async fn forged_counter_signature_fails_before_finality() {
    let h = harness("borrower", FinalityMode::Commit, |to, req| {
        let impostor = Ed25519Signer::derive("impostor");
        let mut sig: PartySignature = impostor.sign(&req.signed.id())?;
        sig.by = to.owning_key;
        Ok(AcceptorReply::Signed(sig))
    });

    let outcome = h
        .flow
        .run(Intent::Issue {
            lender: lender(),
            borrower: borrower(),
            principal: 10,
        })
        .await;

    assert!(matches!(
        outcome.failure(),
        Some(FlowFailure::InvalidCounterSignature { .. })
    ));
    assert_eq!(h.finality.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stale_reply_is_retryable_conflict() {
    let newer = StateRef {
        linear_id: LinearId::new(),
        tx: ProposalId([9; 32]),
    };
    let h = harness("borrower", FinalityMode::Commit, move |_, _| {
        Ok(AcceptorReply::Stale { current: newer })
    });
    let id = seed(&h.ledger, IouState::issue(lender(), borrower(), 100));

    let outcome = h.flow.run(Intent::Pay { linear_id: id, amount: 70 }).await;

    assert!(outcome.rejection().is_none(), "stale is not a business rejection");
    let failure = outcome.failure().expect("must be Failed");
    assert_eq!(
        failure,
        &FlowFailure::StalePrevious {
            party: "lender".to_string(),
            current: newer,
        }
    );
    assert!(failure.is_conflict());
    assert!(failure.is_retryable());
    assert_eq!(h.finality.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.ledger.recorded.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn finality_conflict_is_distinct_failure() {
    let h = harness("borrower", FinalityMode::Conflict, honest);
    let id = seed(&h.ledger, IouState::issue(lender(), borrower(), 10));

    let outcome = h.flow.run(Intent::Pay { linear_id: id, amount: 10 }).await;

    let failure = outcome.failure().expect("must be Failed");
    assert!(failure.is_conflict());
    assert_eq!(h.ledger.recorded.load(Ordering::SeqCst), 0, "nothing recorded on conflict");
}

#[tokio::test]
async fn caller_timeout_maps_to_failed() {
    let h = harness("borrower", FinalityMode::Commit, honest);

    let outcome = h
        .flow
        .run_with_timeout(
            Intent::Issue {
                lender: lender(),
                borrower: borrower(),
                principal: 10,
            },
            Duration::ZERO,
        )
        .await;

    // A zero deadline may still let a fully synchronous run finish.
    match outcome {
        FlowOutcome::Failed(FlowFailure::Timeout { after }) => assert_eq!(after, Duration::ZERO),
        FlowOutcome::Committed(_) => {}
        other => panic!("unexpected outcome {}", other.as_str()),
    }
}
