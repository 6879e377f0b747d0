//! Scenario: Acceptor re-validates from its own view
//!
//! # Invariants under test
//!
//! 1. An acceptor that tracks the instrument evaluates against its own copy,
//!    never the initiator's shipped copy.
//! 2. A proposal that names a different previous version than the
//!    acceptor's own view is answered `Stale` with the acceptor's current
//!    version, never as a business rejection.
//! 3. Unsigned or foreign-signed proposals, and proposals that do not name
//!    the acceptor as a signer, are rejected before any ledger lookup.
//! 4. An incoming lender with no copy evaluates the shipped previous version
//!    and applies the transfer ceiling.
//! 5. A failing ledger makes the acceptor unavailable, not a rejection.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use iou_contract::{
    AcceptancePolicy, Command, CommittedTransition, IouState, LinearId, Party, Proposal,
    ProposalId, RecordedState, RejectCode, SignedProposal, StateRef,
};
use iou_flows::{
    AcceptorFlow, AcceptorReply, CollaboratorError, Ed25519Signer, LedgerView, SignatureRequest,
    SigningService,
};

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StubLedger {
    states: Mutex<HashMap<LinearId, RecordedState>>,
    lookups: AtomicUsize,
    broken: bool,
}

#[async_trait]
impl LedgerView for StubLedger {
    async fn fetch_current(&self, id: LinearId) -> Result<Option<RecordedState>, CollaboratorError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(CollaboratorError::Ledger("disk full".to_string()));
        }
        Ok(self.states.lock().unwrap().get(&id).cloned())
    }

    async fn record_committed(&self, _tx: &CommittedTransition) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

struct Actor {
    party: Party,
    signer: Ed25519Signer,
}

fn actor(name: &str) -> Actor {
    let signer = Ed25519Signer::derive(name);
    Actor {
        party: Party::new(name, signer.owning_key()),
        signer,
    }
}

fn recorded(state: IouState, tx: u8) -> RecordedState {
    RecordedState {
        state_ref: StateRef {
            linear_id: state.linear_id,
            tx: ProposalId([tx; 32]),
        },
        state,
    }
}

fn acceptor(me: &Actor, ledger: Arc<StubLedger>) -> AcceptorFlow {
    AcceptorFlow::new(
        me.party.clone(),
        ledger,
        Arc::new(Ed25519Signer::derive(&me.party.name)),
        AcceptancePolicy::default(),
    )
}

fn request(from: &Actor, proposal: Proposal) -> SignatureRequest {
    let mut signed = SignedProposal::new(proposal);
    let sig = from.signer.sign(&signed.id()).unwrap();
    signed.add_signature(sig);
    SignatureRequest {
        from: from.party.clone(),
        signed,
    }
}

fn pay(previous: RecordedState, paid: i64) -> Proposal {
    let candidate = previous.state.with_paid(paid);
    Proposal {
        command: Command::Pay,
        signers: candidate.participant_keys(),
        previous: Some(previous),
        candidate,
    }
}

fn transfer(previous: RecordedState, new_lender: &Party) -> Proposal {
    let candidate = previous.state.with_lender(new_lender.clone());
    let mut signers: BTreeSet<_> = candidate.participant_keys();
    signers.insert(previous.state.lender.owning_key);
    Proposal {
        command: Command::Transfer,
        previous: Some(previous),
        candidate,
        signers,
    }
}

fn rejected_code(reply: &AcceptorReply) -> Option<RejectCode> {
    match reply {
        AcceptorReply::Rejected(r) => Some(r.code),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lender_signs_valid_half_payment() {
    let (l, b) = (actor("lender"), actor("borrower"));
    let ledger = Arc::new(StubLedger::default());
    let own = recorded(IouState::issue(l.party.clone(), b.party.clone(), 10), 1);
    ledger.states.lock().unwrap().insert(own.state.linear_id, own.clone());

    let req = request(&b, pay(own, 5));
    let id = req.signed.id();
    let reply = acceptor(&l, ledger).respond(req).await;

    match reply {
        AcceptorReply::Signed(sig) => {
            assert_eq!(sig.by, l.party.owning_key);
            assert!(l.signer.verify(&id, &sig));
        }
        other => panic!("expected a signature, got {other:?}"),
    }
}

#[tokio::test]
async fn own_copy_overrides_shipped_copy() {
    let (l, b) = (actor("lender"), actor("borrower"));
    let ledger = Arc::new(StubLedger::default());
    let own = recorded(
        IouState::issue(l.party.clone(), b.party.clone(), 10).with_paid(5),
        1,
    );
    ledger.states.lock().unwrap().insert(own.state.linear_id, own.clone());

    // Same reference, but the shipped copy pretends nothing was paid yet.
    let mut shipped = own.clone();
    shipped.state.paid = 0;
    let reply = acceptor(&l, ledger).respond(request(&b, pay(shipped, 7))).await;

    assert_eq!(rejected_code(&reply), Some(RejectCode::MustClearAfterPartial));
}

#[tokio::test]
async fn superseded_previous_is_answered_stale() {
    let (l, b) = (actor("lender"), actor("borrower"));
    let ledger = Arc::new(StubLedger::default());
    let own = recorded(IouState::issue(l.party.clone(), b.party.clone(), 10), 2);
    ledger.states.lock().unwrap().insert(own.state.linear_id, own.clone());

    let mut older = own.clone();
    older.state_ref.tx = ProposalId([1; 32]);
    let reply = acceptor(&l, ledger).respond(request(&b, pay(older, 10))).await;

    assert_eq!(
        reply,
        AcceptorReply::Stale {
            current: own.state_ref
        }
    );
}

#[tokio::test]
async fn unsigned_and_foreign_proposals_rejected_before_lookup() {
    let (l, b, x) = (actor("lender"), actor("borrower"), actor("outsider"));
    let ledger = Arc::new(StubLedger::default());
    let own = recorded(IouState::issue(l.party.clone(), b.party.clone(), 10), 1);
    let flow = acceptor(&l, ledger.clone());

    let unsigned = SignatureRequest {
        from: b.party.clone(),
        signed: SignedProposal::new(pay(own.clone(), 10)),
    };
    assert_eq!(
        rejected_code(&flow.respond(unsigned).await),
        Some(RejectCode::InvalidProposalSignature)
    );

    // Signed by someone who is not a signer, claiming to be the borrower.
    let mut spoofed = request(&x, pay(own.clone(), 10));
    spoofed.from = b.party.clone();
    assert_eq!(
        rejected_code(&flow.respond(spoofed).await),
        Some(RejectCode::InvalidProposalSignature)
    );

    // Acceptor is not a signer of this proposal at all.
    let other = recorded(IouState::issue(x.party.clone(), b.party.clone(), 10), 1);
    assert_eq!(
        rejected_code(&flow.respond(request(&b, pay(other, 10))).await),
        Some(RejectCode::NotRequiredSigner)
    );

    assert_eq!(ledger.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn incoming_lender_uses_shipped_copy_and_ceiling() {
    let (l, b, c) = (actor("lender"), actor("borrower"), actor("newlender"));

    let small = recorded(IouState::issue(l.party.clone(), b.party.clone(), 10), 1);
    let reply = acceptor(&c, Arc::new(StubLedger::default()))
        .respond(request(&l, transfer(small, &c.party)))
        .await;
    assert!(matches!(reply, AcceptorReply::Signed(_)), "got {reply:?}");

    let large = recorded(IouState::issue(l.party.clone(), b.party.clone(), 100), 1);
    let reply = acceptor(&c, Arc::new(StubLedger::default()))
        .respond(request(&l, transfer(large, &c.party)))
        .await;
    assert_eq!(rejected_code(&reply), Some(RejectCode::DebtAboveCeiling));
}

#[tokio::test]
async fn borrower_accepts_transfer_from_own_view() {
    let (l, b, c) = (actor("lender"), actor("borrower"), actor("newlender"));
    let ledger = Arc::new(StubLedger::default());
    let own = recorded(IouState::issue(l.party.clone(), b.party.clone(), 10), 1);
    ledger.states.lock().unwrap().insert(own.state.linear_id, own.clone());

    let reply = acceptor(&b, ledger)
        .respond(request(&l, transfer(own, &c.party)))
        .await;
    assert!(matches!(reply, AcceptorReply::Signed(_)), "got {reply:?}");
}

#[tokio::test]
async fn broken_ledger_makes_acceptor_unavailable() {
    let (l, b) = (actor("lender"), actor("borrower"));
    let ledger = Arc::new(StubLedger {
        broken: true,
        ..StubLedger::default()
    });
    let own = recorded(IouState::issue(l.party.clone(), b.party.clone(), 10), 1);

    let reply = acceptor(&l, ledger).respond(request(&b, pay(own, 10))).await;
    assert!(matches!(reply, AcceptorReply::Unavailable { .. }), "got {reply:?}");
}
