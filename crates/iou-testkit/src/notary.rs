//! In-memory uniqueness service.
//!
//! Non-validating: it checks signatures and consumption, not business rules.
//! Once a proposal commits, the transition is pushed to the ledger views of
//! every involved party that is registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use iou_contract::{CommittedTransition, LinearId, OwningKey, ProposalId, SignedProposal, StateRef};
use iou_flows::{
    CollaboratorError, ConflictInfo, Ed25519Signer, FinalityOutcome, FinalityService, LedgerView,
    SigningService,
};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::ledger::InMemoryLedger;

#[derive(Default)]
struct Registry {
    consumed: HashMap<StateRef, ProposalId>,
    issued: HashMap<LinearId, ProposalId>,
    committed: HashMap<ProposalId, CommittedTransition>,
}

pub struct InMemoryNotary {
    registry: Mutex<Registry>,
    views: RwLock<HashMap<OwningKey, Arc<InMemoryLedger>>>,
    offline: AtomicBool,
    /// `true` while commits are held at the door.
    held: watch::Sender<bool>,
    /// Commits currently waiting on `held`.
    waiting: watch::Sender<usize>,
    verifier: Ed25519Signer,
}

impl Default for InMemoryNotary {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryNotary {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            views: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
            held: watch::channel(false).0,
            waiting: watch::channel(0).0,
            verifier: Ed25519Signer::derive("notary"),
        }
    }

    pub async fn register_view(&self, view: Arc<InMemoryLedger>) {
        self.views
            .write()
            .await
            .insert(view.owner().owning_key, view);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Park every commit until [`release`](Self::release).
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// Resolve once `n` commits are parked behind [`hold`](Self::hold).
    pub async fn wait_for_parked(&self, n: usize) {
        let mut rx = self.waiting.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|parked| *parked >= n).await;
    }

    pub fn committed_count(&self) -> usize {
        self.lock_registry().map(|r| r.committed.len()).unwrap_or(0)
    }

    fn lock_registry(&self) -> Result<std::sync::MutexGuard<'_, Registry>, CollaboratorError> {
        self.registry
            .lock()
            .map_err(|_| CollaboratorError::Finality("notary registry poisoned".to_string()))
    }

    fn check_online(&self) -> Result<(), CollaboratorError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Finality("notary offline".to_string()));
        }
        Ok(())
    }

    async fn pass_gate(&self) {
        let mut held = self.held.subscribe();
        let is_held = *held.borrow_and_update();
        if !is_held {
            return;
        }
        let _parked = Parked::enter(&self.waiting);
        let _ = held.wait_for(|h| !*h).await;
    }

    /// Uniqueness check and registration, all under one lock.
    fn register(&self, signed: &SignedProposal) -> Result<FinalityOutcome, CollaboratorError> {
        let id = signed.id();
        let proposal = &signed.proposal;
        let mut reg = self.lock_registry()?;

        if let Some(existing) = reg.committed.get(&id) {
            return Ok(FinalityOutcome::Committed(existing.clone()));
        }

        let linear_id = proposal.candidate.linear_id;
        let winner = match proposal.previous_ref() {
            Some(prev) => reg.consumed.get(prev).copied(),
            None => reg.issued.get(&linear_id).copied(),
        };
        if let Some(winner) = winner {
            return Ok(FinalityOutcome::Conflict(ConflictInfo {
                linear_id,
                consumed: proposal.previous_ref().copied(),
                winner,
            }));
        }

        match proposal.previous_ref() {
            Some(prev) => reg.consumed.insert(*prev, id),
            None => reg.issued.insert(linear_id, id),
        };
        let tx = CommittedTransition::from_signed(signed, Utc::now());
        reg.committed.insert(id, tx.clone());
        Ok(FinalityOutcome::Committed(tx))
    }

    async fn distribute(&self, tx: &CommittedTransition) {
        let views = self.views.read().await;
        for party in tx.involved_parties() {
            let Some(view) = views.get(&party.owning_key) else {
                continue;
            };
            if let Err(e) = view.record_committed(tx).await {
                warn!(party = %party, error = %e, "distribution to ledger view failed");
            }
        }
    }
}

/// Counts one parked commit for as long as it lives, including when the
/// commit future is dropped mid-wait.
struct Parked<'a>(&'a watch::Sender<usize>);

impl<'a> Parked<'a> {
    fn enter(waiting: &'a watch::Sender<usize>) -> Self {
        waiting.send_modify(|n| *n += 1);
        Self(waiting)
    }
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

#[async_trait]
impl FinalityService for InMemoryNotary {
    async fn commit(&self, signed: &SignedProposal) -> Result<FinalityOutcome, CollaboratorError> {
        self.check_online()?;
        self.pass_gate().await;
        self.check_online()?;

        let id = signed.id();
        if !self
            .verifier
            .verify_signatures(&id, &signed.signatures, &signed.proposal.signers)
        {
            return Err(CollaboratorError::Finality(
                "missing or invalid signature".to_string(),
            ));
        }

        let outcome = self.register(signed)?;
        match &outcome {
            FinalityOutcome::Committed(tx) => {
                info!(
                    linear_id = %tx.linear_id(),
                    proposal_id = %tx.proposal_id.short(),
                    "notarised"
                );
                self.distribute(tx).await;
            }
            FinalityOutcome::Conflict(c) => debug!(conflict = %c, "refused double spend"),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iou_contract::{Command, IouState, Party, Proposal};

    fn create_by(signers: &[&Ed25519Signer]) -> SignedProposal {
        let lender = Party::new("Alice", Ed25519Signer::derive("Alice").owning_key());
        let borrower = Party::new("Bob", Ed25519Signer::derive("Bob").owning_key());
        let candidate = IouState::issue(lender.clone(), borrower.clone(), 10);
        let mut signed = SignedProposal::new(Proposal {
            command: Command::Create,
            previous: None,
            candidate,
            signers: [lender.owning_key, borrower.owning_key].into_iter().collect(),
        });
        let id = signed.id();
        for signer in signers {
            signed.add_signature(signer.sign(&id).unwrap());
        }
        signed
    }

    #[tokio::test]
    async fn missing_signature_is_refused_without_registering() {
        let notary = InMemoryNotary::new();
        let alice = Ed25519Signer::derive("Alice");

        let err = notary.commit(&create_by(&[&alice])).await.unwrap_err();

        assert!(matches!(err, CollaboratorError::Finality(ref m) if m.contains("signature")));
        assert_eq!(notary.committed_count(), 0);
    }

    #[tokio::test]
    async fn fully_signed_create_commits_once() {
        let notary = InMemoryNotary::new();
        let (alice, bob) = (Ed25519Signer::derive("Alice"), Ed25519Signer::derive("Bob"));
        let signed = create_by(&[&alice, &bob]);

        let first = notary.commit(&signed).await.unwrap();
        let again = notary.commit(&signed).await.unwrap();

        assert!(matches!(first, FinalityOutcome::Committed(_)));
        assert_eq!(first, again);
        assert_eq!(notary.committed_count(), 1);
    }
}
