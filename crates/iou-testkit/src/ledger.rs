//! In-memory ledger view for one party.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use iou_contract::{CommittedTransition, LinearId, Party, ProposalId, RecordedState};
use iou_flows::{CollaboratorError, LedgerView};
use iou_journal::{read_entries, JournalWriter};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct LedgerInner {
    current: HashMap<LinearId, RecordedState>,
    transactions: Vec<CommittedTransition>,
    seen: HashSet<ProposalId>,
    journal: Option<JournalWriter>,
}

impl LedgerInner {
    /// Returns `false` if the transition was already applied.
    fn apply(&mut self, owner: &Party, tx: &CommittedTransition) -> bool {
        if !self.seen.insert(tx.proposal_id) {
            return false;
        }
        let id = tx.linear_id();
        if tx.output.state.is_participant(owner) {
            self.current.insert(id, tx.output.clone());
        } else {
            // Transferred away: the old lender stops tracking it.
            self.current.remove(&id);
        }
        self.transactions.push(tx.clone());
        true
    }
}

/// One party's private view: current versions it participates in, plus every
/// transaction it was involved in, in arrival order.
pub struct InMemoryLedger {
    owner: Party,
    inner: RwLock<LedgerInner>,
    unavailable: AtomicBool,
}

impl InMemoryLedger {
    pub fn new(owner: Party) -> Self {
        Self {
            owner,
            inner: RwLock::new(LedgerInner::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// View that also appends every newly recorded transition to `journal`.
    pub fn with_journal(owner: Party, journal: JournalWriter) -> Self {
        Self {
            owner,
            inner: RwLock::new(LedgerInner {
                journal: Some(journal),
                ..LedgerInner::default()
            }),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Rebuild a view by replaying its journal, then keep appending to it.
    /// A journal that does not verify is refused.
    pub fn restore(owner: Party, path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref();
        let writer = JournalWriter::resume(path, hash_chain)?;
        let mut inner = LedgerInner::default();
        if path.exists() {
            for entry in read_entries(path)? {
                inner.apply(&owner, &entry.transition()?);
            }
        }
        debug!(
            party = %owner,
            replayed = inner.transactions.len(),
            "ledger restored from journal"
        );
        inner.journal = Some(writer);
        Ok(Self {
            owner,
            inner: RwLock::new(inner),
            unavailable: AtomicBool::new(false),
        })
    }

    pub fn owner(&self) -> &Party {
        &self.owner
    }

    /// While set, every lookup and recording fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current versions, ordered by linear id.
    pub async fn states(&self) -> Vec<RecordedState> {
        let mut out: Vec<RecordedState> = self.inner.read().await.current.values().cloned().collect();
        out.sort_by_key(|s| s.state_ref.linear_id);
        out
    }

    pub async fn state(&self, id: LinearId) -> Option<RecordedState> {
        self.inner.read().await.current.get(&id).cloned()
    }

    pub async fn transactions(&self) -> Vec<CommittedTransition> {
        self.inner.read().await.transactions.clone()
    }

    fn check_available(&self) -> Result<(), CollaboratorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Ledger(format!(
                "ledger of {} unavailable",
                self.owner.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerView for InMemoryLedger {
    async fn fetch_current(&self, id: LinearId) -> Result<Option<RecordedState>, CollaboratorError> {
        self.check_available()?;
        Ok(self.state(id).await)
    }

    async fn record_committed(&self, tx: &CommittedTransition) -> Result<(), CollaboratorError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        if inner.seen.contains(&tx.proposal_id) {
            return Ok(());
        }
        // Journal before memory, so a failed append leaves the view unchanged.
        if let Some(journal) = inner.journal.as_mut() {
            journal
                .append(&self.owner.name, tx)
                .map_err(|e| CollaboratorError::Ledger(format!("journal append failed: {e:#}")))?;
        }
        inner.apply(&self.owner, tx);
        debug!(
            party = %self.owner,
            linear_id = %tx.linear_id(),
            proposal_id = %tx.proposal_id.short(),
            "transition recorded"
        );
        Ok(())
    }
}
