//! Mock network: party nodes wired to one notary over channel sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use iou_config::{report_unused_keys, LoadedConfig, ProtocolConfig, UnusedKeyPolicy};
use iou_contract::{AcceptancePolicy, CommittedTransition, LinearId, Party, RecordedState};
use iou_flows::{
    spawn_acceptor_endpoint, AcceptorFlow, Ed25519Signer, FlowOutcome, InitiatorFlow, Intent,
    SessionRequest, SessionRouter, SigningService,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::ledger::InMemoryLedger;
use crate::notary::InMemoryNotary;

const ENDPOINT_CAPACITY: usize = 32;

pub struct MockNetwork {
    router: SessionRouter,
    notary: Arc<InMemoryNotary>,
    protocol: ProtocolConfig,
    journal_dir: Option<PathBuf>,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::with_protocol(ProtocolConfig::default())
    }

    pub fn with_protocol(protocol: ProtocolConfig) -> Self {
        Self {
            router: SessionRouter::new(),
            notary: Arc::new(InMemoryNotary::new()),
            protocol,
            journal_dir: None,
        }
    }

    /// Network whose nodes take their settings from a loaded config.
    /// Unused keys are logged, not refused.
    pub fn from_config(loaded: &LoadedConfig) -> Result<Self> {
        let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
        if !report.is_clean() {
            warn!(unused = ?report.unused_leaf_pointers, "config carries unused keys");
        }
        info!(config_hash = %loaded.config_hash, "mock network configured");
        Ok(Self::with_protocol(loaded.protocol()?))
    }

    /// Journal every node's ledger view to `<dir>/<party>.jsonl`.
    pub fn with_journal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.journal_dir = Some(dir.into());
        self
    }

    pub fn notary(&self) -> &Arc<InMemoryNotary> {
        &self.notary
    }

    pub fn protocol(&self) -> &ProtocolConfig {
        &self.protocol
    }

    /// Node using the network-wide acceptance policy.
    pub async fn create_party_node(&self, name: &str) -> Result<MockNode> {
        self.create_party_node_with_policy(name, self.protocol.acceptance)
            .await
    }

    pub async fn create_party_node_with_policy(
        &self,
        name: &str,
        policy: AcceptancePolicy,
    ) -> Result<MockNode> {
        let signer = Arc::new(Ed25519Signer::derive(name));
        let party = Party::new(name, signer.owning_key());

        let ledger = Arc::new(match &self.journal_dir {
            Some(dir) => InMemoryLedger::restore(
                party.clone(),
                dir.join(format!("{name}.jsonl")),
                self.protocol.journal_hash_chain,
            )?,
            None => InMemoryLedger::new(party.clone()),
        });
        self.notary.register_view(ledger.clone()).await;

        let acceptor = AcceptorFlow::new(party.clone(), ledger.clone(), signer.clone(), policy);
        let (endpoint, _serving) = spawn_acceptor_endpoint(acceptor, ENDPOINT_CAPACITY);
        self.router.register(&party, endpoint.clone()).await;

        let initiator = InitiatorFlow::new(
            party.clone(),
            ledger.clone(),
            Arc::new(self.router.clone()),
            self.notary.clone(),
            signer,
        );

        Ok(MockNode {
            party,
            ledger,
            initiator,
            endpoint,
            run_timeout: self.protocol.run_timeout,
        })
    }

    /// The same party running its initiator over `view` instead of its own
    /// ledger. The acceptor endpoint is shared and keeps the original view.
    pub fn node_with_view(&self, node: &MockNode, view: Arc<InMemoryLedger>) -> MockNode {
        let initiator = InitiatorFlow::new(
            node.party.clone(),
            view.clone(),
            Arc::new(self.router.clone()),
            self.notary.clone(),
            Arc::new(Ed25519Signer::derive(&node.party.name)),
        );
        MockNode {
            party: node.party.clone(),
            ledger: view,
            initiator,
            endpoint: node.endpoint.clone(),
            run_timeout: node.run_timeout,
        }
    }

    /// Drop the node's session endpoint. Returns `false` if it was not connected.
    pub async fn disconnect(&self, node: &MockNode) -> bool {
        self.router.deregister(&node.party).await
    }

    pub async fn reconnect(&self, node: &MockNode) {
        self.router.register(&node.party, node.endpoint.clone()).await;
    }
}

/// One party: its ledger view, its initiator and its acceptor endpoint.
#[derive(Clone)]
pub struct MockNode {
    party: Party,
    ledger: Arc<InMemoryLedger>,
    initiator: InitiatorFlow,
    endpoint: mpsc::Sender<SessionRequest>,
    run_timeout: Option<Duration>,
}

impl MockNode {
    pub fn party(&self) -> &Party {
        &self.party
    }

    pub fn ledger(&self) -> &Arc<InMemoryLedger> {
        &self.ledger
    }

    pub async fn run(&self, intent: Intent) -> FlowOutcome {
        match self.run_timeout {
            Some(after) => self.initiator.run_with_timeout(intent, after).await,
            None => self.initiator.run(intent).await,
        }
    }

    pub async fn issue(&self, lender: &Party, borrower: &Party, principal: i64) -> FlowOutcome {
        self.run(Intent::Issue {
            lender: lender.clone(),
            borrower: borrower.clone(),
            principal,
        })
        .await
    }

    pub async fn pay(&self, linear_id: LinearId, amount: i64) -> FlowOutcome {
        self.run(Intent::Pay { linear_id, amount }).await
    }

    pub async fn transfer(&self, linear_id: LinearId, new_lender: &Party) -> FlowOutcome {
        self.run(Intent::Transfer {
            linear_id,
            new_lender: new_lender.clone(),
        })
        .await
    }

    pub async fn states(&self) -> Vec<RecordedState> {
        self.ledger.states().await
    }

    pub async fn state(&self, linear_id: LinearId) -> Option<RecordedState> {
        self.ledger.state(linear_id).await
    }

    pub async fn transactions(&self) -> Vec<CommittedTransition> {
        self.ledger.transactions().await
    }
}
