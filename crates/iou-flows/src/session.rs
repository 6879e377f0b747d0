//! Channel-based sessions between parties.
//!
//! Each acceptor endpoint is an `mpsc` receiver; a request carries a
//! `oneshot` sender for the reply. Every inbound request is handled on its
//! own task, so a run waiting on one party never blocks another run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use iou_contract::{OwningKey, Party};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::acceptor::AcceptorFlow;
use crate::collaborators::{
    AcceptorReply, CollaboratorError, CounterpartyTransport, SignatureRequest,
};

/// One inbound session message.
#[derive(Debug)]
pub struct SessionRequest {
    pub request: SignatureRequest,
    pub reply: oneshot::Sender<AcceptorReply>,
}

/// Routes requests to registered acceptor endpoints by owning key.
#[derive(Clone, Default)]
pub struct SessionRouter {
    endpoints: Arc<RwLock<HashMap<OwningKey, mpsc::Sender<SessionRequest>>>>,
}

impl SessionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, party: &Party, endpoint: mpsc::Sender<SessionRequest>) {
        self.endpoints
            .write()
            .await
            .insert(party.owning_key, endpoint);
    }

    /// Returns `true` if the party was registered.
    pub async fn deregister(&self, party: &Party) -> bool {
        self.endpoints
            .write()
            .await
            .remove(&party.owning_key)
            .is_some()
    }

    pub async fn is_registered(&self, party: &Party) -> bool {
        self.endpoints.read().await.contains_key(&party.owning_key)
    }
}

#[async_trait]
impl CounterpartyTransport for SessionRouter {
    async fn send(
        &self,
        to: &Party,
        request: SignatureRequest,
    ) -> Result<AcceptorReply, CollaboratorError> {
        let unreachable = || CollaboratorError::Unreachable {
            party: to.name.clone(),
        };
        let endpoint = self
            .endpoints
            .read()
            .await
            .get(&to.owning_key)
            .cloned()
            .ok_or_else(unreachable)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        endpoint
            .send(SessionRequest {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| unreachable())?;

        reply_rx.await.map_err(|_| CollaboratorError::Disconnected {
            party: to.name.clone(),
        })
    }
}

/// Start serving `acceptor` and return its endpoint plus the serving task.
///
/// The task ends once every sender is dropped.
pub fn spawn_acceptor_endpoint(
    acceptor: AcceptorFlow,
    capacity: usize,
) -> (mpsc::Sender<SessionRequest>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<SessionRequest>(capacity);
    let handle = tokio::spawn(async move {
        while let Some(SessionRequest { request, reply }) = rx.recv().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let answer = acceptor.respond(request).await;
                // The initiator may already have resolved its run.
                let _ = reply.send(answer);
            });
        }
        debug!(party = %acceptor.party(), "acceptor endpoint closed");
    });
    (tx, handle)
}
