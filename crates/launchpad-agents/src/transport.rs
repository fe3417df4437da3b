use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use launchpad_models::{AgentAddress, Envelope};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::error::TransportError;
use crate::runtime::{AgentHandle, Event};

/// Delivers envelopes between agents and to the outside world.
///
/// Delivery is at least once; receivers deduplicate by envelope id.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;
}

/// Routes to registered agent mailboxes inside this process.
///
/// Envelopes for any other address go to the external outbox.
pub struct InProcessTransport {
    agents: RwLock<HashMap<AgentAddress, AgentHandle>>,
    outbox: mpsc::Sender<Envelope>,
}

impl InProcessTransport {
    pub fn new(outbox: mpsc::Sender<Envelope>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            outbox,
        }
    }

    /// A transport plus the receiving end of its external outbox.
    pub fn with_outbox(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(tx)), rx)
    }

    pub async fn register(&self, handle: AgentHandle) {
        self.agents
            .write()
            .await
            .insert(handle.address().clone(), handle);
    }

    pub async fn is_registered(&self, address: &AgentAddress) -> bool {
        self.agents.read().await.contains_key(address)
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let handle = self.agents.read().await.get(&envelope.receiver).cloned();
        match handle {
            Some(handle) => {
                debug!(to = %envelope.receiver, kind = %envelope.kind(), id = %envelope.id, "Delivering");
                handle.submit(Event::Inbound(envelope)).await
            }
            None => {
                debug!(to = %envelope.receiver, kind = %envelope.kind(), id = %envelope.id, "Routing to outbox");
                self.outbox
                    .send(envelope)
                    .await
                    .map_err(|e| TransportError::Closed(e.0.receiver.to_string()))
            }
        }
    }
}
