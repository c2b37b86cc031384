//! In-process multi-node harness, built only under `cfg(test)`. Grounded
//! in the teacher's `test_utils.rs`, which wired up several in-memory
//! nodes and let them talk to each other without sockets; here the wiring
//! plugs `ConsensusNode`s directly into each other through one shared
//! [`InMemoryTransport`] instead of real RPC.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::consensus::ConsensusNode;
use crate::error::{Error, Result};
use crate::rpc::{
    RequestVoteRequest, RequestVoteResponse, SendHeartbeatRequest, SendHeartbeatResponse,
};
use crate::state_machine::StateMachine;
use crate::store::MemoryStore;
use crate::transport::PeerTransport;
use crate::ServerId;

pub struct InMemoryTransport {
    nodes: RwLock<HashMap<ServerId, Arc<ConsensusNode>>>,
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: RwLock::new(HashMap::new()),
        })
    }

    pub async fn register(&self, id: ServerId, node: Arc<ConsensusNode>) {
        self.nodes.write().await.insert(id, node);
    }
}

#[async_trait]
impl PeerTransport for InMemoryTransport {
    async fn request_vote(
        &self,
        peer: &ServerId,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse> {
        let node = self
            .nodes
            .read()
            .await
            .get(peer)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("unknown peer {peer}")))?;
        Ok(node.handle_request_vote(request).await)
    }

    async fn send_heartbeat(
        &self,
        peer: &ServerId,
        request: SendHeartbeatRequest,
    ) -> Result<SendHeartbeatResponse> {
        let node = self
            .nodes
            .read()
            .await
            .get(peer)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("unknown peer {peer}")))?;
        Ok(node.handle_heartbeat(request).await)
    }
}

/// A fully wired in-process cluster: one [`ConsensusNode`] per id, all
/// sharing one [`InMemoryTransport`], each backed by its own
/// [`MemoryStore`].
pub struct Cluster {
    pub transport: Arc<InMemoryTransport>,
    pub nodes: HashMap<ServerId, Arc<ConsensusNode>>,
    pub state_machines: HashMap<ServerId, Arc<StateMachine>>,
}

impl Cluster {
    pub async fn new(ids: &[&str]) -> Self {
        Self::with_liveness_shortcut(ids, true).await
    }

    pub async fn with_liveness_shortcut(ids: &[&str], allow_liveness_shortcut: bool) -> Self {
        let transport = InMemoryTransport::new();
        let mut nodes = HashMap::new();
        let mut state_machines = HashMap::new();

        for &id in ids {
            let id = id.to_string();
            let peers: Vec<ServerId> = ids
                .iter()
                .filter(|&&p| p != id)
                .map(|p| p.to_string())
                .collect();
            let state_machine = Arc::new(StateMachine::new(Arc::new(MemoryStore::new())));
            let node = ConsensusNode::new(
                id.clone(),
                peers,
                transport.clone() as Arc<dyn PeerTransport>,
                Arc::clone(&state_machine),
                allow_liveness_shortcut,
            );
            transport.register(id.clone(), Arc::clone(&node)).await;
            nodes.insert(id.clone(), node);
            state_machines.insert(id, state_machine);
        }

        Self {
            transport,
            nodes,
            state_machines,
        }
    }

    pub fn node(&self, id: &str) -> Arc<ConsensusNode> {
        Arc::clone(self.nodes.get(id).expect("unknown node id"))
    }

    pub fn state_machine(&self, id: &str) -> Arc<StateMachine> {
        Arc::clone(self.state_machines.get(id).expect("unknown node id"))
    }

    /// Spawns background tasks for every node and returns their handles,
    /// keyed by id.
    pub fn spawn_all(&self) -> HashMap<ServerId, crate::consensus::ConsensusHandle> {
        self.nodes
            .iter()
            .map(|(id, node)| {
                (
                    id.clone(),
                    crate::consensus::ConsensusHandle::spawn(Arc::clone(node)),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn single_node_cluster_elects_itself_leader() {
        let cluster = Cluster::new(&["n1"]).await;
        let handle = crate::consensus::ConsensusHandle::spawn(cluster.node("n1"));
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert!(cluster.node("n1").is_leader().await);
        handle.stop().await;
    }
}
