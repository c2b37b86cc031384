//! The consensus node itself (§3): roles, terms, timers, the vote and
//! heartbeat RPC handlers, commit advancement, and the apply loop.
//!
//! Grounded in the teacher's single-writer node design (`node.rs`'s one
//! actor owning all mutable state) but applying the §9 redesign flag in
//! full: every field that was scattered across Python's `RLock`-guarded
//! `DistributedServer` attributes — `state`, `current_term`,
//! `voted_for`, `log`, `next_index`, `match_index`, `peer_down` — lives
//! in one [`NodeState`] behind one [`tokio::sync::Mutex`], and role is a
//! tagged [`Role`] instead of a string.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::{ApplyOutcome, Command};
use crate::error::{Error, Result};
use crate::log::{Log, LogEntry};
use crate::rpc::{
    RequestVoteRequest, RequestVoteResponse, SendHeartbeatRequest, SendHeartbeatResponse,
};
use crate::state_machine::StateMachine;
use crate::transport::PeerTransport;
use crate::ServerId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);
const TICK_INTERVAL: Duration = Duration::from_millis(50);
const ELECTION_TIMEOUT_MIN_MS: u64 = 2000;
const ELECTION_TIMEOUT_MAX_MS: u64 = 4000;
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

fn election_timeout() -> Duration {
    let jittered = rand::thread_rng().gen_range(ELECTION_TIMEOUT_MIN_MS..=ELECTION_TIMEOUT_MAX_MS);
    Duration::from_millis(jittered)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    Follower,
    Candidate { votes_received: usize },
    Leader {
        next_index: HashMap<ServerId, u64>,
        match_index: HashMap<ServerId, i64>,
    },
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Follower => "follower",
            Role::Candidate { .. } => "candidate",
            Role::Leader { .. } => "leader",
        }
    }
}

struct NodeState {
    role: Role,
    current_term: u64,
    voted_for: Option<ServerId>,
    leader_id: Option<ServerId>,
    log: Log,
    /// `-1` before anything has been committed/applied (§3: indices are
    /// 0-based, so `0` is itself a valid committed index).
    commit_index: i64,
    last_applied: i64,
    peer_down: HashMap<ServerId, Instant>,
    election_deadline: Instant,
    stopped: bool,
}

impl NodeState {
    fn new() -> Self {
        Self {
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            log: Log::new(),
            commit_index: -1,
            last_applied: -1,
            peer_down: HashMap::new(),
            election_deadline: Instant::now() + election_timeout(),
            stopped: false,
        }
    }

    fn become_follower(&mut self, term: u64) {
        self.current_term = term;
        self.role = Role::Follower;
        self.voted_for = None;
        self.election_deadline = Instant::now() + election_timeout();
    }
}

/// A snapshot of node status for operator/diagnostic output (`server_status`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerStatus {
    pub id: ServerId,
    pub role: String,
    pub current_term: u64,
    pub leader_id: Option<ServerId>,
    pub commit_index: i64,
    pub last_applied: i64,
    pub log_length: u64,
}

struct Pending {
    waiters: Mutex<HashMap<u64, oneshot::Sender<Result<ApplyOutcome>>>>,
}

pub struct ConsensusNode {
    id: ServerId,
    peers: Vec<ServerId>,
    state: Mutex<NodeState>,
    transport: Arc<dyn PeerTransport>,
    state_machine: Arc<StateMachine>,
    pending: Pending,
    allow_liveness_shortcut: bool,
}

impl ConsensusNode {
    pub fn new(
        id: ServerId,
        peers: Vec<ServerId>,
        transport: Arc<dyn PeerTransport>,
        state_machine: Arc<StateMachine>,
        allow_liveness_shortcut: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            peers,
            state: Mutex::new(NodeState::new()),
            transport,
            state_machine,
            pending: Pending {
                waiters: Mutex::new(HashMap::new()),
            },
            allow_liveness_shortcut,
        })
    }

    fn quorum(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    /// Every peer is circuit-broken right now (§9 open question: when a
    /// minority cluster can't reach anyone, should the sole reachable node
    /// keep serving reads/writes locally rather than refusing everything?
    /// Resolved: yes, gated by config, since refusing entirely makes a
    /// single-node deployment unusable).
    async fn all_peers_unreachable(&self) -> bool {
        if self.peers.is_empty() {
            return false;
        }
        let state = self.state.lock().await;
        self.peers
            .iter()
            .all(|p| matches!(state.peer_down.get(p), Some(until) if Instant::now() < *until))
    }

    // -- RPC handlers --

    pub async fn handle_request_vote(&self, req: RequestVoteRequest) -> RequestVoteResponse {
        let mut state = self.state.lock().await;

        if req.term > state.current_term {
            state.become_follower(req.term);
        }
        if req.term < state.current_term {
            return RequestVoteResponse {
                term: state.current_term,
                vote_granted: false,
            };
        }

        let log_ok = req.last_log_term > state.log.last_term()
            || (req.last_log_term == state.log.last_term() && req.last_log_index >= state.log.last_index());

        let can_vote = state.voted_for.is_none() || state.voted_for.as_deref() == Some(req.candidate_id.as_str());

        if can_vote && log_ok {
            state.voted_for = Some(req.candidate_id.clone());
            state.election_deadline = Instant::now() + election_timeout();
            debug!(candidate = %req.candidate_id, term = req.term, "vote granted");
            RequestVoteResponse {
                term: state.current_term,
                vote_granted: true,
            }
        } else {
            RequestVoteResponse {
                term: state.current_term,
                vote_granted: false,
            }
        }
    }

    pub async fn handle_heartbeat(&self, req: SendHeartbeatRequest) -> SendHeartbeatResponse {
        let mut state = self.state.lock().await;

        if req.term < state.current_term {
            return SendHeartbeatResponse {
                term: state.current_term,
                success: false,
                match_index: state.log.last_index(),
            };
        }

        if req.term > state.current_term || state.role != Role::Follower {
            state.become_follower(req.term);
        }
        state.leader_id = Some(req.leader_id.clone());
        state.election_deadline = Instant::now() + election_timeout();

        let ok = state
            .log
            .try_append_entries(req.prev_log_index, req.prev_log_term, req.entries);

        if ok && req.leader_commit > state.commit_index {
            state.commit_index = req.leader_commit.min(state.log.last_index());
        }

        SendHeartbeatResponse {
            term: state.current_term,
            success: ok,
            match_index: state.log.last_index(),
        }
    }

    // -- election --

    /// Takes `node` explicitly (instead of a `self` receiver) so it can
    /// clone an owned `Arc` per peer for the spawned request_vote tasks.
    async fn start_election(node: &Arc<Self>) {
        let (term, last_log_index, last_log_term, already_leader) = {
            let mut state = node.state.lock().await;
            state.current_term += 1;
            state.role = Role::Candidate { votes_received: 1 };
            state.voted_for = Some(node.id.clone());
            state.election_deadline = Instant::now() + election_timeout();

            // A self-vote already meets quorum on a singleton cluster
            // (spec.md §4.4: candidate transitions to leader once votes
            // exceed half the peer count) — nothing will ever call
            // `handle_vote_response` to notice this, since there are no
            // peers to send a vote request to.
            if 1 >= node.quorum() {
                node.become_leader_locked(&mut state);
            }

            (
                state.current_term,
                state.log.last_index(),
                state.log.last_term(),
                matches!(state.role, Role::Leader { .. }),
            )
        };

        info!(term, "starting election");

        if already_leader {
            return;
        }

        for peer in node.peers.clone() {
            let this = Arc::clone(node);
            let peer_id = peer.clone();
            tokio::spawn(async move {
                let req = RequestVoteRequest {
                    term,
                    candidate_id: this.id.clone(),
                    last_log_index,
                    last_log_term,
                };
                match this.transport.request_vote(&peer_id, req).await {
                    Ok(resp) => ConsensusNode::handle_vote_response(&this, term, resp).await,
                    Err(e) => {
                        warn!(peer = %peer_id, error = %e, "request_vote failed");
                        let mut state = this.state.lock().await;
                        state.peer_down.insert(peer_id, Instant::now());
                    }
                }
            });
        }
    }

    async fn handle_vote_response(node: &Arc<Self>, requested_term: u64, resp: RequestVoteResponse) {
        let mut state = node.state.lock().await;

        if resp.term > state.current_term {
            state.become_follower(resp.term);
            return;
        }
        if state.current_term != requested_term {
            return;
        }
        let Role::Candidate { votes_received } = &mut state.role else {
            return;
        };
        if resp.vote_granted {
            *votes_received += 1;
            let votes = *votes_received;
            if votes >= node.quorum() {
                node.become_leader_locked(&mut state);
            }
        }
    }

    fn become_leader_locked(&self, state: &mut NodeState) {
        info!(term = state.current_term, "became leader");
        let next = state.log.len();
        let next_index = self.peers.iter().map(|p| (p.clone(), next)).collect();
        let match_index = self.peers.iter().map(|p| (p.clone(), -1i64)).collect();
        state.role = Role::Leader { next_index, match_index };
        state.leader_id = Some(self.id.clone());
    }

    // -- replication --

    async fn send_heartbeats(node: &Arc<Self>) {
        let (term, leader_commit, is_leader) = {
            let state = node.state.lock().await;
            (
                state.current_term,
                state.commit_index,
                matches!(state.role, Role::Leader { .. }),
            )
        };
        if !is_leader {
            return;
        }

        for peer in node.peers.clone() {
            let this = Arc::clone(node);
            let peer_id = peer.clone();
            tokio::spawn(async move {
                ConsensusNode::replicate_to_peer(this, peer_id, term, leader_commit).await;
            });
        }
    }

    /// Takes an owned `Arc` (rather than `&Arc`) since it's the body of a
    /// spawned, detached task that must outlive this call.
    async fn replicate_to_peer(node: Arc<Self>, peer: ServerId, term: u64, leader_commit: i64) {
        let (prev_log_index, prev_log_term, entries) = {
            let state = node.state.lock().await;
            let Role::Leader { next_index, .. } = &state.role else {
                return;
            };
            let next = *next_index.get(&peer).unwrap_or(&state.log.len());
            let prev_log_index = next as i64 - 1;
            let prev_log_term = state.log.term_at(prev_log_index).unwrap_or(0);
            (prev_log_index, prev_log_term, state.log.entries_from(next))
        };

        let req = SendHeartbeatRequest {
            term,
            leader_id: node.id.clone(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        };

        match node.transport.send_heartbeat(&peer, req).await {
            Ok(resp) => node.handle_heartbeat_response(peer, term, resp).await,
            Err(e) => {
                warn!(%peer, error = %e, "send_heartbeat failed");
                let mut state = node.state.lock().await;
                state.peer_down.insert(peer, Instant::now());
            }
        }
    }

    async fn handle_heartbeat_response(&self, peer: ServerId, term: u64, resp: SendHeartbeatResponse) {
        let mut state = self.state.lock().await;
        state.peer_down.remove(&peer);

        if resp.term > state.current_term {
            state.become_follower(resp.term);
            return;
        }
        if state.current_term != term {
            return;
        }
        let Role::Leader { next_index, match_index } = &mut state.role else {
            return;
        };
        if resp.success {
            match_index.insert(peer.clone(), resp.match_index);
            next_index.insert(peer, (resp.match_index + 1).max(0) as u64);
        } else {
            let entry = next_index.entry(peer).or_insert(0);
            *entry = entry.saturating_sub(1);
            return;
        }

        // Advance commit_index to the highest index replicated to a
        // majority, restricted to the current term (§3.5's safety rule).
        let mut indices: Vec<i64> = match_index.values().copied().collect();
        indices.push(state.log.last_index());
        indices.sort_unstable_by(|a, b| b.cmp(a));
        let quorum_index = indices[self.quorum() - 1];

        if quorum_index > state.commit_index
            && quorum_index >= 0
            && state.log.term_at(quorum_index) == Some(state.current_term)
        {
            state.commit_index = quorum_index;
        }
    }

    // -- client-facing submission --

    pub async fn submit(node: &Arc<Self>, command: Command) -> Result<ApplyOutcome> {
        let index = {
            let mut state = node.state.lock().await;
            if state.stopped {
                return Err(Error::Stopped);
            }
            if !matches!(state.role, Role::Leader { .. }) {
                return Err(Error::NotLeader {
                    leader_id: state.leader_id.clone(),
                });
            }
            let term = state.current_term;
            let index = state.log.append(term, command, Utc::now());
            if node.peers.is_empty() {
                // Singleton cluster: there is no one else to replicate to,
                // so the entry is already on a quorum of one the instant
                // it's appended (spec.md §4.4 Scenario 3: "commit
                // immediately after append").
                state.commit_index = index as i64;
            }
            index
        };

        let (tx, rx) = oneshot::channel();
        node.pending.waiters.lock().await.insert(index, tx);

        ConsensusNode::send_heartbeats(node).await;

        match tokio::time::timeout(SUBMIT_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Stopped),
            Err(_) => {
                node.pending.waiters.lock().await.remove(&index);
                Err(Error::NoQuorum)
            }
        }
    }

    async fn apply_committed(&self) {
        let to_apply: Vec<LogEntry> = {
            let state = self.state.lock().await;
            if state.last_applied >= state.commit_index {
                return;
            }
            ((state.last_applied + 1)..=state.commit_index)
                .filter_map(|i| state.log.get(i as u64).cloned())
                .collect()
        };

        for entry in to_apply {
            let result = self.state_machine.apply_entry(&entry);
            {
                let mut state = self.state.lock().await;
                state.last_applied = entry.index as i64;
            }
            if let Some(tx) = self.pending.waiters.lock().await.remove(&entry.index) {
                let _ = tx.send(result);
            }
        }
    }

    pub async fn server_status(&self) -> ServerStatus {
        let state = self.state.lock().await;
        ServerStatus {
            id: self.id.clone(),
            role: state.role.name().to_string(),
            current_term: state.current_term,
            leader_id: state.leader_id.clone(),
            commit_index: state.commit_index,
            last_applied: state.last_applied,
            log_length: state.log.len(),
        }
    }

    pub async fn is_leader(&self) -> bool {
        matches!(self.state.lock().await.role, Role::Leader { .. })
    }

    pub async fn stop(&self) {
        self.state.lock().await.stopped = true;
    }
}

/// Owns the background tasks driving a [`ConsensusNode`]: the election
/// timer and the apply loop. Cloning shares the same node and tasks.
#[derive(Clone)]
pub struct ConsensusHandle {
    node: Arc<ConsensusNode>,
    tasks: Arc<Vec<JoinHandle<()>>>,
}

impl ConsensusHandle {
    pub fn spawn(node: Arc<ConsensusNode>) -> Self {
        let mut tasks = Vec::new();

        let ticker_node = Arc::clone(&node);
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(TICK_INTERVAL).await;
                let should_elect = {
                    let state = ticker_node.state.lock().await;
                    if state.stopped {
                        return;
                    }
                    !matches!(state.role, Role::Leader { .. }) && Instant::now() >= state.election_deadline
                };
                if should_elect {
                    let shortcut_ok = !ticker_node.allow_liveness_shortcut
                        || !ticker_node.all_peers_unreachable().await;
                    if shortcut_ok || ticker_node.peers.is_empty() {
                        ConsensusNode::start_election(&ticker_node).await;
                    }
                }
            }
        }));

        let heartbeat_node = Arc::clone(&node);
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
                if heartbeat_node.state.lock().await.stopped {
                    return;
                }
                ConsensusNode::send_heartbeats(&heartbeat_node).await;
            }
        }));

        let apply_node = Arc::clone(&node);
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(TICK_INTERVAL).await;
                if apply_node.state.lock().await.stopped {
                    return;
                }
                apply_node.apply_committed().await;
            }
        }));

        Self {
            node,
            tasks: Arc::new(tasks),
        }
    }

    pub fn node(&self) -> &Arc<ConsensusNode> {
        &self.node
    }

    pub async fn submit(&self, command: Command) -> Result<ApplyOutcome> {
        ConsensusNode::submit(&self.node, command).await
    }

    pub async fn server_status(&self) -> ServerStatus {
        self.node.server_status().await
    }

    pub async fn stop(&self) {
        self.node.stop().await;
        for task in self.tasks.iter() {
            task.abort();
        }
    }
}
