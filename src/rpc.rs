//! Inter-node RPC contract (§6.1). These are the request/response shapes
//! a real transport would serialize; `transport::PeerTransport` is the
//! trait that actually moves them between nodes.

use serde::{Deserialize, Serialize};

use crate::log::LogEntry;
use crate::ServerId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: u64,
    pub candidate_id: ServerId,
    /// `-1` when the candidate's log is empty (§3: indices are 0-based).
    pub last_log_index: i64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendHeartbeatRequest {
    pub term: u64,
    pub leader_id: ServerId,
    /// `-1` when sending from the very start of the log.
    pub prev_log_index: i64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    /// `-1` before the leader has committed anything.
    pub leader_commit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendHeartbeatResponse {
    pub term: u64,
    pub success: bool,
    /// Lets the leader jump `next_index` back past an entire conflicting
    /// term in one round trip instead of decrementing by one each time.
    /// `-1` if the follower's log is empty.
    pub match_index: i64,
}

/// A follower forwarding a client write to what it believes is the
/// current leader. Left unimplemented (§9 open question: "should a
/// follower forward writes to the leader, or should the client retry
/// against `NotLeader`'s `leader_id`?" — resolved here as "caller
/// retries"), so this always reports `NotLeader`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateCommandRequest {
    pub command: crate::command::Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateCommandResponse {
    pub success: bool,
    pub leader_id: Option<ServerId>,
}
