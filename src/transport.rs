//! Peer RPC transport (§6.2). `PeerTransport` is the seam a real
//! gRPC/HTTP client would plug into; `RetryingTransport` wraps any
//! implementation with the retry/backoff/circuit-breaker policy every
//! peer call gets, mirroring the worker-task-per-peer design in the
//! teacher's node/heartbeat loop but collapsed into a single reusable
//! wrapper instead of one thread per RPC.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::rpc::{RequestVoteRequest, RequestVoteResponse, SendHeartbeatRequest, SendHeartbeatResponse};
use crate::{Error, Result, ServerId};

const MAX_ATTEMPTS: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);
const CALL_TIMEOUT: Duration = Duration::from_secs(5);
const CIRCUIT_COOLDOWN: Duration = Duration::from_secs(30);

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn request_vote(
        &self,
        peer: &ServerId,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse>;

    async fn send_heartbeat(
        &self,
        peer: &ServerId,
        request: SendHeartbeatRequest,
    ) -> Result<SendHeartbeatResponse>;
}

/// Wraps a [`PeerTransport`] with retry, a per-call timeout, and a circuit
/// breaker that stops hammering a peer once it's exhausted its retries,
/// reopening after a cooldown (§6.2: 5 attempts, 1s backoff, 5s timeout,
/// 30s cooldown).
pub struct RetryingTransport<T> {
    inner: T,
    peer_down_until: DashMap<ServerId, Instant>,
}

impl<T: PeerTransport> RetryingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            peer_down_until: DashMap::new(),
        }
    }

    fn circuit_open(&self, peer: &ServerId) -> bool {
        match self.peer_down_until.get(peer) {
            Some(until) => Instant::now() < *until,
            None => false,
        }
    }

    fn trip_breaker(&self, peer: &ServerId) {
        self.peer_down_until
            .insert(peer.clone(), Instant::now() + CIRCUIT_COOLDOWN);
    }

    fn reset_breaker(&self, peer: &ServerId) {
        self.peer_down_until.remove(peer);
    }

    /// True while `peer` is inside its circuit-breaker cooldown.
    pub fn is_down(&self, peer: &ServerId) -> bool {
        self.circuit_open(peer)
    }
}

#[async_trait]
impl<T: PeerTransport> PeerTransport for RetryingTransport<T> {
    async fn request_vote(
        &self,
        peer: &ServerId,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse> {
        if self.circuit_open(peer) {
            return Err(Error::Transport(format!("circuit open for peer {peer}")));
        }

        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            match tokio::time::timeout(CALL_TIMEOUT, self.inner.request_vote(peer, request.clone())).await
            {
                Ok(Ok(response)) => {
                    self.reset_breaker(peer);
                    return Ok(response);
                }
                Ok(Err(e)) => last_err = Some(e),
                Err(_) => last_err = Some(Error::Transport(format!("request_vote to {peer} timed out"))),
            }
            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
        self.trip_breaker(peer);
        Err(last_err.unwrap_or_else(|| Error::Transport(format!("exhausted retries calling {peer}"))))
    }

    async fn send_heartbeat(
        &self,
        peer: &ServerId,
        request: SendHeartbeatRequest,
    ) -> Result<SendHeartbeatResponse> {
        if self.circuit_open(peer) {
            return Err(Error::Transport(format!("circuit open for peer {peer}")));
        }

        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            match tokio::time::timeout(CALL_TIMEOUT, self.inner.send_heartbeat(peer, request.clone())).await
            {
                Ok(Ok(response)) => {
                    self.reset_breaker(peer);
                    return Ok(response);
                }
                Ok(Err(e)) => last_err = Some(e),
                Err(_) => last_err = Some(Error::Transport(format!("send_heartbeat to {peer} timed out"))),
            }
            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
        self.trip_breaker(peer);
        Err(last_err.unwrap_or_else(|| Error::Transport(format!("exhausted retries calling {peer}"))))
    }
}
