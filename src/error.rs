use thiserror::Error;

use crate::ServerId;

/// Crate-wide error type. Variants mirror the error taxonomy in the design
/// doc: validation, authorization, conflict, leadership, quorum, transport
/// and storage failures each get their own shape so callers can match on
/// them instead of parsing messages.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    Conflict(String),

    #[error("not the leader; current leader is {leader_id:?}")]
    NotLeader { leader_id: Option<ServerId> },

    #[error("no quorum available")]
    NoQuorum,

    #[error("node is stopped")]
    Stopped,

    #[error("peer transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
