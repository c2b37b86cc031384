//! Thin routing facade in front of consensus (§7). No HTTP/session layer
//! lives here — that surface is explicitly out of scope — but the split
//! itself is grounded in the original `DistributedGateway`: reads go
//! straight to the local state machine, writes go through the consensus
//! node's `submit`.

use serde::Serialize;
use uuid::Uuid;

use crate::command::{ApplyOutcome, Command};
use crate::consensus::{ConsensusHandle, ServerStatus};
use crate::error::Result;
use crate::state_machine::StateMachine;
use crate::store::{Document, User};

#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub self_status: ServerStatus,
    pub peers: Vec<String>,
}

pub struct Gateway {
    consensus: ConsensusHandle,
    state_machine: std::sync::Arc<StateMachine>,
    peers: Vec<String>,
}

impl Gateway {
    pub fn new(
        consensus: ConsensusHandle,
        state_machine: std::sync::Arc<StateMachine>,
        peers: Vec<String>,
    ) -> Self {
        Self {
            consensus,
            state_machine,
            peers,
        }
    }

    // -- reads --

    pub fn get_user(&self, username: &str) -> Result<Option<User>> {
        self.state_machine.get_user(username)
    }

    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.state_machine.get_document(id)
    }

    pub fn get_user_documents(&self, username: &str) -> Result<Vec<Document>> {
        self.state_machine.get_user_documents(username)
    }

    pub async fn authenticate_user(&self, username: &str, password: &str) -> Result<ApplyOutcome> {
        self.state_machine.apply(
            &Command::AuthenticateUser {
                username: username.to_string(),
                password: password.to_string(),
            },
            chrono::Utc::now(),
        )
    }

    pub async fn server_status(&self) -> ServerStatus {
        self.consensus.server_status().await
    }

    pub async fn cluster_status(&self) -> ClusterStatus {
        ClusterStatus {
            self_status: self.consensus.server_status().await,
            peers: self.peers.clone(),
        }
    }

    // -- writes, through consensus --

    pub async fn register_user(&self, username: &str, password: &str) -> Result<ApplyOutcome> {
        self.consensus
            .submit(Command::RegisterUser {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await
    }

    pub async fn create_document(&self, title: &str, owner: &str) -> Result<ApplyOutcome> {
        let id = Uuid::new_v4().to_string();
        self.consensus
            .submit(Command::CreateDocument {
                id,
                title: title.to_string(),
                owner: owner.to_string(),
            })
            .await
    }

    /// Restore/import path (§5.1 supplement): caller supplies the id.
    pub async fn create_document_with_id(
        &self,
        id: &str,
        title: &str,
        owner: &str,
    ) -> Result<ApplyOutcome> {
        self.consensus
            .submit(Command::CreateDocumentWithId {
                id: id.to_string(),
                title: title.to_string(),
                owner: owner.to_string(),
            })
            .await
    }

    pub async fn update_document_title(
        &self,
        id: &str,
        title: &str,
        requester: &str,
    ) -> Result<ApplyOutcome> {
        self.consensus
            .submit(Command::UpdateDocumentTitle {
                id: id.to_string(),
                title: title.to_string(),
                requester: requester.to_string(),
            })
            .await
    }

    pub async fn update_document_content(
        &self,
        id: &str,
        content: &str,
        requester: &str,
    ) -> Result<ApplyOutcome> {
        self.consensus
            .submit(Command::UpdateDocumentContent {
                id: id.to_string(),
                content: content.to_string(),
                requester: requester.to_string(),
            })
            .await
    }

    pub async fn update_document_content_with_merge(
        &self,
        id: &str,
        base_content: &str,
        new_content: &str,
        requester: &str,
    ) -> Result<ApplyOutcome> {
        self.consensus
            .submit(Command::UpdateDocumentContentWithMerge {
                id: id.to_string(),
                base_content: base_content.to_string(),
                new_content: new_content.to_string(),
                requester: requester.to_string(),
            })
            .await
    }

    pub async fn delete_document(&self, id: &str, requester: &str) -> Result<ApplyOutcome> {
        self.consensus
            .submit(Command::DeleteDocument {
                id: id.to_string(),
                requester: requester.to_string(),
            })
            .await
    }

    pub async fn add_user_to_document(
        &self,
        id: &str,
        username: &str,
        requester: &str,
    ) -> Result<ApplyOutcome> {
        self.consensus
            .submit(Command::AddUserToDocument {
                id: id.to_string(),
                username: username.to_string(),
                requester: requester.to_string(),
            })
            .await
    }

    pub async fn remove_user_from_document(
        &self,
        id: &str,
        username: &str,
        requester: &str,
    ) -> Result<ApplyOutcome> {
        self.consensus
            .submit(Command::RemoveUserFromDocument {
                id: id.to_string(),
                username: username.to_string(),
                requester: requester.to_string(),
            })
            .await
    }
}
