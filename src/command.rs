//! State-machine commands (§5). Each variant is what the teacher's
//! `message::ClientRequest` payload would carry if lis shipped a
//! collaborative-document backend instead of a metadata store: a tagged,
//! serializable operation that gets appended to the log and replayed by
//! every replica's state machine in the same order.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    RegisterUser {
        username: String,
        password: String,
    },
    AuthenticateUser {
        username: String,
        password: String,
    },
    CreateDocument {
        id: String,
        title: String,
        owner: String,
    },
    /// Supplemental operation found in the original source
    /// (`DatabaseInterface.create_document` accepted a caller-supplied id
    /// for import/restore flows); spec.md's distillation folded this into
    /// plain `create_document`, but restoring a document under a known id
    /// needs its own variant since `CreateDocument` always mints a fresh
    /// one.
    CreateDocumentWithId {
        id: String,
        title: String,
        owner: String,
    },
    UpdateDocumentTitle {
        id: String,
        title: String,
        requester: String,
    },
    UpdateDocumentContent {
        id: String,
        content: String,
        requester: String,
    },
    UpdateDocumentContentWithMerge {
        id: String,
        base_content: String,
        new_content: String,
        requester: String,
    },
    DeleteDocument {
        id: String,
        requester: String,
    },
    AddUserToDocument {
        id: String,
        username: String,
        requester: String,
    },
    RemoveUserFromDocument {
        id: String,
        username: String,
        requester: String,
    },
}

impl Command {
    /// Human-readable operation name, used in log lines and status output.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::RegisterUser { .. } => "register_user",
            Command::AuthenticateUser { .. } => "authenticate_user",
            Command::CreateDocument { .. } => "create_document",
            Command::CreateDocumentWithId { .. } => "create_document_with_id",
            Command::UpdateDocumentTitle { .. } => "update_document_title",
            Command::UpdateDocumentContent { .. } => "update_document_content",
            Command::UpdateDocumentContentWithMerge { .. } => "update_document_content_with_merge",
            Command::DeleteDocument { .. } => "delete_document",
            Command::AddUserToDocument { .. } => "add_user_to_document",
            Command::RemoveUserFromDocument { .. } => "remove_user_from_document",
        }
    }
}

/// What applying a [`Command`] produced (§5.2). Carries at most one
/// document id and one content payload; most commands only need the
/// message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ApplyOutcome {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            document_id: None,
            content: None,
        }
    }

    pub fn with_document(message: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            document_id: Some(document_id.into()),
            content: None,
        }
    }

    pub fn with_content(
        message: impl Into<String>,
        document_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            document_id: Some(document_id.into()),
            content: Some(content.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_json() {
        let cmd = Command::CreateDocument {
            id: "doc-1".to_string(),
            title: "Notes".to_string(),
            owner: "alice".to_string(),
        };
        let raw = serde_json::to_string(&cmd).unwrap();
        let back: Command = serde_json::from_str(&raw).unwrap();
        assert_eq!(cmd, back);
        assert_eq!(cmd.kind(), "create_document");
    }
}
