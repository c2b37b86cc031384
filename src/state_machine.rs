//! The deterministic state machine every replica applies committed log
//! entries to (§5). Grounded in `business_logic.py`'s `BusinessLogic`
//! class, with its side-channel dead line-based merge code (unreachable
//! after an early `return` in the original) dropped, and `Utc::now()`
//! calls replaced by the entry's own timestamp so replicas applying the
//! same entry produce byte-identical state (§9 determinism requirement).

use chrono::{DateTime, Utc};

use crate::command::{ApplyOutcome, Command};
use crate::error::{Error, Result};
use crate::log::LogEntry;
use crate::merge::three_way_merge;
use crate::store::{Document, Store, User};

pub struct StateMachine {
    store: std::sync::Arc<dyn Store>,
}

impl StateMachine {
    pub fn new(store: std::sync::Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Apply a committed entry. The entry's `term`/`index` don't affect
    /// the state machine itself; only its `command` and `timestamp` do.
    pub fn apply_entry(&self, entry: &LogEntry) -> Result<ApplyOutcome> {
        self.apply(&entry.command, entry.timestamp)
    }

    pub fn apply(&self, command: &Command, timestamp: DateTime<Utc>) -> Result<ApplyOutcome> {
        match command {
            Command::RegisterUser { username, password } => self.register_user(username, password),
            Command::AuthenticateUser { username, password } => {
                self.authenticate_user(username, password)
            }
            Command::CreateDocument { id, title, owner } => {
                self.create_document(id, title, owner, timestamp)
            }
            Command::CreateDocumentWithId { id, title, owner } => {
                self.create_document(id, title, owner, timestamp)
            }
            Command::UpdateDocumentTitle { id, title, requester } => {
                self.update_document_title(id, title, requester, timestamp)
            }
            Command::UpdateDocumentContent { id, content, requester } => {
                self.update_document_content(id, content, requester, timestamp)
            }
            Command::UpdateDocumentContentWithMerge {
                id,
                base_content,
                new_content,
                requester,
            } => self.update_document_content_with_merge(id, base_content, new_content, requester, timestamp),
            Command::DeleteDocument { id, requester } => self.delete_document(id, requester),
            Command::AddUserToDocument { id, username, requester } => {
                self.add_user_to_document(id, username, requester)
            }
            Command::RemoveUserFromDocument { id, username, requester } => {
                self.remove_user_from_document(id, username, requester)
            }
        }
    }

    // -- reads, served locally without going through consensus (§9 open
    // question: authenticate_user and all plain lookups are local reads) --

    pub fn get_user(&self, username: &str) -> Result<Option<User>> {
        self.store.get_user(username)
    }

    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.store.get_document(id)
    }

    pub fn get_user_documents(&self, username: &str) -> Result<Vec<Document>> {
        self.store.get_user_documents(username)
    }

    fn require_document(&self, id: &str) -> Result<Document> {
        self.store
            .get_document(id)?
            .ok_or_else(|| Error::Validation(format!("document '{id}' does not exist")))
    }

    fn require_member(&self, id: &str, requester: &str) -> Result<Document> {
        let doc = self.require_document(id)?;
        if !doc.users.iter().any(|u| u == requester) {
            return Err(Error::Authorization(format!(
                "user '{requester}' does not have access to document '{id}'"
            )));
        }
        Ok(doc)
    }

    fn register_user(&self, username: &str, password: &str) -> Result<ApplyOutcome> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "username and password are required".to_string(),
            ));
        }
        if self.store.get_user(username)?.is_some() {
            return Err(Error::Conflict(format!("user '{username}' already exists")));
        }
        self.store.create_user(User::new(username, password))?;
        Ok(ApplyOutcome::message(format!(
            "user '{username}' registered"
        )))
    }

    fn authenticate_user(&self, username: &str, password: &str) -> Result<ApplyOutcome> {
        let user = self
            .store
            .get_user(username)?
            .ok_or_else(|| Error::Authorization("invalid username or password".to_string()))?;
        if user.password != password {
            return Err(Error::Authorization(
                "invalid username or password".to_string(),
            ));
        }
        Ok(ApplyOutcome::message(format!(
            "user '{username}' authenticated"
        )))
    }

    fn create_document(
        &self,
        id: &str,
        title: &str,
        owner: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        if self.store.get_user(owner)?.is_none() {
            return Err(Error::Validation(format!("user '{owner}' does not exist")));
        }
        if self.store.get_document(id)?.is_some() {
            return Err(Error::Conflict(format!("document '{id}' already exists")));
        }
        let mut doc = Document::new(id, title, owner);
        doc.last_edited = timestamp;
        self.store.create_document(doc)?;
        Ok(ApplyOutcome::with_document(
            format!("document '{title}' created"),
            id,
        ))
    }

    fn update_document_title(
        &self,
        id: &str,
        title: &str,
        requester: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        let mut doc = self.require_member(id, requester)?;
        doc.title = title.to_string();
        doc.last_edited = timestamp;
        self.store.update_document(doc)?;
        Ok(ApplyOutcome::with_document("document title updated", id))
    }

    fn update_document_content(
        &self,
        id: &str,
        content: &str,
        requester: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        let mut doc = self.require_member(id, requester)?;
        doc.data = content.to_string();
        doc.last_edited = timestamp;
        self.store.update_document(doc)?;
        Ok(ApplyOutcome::with_content(
            "document content updated",
            id,
            content,
        ))
    }

    fn update_document_content_with_merge(
        &self,
        id: &str,
        base_content: &str,
        new_content: &str,
        requester: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        let mut doc = self.require_member(id, requester)?;
        let merged = three_way_merge(base_content, &doc.data, new_content);
        doc.data = merged.clone();
        doc.last_edited = timestamp;
        self.store.update_document(doc)?;
        Ok(ApplyOutcome::with_content(
            "document content merged",
            id,
            merged,
        ))
    }

    fn delete_document(&self, id: &str, requester: &str) -> Result<ApplyOutcome> {
        self.require_member(id, requester)?;
        self.store.delete_document(id)?;
        Ok(ApplyOutcome::with_document("document deleted", id))
    }

    fn add_user_to_document(
        &self,
        id: &str,
        username: &str,
        requester: &str,
    ) -> Result<ApplyOutcome> {
        let mut doc = self.require_member(id, requester)?;
        if self.store.get_user(username)?.is_none() {
            return Err(Error::Validation(format!("user '{username}' does not exist")));
        }
        if !doc.users.iter().any(|u| u == username) {
            doc.users.push(username.to_string());
        }
        self.store.update_document(doc)?;
        Ok(ApplyOutcome::with_document(
            format!("user '{username}' added to document"),
            id,
        ))
    }

    fn remove_user_from_document(
        &self,
        id: &str,
        username: &str,
        requester: &str,
    ) -> Result<ApplyOutcome> {
        let mut doc = self.require_member(id, requester)?;
        if !doc.users.iter().any(|u| u == username) {
            return Err(Error::Validation(format!(
                "user '{username}' does not have access to document '{id}'"
            )));
        }
        doc.users.retain(|u| u != username);
        self.store.update_document(doc)?;
        Ok(ApplyOutcome::with_document(
            format!("user '{username}' removed from document"),
            id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileStore;

    fn machine() -> (tempfile::TempDir, StateMachine) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("data.json")).unwrap();
        (dir, StateMachine::new(std::sync::Arc::new(store)))
    }

    #[test]
    fn register_then_authenticate() {
        let (_dir, sm) = machine();
        sm.apply(
            &Command::RegisterUser {
                username: "alice".into(),
                password: "pw".into(),
            },
            Utc::now(),
        )
        .unwrap();

        sm.apply(
            &Command::AuthenticateUser {
                username: "alice".into(),
                password: "pw".into(),
            },
            Utc::now(),
        )
        .unwrap();

        let err = sm
            .apply(
                &Command::AuthenticateUser {
                    username: "alice".into(),
                    password: "wrong".into(),
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Authorization(_)));
    }

    #[test]
    fn create_document_requires_existing_owner() {
        let (_dir, sm) = machine();
        let err = sm
            .apply(
                &Command::CreateDocument {
                    id: "doc-1".into(),
                    title: "Notes".into(),
                    owner: "ghost".into(),
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn non_member_cannot_edit_document() {
        let (_dir, sm) = machine();
        sm.apply(
            &Command::RegisterUser {
                username: "alice".into(),
                password: "pw".into(),
            },
            Utc::now(),
        )
        .unwrap();
        sm.apply(
            &Command::CreateDocument {
                id: "doc-1".into(),
                title: "Notes".into(),
                owner: "alice".into(),
            },
            Utc::now(),
        )
        .unwrap();

        let err = sm
            .apply(
                &Command::UpdateDocumentTitle {
                    id: "doc-1".into(),
                    title: "Hijacked".into(),
                    requester: "mallory".into(),
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Authorization(_)));
    }

    #[test]
    fn removing_a_non_member_is_a_validation_error() {
        let (_dir, sm) = machine();
        sm.apply(
            &Command::RegisterUser {
                username: "alice".into(),
                password: "pw".into(),
            },
            Utc::now(),
        )
        .unwrap();
        sm.apply(
            &Command::CreateDocument {
                id: "doc-1".into(),
                title: "Notes".into(),
                owner: "alice".into(),
            },
            Utc::now(),
        )
        .unwrap();

        let err = sm
            .apply(
                &Command::RemoveUserFromDocument {
                    id: "doc-1".into(),
                    username: "mallory".into(),
                    requester: "alice".into(),
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn merge_reconciles_concurrent_edits() {
        let (_dir, sm) = machine();
        sm.apply(
            &Command::RegisterUser {
                username: "alice".into(),
                password: "pw".into(),
            },
            Utc::now(),
        )
        .unwrap();
        sm.apply(
            &Command::CreateDocument {
                id: "doc-1".into(),
                title: "Notes".into(),
                owner: "alice".into(),
            },
            Utc::now(),
        )
        .unwrap();
        sm.apply(
            &Command::UpdateDocumentContent {
                id: "doc-1".into(),
                content: "hello world".into(),
                requester: "alice".into(),
            },
            Utc::now(),
        )
        .unwrap();
        // Another replica already advanced "hello world" -> "HELLO world".
        sm.apply(
            &Command::UpdateDocumentContent {
                id: "doc-1".into(),
                content: "HELLO world".into(),
                requester: "alice".into(),
            },
            Utc::now(),
        )
        .unwrap();

        let outcome = sm
            .apply(
                &Command::UpdateDocumentContentWithMerge {
                    id: "doc-1".into(),
                    base_content: "hello world".into(),
                    new_content: "hello WORLD".into(),
                    requester: "alice".into(),
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(outcome.content.as_deref(), Some("HELLO WORLD"));
    }
}
