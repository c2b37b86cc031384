//! Durable key/value store of users and documents behind an atomic
//! file-backed mapping (§4.1). Grounded in the teacher's `storage::Storage`
//! trait/impl shape, but synchronous: every operation here is local file
//! I/O serialized by one mutex, matching the original `DatabaseInterface`'s
//! `threading.Lock`-guarded whole-file read/modify/write.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password: String,
    pub documents: Vec<String>,
}

impl User {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            documents: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub data: String,
    pub last_edited: DateTime<Utc>,
    pub users: Vec<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            data: String::new(),
            last_edited: Utc::now(),
            users: vec![owner.into()],
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Db {
    #[serde(default)]
    users: HashMap<String, User>,
    #[serde(default)]
    documents: HashMap<String, Document>,
}

/// Contract for reading/modifying the `{users, documents}` map (§4.1). A
/// trait so the consensus and gateway layers depend on an abstraction, not
/// a concrete file format — the teacher's `Storage` trait plays the same
/// role for its operation log.
pub trait Store: Send + Sync + std::fmt::Debug {
    fn get_user(&self, username: &str) -> Result<Option<User>>;
    fn create_user(&self, user: User) -> Result<bool>;
    fn update_user(&self, user: User) -> Result<bool>;
    fn delete_user(&self, username: &str) -> Result<bool>;

    fn get_document(&self, id: &str) -> Result<Option<Document>>;
    fn create_document(&self, document: Document) -> Result<bool>;
    fn update_document(&self, document: Document) -> Result<bool>;
    fn delete_document(&self, id: &str) -> Result<bool>;

    fn get_user_documents(&self, username: &str) -> Result<Vec<Document>>;
}

/// Whole-file JSON store (§6.3). Reads the entire file, mutates in memory,
/// writes the entire file back out; no partial state is ever observable to
/// another caller because every operation holds `inner` for its duration.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<Db>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let db = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                Db::default()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            let db = Db::default();
            let raw = serde_json::to_string_pretty(&db)?;
            fs::write(&path, raw)?;
            db
        };

        Ok(Self {
            path,
            inner: Mutex::new(db),
        })
    }

    fn persist(&self, db: &Db) -> Result<()> {
        let raw = serde_json::to_string_pretty(db)
            .map_err(|e| Error::Storage(format!("failed to serialize store: {e}")))?;
        fs::write(&self.path, raw).map_err(|e| Error::Storage(format!("failed to write store file: {e}")))
    }
}

impl Store for FileStore {
    fn get_user(&self, username: &str) -> Result<Option<User>> {
        let db = self.inner.lock();
        Ok(db.users.get(username).cloned())
    }

    fn create_user(&self, user: User) -> Result<bool> {
        let mut db = self.inner.lock();
        if db.users.contains_key(&user.username) {
            return Ok(false);
        }
        db.users.insert(user.username.clone(), user);
        self.persist(&db)?;
        Ok(true)
    }

    fn update_user(&self, user: User) -> Result<bool> {
        let mut db = self.inner.lock();
        if !db.users.contains_key(&user.username) {
            return Ok(false);
        }
        db.users.insert(user.username.clone(), user);
        self.persist(&db)?;
        Ok(true)
    }

    fn delete_user(&self, username: &str) -> Result<bool> {
        let mut db = self.inner.lock();
        if db.users.remove(username).is_none() {
            return Ok(false);
        }
        self.persist(&db)?;
        Ok(true)
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let db = self.inner.lock();
        Ok(db.documents.get(id).cloned())
    }

    fn create_document(&self, document: Document) -> Result<bool> {
        let mut db = self.inner.lock();
        if db.documents.contains_key(&document.id) {
            return Ok(false);
        }
        for username in &document.users {
            if let Some(user) = db.users.get_mut(username) {
                if !user.documents.contains(&document.id) {
                    user.documents.push(document.id.clone());
                }
            }
        }
        db.documents.insert(document.id.clone(), document);
        self.persist(&db)?;
        Ok(true)
    }

    fn update_document(&self, document: Document) -> Result<bool> {
        let mut db = self.inner.lock();
        if !db.documents.contains_key(&document.id) {
            return Ok(false);
        }
        db.documents.insert(document.id.clone(), document);
        self.persist(&db)?;
        Ok(true)
    }

    fn delete_document(&self, id: &str) -> Result<bool> {
        let mut db = self.inner.lock();
        let Some(document) = db.documents.remove(id) else {
            return Ok(false);
        };
        for username in &document.users {
            if let Some(user) = db.users.get_mut(username) {
                user.documents.retain(|d| d != id);
            }
        }
        self.persist(&db)?;
        Ok(true)
    }

    fn get_user_documents(&self, username: &str) -> Result<Vec<Document>> {
        let db = self.inner.lock();
        let Some(user) = db.users.get(username) else {
            return Ok(Vec::new());
        };
        Ok(user
            .documents
            .iter()
            .filter_map(|id| db.documents.get(id).cloned())
            .collect())
    }
}

/// In-memory store for tests and the multi-node harness in
/// [`crate::test_utils`] — grounded in the teacher's original
/// `storage::Storage`, which kept its log in a `DashMap` rather than on
/// disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: dashmap::DashMap<String, User>,
    documents: dashmap::DashMap<String, Document>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get_user(&self, username: &str) -> Result<Option<User>> {
        Ok(self.users.get(username).map(|u| u.clone()))
    }

    fn create_user(&self, user: User) -> Result<bool> {
        if self.users.contains_key(&user.username) {
            return Ok(false);
        }
        self.users.insert(user.username.clone(), user);
        Ok(true)
    }

    fn update_user(&self, user: User) -> Result<bool> {
        if !self.users.contains_key(&user.username) {
            return Ok(false);
        }
        self.users.insert(user.username.clone(), user);
        Ok(true)
    }

    fn delete_user(&self, username: &str) -> Result<bool> {
        Ok(self.users.remove(username).is_some())
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.documents.get(id).map(|d| d.clone()))
    }

    fn create_document(&self, document: Document) -> Result<bool> {
        if self.documents.contains_key(&document.id) {
            return Ok(false);
        }
        for username in &document.users {
            if let Some(mut user) = self.users.get_mut(username) {
                if !user.documents.contains(&document.id) {
                    user.documents.push(document.id.clone());
                }
            }
        }
        self.documents.insert(document.id.clone(), document);
        Ok(true)
    }

    fn update_document(&self, document: Document) -> Result<bool> {
        if !self.documents.contains_key(&document.id) {
            return Ok(false);
        }
        self.documents.insert(document.id.clone(), document);
        Ok(true)
    }

    fn delete_document(&self, id: &str) -> Result<bool> {
        let Some((_, document)) = self.documents.remove(id) else {
            return Ok(false);
        };
        for username in &document.users {
            if let Some(mut user) = self.users.get_mut(username) {
                user.documents.retain(|d| d != id);
            }
        }
        Ok(true)
    }

    fn get_user_documents(&self, username: &str) -> Result<Vec<Document>> {
        let Some(user) = self.users.get(username) else {
            return Ok(Vec::new());
        };
        Ok(user
            .documents
            .iter()
            .filter_map(|id| self.documents.get(id).map(|d| d.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("data.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn create_and_get_user_roundtrips() {
        let (_dir, store) = temp_store();
        assert!(store.create_user(User::new("alice", "pw")).unwrap());
        assert!(!store.create_user(User::new("alice", "pw2")).unwrap());
        let fetched = store.get_user("alice").unwrap().unwrap();
        assert_eq!(fetched.password, "pw");
    }

    #[test]
    fn create_document_links_users_bidirectionally() {
        let (_dir, store) = temp_store();
        store.create_user(User::new("alice", "pw")).unwrap();
        let doc = Document::new("doc-1", "Notes", "alice");
        assert!(store.create_document(doc).unwrap());

        let alice = store.get_user("alice").unwrap().unwrap();
        assert_eq!(alice.documents, vec!["doc-1".to_string()]);

        let docs = store.get_user_documents("alice").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "doc-1");
    }

    #[test]
    fn delete_document_cascades_to_users() {
        let (_dir, store) = temp_store();
        store.create_user(User::new("alice", "pw")).unwrap();
        store.create_document(Document::new("doc-1", "Notes", "alice")).unwrap();
        assert!(store.delete_document("doc-1").unwrap());
        let alice = store.get_user("alice").unwrap().unwrap();
        assert!(alice.documents.is_empty());
    }

    #[test]
    fn get_user_documents_skips_dangling_ids() {
        let (_dir, store) = temp_store();
        let mut alice = User::new("alice", "pw");
        alice.documents.push("ghost".to_string());
        store.create_user(alice).unwrap();
        assert!(store.get_user_documents("alice").unwrap().is_empty());
    }

    #[test]
    fn reopening_store_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        {
            let store = FileStore::open(&path).unwrap();
            store.create_user(User::new("alice", "pw")).unwrap();
        }
        let store = FileStore::open(&path).unwrap();
        assert!(store.get_user("alice").unwrap().is_some());
    }

    #[test]
    fn memory_store_cascades_deletes_like_file_store() {
        let store = MemoryStore::new();
        store.create_user(User::new("alice", "pw")).unwrap();
        store
            .create_document(Document::new("doc-1", "Notes", "alice"))
            .unwrap();
        assert!(store.delete_document("doc-1").unwrap());
        let alice = store.get_user("alice").unwrap().unwrap();
        assert!(alice.documents.is_empty());
    }
}
