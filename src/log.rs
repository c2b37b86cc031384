//! Replicated log storage (§3.4, §9 redesign: follower log persistence).
//!
//! In-memory, append-only, 0-indexed and dense as spec.md §3 defines
//! `LogEntry.index` ("0-based, dense"): the first entry ever appended gets
//! index 0. `last_index()` returns `-1` for an empty log rather than
//! aliasing that state onto a real index — there is no all-zero sentinel
//! to collide with once entry 0 exists. Grounded in the teacher's
//! `storage::Storage` append/get/truncate shape, narrowed to what a single
//! in-process log needs (no WAL: §9 leaves on-disk persistence of
//! consensus metadata out of scope).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::Command;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub command: Command,
    pub timestamp: DateTime<Utc>,
}

/// An in-memory replicated log. `entries[i]` holds index `i`.
#[derive(Debug, Default)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Highest populated index, or `-1` if the log is empty.
    pub fn last_index(&self) -> i64 {
        self.entries.len() as i64 - 1
    }

    pub fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        self.entries.get(index as usize)
    }

    pub fn term_at(&self, index: i64) -> Option<u64> {
        if index < 0 {
            return None;
        }
        self.get(index as u64).map(|e| e.term)
    }

    /// Appends a brand-new entry at the end, assigning it `len()`.
    pub fn append(&mut self, term: u64, command: Command, timestamp: DateTime<Utc>) -> u64 {
        let index = self.len();
        self.entries.push(LogEntry {
            term,
            index,
            command,
            timestamp,
        });
        index
    }

    /// Follower-side log reconciliation (§9 redesign flag: "a correct
    /// implementation should check `prev_log_index`/`prev_log_term` before
    /// accepting entries, and truncate conflicting suffixes"). Returns
    /// `false` if `prev_log_index`/`prev_log_term` don't match what this
    /// replica has, meaning the leader must back up and retry with an
    /// earlier `prev_log_index`. `prev_log_index` is `-1` when the leader
    /// is sending from the very start of the log.
    pub fn try_append_entries(
        &mut self,
        prev_log_index: i64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
    ) -> bool {
        if prev_log_index >= 0 {
            match self.term_at(prev_log_index) {
                Some(term) if term == prev_log_term => {}
                _ => return false,
            }
        }

        for entry in entries {
            match self.entries.get(entry.index as usize) {
                Some(existing) if existing.term == entry.term => {
                    // Already have this exact entry; leave it and everything
                    // before it untouched.
                }
                Some(_) => {
                    // Conflicting entry: this and everything after it from a
                    // stale term must go before the new one lands.
                    self.entries.truncate(entry.index as usize);
                    self.entries.push(entry);
                }
                None => {
                    self.entries.push(entry);
                }
            }
        }
        true
    }

    pub fn entries_from(&self, index: u64) -> Vec<LogEntry> {
        self.entries.iter().skip(index as usize).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Command {
        Command::RegisterUser {
            username: "alice".to_string(),
            password: "pw".to_string(),
        }
    }

    #[test]
    fn append_assigns_dense_zero_based_indices() {
        let mut log = Log::new();
        assert_eq!(log.append(1, noop(), Utc::now()), 0);
        assert_eq!(log.append(1, noop(), Utc::now()), 1);
        assert_eq!(log.len(), 2);
        assert_eq!(log.last_index(), 1);
        assert_eq!(log.last_term(), 1);
    }

    #[test]
    fn empty_log_has_no_last_index() {
        let log = Log::new();
        assert_eq!(log.last_index(), -1);
        assert_eq!(log.last_term(), 0);
    }

    #[test]
    fn try_append_entries_rejects_mismatched_prev_log_term() {
        let mut log = Log::new();
        log.append(1, noop(), Utc::now());
        let entries = vec![LogEntry {
            term: 2,
            index: 1,
            command: noop(),
            timestamp: Utc::now(),
        }];
        assert!(!log.try_append_entries(0, 99, entries));
    }

    #[test]
    fn try_append_entries_truncates_conflicting_suffix() {
        let mut log = Log::new();
        log.append(1, noop(), Utc::now());
        log.append(1, noop(), Utc::now());

        let replacement = vec![LogEntry {
            term: 2,
            index: 1,
            command: noop(),
            timestamp: Utc::now(),
        }];
        assert!(log.try_append_entries(0, 1, replacement));
        assert_eq!(log.len(), 2);
        assert_eq!(log.last_index(), 1);
        assert_eq!(log.term_at(1), Some(2));
    }

    #[test]
    fn try_append_entries_from_empty_log_accepts_sentinel_prev_index() {
        let mut log = Log::new();
        let entries = vec![LogEntry {
            term: 1,
            index: 0,
            command: noop(),
            timestamp: Utc::now(),
        }];
        assert!(log.try_append_entries(-1, 0, entries));
        assert_eq!(log.last_index(), 0);
    }
}
