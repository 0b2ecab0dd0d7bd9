//! The replicated log.
//!
//! Entries are 1-based; index 0 is the empty-log sentinel, so a
//! `prev_log_index` of 0 always passes the AppendEntries consistency check.
//! The full log stays resident (compaction is out of scope); durability is
//! the store's job.

use crate::error::{ParleyError, Result};
use crate::types::{LogIndex, Term};
use serde::{Deserialize, Serialize};

/// A single entry in the replicated log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The index of this entry in the log.
    pub index: LogIndex,
    /// The term when the entry was appended by a leader.
    pub term: Term,
    /// The serialized command. Every replica decodes this identically.
    #[serde(with = "serde_bytes")]
    pub command: Vec<u8>,
}

impl LogEntry {
    pub fn new(index: LogIndex, term: Term, command: Vec<u8>) -> Self {
        Self { index, term, command }
    }
}

/// The in-memory Raft log.
#[derive(Debug, Default)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Rebuild from entries loaded out of the store. Entries must already be
    /// contiguous and 1-based; anything else means a corrupt store.
    pub fn from_entries(entries: Vec<LogEntry>) -> Result<Self> {
        for (i, entry) in entries.iter().enumerate() {
            let expected = i as LogIndex + 1;
            if entry.index != expected {
                return Err(ParleyError::RaftLog(format!(
                    "Non-contiguous log: expected index {}, found {}",
                    expected, entry.index
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Index of the last entry (0 when empty).
    pub fn last_index(&self) -> LogIndex {
        self.entries.len() as LogIndex
    }

    /// Term of the last entry (0 when empty).
    pub fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry; its index must be exactly last_index + 1.
    pub fn append(&mut self, entry: LogEntry) -> Result<()> {
        let expected = self.last_index() + 1;
        if entry.index != expected {
            return Err(ParleyError::RaftLog(format!(
                "Expected index {}, got {}",
                expected, entry.index
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Get an entry by index.
    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        if index == 0 || index > self.last_index() {
            return None;
        }
        self.entries.get(index as usize - 1)
    }

    /// Term at an index; index 0 reports term 0.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        self.get(index).map(|e| e.term)
    }

    /// Entries from `start` onward, capped at `limit`.
    pub fn entries_from(&self, start: LogIndex, limit: usize) -> Vec<LogEntry> {
        if start == 0 || start > self.last_index() {
            return Vec::new();
        }
        self.entries[start as usize - 1..]
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Drop every entry at `index` and beyond (conflict truncation).
    pub fn truncate_from(&mut self, index: LogIndex) {
        if index == 0 {
            self.entries.clear();
            return;
        }
        self.entries.truncate(index as usize - 1);
    }

    /// AppendEntries consistency check: does our log contain an entry with
    /// this index and term? Index 0 always matches.
    pub fn matches(&self, prev_log_index: LogIndex, prev_log_term: Term) -> bool {
        match self.term_at(prev_log_index) {
            Some(term) => term == prev_log_term,
            None => false,
        }
    }

    /// Voting rule: is a candidate with this last index/term at least as
    /// up-to-date as our log?
    pub fn candidate_is_up_to_date(&self, last_log_index: LogIndex, last_log_term: Term) -> bool {
        if last_log_term != self.last_term() {
            last_log_term > self.last_term()
        } else {
            last_log_index >= self.last_index()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log() {
        let log = RaftLog::new();
        assert!(log.is_empty());
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
        assert_eq!(log.term_at(0), Some(0));
    }

    #[test]
    fn test_append_and_get() {
        let mut log = RaftLog::new();
        log.append(LogEntry::new(1, 1, vec![1])).unwrap();
        log.append(LogEntry::new(2, 1, vec![2])).unwrap();
        log.append(LogEntry::new(3, 2, vec![3])).unwrap();

        assert_eq!(log.len(), 3);
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.last_term(), 2);
        assert_eq!(log.get(2).unwrap().command, vec![2]);
        assert!(log.get(0).is_none());
        assert!(log.get(4).is_none());
    }

    #[test]
    fn test_append_enforces_sequential_index() {
        let mut log = RaftLog::new();
        log.append(LogEntry::new(1, 1, vec![1])).unwrap();
        assert!(log.append(LogEntry::new(3, 1, vec![3])).is_err());
        assert!(log.append(LogEntry::new(2, 1, vec![2])).is_ok());
    }

    #[test]
    fn test_truncate_from() {
        let mut log = RaftLog::new();
        for i in 1..=4 {
            log.append(LogEntry::new(i, 1, vec![i as u8])).unwrap();
        }

        log.truncate_from(3);
        assert_eq!(log.last_index(), 2);
        assert!(log.get(3).is_none());

        log.truncate_from(0);
        assert!(log.is_empty());
    }

    #[test]
    fn test_matches() {
        let mut log = RaftLog::new();
        log.append(LogEntry::new(1, 1, vec![1])).unwrap();
        log.append(LogEntry::new(2, 2, vec![2])).unwrap();

        assert!(log.matches(0, 0));
        assert!(log.matches(1, 1));
        assert!(log.matches(2, 2));
        assert!(!log.matches(2, 1));
        assert!(!log.matches(3, 2));
    }

    #[test]
    fn test_candidate_up_to_date() {
        let mut log = RaftLog::new();
        log.append(LogEntry::new(1, 1, vec![1])).unwrap();
        log.append(LogEntry::new(2, 2, vec![2])).unwrap();

        // Higher last term always wins.
        assert!(log.candidate_is_up_to_date(1, 3));
        // Equal terms compare indices.
        assert!(log.candidate_is_up_to_date(3, 2));
        assert!(log.candidate_is_up_to_date(2, 2));
        // Lower last term never wins, regardless of length.
        assert!(!log.candidate_is_up_to_date(100, 1));
    }

    #[test]
    fn test_entries_from_with_limit() {
        let mut log = RaftLog::new();
        for i in 1..=10 {
            log.append(LogEntry::new(i, 1, vec![i as u8])).unwrap();
        }

        let entries = log.entries_from(3, 4);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].index, 3);
        assert_eq!(entries[3].index, 6);

        assert!(log.entries_from(11, 10).is_empty());
        assert!(log.entries_from(0, 10).is_empty());
    }

    #[test]
    fn test_from_entries_rejects_gaps() {
        let entries = vec![LogEntry::new(1, 1, vec![]), LogEntry::new(3, 1, vec![])];
        assert!(RaftLog::from_entries(entries).is_err());

        let entries = vec![LogEntry::new(1, 1, vec![]), LogEntry::new(2, 1, vec![])];
        let log = RaftLog::from_entries(entries).unwrap();
        assert_eq!(log.last_index(), 2);
    }
}
