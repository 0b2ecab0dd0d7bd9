//! Durable storage for a parley node.
//!
//! A single long-lived rocksdb handle holds everything the node must not
//! lose: the Raft hard state and commit/applied cursors, the replicated log,
//! and the materialized user/message rows. Key prefixes keep the spaces
//! apart; log and row keys are big-endian so iteration order equals id order.
//!
//! Durability contract: a successful return from any save/append means the
//! data survives a process crash. Row writes for one applied entry and the
//! applied-index cursor go through a single atomic batch.

use crate::error::{ParleyError, Result};
use crate::raft::{HardState, LogEntry};
use crate::types::{LogIndex, Message, MessageId, User, UserId};
use rocksdb::{Options, WriteBatch, DB};
use std::path::Path;

const HARD_STATE_KEY: &[u8] = b"meta/hard_state";
const COMMIT_INDEX_KEY: &[u8] = b"meta/commit_index";
const APPLIED_INDEX_KEY: &[u8] = b"meta/applied_index";
const LOG_PREFIX: &[u8] = b"log/";
const USER_PREFIX: &[u8] = b"user/";
const MSG_PREFIX: &[u8] = b"msg/";

/// Row mutations produced by applying one log entry, committed atomically
/// together with the applied-index cursor.
#[derive(Debug, Default)]
pub struct RowBatch {
    pub put_users: Vec<User>,
    pub delete_users: Vec<UserId>,
    pub put_messages: Vec<Message>,
    pub delete_messages: Vec<MessageId>,
}

impl RowBatch {
    pub fn is_empty(&self) -> bool {
        self.put_users.is_empty()
            && self.delete_users.is_empty()
            && self.put_messages.is_empty()
            && self.delete_messages.is_empty()
    }
}

/// Persistent storage for one node, single-writer within the process.
pub struct Store {
    db: DB,
}

impl Store {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    // ------------------------------------------------------------------
    // Raft metadata
    // ------------------------------------------------------------------

    /// Load the Raft hard state (term + vote).
    pub fn load_hard_state(&self) -> Result<Option<HardState>> {
        match self.db.get(HARD_STATE_KEY)? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Save the Raft hard state. Durable on return.
    pub fn save_hard_state(&self, state: &HardState) -> Result<()> {
        let data = bincode::serialize(state)?;
        self.db.put(HARD_STATE_KEY, data)?;
        self.db.flush()?;
        Ok(())
    }

    /// Load the persisted commit index (0 when never set).
    pub fn load_commit_index(&self) -> Result<LogIndex> {
        self.load_index(COMMIT_INDEX_KEY)
    }

    /// Persist the commit index. Durable on return.
    pub fn save_commit_index(&self, index: LogIndex) -> Result<()> {
        self.db.put(COMMIT_INDEX_KEY, index.to_be_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    /// Load the persisted applied index (0 when never set).
    pub fn load_applied_index(&self) -> Result<LogIndex> {
        self.load_index(APPLIED_INDEX_KEY)
    }

    fn load_index(&self, key: &[u8]) -> Result<LogIndex> {
        match self.db.get(key)? {
            Some(data) => {
                let bytes: [u8; 8] = data
                    .as_ref()
                    .try_into()
                    .map_err(|_| ParleyError::Storage("Invalid index value".into()))?;
                Ok(LogIndex::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    // ------------------------------------------------------------------
    // Replicated log
    // ------------------------------------------------------------------

    /// Append log entries. Durable on return.
    pub fn append_log_entries(&self, entries: &[LogEntry]) -> Result<()> {
        let mut batch = WriteBatch::default();
        for entry in entries {
            batch.put(log_key(entry.index), bincode::serialize(entry)?);
        }
        self.db.write(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Load every stored log entry in index order.
    pub fn load_log_entries(&self) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        let iter = self.db.iterator(rocksdb::IteratorMode::From(
            LOG_PREFIX,
            rocksdb::Direction::Forward,
        ));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(LOG_PREFIX) {
                break;
            }
            entries.push(bincode::deserialize(&value)?);
        }

        Ok(entries)
    }

    /// Delete log entries from the given index onwards (conflict truncation).
    pub fn truncate_log_from(&self, from_index: LogIndex) -> Result<()> {
        let mut batch = WriteBatch::default();
        let start_key = log_key(from_index);

        let iter = self.db.iterator(rocksdb::IteratorMode::From(
            &start_key,
            rocksdb::Direction::Forward,
        ));

        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(LOG_PREFIX) {
                break;
            }
            batch.delete(&key);
        }

        self.db.write(batch)?;
        self.db.flush()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // State machine rows
    // ------------------------------------------------------------------

    /// Scan all user rows in ascending id order.
    pub fn scan_users(&self) -> Result<Vec<User>> {
        self.scan_rows(USER_PREFIX)
    }

    /// Scan all message rows in ascending id order.
    pub fn scan_messages(&self) -> Result<Vec<Message>> {
        self.scan_rows(MSG_PREFIX)
    }

    fn scan_rows<T: serde::de::DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator(rocksdb::IteratorMode::From(prefix, rocksdb::Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push(bincode::deserialize(&value)?);
        }

        Ok(rows)
    }

    /// Commit the row effects of one applied entry atomically with the
    /// applied-index cursor. Durable on return.
    pub fn apply_rows(&self, applied_index: LogIndex, rows: &RowBatch) -> Result<()> {
        let mut batch = WriteBatch::default();

        for user in &rows.put_users {
            batch.put(user_key(user.user_id), bincode::serialize(user)?);
        }
        for id in &rows.delete_users {
            batch.delete(user_key(*id));
        }
        for message in &rows.put_messages {
            batch.put(msg_key(message.message_id), bincode::serialize(message)?);
        }
        for id in &rows.delete_messages {
            batch.delete(msg_key(*id));
        }
        batch.put(APPLIED_INDEX_KEY, applied_index.to_be_bytes());

        self.db.write(batch)?;
        self.db.flush()?;
        Ok(())
    }
}

fn log_key(index: LogIndex) -> Vec<u8> {
    let mut key = LOG_PREFIX.to_vec();
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn user_key(id: UserId) -> Vec<u8> {
    let mut key = USER_PREFIX.to_vec();
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn msg_key(id: MessageId) -> Vec<u8> {
    let mut key = MSG_PREFIX.to_vec();
    key.extend_from_slice(&id.to_be_bytes());
    key
}
