//! Core type definitions for the parley messaging cluster.
//!
//! # Type Aliases
//!
//! - [`UserId`] = `u32`: account identifier, assigned densely by the leader
//! - [`MessageId`] = `u32`: message identifier, monotonic in commit order
//! - [`NodeId`] = `u64`: cluster node identifier
//! - [`Term`] = `u64`: Raft term number
//! - [`LogIndex`] = `u64`: Raft log position (1-based; 0 means "none")
//!
//! # Key Types
//!
//! - [`SessionToken`] / [`PasswordHash`]: opaque 32-byte credentials
//! - [`User`] / [`Message`]: the replicated rows of the state machine
//! - [`ConversationKey`]: normalized unordered user pair

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unique identifier for a user account.
pub type UserId = u32;

/// Unique identifier for a message.
pub type MessageId = u32;

/// Unique identifier for a node in the cluster.
pub type NodeId = u64;

/// Raft term number.
pub type Term = u64;

/// Raft log index.
pub type LogIndex = u64;

/// Serde helper for fixed 32-byte credential fields.
/// Serializes as raw bytes, deserializes with an exact length check.
mod cred_bytes {
    use serde::{de::Error, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde_bytes::serialize(data.as_slice(), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = serde_bytes::deserialize(deserializer)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| D::Error::custom(format!("expected 32 bytes, got {}", v.len())))
    }
}

/// Opaque 32-byte session credential, minted locally and never replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken(#[serde(with = "cred_bytes")] pub [u8; 32]);

impl SessionToken {
    /// The all-zero token, used as the "no session" placeholder on the wire.
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

/// Opaque 32-byte password digest. Hashing happens client-side; the cluster
/// only ever compares digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash(#[serde(with = "cred_bytes")] pub [u8; 32]);

impl PasswordHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

/// A user account row, replicated through the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    /// Unique, case-sensitive.
    pub username: String,
    /// Immutable after creation.
    pub password_hash: PasswordHash,
    /// Unread message ids, kept in ascending id order.
    pub unread: BTreeSet<MessageId>,
    /// Most-recent-first, deduplicated conversation partners.
    pub recent_conversants: Vec<UserId>,
}

impl User {
    pub fn new(user_id: UserId, username: String, password_hash: PasswordHash) -> Self {
        Self {
            user_id,
            username,
            password_hash,
            unread: BTreeSet::new(),
            recent_conversants: Vec::new(),
        }
    }

    /// Move `other` to the front of the recent-conversant list, deduplicating.
    pub fn touch_conversant(&mut self, other: UserId) {
        self.recent_conversants.retain(|id| *id != other);
        self.recent_conversants.insert(0, other);
    }

    /// Forget a conversant entirely (account deletion cascade).
    pub fn forget_conversant(&mut self, other: UserId) {
        self.recent_conversants.retain(|id| *id != other);
    }
}

/// A message row, replicated through the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    /// Transitions false -> true only.
    pub read_flag: bool,
    /// Leader wall clock at proposal time, display ordering only.
    pub timestamp: i64,
}

/// Normalized unordered pair of users keying a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey(UserId, UserId);

impl ConversationKey {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.0 == user || self.1 == user
    }
}
