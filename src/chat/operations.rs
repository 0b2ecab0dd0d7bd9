//! Commands replicated through Raft and their applied outcomes.
//!
//! Every nondeterministic input (assigned ids, the CreateAccount token,
//! the SendMessage timestamp) is filled in by the leader before the entry
//! is appended, so each replica applies the identical command.

use crate::types::{MessageId, PasswordHash, SessionToken, UserId};
use serde::{Deserialize, Serialize};

/// The closed command union applied by the state machine. Decoding an
/// unknown tag is itself a deterministic rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChatCommand {
    CreateAccount {
        username: String,
        password_hash: PasswordHash,
        user_id: UserId,
        /// Returned in the applied reply; only the proposing node stores it
        /// in its session table. No replica's state machine retains tokens.
        token: SessionToken,
    },
    DeleteAccount {
        user_id: UserId,
    },
    SendMessage {
        sender_id: UserId,
        recipient_id: UserId,
        content: String,
        message_id: MessageId,
        timestamp: i64,
    },
    MarkRead {
        user_id: UserId,
        message_id: MessageId,
    },
    /// Pop up to `count` unread messages in ascending id order, marking
    /// each read.
    ReadBatch {
        user_id: UserId,
        count: u32,
    },
    DeleteMessage {
        message_id: MessageId,
    },
}

impl ChatCommand {
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// The deterministic, replicated outcome of applying one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandOutcome {
    /// CreateAccount succeeded.
    AccountCreated { user_id: UserId, token: SessionToken },
    /// CreateAccount hit a live username; a committed rejection.
    UsernameTaken,
    /// The command applied cleanly.
    Done,
    /// ReadBatch acknowledged this many messages.
    ReadAcknowledged { count: u32 },
    /// Precondition failure (unknown user, unknown message, wrong
    /// recipient); a committed rejection, not a consensus failure.
    Rejected { reason: String },
}

impl CommandOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(
            self,
            CommandOutcome::UsernameTaken | CommandOutcome::Rejected { .. }
        )
    }
}
