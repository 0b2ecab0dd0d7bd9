//! The deterministic user/message state machine.
//!
//! Holds the materialized account and message tables with their derived
//! indices (username lookup, per-pair conversation order, per-user unread
//! sets). Every mutation flows through [`StateMachine::apply`] on a
//! committed log entry; the row effects of each applied entry are written
//! to the store atomically with the applied-index cursor, and the whole
//! structure is rebuilt from rows on startup.
//!
//! Determinism rules: ordered containers wherever iteration can reach an
//! outcome, no clock reads, no randomness. Ids, tokens, and timestamps
//! arrive inside the command.

use super::operations::{ChatCommand, CommandOutcome};
use super::wildcard;
use crate::error::Result;
use crate::raft::StateMachine;
use crate::store::{RowBatch, Store};
use crate::types::{ConversationKey, LogIndex, Message, MessageId, User, UserId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// The replicated chat state machine.
pub struct ChatStateMachine {
    store: Arc<Store>,
    /// All live accounts, ordered by id.
    users: BTreeMap<UserId, User>,
    /// Username -> id lookup; never iterated, so hashing order is safe.
    username_index: HashMap<String, UserId>,
    /// All live messages, ordered by id.
    messages: BTreeMap<MessageId, Message>,
    /// Unordered user pair -> ascending message ids.
    conversations: HashMap<ConversationKey, Vec<MessageId>>,
}

impl ChatStateMachine {
    /// Rebuild the state machine from durable rows.
    pub fn recover(store: Arc<Store>) -> Result<Self> {
        let mut users = BTreeMap::new();
        let mut username_index = HashMap::new();
        for user in store.scan_users()? {
            username_index.insert(user.username.clone(), user.user_id);
            users.insert(user.user_id, user);
        }

        let mut messages = BTreeMap::new();
        let mut conversations: HashMap<ConversationKey, Vec<MessageId>> = HashMap::new();
        // Rows scan in ascending id order, so each conversation vector is
        // built already sorted.
        for message in store.scan_messages()? {
            conversations
                .entry(ConversationKey::new(message.sender_id, message.receiver_id))
                .or_default()
                .push(message.message_id);
            messages.insert(message.message_id, message);
        }

        debug!(
            users = users.len(),
            messages = messages.len(),
            "Recovered chat state"
        );

        Ok(Self {
            store,
            users,
            username_index,
            messages,
            conversations,
        })
    }

    /// Highest live user id (0 when none). Allocator seed.
    pub fn max_user_id(&self) -> UserId {
        self.users.keys().next_back().copied().unwrap_or(0)
    }

    /// Highest live message id (0 when none). Allocator seed.
    pub fn max_message_id(&self) -> MessageId {
        self.messages.keys().next_back().copied().unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Read-only queries, served from local applied state
    // ------------------------------------------------------------------

    pub fn user(&self, user_id: UserId) -> Option<&User> {
        self.users.get(&user_id)
    }

    pub fn user_by_username(&self, username: &str) -> Option<&User> {
        self.username_index
            .get(username)
            .and_then(|id| self.users.get(id))
    }

    /// Usernames matching the wildcard, in ascending user-id order.
    pub fn list_accounts(&self, pattern: &str) -> Vec<(UserId, String)> {
        self.users
            .values()
            .filter(|u| wildcard::matches(pattern, &u.username))
            .map(|u| (u.user_id, u.username.clone()))
            .collect()
    }

    pub fn message(&self, message_id: MessageId) -> Option<&Message> {
        self.messages.get(&message_id)
    }

    /// The conversation between two users, ascending by message id.
    pub fn conversation(&self, a: UserId, b: UserId) -> Vec<&Message> {
        self.conversations
            .get(&ConversationKey::new(a, b))
            .map(|ids| ids.iter().filter_map(|id| self.messages.get(id)).collect())
            .unwrap_or_default()
    }

    /// The user's unread messages, ascending by message id.
    pub fn unread_messages(&self, user_id: UserId) -> Vec<&Message> {
        self.users
            .get(&user_id)
            .map(|u| u.unread.iter().filter_map(|id| self.messages.get(id)).collect())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Command application
    // ------------------------------------------------------------------

    /// Apply one decoded command, returning the outcome and the row effects.
    fn apply_command(&mut self, cmd: ChatCommand) -> (CommandOutcome, RowBatch) {
        match cmd {
            ChatCommand::CreateAccount {
                username,
                password_hash,
                user_id,
                token,
            } => self.create_account(username, password_hash, user_id, token),
            ChatCommand::DeleteAccount { user_id } => self.delete_account(user_id),
            ChatCommand::SendMessage {
                sender_id,
                recipient_id,
                content,
                message_id,
                timestamp,
            } => self.send_message(sender_id, recipient_id, content, message_id, timestamp),
            ChatCommand::MarkRead { user_id, message_id } => {
                self.mark_read(user_id, message_id)
            }
            ChatCommand::ReadBatch { user_id, count } => self.read_batch(user_id, count),
            ChatCommand::DeleteMessage { message_id } => self.delete_message(message_id),
        }
    }

    fn create_account(
        &mut self,
        username: String,
        password_hash: crate::types::PasswordHash,
        user_id: UserId,
        token: crate::types::SessionToken,
    ) -> (CommandOutcome, RowBatch) {
        if self.username_index.contains_key(&username) {
            return (CommandOutcome::UsernameTaken, RowBatch::default());
        }

        let user = User::new(user_id, username.clone(), password_hash);
        self.username_index.insert(username, user_id);
        self.users.insert(user_id, user.clone());

        debug!(user_id, "Created account");
        (
            CommandOutcome::AccountCreated { user_id, token },
            RowBatch {
                put_users: vec![user],
                ..Default::default()
            },
        )
    }

    fn delete_account(&mut self, user_id: UserId) -> (CommandOutcome, RowBatch) {
        let user = match self.users.remove(&user_id) {
            Some(u) => u,
            None => {
                return (
                    CommandOutcome::Rejected {
                        reason: format!("Unknown user: {}", user_id),
                    },
                    RowBatch::default(),
                )
            }
        };
        self.username_index.remove(&user.username);

        // Cascade: every message with this user at either endpoint goes.
        let doomed: Vec<MessageId> = self
            .messages
            .values()
            .filter(|m| m.sender_id == user_id || m.receiver_id == user_id)
            .map(|m| m.message_id)
            .collect();
        for id in &doomed {
            self.messages.remove(id);
        }
        self.conversations.retain(|key, _| !key.involves(user_id));

        // Scrub the deleted user and their messages from everyone else.
        let mut touched = Vec::new();
        for other in self.users.values_mut() {
            let mut changed = false;
            for id in &doomed {
                changed |= other.unread.remove(id);
            }
            if other.recent_conversants.contains(&user_id) {
                other.forget_conversant(user_id);
                changed = true;
            }
            if changed {
                touched.push(other.clone());
            }
        }

        debug!(user_id, cascaded = doomed.len(), "Deleted account");
        (
            CommandOutcome::Done,
            RowBatch {
                put_users: touched,
                delete_users: vec![user_id],
                delete_messages: doomed,
                ..Default::default()
            },
        )
    }

    fn send_message(
        &mut self,
        sender_id: UserId,
        recipient_id: UserId,
        content: String,
        message_id: MessageId,
        timestamp: i64,
    ) -> (CommandOutcome, RowBatch) {
        if !self.users.contains_key(&sender_id) {
            return (
                CommandOutcome::Rejected {
                    reason: format!("Unknown sender: {}", sender_id),
                },
                RowBatch::default(),
            );
        }
        if !self.users.contains_key(&recipient_id) {
            return (
                CommandOutcome::Rejected {
                    reason: format!("Unknown recipient: {}", recipient_id),
                },
                RowBatch::default(),
            );
        }

        let message = Message {
            message_id,
            sender_id,
            receiver_id: recipient_id,
            content,
            read_flag: false,
            timestamp,
        };
        self.messages.insert(message_id, message.clone());
        self.conversations
            .entry(ConversationKey::new(sender_id, recipient_id))
            .or_default()
            .push(message_id);

        let mut put_users = Vec::new();
        if sender_id == recipient_id {
            if let Some(user) = self.users.get_mut(&sender_id) {
                user.unread.insert(message_id);
                user.touch_conversant(sender_id);
                put_users.push(user.clone());
            }
        } else {
            if let Some(recipient) = self.users.get_mut(&recipient_id) {
                recipient.unread.insert(message_id);
                recipient.touch_conversant(sender_id);
                put_users.push(recipient.clone());
            }
            if let Some(sender) = self.users.get_mut(&sender_id) {
                sender.touch_conversant(recipient_id);
                put_users.push(sender.clone());
            }
        }

        debug!(message_id, sender_id, recipient_id, "Stored message");
        (
            CommandOutcome::Done,
            RowBatch {
                put_users,
                put_messages: vec![message],
                ..Default::default()
            },
        )
    }

    fn mark_read(&mut self, user_id: UserId, message_id: MessageId) -> (CommandOutcome, RowBatch) {
        let message = match self.messages.get_mut(&message_id) {
            Some(m) => m,
            None => {
                return (
                    CommandOutcome::Rejected {
                        reason: format!("Unknown message: {}", message_id),
                    },
                    RowBatch::default(),
                )
            }
        };
        if message.receiver_id != user_id {
            return (
                CommandOutcome::Rejected {
                    reason: format!("User {} is not the recipient of message {}", user_id, message_id),
                },
                RowBatch::default(),
            );
        }

        message.read_flag = true;
        let message = message.clone();

        let mut put_users = Vec::new();
        if let Some(user) = self.users.get_mut(&user_id) {
            if user.unread.remove(&message_id) {
                put_users.push(user.clone());
            }
        }

        (
            CommandOutcome::Done,
            RowBatch {
                put_users,
                put_messages: vec![message],
                ..Default::default()
            },
        )
    }

    fn read_batch(&mut self, user_id: UserId, count: u32) -> (CommandOutcome, RowBatch) {
        let user = match self.users.get_mut(&user_id) {
            Some(u) => u,
            None => {
                return (
                    CommandOutcome::Rejected {
                        reason: format!("Unknown user: {}", user_id),
                    },
                    RowBatch::default(),
                )
            }
        };

        // BTreeSet iterates ascending, so this pops the oldest ids first.
        let batch: Vec<MessageId> = user.unread.iter().take(count as usize).copied().collect();
        for id in &batch {
            user.unread.remove(id);
        }
        let user = user.clone();

        let mut put_messages = Vec::new();
        for id in &batch {
            if let Some(message) = self.messages.get_mut(id) {
                message.read_flag = true;
                put_messages.push(message.clone());
            }
        }

        let acknowledged = batch.len() as u32;
        (
            CommandOutcome::ReadAcknowledged { count: acknowledged },
            RowBatch {
                put_users: vec![user],
                put_messages,
                ..Default::default()
            },
        )
    }

    fn delete_message(&mut self, message_id: MessageId) -> (CommandOutcome, RowBatch) {
        let message = match self.messages.remove(&message_id) {
            Some(m) => m,
            None => {
                return (
                    CommandOutcome::Rejected {
                        reason: format!("Unknown message: {}", message_id),
                    },
                    RowBatch::default(),
                )
            }
        };

        let key = ConversationKey::new(message.sender_id, message.receiver_id);
        let now_empty = match self.conversations.get_mut(&key) {
            Some(ids) => {
                ids.retain(|id| *id != message_id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.conversations.remove(&key);
        }

        let mut put_users = Vec::new();
        if let Some(recipient) = self.users.get_mut(&message.receiver_id) {
            if recipient.unread.remove(&message_id) {
                put_users.push(recipient.clone());
            }
        }

        (
            CommandOutcome::Done,
            RowBatch {
                put_users,
                delete_messages: vec![message_id],
                ..Default::default()
            },
        )
    }
}

impl StateMachine for ChatStateMachine {
    type Result = CommandOutcome;

    fn apply(&mut self, index: LogIndex, command: &[u8]) -> Result<CommandOutcome> {
        let (outcome, rows) = match ChatCommand::decode(command) {
            Ok(cmd) => self.apply_command(cmd),
            Err(e) => {
                // Same bytes decode the same way everywhere: a deterministic
                // rejection, not a consensus failure.
                warn!(index, error = %e, "Undecodable command in committed entry");
                (
                    CommandOutcome::Rejected {
                        reason: format!("Undecodable command: {}", e),
                    },
                    RowBatch::default(),
                )
            }
        };

        // Row effects and the applied cursor land atomically; a storage
        // failure here is fatal to the node.
        self.store.apply_rows(index, &rows)?;
        Ok(outcome)
    }
}
