//! In-memory session table.
//!
//! Maps user ids to opaque 32-byte tokens minted on CreateAccount and
//! Login. Sessions are per-node and never replicated; after a failover the
//! client re-authenticates when it sees `UNAUTHENTICATED`.

use crate::types::{SessionToken, UserId};
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;

/// Node-local session table.
#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<UserId, SessionToken>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh random token.
    pub fn mint_token() -> SessionToken {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        SessionToken(bytes)
    }

    /// Install (or replace) the session for a user.
    pub fn insert(&self, user_id: UserId, token: SessionToken) {
        self.sessions.write().insert(user_id, token);
    }

    /// Drop a user's session (logout, account deletion).
    pub fn remove(&self, user_id: UserId) {
        self.sessions.write().remove(&user_id);
    }

    /// Check that the presented token matches the live session.
    pub fn validate(&self, user_id: UserId, token: &SessionToken) -> bool {
        self.sessions
            .read()
            .get(&user_id)
            .map(|t| t == token)
            .unwrap_or(false)
    }
}
