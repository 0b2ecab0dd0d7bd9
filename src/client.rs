//! Client library for talking to parley nodes.
//!
//! Wraps every application RPC in a typed async method. Mutations sent to a
//! follower come back with a `FAILED_PRECONDITION` leader hint; the
//! [`ParleyClient::redirected`] helper builds a client for the hinted
//! address so callers can retry without chaining forwards.

use crate::chat::server::{
    ApiError, ConversationRequest, ConversationResponse, CreateAccountRequest,
    CreateAccountResponse, DeleteAccountRequest, DeleteMessageRequest, Empty, ErrorCode,
    ListAccountsRequest, ListAccountsResponse, LoginRequest, LoginResponse, LogoutRequest,
    MarkReadRequest, MessageInfoRequest, MessageInfoResponse, ReadMessagesRequest,
    SendMessageRequest, UnreadMessagesRequest, UnreadMessagesResponse, UserByUsernameRequest,
    UserByUsernameResponse, UsernameByIdRequest, UsernameByIdResponse,
};
use crate::error::{ParleyError, Result};
use crate::raft::RaftStatus;
use crate::types::{MessageId, PasswordHash, SessionToken, UserId};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Default connection timeout for client requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout for client operations.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for one parley node.
#[derive(Clone)]
pub struct ParleyClient {
    base_url: String,
    client: Client,
}

impl ParleyClient {
    /// Create a client for `host:port` with default timeouts.
    pub fn new(addr: &str) -> Self {
        Self::with_timeouts(addr, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with custom timeouts.
    pub fn with_timeouts(addr: &str, connect_timeout: Duration, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: format!("http://{}", addr),
            client,
        }
    }

    /// A client for the leader address carried in a `NotLeader`-style error
    /// hint, when one is present. The caller retries there itself; servers
    /// never chain forwards.
    pub fn redirected(&self, error: &ParleyError) -> Option<Self> {
        match error {
            ParleyError::NotLeaderHint { addr } if !addr.is_empty() => Some(Self {
                base_url: format!("http://{}", addr),
                client: self.client.clone(),
            }),
            _ => None,
        }
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: &Req,
    ) -> Result<Resp> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ParleyError::Network(e.to_string()))?;

        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| ParleyError::Deserialization(e.to_string()))
        } else {
            let error: ApiError = response
                .json()
                .await
                .map_err(|e| ParleyError::Deserialization(e.to_string()))?;
            Err(decode_api_error(error))
        }
    }

    /// Check node liveness.
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ParleyError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }

    /// Fetch the node's Raft status (role, term, progress, leader hint).
    pub async fn status(&self) -> Result<RaftStatus> {
        let url = format!("{}/status", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ParleyError::Network(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| ParleyError::Deserialization(e.to_string()))
    }

    /// Create an account; returns the assigned id and session token.
    pub async fn create_account(
        &self,
        username: &str,
        password_hash: PasswordHash,
    ) -> Result<CreateAccountResponse> {
        self.post(
            "api/create_account",
            &CreateAccountRequest {
                username: username.to_string(),
                password_hash,
            },
        )
        .await
    }

    /// Log in; on success the response carries a fresh token and the
    /// unread count.
    pub async fn login(&self, username: &str, password_hash: PasswordHash) -> Result<LoginResponse> {
        self.post(
            "api/login",
            &LoginRequest {
                username: username.to_string(),
                password_hash,
            },
        )
        .await
    }

    /// Drop this node's session for the user.
    pub async fn logout(&self, user_id: UserId, session_token: SessionToken) -> Result<()> {
        let _: Empty = self
            .post("api/logout", &LogoutRequest { user_id, session_token })
            .await?;
        Ok(())
    }

    /// List usernames matching a `*`/`?` wildcard.
    pub async fn list_accounts(
        &self,
        user_id: UserId,
        session_token: SessionToken,
        wildcard: &str,
    ) -> Result<ListAccountsResponse> {
        self.post(
            "api/list_accounts",
            &ListAccountsRequest {
                user_id,
                session_token,
                wildcard: wildcard.to_string(),
            },
        )
        .await
    }

    /// The caller's conversation with another user, ascending by id.
    pub async fn conversation(
        &self,
        user_id: UserId,
        session_token: SessionToken,
        conversant_id: UserId,
    ) -> Result<ConversationResponse> {
        self.post(
            "api/conversation",
            &ConversationRequest {
                user_id,
                session_token,
                conversant_id,
            },
        )
        .await
    }

    /// Send a message.
    pub async fn send_message(
        &self,
        sender_id: UserId,
        session_token: SessionToken,
        recipient_id: UserId,
        content: &str,
    ) -> Result<()> {
        let _: Empty = self
            .post(
                "api/send_message",
                &SendMessageRequest {
                    sender_id,
                    session_token,
                    recipient_id,
                    content: content.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Mark up to `count` unread messages read, oldest first.
    pub async fn read_messages(
        &self,
        user_id: UserId,
        session_token: SessionToken,
        count: u32,
    ) -> Result<()> {
        let _: Empty = self
            .post(
                "api/read_messages",
                &ReadMessagesRequest {
                    user_id,
                    session_token,
                    count,
                },
            )
            .await?;
        Ok(())
    }

    /// Delete a message.
    pub async fn delete_message(
        &self,
        user_id: UserId,
        message_id: MessageId,
        session_token: SessionToken,
    ) -> Result<()> {
        let _: Empty = self
            .post(
                "api/delete_message",
                &DeleteMessageRequest {
                    user_id,
                    message_id,
                    session_token,
                },
            )
            .await?;
        Ok(())
    }

    /// Delete the caller's account and everything it touches.
    pub async fn delete_account(&self, user_id: UserId, session_token: SessionToken) -> Result<()> {
        let _: Empty = self
            .post(
                "api/delete_account",
                &DeleteAccountRequest { user_id, session_token },
            )
            .await?;
        Ok(())
    }

    /// Unread message envelopes for the caller.
    pub async fn unread_messages(
        &self,
        user_id: UserId,
        session_token: SessionToken,
    ) -> Result<UnreadMessagesResponse> {
        self.post(
            "api/unread_messages",
            &UnreadMessagesRequest { user_id, session_token },
        )
        .await
    }

    /// Full details of one message.
    pub async fn message_info(
        &self,
        user_id: UserId,
        session_token: SessionToken,
        message_id: MessageId,
    ) -> Result<MessageInfoResponse> {
        self.post(
            "api/message_info",
            &MessageInfoRequest {
                user_id,
                session_token,
                message_id,
            },
        )
        .await
    }

    /// Look up a username by id.
    pub async fn username_by_id(&self, user_id: UserId) -> Result<UsernameByIdResponse> {
        self.post("api/username_by_id", &UsernameByIdRequest { user_id })
            .await
    }

    /// Mark one message read.
    pub async fn mark_read(
        &self,
        user_id: UserId,
        session_token: SessionToken,
        message_id: MessageId,
    ) -> Result<()> {
        let _: Empty = self
            .post(
                "api/mark_read",
                &MarkReadRequest {
                    user_id,
                    session_token,
                    message_id,
                },
            )
            .await?;
        Ok(())
    }

    /// Look up a user id by username.
    pub async fn user_by_username(&self, username: &str) -> Result<UserByUsernameResponse> {
        self.post(
            "api/user_by_username",
            &UserByUsernameRequest {
                username: username.to_string(),
            },
        )
        .await
    }
}

/// Map a wire error body back onto the internal error type.
fn decode_api_error(error: ApiError) -> ParleyError {
    match error.code {
        ErrorCode::Unauthenticated => ParleyError::Unauthenticated(0),
        ErrorCode::FailedPrecondition => ParleyError::NotLeaderHint {
            addr: error.leader_hint.unwrap_or_default(),
        },
        ErrorCode::Unavailable => ParleyError::Unavailable(error.message),
        ErrorCode::DeadlineExceeded => ParleyError::CommitTimeout(0),
        ErrorCode::Internal => ParleyError::Internal(error.message),
    }
}
