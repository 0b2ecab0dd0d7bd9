//! The parley node server.
//!
//! One axum listener carries both surfaces: the Raft peer endpoints
//! (`/raft/*`) bridged into the consensus event loop, and the application
//! RPC surface (`/api/*`) that validates sessions, classifies each call as
//! mutation or read, and routes mutations through the leader. Outbound peer
//! traffic goes through [`HttpTransport`], a reusable reqwest client per
//! node.

use super::{ChatCommand, ChatStateMachine, CommandOutcome, IdAllocator};
use crate::config::ParleyConfig;
use crate::error::{ParleyError, Result};
use crate::raft::{
    AppendEntriesRequest, AppendEntriesResponse, RaftCommand, RaftConfig, RaftNode, RaftStatus,
    RaftTransport, RequestVoteRequest, RequestVoteResponse,
};
use crate::session::SessionTable;
use crate::shutdown::ShutdownCoordinator;
use crate::store::Store;
use crate::types::{MessageId, NodeId, PasswordHash, SessionToken, UserId};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

// ----------------------------------------------------------------------
// Wire error model
// ----------------------------------------------------------------------

/// Wire-level error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "UNAUTHENTICATED")]
    Unauthenticated,
    #[serde(rename = "FAILED_PRECONDITION")]
    FailedPrecondition,
    #[serde(rename = "UNAVAILABLE")]
    Unavailable,
    #[serde(rename = "INTERNAL")]
    Internal,
    #[serde(rename = "DEADLINE_EXCEEDED")]
    DeadlineExceeded,
}

/// JSON error body returned on any failed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    /// Last-known leader address on `FAILED_PRECONDITION`; empty when the
    /// leader is unknown and the client should re-probe.
    #[serde(default)]
    pub leader_hint: Option<String>,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self.code {
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

// ----------------------------------------------------------------------
// Application wire types (shared with the client library)
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub username: String,
    pub password_hash: PasswordHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountResponse {
    pub user_id: UserId,
    pub session_token: SessionToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password_hash: PasswordHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub status: LoginStatus,
    pub session_token: SessionToken,
    pub unread_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutRequest {
    pub user_id: UserId,
    pub session_token: SessionToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAccountsRequest {
    pub user_id: UserId,
    pub session_token: SessionToken,
    pub wildcard: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAccountsResponse {
    pub count: u32,
    pub usernames: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRequest {
    pub user_id: UserId,
    pub session_token: SessionToken,
    pub conversant_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub message_id: MessageId,
    /// True when the caller sent this message.
    pub sender_flag: bool,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub count: u32,
    pub messages: Vec<ConversationMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: UserId,
    pub session_token: SessionToken,
    pub recipient_id: UserId,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadMessagesRequest {
    pub user_id: UserId,
    pub session_token: SessionToken,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMessageRequest {
    pub user_id: UserId,
    pub message_id: MessageId,
    pub session_token: SessionToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAccountRequest {
    pub user_id: UserId,
    pub session_token: SessionToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadMessagesRequest {
    pub user_id: UserId,
    pub session_token: SessionToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadMessageInfo {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadMessagesResponse {
    pub count: u32,
    pub messages: Vec<UnreadMessageInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInfoRequest {
    pub user_id: UserId,
    pub session_token: SessionToken,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInfoResponse {
    pub read_flag: bool,
    pub sender_id: UserId,
    pub content_length: u32,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsernameByIdRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsernameByIdResponse {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadRequest {
    pub user_id: UserId,
    pub session_token: SessionToken,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoundStatus {
    #[serde(rename = "FOUND")]
    Found,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserByUsernameRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserByUsernameResponse {
    pub status: FoundStatus,
    pub user_id: UserId,
}

// ----------------------------------------------------------------------
// Outbound peer transport
// ----------------------------------------------------------------------

/// HTTP transport to Raft peers: one reusable client, short timeouts, JSON
/// bodies. Failures surface as errors for the node to log and retry on the
/// next tick.
pub struct HttpTransport {
    peers: HashMap<NodeId, String>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(peers: HashMap<NodeId, String>, rpc_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(rpc_timeout)
            .timeout(rpc_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { peers, client }
    }

    fn peer_url(&self, target: NodeId, endpoint: &str) -> Result<String> {
        self.peers
            .get(&target)
            .map(|addr| format!("http://{}/{}", addr, endpoint))
            .ok_or(ParleyError::NodeNotFound(target))
    }

    async fn post_json<Req: Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        request: &Req,
    ) -> Result<Resp> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| ParleyError::Network(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| ParleyError::Deserialization(e.to_string()))
    }
}

#[async_trait::async_trait]
impl RaftTransport for HttpTransport {
    async fn request_vote(
        &self,
        target: NodeId,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse> {
        let url = self.peer_url(target, "raft/request_vote")?;
        self.post_json(&url, &request).await
    }

    async fn append_entries(
        &self,
        target: NodeId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let url = self.peer_url(target, "raft/append_entries")?;
        self.post_json(&url, &request).await
    }
}

// ----------------------------------------------------------------------
// Server state and helpers
// ----------------------------------------------------------------------

/// Shared state for the axum handlers.
#[derive(Clone)]
pub struct ServerState {
    command_tx: mpsc::Sender<RaftCommand<CommandOutcome>>,
    state_machine: Arc<RwLock<ChatStateMachine>>,
    sessions: Arc<SessionTable>,
    ids: Arc<IdAllocator>,
    /// Full cluster map (including self), for leader redirect hints.
    cluster: Arc<BTreeMap<NodeId, String>>,
    proposal_timeout: Duration,
}

impl ServerState {
    /// Translate an internal error into its wire form, attaching the leader
    /// hint where we have one.
    fn api_error(&self, e: ParleyError) -> ApiError {
        match e {
            ParleyError::NotLeader { leader } => {
                let hint = leader
                    .and_then(|id| self.cluster.get(&id).cloned())
                    .unwrap_or_default();
                ApiError {
                    code: ErrorCode::FailedPrecondition,
                    message: format!("Not the leader. Try {}", hint),
                    leader_hint: Some(hint),
                }
            }
            ParleyError::Unauthenticated(user) => ApiError {
                code: ErrorCode::Unauthenticated,
                message: format!("Invalid session token for user {}", user),
                leader_hint: None,
            },
            ParleyError::CommitTimeout(ms) => ApiError {
                code: ErrorCode::DeadlineExceeded,
                message: format!("Commit wait timed out after {}ms", ms),
                leader_hint: None,
            },
            ParleyError::NoLeader | ParleyError::Unavailable(_) | ParleyError::Network(_) => {
                ApiError {
                    code: ErrorCode::Unavailable,
                    message: e.to_string(),
                    leader_hint: None,
                }
            }
            other => ApiError {
                code: ErrorCode::Internal,
                message: other.to_string(),
                leader_hint: None,
            },
        }
    }

    /// Session check performed before any authenticated call, read or write.
    fn authenticate(
        &self,
        user_id: UserId,
        token: &SessionToken,
    ) -> std::result::Result<(), ApiError> {
        if self.sessions.validate(user_id, token) {
            Ok(())
        } else {
            Err(self.api_error(ParleyError::Unauthenticated(user_id)))
        }
    }

    /// Route a mutation through Raft and wait for its applied outcome.
    async fn propose(&self, cmd: ChatCommand) -> std::result::Result<CommandOutcome, ApiError> {
        let data = cmd.encode().map_err(|e| self.api_error(e))?;

        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(RaftCommand::Propose { data, response: tx })
            .await
            .map_err(|_| {
                self.api_error(ParleyError::Unavailable("Raft node is down".into()))
            })?;

        let outcome = match tokio::time::timeout(self.proposal_timeout, rx).await {
            Ok(Ok(result)) => result.map_err(|e| self.api_error(e))?,
            Ok(Err(_)) => {
                return Err(self.api_error(ParleyError::Unavailable(
                    "Raft node dropped the proposal".into(),
                )))
            }
            // The entry may still commit later; the client retries.
            Err(_) => {
                return Err(self.api_error(ParleyError::CommitTimeout(
                    self.proposal_timeout.as_millis() as u64,
                )))
            }
        };

        match outcome {
            CommandOutcome::Rejected { reason } => {
                Err(self.api_error(ParleyError::Rejected(reason)))
            }
            other => Ok(other),
        }
    }

    async fn raft_status(&self) -> std::result::Result<RaftStatus, ApiError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(RaftCommand::Status { response: tx })
            .await
            .map_err(|_| {
                self.api_error(ParleyError::Unavailable("Raft node is down".into()))
            })?;
        rx.await.map_err(|_| {
            self.api_error(ParleyError::Unavailable("Raft node is down".into()))
        })
    }
}

fn wall_clock_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ----------------------------------------------------------------------
// Server bootstrap
// ----------------------------------------------------------------------

/// Build and run a parley node: store, state machine, Raft, and the HTTP
/// surface. Returns once the shutdown coordinator fires.
pub async fn run_server(config: &ParleyConfig, shutdown: ShutdownCoordinator) -> Result<()> {
    let addr = config.own_addr()?;
    let peers: HashMap<NodeId, String> = config.peers().into_iter().collect();

    std::fs::create_dir_all(&config.storage.data_dir)?;
    let store = Arc::new(Store::open(config.storage.data_dir.join("db"))?);
    let state_machine = Arc::new(RwLock::new(ChatStateMachine::recover(Arc::clone(&store))?));

    let raft_config = RaftConfig {
        node_id: config.node.id,
        peers: peers.clone(),
        election_timeout_min: config.raft.election_timeout_min,
        election_timeout_max: config.raft.election_timeout_max,
        heartbeat_interval: config.raft.heartbeat_interval,
        // Peer RPCs must not outlive a heartbeat slot.
        rpc_timeout: config.raft.heartbeat_interval,
        max_entries_per_append: config.raft.max_entries_per_append,
    };

    let transport = Arc::new(HttpTransport::new(peers, config.raft.heartbeat_interval));
    let (raft_node, command_rx) =
        RaftNode::new(raft_config, store, Arc::clone(&state_machine), transport)?;
    let command_tx = raft_node.command_sender();

    let server_state = ServerState {
        command_tx: command_tx.clone(),
        state_machine,
        sessions: Arc::new(SessionTable::new()),
        ids: Arc::new(IdAllocator::new()),
        cluster: Arc::new(config.node.cluster.clone()),
        proposal_timeout: config.raft.proposal_timeout,
    };

    // If the consensus loop dies (fatal storage error), stop serving rather
    // than keep answering from a node that can no longer persist state.
    let raft_shutdown = shutdown.clone();
    let raft_handle = tokio::spawn(async move {
        raft_node.run(command_rx).await;
        raft_shutdown.shutdown();
    });

    let app = router(server_state);

    let listener = TcpListener::bind(addr).await?;
    info!(node_id = config.node.id, addr = %addr, "parley node listening");

    let wait = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { wait.wait_for_shutdown().await })
        .await
        .map_err(|e| ParleyError::Network(e.to_string()))?;

    let _ = command_tx.send(RaftCommand::Shutdown).await;
    let _ = raft_handle.await;
    Ok(())
}

/// Assemble the full route table.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(handle_status))
        // Raft peer surface
        .route("/raft/request_vote", post(handle_request_vote))
        .route("/raft/append_entries", post(handle_append_entries))
        // Application surface
        .route("/api/create_account", post(handle_create_account))
        .route("/api/login", post(handle_login))
        .route("/api/logout", post(handle_logout))
        .route("/api/list_accounts", post(handle_list_accounts))
        .route("/api/conversation", post(handle_conversation))
        .route("/api/send_message", post(handle_send_message))
        .route("/api/read_messages", post(handle_read_messages))
        .route("/api/delete_message", post(handle_delete_message))
        .route("/api/delete_account", post(handle_delete_account))
        .route("/api/unread_messages", post(handle_unread_messages))
        .route("/api/message_info", post(handle_message_info))
        .route("/api/username_by_id", post(handle_username_by_id))
        .route("/api/mark_read", post(handle_mark_read))
        .route("/api/user_by_username", post(handle_user_by_username))
        .with_state(state)
}

// ----------------------------------------------------------------------
// Raft handlers
// ----------------------------------------------------------------------

async fn health_check() -> &'static str {
    "OK"
}

async fn handle_status(
    State(state): State<ServerState>,
) -> std::result::Result<Json<RaftStatus>, ApiError> {
    Ok(Json(state.raft_status().await?))
}

async fn handle_request_vote(
    State(state): State<ServerState>,
    Json(request): Json<RequestVoteRequest>,
) -> Json<RequestVoteResponse> {
    let (tx, rx) = oneshot::channel();
    let fallback = RequestVoteResponse {
        term: 0,
        vote_granted: false,
    };

    if state
        .command_tx
        .send(RaftCommand::RequestVote { request, response: tx })
        .await
        .is_err()
    {
        return Json(fallback);
    }

    Json(rx.await.unwrap_or(fallback))
}

async fn handle_append_entries(
    State(state): State<ServerState>,
    Json(request): Json<AppendEntriesRequest>,
) -> Json<AppendEntriesResponse> {
    let (tx, rx) = oneshot::channel();
    let fallback = AppendEntriesResponse::rejected(0, None);

    if state
        .command_tx
        .send(RaftCommand::AppendEntries { request, response: tx })
        .await
        .is_err()
    {
        return Json(fallback);
    }

    Json(rx.await.unwrap_or(fallback))
}

// ----------------------------------------------------------------------
// Application handlers: mutations
// ----------------------------------------------------------------------

async fn handle_create_account(
    State(state): State<ServerState>,
    Json(request): Json<CreateAccountRequest>,
) -> std::result::Result<Json<CreateAccountResponse>, ApiError> {
    // The leader assigns the id and token before the entry is appended, so
    // every replica applies the identical command.
    let user_id = {
        let sm = state.state_machine.read();
        state.ids.next_user_id(sm.max_user_id())
    };
    let token = SessionTable::mint_token();

    let outcome = state
        .propose(ChatCommand::CreateAccount {
            username: request.username,
            password_hash: request.password_hash,
            user_id,
            token,
        })
        .await?;

    match outcome {
        CommandOutcome::AccountCreated { user_id, token } => {
            // Only the originating node keeps the session.
            state.sessions.insert(user_id, token);
            Ok(Json(CreateAccountResponse {
                user_id,
                session_token: token,
            }))
        }
        CommandOutcome::UsernameTaken => Err(state.api_error(ParleyError::Rejected(
            "Username already taken".into(),
        ))),
        other => Err(state.api_error(ParleyError::Internal(format!(
            "Unexpected outcome: {:?}",
            other
        )))),
    }
}

async fn handle_send_message(
    State(state): State<ServerState>,
    Json(request): Json<SendMessageRequest>,
) -> std::result::Result<Json<Empty>, ApiError> {
    state.authenticate(request.sender_id, &request.session_token)?;

    let message_id = {
        let sm = state.state_machine.read();
        state.ids.next_message_id(sm.max_message_id())
    };

    state
        .propose(ChatCommand::SendMessage {
            sender_id: request.sender_id,
            recipient_id: request.recipient_id,
            content: request.content,
            message_id,
            timestamp: wall_clock_secs(),
        })
        .await?;

    Ok(Json(Empty {}))
}

async fn handle_read_messages(
    State(state): State<ServerState>,
    Json(request): Json<ReadMessagesRequest>,
) -> std::result::Result<Json<Empty>, ApiError> {
    state.authenticate(request.user_id, &request.session_token)?;

    state
        .propose(ChatCommand::ReadBatch {
            user_id: request.user_id,
            count: request.count,
        })
        .await?;

    Ok(Json(Empty {}))
}

async fn handle_delete_message(
    State(state): State<ServerState>,
    Json(request): Json<DeleteMessageRequest>,
) -> std::result::Result<Json<Empty>, ApiError> {
    state.authenticate(request.user_id, &request.session_token)?;

    state
        .propose(ChatCommand::DeleteMessage {
            message_id: request.message_id,
        })
        .await?;

    Ok(Json(Empty {}))
}

async fn handle_delete_account(
    State(state): State<ServerState>,
    Json(request): Json<DeleteAccountRequest>,
) -> std::result::Result<Json<Empty>, ApiError> {
    state.authenticate(request.user_id, &request.session_token)?;

    state
        .propose(ChatCommand::DeleteAccount {
            user_id: request.user_id,
        })
        .await?;

    state.sessions.remove(request.user_id);
    Ok(Json(Empty {}))
}

async fn handle_mark_read(
    State(state): State<ServerState>,
    Json(request): Json<MarkReadRequest>,
) -> std::result::Result<Json<Empty>, ApiError> {
    state.authenticate(request.user_id, &request.session_token)?;

    state
        .propose(ChatCommand::MarkRead {
            user_id: request.user_id,
            message_id: request.message_id,
        })
        .await?;

    Ok(Json(Empty {}))
}

// ----------------------------------------------------------------------
// Application handlers: login and logout (session table only)
// ----------------------------------------------------------------------

/// Login reads the applied user row and mints a node-local session; the
/// Raft log stays free of session churn.
async fn handle_login(
    State(state): State<ServerState>,
    Json(request): Json<LoginRequest>,
) -> std::result::Result<Json<LoginResponse>, ApiError> {
    let (user_id, unread_count) = {
        let sm = state.state_machine.read();
        match sm.user_by_username(&request.username) {
            Some(user) if user.password_hash == request.password_hash => {
                (user.user_id, user.unread.len() as u32)
            }
            _ => {
                return Ok(Json(LoginResponse {
                    status: LoginStatus::Failure,
                    session_token: SessionToken::zero(),
                    unread_count: 0,
                }))
            }
        }
    };

    let token = SessionTable::mint_token();
    state.sessions.insert(user_id, token);

    Ok(Json(LoginResponse {
        status: LoginStatus::Success,
        session_token: token,
        unread_count,
    }))
}

async fn handle_logout(
    State(state): State<ServerState>,
    Json(request): Json<LogoutRequest>,
) -> std::result::Result<Json<Empty>, ApiError> {
    state.authenticate(request.user_id, &request.session_token)?;
    state.sessions.remove(request.user_id);
    Ok(Json(Empty {}))
}

// ----------------------------------------------------------------------
// Application handlers: reads from local applied state
// ----------------------------------------------------------------------

async fn handle_list_accounts(
    State(state): State<ServerState>,
    Json(request): Json<ListAccountsRequest>,
) -> std::result::Result<Json<ListAccountsResponse>, ApiError> {
    state.authenticate(request.user_id, &request.session_token)?;

    let usernames: Vec<String> = state
        .state_machine
        .read()
        .list_accounts(&request.wildcard)
        .into_iter()
        .map(|(_, name)| name)
        .collect();

    Ok(Json(ListAccountsResponse {
        count: usernames.len() as u32,
        usernames,
    }))
}

async fn handle_conversation(
    State(state): State<ServerState>,
    Json(request): Json<ConversationRequest>,
) -> std::result::Result<Json<ConversationResponse>, ApiError> {
    state.authenticate(request.user_id, &request.session_token)?;

    let messages: Vec<ConversationMessage> = state
        .state_machine
        .read()
        .conversation(request.user_id, request.conversant_id)
        .into_iter()
        .map(|m| ConversationMessage {
            message_id: m.message_id,
            sender_flag: m.sender_id == request.user_id,
            content: m.content.clone(),
        })
        .collect();

    Ok(Json(ConversationResponse {
        count: messages.len() as u32,
        messages,
    }))
}

async fn handle_unread_messages(
    State(state): State<ServerState>,
    Json(request): Json<UnreadMessagesRequest>,
) -> std::result::Result<Json<UnreadMessagesResponse>, ApiError> {
    state.authenticate(request.user_id, &request.session_token)?;

    let messages: Vec<UnreadMessageInfo> = state
        .state_machine
        .read()
        .unread_messages(request.user_id)
        .into_iter()
        .map(|m| UnreadMessageInfo {
            message_id: m.message_id,
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
        })
        .collect();

    Ok(Json(UnreadMessagesResponse {
        count: messages.len() as u32,
        messages,
    }))
}

async fn handle_message_info(
    State(state): State<ServerState>,
    Json(request): Json<MessageInfoRequest>,
) -> std::result::Result<Json<MessageInfoResponse>, ApiError> {
    state.authenticate(request.user_id, &request.session_token)?;

    let sm = state.state_machine.read();
    let message = sm
        .message(request.message_id)
        .ok_or_else(|| state.api_error(ParleyError::UnknownMessage(request.message_id)))?;

    Ok(Json(MessageInfoResponse {
        read_flag: message.read_flag,
        sender_id: message.sender_id,
        content_length: message.content.len() as u32,
        content: message.content.clone(),
    }))
}

async fn handle_username_by_id(
    State(state): State<ServerState>,
    Json(request): Json<UsernameByIdRequest>,
) -> std::result::Result<Json<UsernameByIdResponse>, ApiError> {
    let sm = state.state_machine.read();
    let user = sm
        .user(request.user_id)
        .ok_or_else(|| state.api_error(ParleyError::UnknownUser(request.user_id)))?;

    Ok(Json(UsernameByIdResponse {
        username: user.username.clone(),
    }))
}

async fn handle_user_by_username(
    State(state): State<ServerState>,
    Json(request): Json<UserByUsernameRequest>,
) -> std::result::Result<Json<UserByUsernameResponse>, ApiError> {
    let sm = state.state_machine.read();
    Ok(Json(match sm.user_by_username(&request.username) {
        Some(user) => UserByUsernameResponse {
            status: FoundStatus::Found,
            user_id: user.user_id,
        },
        None => UserByUsernameResponse {
            status: FoundStatus::NotFound,
            user_id: 0,
        },
    }))
}
