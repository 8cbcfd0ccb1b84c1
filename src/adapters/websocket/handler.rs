//! WebSocket upgrade handler and per-connection pumps.
//!
//! Handles the HTTP → WebSocket upgrade and manages the connection lifecycle:
//! 1. Resolve identity (bearer token, or fallback parameters outside production)
//! 2. Upgrade to WebSocket and register with the hub
//! 3. Run the inbound and outbound pumps until either ends
//! 4. Unregister from the hub
//!
//! ```text
//!   client ──► inbound pump ──► HubHandle (subscribe/unsubscribe)
//!                   │
//!                   └── replies (acks, pong, errors) ──┐
//!                                                      ▼
//!   client ◄── outbound pump ◄── mailbox (events) + heartbeat ticker
//! ```
//!
//! The pumps are generic over `Sink`/`Stream` so they can be driven by
//! in-memory channels in tests.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::AppConfig;
use crate::domain::foundation::{
    AuthError, ConnectionId, OrganizationId, UserId, ValidationError, WorkspaceId,
};
use crate::domain::realtime::ConnectionContext;
use crate::ports::SessionValidator;

use super::connection::{ConnectionHandle, DisconnectReason};
use super::hub::{HubError, HubHandle, Mailbox};
use super::messages::{ClientMessage, ProtocolError, ServerMessage};

/// Capacity of the per-connection queue of replies to client frames.
const REPLY_QUEUE_CAPACITY: usize = 32;

// ════════════════════════════════════════════════════════════════════════════════
// State
// ════════════════════════════════════════════════════════════════════════════════

/// Per-connection tuning taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub heartbeat_interval: Duration,
    pub write_timeout: Duration,
    pub max_message_bytes: usize,
    pub allow_identity_fallback: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            max_message_bytes: 64 * 1024,
            allow_identity_fallback: false,
        }
    }
}

impl From<&AppConfig> for ConnectionSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            heartbeat_interval: config.realtime.heartbeat_interval(),
            write_timeout: config.realtime.write_timeout(),
            max_message_bytes: config.realtime.max_message_bytes,
            allow_identity_fallback: config.auth.allow_identity_fallback
                && !config.server.is_production(),
        }
    }
}

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct RealtimeState {
    pub hub: HubHandle,
    /// Absent when no token validation is configured.
    pub validator: Option<Arc<dyn SessionValidator>>,
    pub settings: ConnectionSettings,
}

impl RealtimeState {
    pub fn new(
        hub: HubHandle,
        validator: Option<Arc<dyn SessionValidator>>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            hub,
            validator,
            settings,
        }
    }
}

/// Which identities a handshake can present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySources {
    /// Bearer tokens only.
    Tokens,
    /// Bearer tokens, or query parameters when no token is sent.
    TokensAndFallback,
    /// Query parameters only; a token is refused as unverifiable.
    FallbackOnly,
    /// Every handshake is refused.
    Nothing,
}

impl RealtimeState {
    pub fn identity_sources(&self) -> IdentitySources {
        match (self.validator.is_some(), self.settings.allow_identity_fallback) {
            (true, false) => IdentitySources::Tokens,
            (true, true) => IdentitySources::TokensAndFallback,
            (false, true) => IdentitySources::FallbackOnly,
            (false, false) => IdentitySources::Nothing,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Handshake
// ════════════════════════════════════════════════════════════════════════════════

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeParams {
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub organization_id: Option<String>,
    pub workspace_id: Option<String>,
}

/// Reasons a handshake is refused before upgrading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("Authentication required")]
    MissingIdentity,

    #[error("{0}")]
    Rejected(AuthError),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(ValidationError),

    #[error("Authentication service unavailable")]
    AuthUnavailable(String),
}

impl HandshakeError {
    pub fn status(&self) -> StatusCode {
        match self {
            HandshakeError::MissingIdentity | HandshakeError::Rejected(_) => StatusCode::UNAUTHORIZED,
            HandshakeError::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
            HandshakeError::AuthUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            HandshakeError::MissingIdentity => "MISSING_IDENTITY",
            HandshakeError::Rejected(AuthError::TokenExpired) => "TOKEN_EXPIRED",
            HandshakeError::Rejected(_) => "INVALID_TOKEN",
            HandshakeError::InvalidIdentity(_) => "INVALID_IDENTITY",
            HandshakeError::AuthUnavailable(_) => "AUTH_UNAVAILABLE",
        }
    }
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        if let HandshakeError::AuthUnavailable(detail) = &self {
            tracing::error!(detail = %detail, "Auth service unavailable during handshake");
        }
        (
            self.status(),
            Json(serde_json::json!({
                "error": self.to_string(),
                "code": self.code(),
            })),
        )
            .into_response()
    }
}

/// Determines who is connecting.
///
/// A bearer token (header first, then the `token` parameter) is always
/// validated. Without one, the identity parameters are trusted only when
/// `allow_fallback` is set.
pub async fn resolve_identity(
    validator: Option<&dyn SessionValidator>,
    allow_fallback: bool,
    headers: &HeaderMap,
    params: &HandshakeParams,
) -> Result<ConnectionContext, HandshakeError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .or(params.token.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if let Some(token) = token {
        let validator = validator.ok_or_else(|| {
            HandshakeError::AuthUnavailable("no session validator configured".to_string())
        })?;
        return match validator.validate(token).await {
            Ok(user) => Ok(ConnectionContext::from(user)),
            Err(AuthError::ServiceUnavailable(detail)) => {
                Err(HandshakeError::AuthUnavailable(detail))
            }
            Err(e) => Err(HandshakeError::Rejected(e)),
        };
    }

    let user_id = params.user_id.as_deref().filter(|u| !u.is_empty());
    match user_id {
        Some(user_id) if allow_fallback => fallback_context(user_id, params),
        _ => Err(HandshakeError::MissingIdentity),
    }
}

fn fallback_context(
    user_id: &str,
    params: &HandshakeParams,
) -> Result<ConnectionContext, HandshakeError> {
    let mut context =
        ConnectionContext::new(UserId::new(user_id).map_err(HandshakeError::InvalidIdentity)?);
    if let Some(org) = params.organization_id.as_deref().filter(|o| !o.is_empty()) {
        context = context
            .with_organization(OrganizationId::new(org).map_err(HandshakeError::InvalidIdentity)?);
    }
    if let Some(ws) = params.workspace_id.as_deref().filter(|w| !w.is_empty()) {
        context =
            context.with_workspace(WorkspaceId::new(ws).map_err(HandshakeError::InvalidIdentity)?);
    }
    Ok(context)
}

/// Handle WebSocket upgrade requests.
///
/// Route: `GET /ws`
///
/// Identity is resolved before the upgrade; a refused handshake never
/// becomes a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<RealtimeState>,
    Query(params): Query<HandshakeParams>,
    headers: HeaderMap,
) -> Response {
    let context = match resolve_identity(
        state.validator.as_deref(),
        state.settings.allow_identity_fallback,
        &headers,
        &params,
    )
    .await
    {
        Ok(context) => context,
        Err(e) => {
            tracing::debug!(code = e.code(), "Handshake rejected");
            return e.into_response();
        }
    };

    // The transport ceiling sits above the protocol limit so oversized
    // frames reach the inbound pump and are reported as such.
    let transport_limit = state.settings.max_message_bytes.saturating_mul(2);
    ws.max_message_size(transport_limit)
        .max_frame_size(transport_limit)
        .on_upgrade(move |socket| handle_socket(socket, context, state))
}

/// Runs an established connection until either pump ends.
async fn handle_socket(mut socket: WebSocket, context: ConnectionContext, state: RealtimeState) {
    let connection = Arc::new(ConnectionHandle::new(ConnectionId::new(), context));
    let id = connection.id();

    let mailbox = match state.hub.register(connection.clone()).await {
        Ok(mailbox) => mailbox,
        Err(e) => {
            tracing::warn!(connection_id = %id, error = %e, "Failed to register connection");
            connection.close();
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (reply_tx, reply_rx) = mpsc::channel(REPLY_QUEUE_CAPACITY);
    let connected =
        ServerMessage::connected(id, connection.context(), connection.connected_at());
    // Queued before either pump starts, so it is the first frame out.
    let _ = reply_tx.try_send(connected);

    let (sink, stream) = socket.split();
    let settings = state.settings;

    let mut outbound = tokio::spawn(run_outbound(
        sink,
        mailbox,
        reply_rx,
        settings.heartbeat_interval,
        settings.write_timeout,
    ));
    let mut inbound = tokio::spawn(run_inbound(
        stream,
        state.hub.clone(),
        connection.clone(),
        reply_tx,
        settings.max_message_bytes,
    ));

    let reason = tokio::select! {
        result = &mut outbound => {
            inbound.abort();
            result.unwrap_or(DisconnectReason::TransportError)
        }
        result = &mut inbound => {
            outbound.abort();
            result.unwrap_or(DisconnectReason::TransportError)
        }
    };

    let _ = state.hub.unregister(id, reason).await;
    tracing::debug!(connection_id = %id, reason = %reason, "WebSocket session ended");
}

// ════════════════════════════════════════════════════════════════════════════════
// Pumps
// ════════════════════════════════════════════════════════════════════════════════

/// Drains the mailbox and reply queue onto the wire, with periodic heartbeats.
///
/// Each heartbeat is a transport ping followed by a `heartbeat` text frame.
/// Clients answer the ping automatically, which keeps a listen-only
/// connection clear of the stale sweep.
///
/// Returns when the mailbox closes (the hub dropped the connection), the
/// reply queue closes (the inbound pump ended), or a write fails or times out.
pub async fn run_outbound<S>(
    mut sink: S,
    mut mailbox: Mailbox,
    mut replies: mpsc::Receiver<ServerMessage>,
    heartbeat_interval: Duration,
    write_timeout: Duration,
) -> DisconnectReason
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut heartbeat = time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame: String = tokio::select! {
            biased;

            reply = replies.recv() => match reply {
                Some(message) => match message.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode reply frame");
                        continue;
                    }
                },
                None => return DisconnectReason::ClientClosed,
            },
            frame = mailbox.recv() => match frame {
                Some(frame) => frame.to_string(),
                None => {
                    let _ = time::timeout(write_timeout, sink.send(Message::Close(None))).await;
                    return DisconnectReason::TransportClosed;
                }
            },
            _ = heartbeat.tick() => {
                // The client's pong refreshes last_seen in the inbound pump.
                if let Err(reason) = write_frame(&mut sink, Message::Ping(Vec::new()), write_timeout).await {
                    return reason;
                }
                match ServerMessage::heartbeat().to_json() {
                    Ok(json) => json,
                    Err(_) => continue,
                }
            },
        };

        if let Err(reason) = write_frame(&mut sink, Message::Text(frame), write_timeout).await {
            return reason;
        }
    }
}

async fn write_frame<S>(
    sink: &mut S,
    message: Message,
    write_timeout: Duration,
) -> Result<(), DisconnectReason>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match time::timeout(write_timeout, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "WebSocket write failed");
            Err(DisconnectReason::TransportError)
        }
        Err(_) => Err(DisconnectReason::WriteTimeout),
    }
}

/// Reads client frames, applying subscriptions and queueing replies.
///
/// Any frame refreshes the connection's heartbeat. Malformed input produces
/// an `error` reply and the loop continues.
pub async fn run_inbound<S, E>(
    mut stream: S,
    hub: HubHandle,
    connection: Arc<ConnectionHandle>,
    replies: mpsc::Sender<ServerMessage>,
    max_message_bytes: usize,
) -> DisconnectReason
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let id = connection.id();

    while let Some(result) = stream.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "WebSocket read failed");
                return DisconnectReason::TransportError;
            }
        };
        connection.touch();

        let reply = match message {
            Message::Text(text) => {
                if text.len() > max_message_bytes {
                    tracing::warn!(connection_id = %id, size = text.len(), "Inbound frame too large");
                    return DisconnectReason::MessageTooLarge;
                }
                match handle_text(&text, &hub, id).await {
                    Ok(reply) => reply,
                    Err(reason) => return reason,
                }
            }
            Message::Binary(data) => {
                if data.len() > max_message_bytes {
                    return DisconnectReason::MessageTooLarge;
                }
                ServerMessage::error(ProtocolError::BinaryFrame.to_string())
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return DisconnectReason::ClientClosed,
        };

        if replies.send(reply).await.is_err() {
            return DisconnectReason::TransportClosed;
        }
    }

    DisconnectReason::ClientClosed
}

async fn handle_text(
    text: &str,
    hub: &HubHandle,
    id: ConnectionId,
) -> Result<ServerMessage, DisconnectReason> {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(connection_id = %id, error = %e, "Malformed client message");
            return Ok(ServerMessage::error(e.to_string()));
        }
    };

    let outcome = match message {
        ClientMessage::Ping => return Ok(ServerMessage::pong()),
        ClientMessage::Subscribe(topic) => hub
            .subscribe(id, topic.clone())
            .await
            .map(|_| ServerMessage::subscribed(&topic)),
        ClientMessage::Unsubscribe(topic) => hub
            .unsubscribe(id, topic.clone())
            .await
            .map(|_| ServerMessage::unsubscribed(&topic)),
    };

    match outcome {
        Ok(ack) => Ok(ack),
        Err(e @ HubError::SubscriptionLimit { .. }) => Ok(ServerMessage::error(e.to_string())),
        Err(HubError::Unavailable) => Err(DisconnectReason::Shutdown),
        Err(e) => {
            tracing::debug!(connection_id = %id, error = %e, "Subscription change on a closed connection");
            Err(DisconnectReason::TransportClosed)
        }
    }
}

/// Create axum router for the WebSocket endpoint.
///
/// # Example
///
/// ```ignore
/// let app = Router::new()
///     .merge(websocket_router())
///     .with_state(realtime_state);
/// ```
pub fn websocket_router() -> axum::Router<RealtimeState> {
    use axum::routing::get;

    axum::Router::new().route("/ws", get(ws_handler))
}
