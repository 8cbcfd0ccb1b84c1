//! HTTP handlers for the admin API.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::adapters::events::FanoutManager;
use crate::adapters::websocket::{HubError, HubHandle};
use crate::domain::foundation::{DomainError, ErrorCode, UserId, ValidationError};
use crate::ports::EventPublisher;

use super::dto::{
    ConnectionsResponse, DisconnectUserResponse, ErrorResponse, HealthResponse,
    PublishEventRequest, PublishEventResponse, StatsResponse,
};

// ════════════════════════════════════════════════════════════════════════════
// Handler state
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AdminState {
    pub hub: HubHandle,
    pub fanout: Arc<FanoutManager>,
}

impl AdminState {
    pub fn new(hub: HubHandle, fanout: Arc<FanoutManager>) -> Self {
        Self { hub, fanout }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Errors
// ════════════════════════════════════════════════════════════════════════════

/// Failures surfaced by admin endpoints.
#[derive(Debug, thiserror::Error)]
pub enum AdminApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Hub is not running")]
    HubUnavailable,

    #[error("{0}")]
    Publish(DomainError),
}

impl AdminApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            AdminApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdminApiError::HubUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AdminApiError::Publish(e) => match e.code {
                ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
                ErrorCode::HubUnavailable | ErrorCode::BrokerUnavailable => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AdminApiError::BadRequest(_) => "BAD_REQUEST",
            AdminApiError::HubUnavailable => "HUB_UNAVAILABLE",
            AdminApiError::Publish(_) => "PUBLISH_FAILED",
        }
    }
}

impl From<HubError> for AdminApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Unavailable => AdminApiError::HubUnavailable,
            other => AdminApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<ValidationError> for AdminApiError {
    fn from(err: ValidationError) -> Self {
        AdminApiError::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for AdminApiError {
    fn from(rejection: JsonRejection) -> Self {
        AdminApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AdminApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "Admin request failed");
        }
        (status, Json(ErrorResponse::new(self.code(), self.to_string()))).into_response()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Handlers
// ════════════════════════════════════════════════════════════════════════════

/// POST /admin/events - Publish an event
pub async fn publish_event(
    State(state): State<AdminState>,
    body: Result<Json<PublishEventRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AdminApiError> {
    let Json(request) = body?;
    let event = request.into_event()?;
    let event_id = event.id;

    tracing::info!(
        event_id = %event_id,
        event_type = %event.event_type,
        "Admin publish"
    );
    state
        .fanout
        .publish(event)
        .await
        .map_err(AdminApiError::Publish)?;

    Ok((StatusCode::ACCEPTED, Json(PublishEventResponse::accepted(event_id))))
}

/// GET /admin/stats - Hub and fanout counters
pub async fn get_stats(State(state): State<AdminState>) -> impl IntoResponse {
    Json(StatsResponse {
        hub: state.hub.stats().await,
        fanout: state.fanout.stats(),
    })
}

/// GET /admin/connections - Active connection snapshots
pub async fn list_connections(
    State(state): State<AdminState>,
) -> Result<impl IntoResponse, AdminApiError> {
    let connections = state.hub.list_connections().await?;
    let stats = state.hub.stats().await;

    Ok(Json(ConnectionsResponse {
        active_connections: connections.len(),
        total_connections: stats.total_connections,
        connections,
    }))
}

/// DELETE /admin/users/:user_id/connections - Force-disconnect a user
pub async fn disconnect_user(
    State(state): State<AdminState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AdminApiError> {
    let user_id = UserId::new(user_id)?;
    let disconnected = state.hub.disconnect_user(user_id.clone()).await?;

    tracing::info!(user_id = %user_id, disconnected, "Admin disconnected user");
    Ok(Json(DisconnectUserResponse {
        user_id: user_id.to_string(),
        disconnected,
    }))
}

/// GET /health - Liveness
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse::ok())
}

/// GET /ready - Readiness
pub async fn ready() -> impl IntoResponse {
    Json(HealthResponse::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::websocket::{ConnectionHandle, Hub, HubConfig, Mailbox};
    use crate::domain::foundation::ConnectionId;
    use crate::domain::realtime::ConnectionContext;
    use serde_json::json;
    use tokio::sync::watch;

    struct Fixture {
        state: AdminState,
        shutdown: watch::Sender<bool>,
    }

    fn fixture() -> Fixture {
        let (shutdown, rx) = watch::channel(false);
        let (hub, _task) = Hub::spawn(HubConfig::default(), rx);
        let fanout = Arc::new(FanoutManager::new(None, hub.clone()));
        Fixture {
            state: AdminState::new(hub, fanout),
            shutdown,
        }
    }

    async fn connect(state: &AdminState, user: &str) -> Mailbox {
        let handle = Arc::new(ConnectionHandle::new(
            ConnectionId::new(),
            ConnectionContext::new(UserId::new(user).unwrap()),
        ));
        state.hub.register(handle).await.unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn publish_body(value: serde_json::Value) -> Result<Json<PublishEventRequest>, JsonRejection> {
        Ok(Json(serde_json::from_value(value).unwrap()))
    }

    #[tokio::test]
    async fn publish_returns_accepted_and_delivers() {
        let fx = fixture();
        let mut mailbox = connect(&fx.state, "U1").await;

        let response = publish_event(
            State(fx.state.clone()),
            publish_body(json!({"type": "rfq:created", "user_ids": ["U1"]})),
        )
        .await
        .into_response();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "accepted");

        let frame = mailbox.recv().await.unwrap();
        let frame: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["event"]["id"], body["event_id"]);
    }

    #[tokio::test]
    async fn publish_with_invalid_fields_is_bad_request() {
        let fx = fixture();
        let response = publish_event(State(fx.state.clone()), publish_body(json!({"type": ""})))
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn stats_include_hub_and_fanout() {
        let fx = fixture();
        let _mailbox = connect(&fx.state, "U1").await;

        let body = body_json(get_stats(State(fx.state.clone())).await.into_response()).await;
        assert_eq!(body["hub"]["active_connections"], 1);
        assert_eq!(body["fanout"]["mode"], "single_instance");
    }

    #[tokio::test]
    async fn connections_lists_snapshots() {
        let fx = fixture();
        let _m1 = connect(&fx.state, "U1").await;
        let _m2 = connect(&fx.state, "U2").await;

        let response = list_connections(State(fx.state.clone())).await.into_response();
        let body = body_json(response).await;
        assert_eq!(body["active_connections"], 2);
        assert_eq!(body["total_connections"], 2);
        assert_eq!(body["connections"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disconnect_user_reports_count() {
        let fx = fixture();
        let _a = connect(&fx.state, "U1").await;
        let _b = connect(&fx.state, "U1").await;
        let _c = connect(&fx.state, "U2").await;

        let response = disconnect_user(State(fx.state.clone()), Path("U1".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["disconnected"], 2);
        assert_eq!(fx.state.hub.stats().await.active_connections, 1);
    }

    #[tokio::test]
    async fn stopped_hub_maps_to_503() {
        let fx = fixture();
        fx.shutdown.send(true).unwrap();
        while fx.state.hub.is_running() {
            tokio::task::yield_now().await;
        }

        let response = list_connections(State(fx.state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_and_ready_are_ok() {
        assert_eq!(body_json(health().await.into_response()).await, json!({"status": "ok"}));
        assert_eq!(body_json(ready().await.into_response()).await, json!({"status": "ok"}));
    }
}
