//! Axum router configuration for admin endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};

use super::handlers::{
    disconnect_user, get_stats, health, list_connections, publish_event, ready, AdminState,
};

/// Create the admin API router.
///
/// # Routes
/// - `POST /events` - Publish an event
/// - `GET /stats` - Hub and fanout counters
/// - `GET /connections` - Active connection snapshots
/// - `DELETE /users/:user_id/connections` - Force-disconnect a user
pub fn admin_routes() -> Router<AdminState> {
    Router::new()
        .route("/events", post(publish_event))
        .route("/stats", get(get_stats))
        .route("/connections", get(list_connections))
        .route("/users/:user_id/connections", delete(disconnect_user))
}

/// Liveness and readiness probes. Never guarded.
pub fn health_routes() -> Router<AdminState> {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::FanoutManager;
    use crate::adapters::websocket::{Hub, HubConfig};
    use std::sync::Arc;
    use tokio::sync::watch;

    #[tokio::test]
    async fn routers_accept_state() {
        let (_tx, rx) = watch::channel(false);
        let (hub, _task) = Hub::spawn(HubConfig::default(), rx);
        let state = AdminState::new(hub.clone(), Arc::new(FanoutManager::new(None, hub)));

        let _: Router<()> = Router::new()
            .nest("/admin", admin_routes())
            .merge(health_routes())
            .with_state(state);
    }
}
