//! Top-level router assembly.
//!
//! ```text
//! SetRequestId → Trace → PropagateRequestId → CORS
//!   ├── /ws                     websocket upgrade
//!   ├── /health, /ready         probes
//!   └── /admin/*                admin key guard → request timeout
//! ```

use std::time::Duration;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware, Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::adapters::websocket::{websocket_router, RealtimeState};
use crate::config::AppConfig;

use super::admin::{admin_routes, health_routes, AdminState};
use super::middleware::{require_admin_key, AdminKey, ADMIN_KEY_HEADER};

/// Cross-cutting HTTP settings.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub admin_key: AdminKey,
    pub request_timeout: Duration,
    pub cors_origins: Vec<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            admin_key: AdminKey::default(),
            request_timeout: Duration::from_secs(30),
            cors_origins: Vec::new(),
        }
    }
}

impl From<&AppConfig> for HttpSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            admin_key: AdminKey::new(config.admin.api_key().cloned()),
            request_timeout: config.server.request_timeout(),
            cors_origins: config.server.cors_origins_list(),
        }
    }
}

/// Builds the complete application router.
pub fn build_router(realtime: RealtimeState, admin: AdminState, settings: &HttpSettings) -> Router {
    let guarded_admin = admin_routes()
        .layer(middleware::from_fn_with_state(
            settings.admin_key.clone(),
            require_admin_key,
        ))
        .layer(TimeoutLayer::new(settings.request_timeout));

    let admin_app = Router::new()
        .nest("/admin", guarded_admin)
        .merge(health_routes())
        .with_state(admin);

    Router::new()
        .merge(admin_app)
        .merge(websocket_router().with_state(realtime))
        .layer(cors_layer(&settings.cors_origins))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(ADMIN_KEY_HEADER),
        ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::FanoutManager;
    use crate::adapters::websocket::{ConnectionSettings, Hub, HubConfig};
    use secrecy::SecretString;
    use std::sync::Arc;
    use tokio::sync::watch;

    #[tokio::test]
    async fn router_builds_with_all_layers() {
        let (_tx, rx) = watch::channel(false);
        let (hub, _task) = Hub::spawn(HubConfig::default(), rx);
        let fanout = Arc::new(FanoutManager::new(None, hub.clone()));
        let settings = HttpSettings {
            admin_key: AdminKey::new(Some(SecretString::new("k".to_string()))),
            cors_origins: vec!["http://localhost:5173".to_string(), "bad\norigin".to_string()],
            ..Default::default()
        };

        let _router = build_router(
            RealtimeState::new(hub.clone(), None, ConnectionSettings::default()),
            AdminState::new(hub, fanout),
            &settings,
        );
    }

    #[test]
    fn settings_follow_config() {
        let mut config = AppConfig::default();
        config.server.request_timeout_secs = 7;
        config.server.cors_origins = Some("http://a.test".to_string());

        let settings = HttpSettings::from(&config);
        assert_eq!(settings.request_timeout, Duration::from_secs(7));
        assert_eq!(settings.cors_origins, vec!["http://a.test"]);
        assert!(!settings.admin_key.is_enabled());
    }
}
