//! Realtime Hub server binary.
//!
//! Wires configuration, the hub task, the stale sweeper, the broker fanout
//! and the HTTP/WebSocket server, then waits for a shutdown signal.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use realtime_hub::adapters::events::{FanoutManager, RedisBroker};
use realtime_hub::adapters::http::{build_router, AdminState, HttpSettings};
use realtime_hub::adapters::websocket::{
    ConnectionSettings, Hub, HubConfig, IdentitySources, RealtimeState, StaleSweeper,
    SweeperConfig,
};
use realtime_hub::adapters::JwtSessionValidator;
use realtime_hub::config::{AppConfig, ServerConfig};
use realtime_hub::ports::{MessageBroker, SessionValidator};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    init_tracing(&config.server);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server exited with error");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&server.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if server.is_production() {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn run(config: AppConfig) -> Result<(), BoxError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (hub, hub_task) = Hub::spawn(HubConfig::from(&config.realtime), shutdown_rx.clone());

    let broker = connect_broker(&config).await;
    let fanout = Arc::new(FanoutManager::new(broker, hub.clone()));
    let fanout_task = fanout.clone().spawn(shutdown_rx.clone()).await;

    let sweeper = StaleSweeper::new(hub.clone(), SweeperConfig::from(&config.realtime));
    let sweeper_rx = shutdown_rx.clone();
    let sweeper_task = tokio::spawn(async move { sweeper.run(sweeper_rx).await });

    let validator: Option<Arc<dyn SessionValidator>> = config.auth.jwt_secret().map(|secret| {
        Arc::new(JwtSessionValidator::new(secret, config.auth.issuer.clone()))
            as Arc<dyn SessionValidator>
    });
    let realtime = RealtimeState::new(hub.clone(), validator, ConnectionSettings::from(&config));
    match realtime.identity_sources() {
        IdentitySources::Tokens => {}
        IdentitySources::TokensAndFallback => {
            tracing::warn!("Identity fallback enabled; handshakes without a token trust query parameters")
        }
        IdentitySources::FallbackOnly => {
            tracing::warn!("No JWT secret configured; accepting identity from query parameters")
        }
        IdentitySources::Nothing => {
            tracing::warn!("No JWT secret and identity fallback disabled; every handshake will be refused")
        }
    }

    let app = build_router(
        realtime,
        AdminState::new(hub.clone(), fanout.clone()),
        &HttpSettings::from(&config),
    );

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        address = %addr,
        environment = ?config.server.environment,
        fanout = ?fanout.mode(),
        "Realtime hub listening"
    );

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let server_rx = shutdown_rx.clone();
    let mut server: JoinHandle<std::io::Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_shutdown(server_rx))
            .await
    });

    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        }
        _ = wait_for_shutdown(shutdown_rx) => {}
    }

    let grace = config.realtime.shutdown_grace();
    drain("http server", server, grace).await;
    drain("hub", hub_task, grace).await;
    drain("fanout listener", fanout_task, grace).await;
    drain("stale sweeper", sweeper_task, grace).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Connects to Redis when configured. Failure means single-instance mode.
async fn connect_broker(config: &AppConfig) -> Option<Arc<dyn MessageBroker>> {
    let Some(url) = config.redis.url() else {
        tracing::info!("No Redis URL configured; running in single-instance mode");
        return None;
    };

    match RedisBroker::connect(url, config.redis.timeout()).await {
        Ok(broker) => {
            tracing::info!("Connected to Redis broker");
            Some(Arc::new(broker))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Redis unavailable; running in single-instance mode"
            );
            None
        }
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    // A dropped sender also ends the wait.
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Waits for a task, aborting it if it outlives the grace period.
async fn drain<T>(name: &'static str, mut task: JoinHandle<T>, grace: Duration) {
    if tokio::time::timeout(grace, &mut task).await.is_err() {
        tracing::warn!(task = name, grace_secs = grace.as_secs(), "Task did not stop in time; aborting");
        task.abort();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
