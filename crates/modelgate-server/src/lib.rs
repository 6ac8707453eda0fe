pub mod access_log;
pub mod controller;
pub mod error;
pub mod gate;
pub mod notify;
pub mod reaper;
pub mod routes;
pub mod routing;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use modelgate_core::config::Config;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::access_log::AccessLogFollower;
use crate::notify::IdleNotifier;
use crate::reaper::{IdleHook, IdleReaper};
use crate::routing::RoutingPublisher;
use crate::state::AppState;

/// Build the axum Router with the API routes and the gate fallback.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health::health))
        // Inventory
        .route("/api/models", get(routes::models::list_models))
        .route("/api/models/running", get(routes::models::list_running))
        .route("/api/models/reload", post(routes::models::reload_models))
        // Activity
        .route("/api/models/active", get(routes::models::active_models))
        .route("/api/models/idle", get(routes::models::idle_models))
        .route("/api/models/activity", get(routes::models::activity))
        // Per-model control
        .route(
            "/api/models/{name}/status",
            get(routes::models::model_status),
        )
        .route(
            "/api/models/{name}/start",
            post(routes::models::start_model),
        )
        .route("/api/models/{name}/stop", post(routes::models::stop_model))
        .route(
            "/api/models/{name}/restart",
            post(routes::models::restart_model),
        )
        .route(
            "/api/models/{name}/report",
            post(routes::models::report_activity),
        )
        // Routing
        .route("/api/routes", get(routes::table::get_routes))
        // Everything else is a request for a model
        .fallback(routes::gate::gate)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Run the gate and its background tasks until Ctrl-C or SIGTERM.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    serve_on(config, listener).await
}

/// Like `serve`, on a pre-bound listener (lets callers bind port 0).
pub async fn serve_on(config: Config, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let app_state = AppState::from_config(config)?;
    let config = app_state.config.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if config.reaper.enabled {
        let mut hooks: Vec<Box<dyn IdleHook>> = Vec::new();
        if !config.reaper.notify.is_empty() {
            hooks.push(Box::new(IdleNotifier::new(&config.reaper.notify)?));
        }
        let reaper = IdleReaper::new(app_state.controller.clone(), app_state.ledger.clone())
            .with_hooks(hooks);
        tasks.push(tokio::spawn(
            reaper.run(config.reaper.interval(), shutdown_rx.clone()),
        ));
    }

    let summary_every =
        Duration::from_secs(u64::from(config.activity.summary_interval_minutes) * 60);
    if !summary_every.is_zero() {
        tasks.push(tokio::spawn(reaper::run_activity_summary(
            app_state.ledger.clone(),
            summary_every,
            shutdown_rx.clone(),
        )));
    }

    if config.routing.enabled {
        let publisher = RoutingPublisher::from_config(
            &config.routing,
            config.gate.retry_status,
            app_state.controller.clone(),
            app_state.catalog.clone(),
        )
        .await?;
        tasks.push(tokio::spawn(Arc::new(publisher).run(
            Duration::from_secs(config.routing.interval_secs),
            shutdown_rx.clone(),
        )));
    }

    if let Some(log) = &config.access_log {
        let follower = AccessLogFollower::new(
            log,
            app_state.ledger.clone(),
            app_state.gate.clone(),
            app_state.catalog.clone(),
        );
        tasks.push(tokio::spawn(
            follower.run(log.path.clone(), shutdown_rx.clone()),
        ));
    }

    let models = app_state.catalog.read().map(|c| c.len()).unwrap_or(0);
    let app = build_router(app_state);
    tracing::info!(
        addr = %listener.local_addr()?,
        models,
        "modelgate listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down background tasks");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
