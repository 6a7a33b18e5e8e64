//! Main entry point for the Radiocast server

use radiocast_core::{Config, init_logging};
use radiocast_server::{AppState, build_router, dirwatch};
use radiocast_server::downstream::Forwarder;
use radiocast_store::Store;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[tokio::main]
async fn main() -> radiocast_core::Result<()> {
    // Load .env if present, for development convenience.
    let _ = dotenvy::dotenv();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from(Path::new(&path))?,
        None => Config::load().unwrap_or_else(|err| {
            eprintln!("no usable configuration file ({err}), using defaults");
            Config::default()
        }),
    };

    init_logging(&config.logging)?;

    info!(
        branding = %config.server.branding,
        version = env!("CARGO_PKG_VERSION"),
        dialect = %config.database.dialect,
        "starting radiocast server"
    );

    let store = match Store::connect(&config.database).await {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "store unreachable");
            return Err(err);
        }
    };

    if let Err(err) = store.bootstrap().await {
        error!(error = %err, "bootstrap failed");
        return Err(err);
    }
    store.health_check().await?;
    info!("store ready");

    let forwarder = Forwarder::start(&config.downstream, store.clone());
    let state = Arc::new(AppState::new(config, store.clone(), forwarder).await?);

    let ticker = state.admission.clone().run_ticker(Duration::from_secs(
        state.config.session.ticker_interval.max(1),
    ));
    let watchers = dirwatch::spawn_watchers(&state);

    // Admin-side mutations are observed through a reload signal.
    #[cfg(unix)]
    {
        let state = state.clone();
        tokio::spawn(async move {
            let Ok(mut hangup) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            else {
                return;
            };
            while hangup.recv().await.is_some() {
                if let Err(err) = state.reload_config().await {
                    error!(error = %err, "configuration reload failed");
                }
            }
        });
    }

    let app = build_router(state.clone())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr: SocketAddr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    )
    .parse()
    .map_err(|e| radiocast_core::Error::Configuration {
        message: format!("invalid listen address: {e}"),
    })?;

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, error = %err, "cannot bind listen address");
            return Err(err.into());
        }
    };
    info!(%addr, "listening");

    let session_closer = state.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        session_closer.begin_shutdown();
    })
    .await
    .map_err(|e| radiocast_core::Error::Other(format!("server error: {e}")))?;

    // Teardown: stop periodic work, flush pending forwards, close the store.
    ticker.abort();
    for watcher in watchers {
        watcher.abort();
    }
    state.forwarder.shutdown().await;
    store.close().await;

    info!("shutdown complete");
    Ok(())
}

/// Resolve when the process is asked to stop
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        },
        () = terminate => {
            info!("received terminate signal, shutting down");
        },
    }
}
