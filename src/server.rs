//! Process wiring: logging, store selection, the startup reconciler, the
//! background sweeps and the HTTP listener with graceful shutdown.

use crate::config::{Config, LogConfig};
use crate::gateway::Gateway;
use crate::http::{self, AppState};
use crate::protocol::Connector;
use crate::ratelimit::RateLimiter;
use crate::reconcile::Reconciler;
use crate::store::{MemoryStore, PostgresStore, Store};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cadence of the media-file TTL sweep.
const MEDIA_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Server {
    config: Config,
    connector: Connector,
}

impl Server {
    pub fn new(config: Config, connector: Connector) -> Self {
        Self { config, connector }
    }

    /// Run until a termination signal, then drain and close.
    pub async fn run(self) -> anyhow::Result<()> {
        self.config.validate()?;

        let store: Store = match &self.config.database {
            Some(db) => {
                let pg = PostgresStore::connect(db)
                    .await
                    .map_err(|e| anyhow::anyhow!("database init failed: {e}"))?;
                info!(host = %db.host, name = %db.name, "using postgres store");
                Arc::new(pg)
            }
            None => {
                warn!("no database configured, sessions will not survive restarts");
                Arc::new(MemoryStore::new())
            }
        };

        let gateway = Arc::new(Gateway::new(
            Arc::clone(&store),
            Arc::clone(&self.connector),
            &self.config,
        )?);
        let state = AppState::new(Arc::clone(&gateway), &self.config);

        // Reattach previously paired sessions without blocking startup.
        let reconciler = Reconciler::new(Arc::clone(&gateway));
        tokio::spawn(async move { reconciler.run().await });

        spawn_limiter_sweep(
            Arc::clone(&state.limiter),
            gateway.cancellation().clone(),
            self.config.rate_limit.window(),
        );
        spawn_media_sweep(Arc::clone(&store), gateway.cancellation().clone());

        let app = http::router(state, &self.config);
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(%addr, env = ?self.config.server.env, "gateway listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(termination_signal())
        .await?;

        // Stores close after every session has been signalled.
        gateway.shutdown().await;
        store.close().await;
        info!("gateway stopped");
        Ok(())
    }
}

async fn termination_signal() {
    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
    info!("termination signal received");
}

fn spawn_limiter_sweep(limiter: Arc<RateLimiter>, cancel: CancellationToken, window: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(window.max(Duration::from_secs(1)));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => limiter.sweep(),
            }
        }
    });
}

fn spawn_media_sweep(store: Store, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MEDIA_SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match store.sweep_expired_media(Utc::now()).await {
                        Ok(0) => {}
                        Ok(swept) => info!(swept, "expired media files removed"),
                        Err(e) => warn!(error = %e, "media sweep failed"),
                    }
                }
            }
        }
    });
}

/// Install the global tracing subscriber per the log config.
pub fn init_tracing(config: &LogConfig, development: bool) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.level)
        .unwrap_or_else(|_| EnvFilter::new(if development { "debug" } else { "info" }));

    match (config.format.as_str(), &config.file_path) {
        ("json", Some(path)) => {
            let file = std::fs::File::create(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_writer(Arc::new(file))
                .init();
        }
        ("json", None) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        (_, Some(path)) => {
            let file = std::fs::File::create(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        (_, None) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}
