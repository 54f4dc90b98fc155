//! Testable server startup logic.
//!
//! Provides [`ServerConfig`] and [`ServerHandle`] so the binary and the
//! integration tests share one way of spinning up the pipeline on a socket
//! and shutting it down cleanly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::logging::targets;
use crate::server::http::{create_router, PipelineConfig, PipelineState};
use crate::sessions::MemorySessionStore;

/// Everything needed to start a server.
pub struct ServerConfig {
    pub state: PipelineState,
    /// Application routes wrapped by the pipeline
    pub routes: Router,
    pub bind_address: SocketAddr,
}

impl ServerConfig {
    pub fn new(state: PipelineState, routes: Router, bind_address: SocketAddr) -> Self {
        ServerConfig {
            state,
            routes,
            bind_address,
        }
    }

    /// Minimal config suitable for integration tests.
    ///
    /// Binds to `127.0.0.1:0` (OS-assigned port) with an in-memory session
    /// store and default pipeline settings.
    pub fn for_testing(routes: Router) -> Self {
        let store = Arc::new(MemorySessionStore::new());
        ServerConfig {
            state: PipelineState::new(PipelineConfig::default(), store),
            routes,
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }
}

/// Handle to a running server.  Returned by [`run_server_with_config`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    server_task: JoinHandle<Result<(), std::io::Error>>,
}

impl ServerHandle {
    /// The port the server actually bound to (useful when binding to port 0).
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The full local address (ip + port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://ip:port` base URL for the running server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stop accepting connections and wait for in-flight requests to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        match tokio::time::timeout(Duration::from_secs(5), self.server_task).await {
            Ok(Ok(Ok(()))) => {
                info!(target: targets::HTTP, "server stopped");
            }
            Ok(Ok(Err(e))) => error!(target: targets::HTTP, "Server task returned error: {}", e),
            Ok(Err(e)) => error!(target: targets::HTTP, "Server task panicked: {}", e),
            Err(_) => warn!(target: targets::HTTP, "Server task did not finish within 5s timeout"),
        }
    }
}

/// Start a server from a fully-assembled [`ServerConfig`].
///
/// Returns a [`ServerHandle`] that exposes the actual bound address and
/// provides a [`ServerHandle::shutdown`] method for clean teardown.
pub async fn run_server_with_config(
    config: ServerConfig,
) -> Result<ServerHandle, Box<dyn std::error::Error>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = create_router(config.state, config.routes);

    // Bind TCP listener (supports port 0 for ephemeral port assignment)
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let local_addr = listener.local_addr()?;
    info!(target: targets::HTTP, address = %local_addr, "listening");

    let mut shutdown_watch = shutdown_rx;
    let server_task = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            loop {
                if *shutdown_watch.borrow() {
                    break;
                }
                if shutdown_watch.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        server_task,
    })
}
