//! HTTP server

mod router;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::config::Config;
use crate::gate::BearerGate;
use crate::{Error, Result, users};

pub use router::create_router;

/// The chatgate server
pub struct Server {
    /// Configuration
    config: Config,
    /// Gate shared by all protected routes
    gate: Arc<BearerGate>,
}

impl Server {
    /// Open the user directory and build the gate.
    pub async fn new(config: Config) -> Result<Self> {
        let users = users::open(&config.users).await?;
        let gate = BearerGate::from_config(&config.auth, config.users.on_conflict, users)?;

        Ok(Self {
            config,
            gate: Arc::new(gate),
        })
    }

    /// Serve until SIGINT/SIGTERM.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = create_router(Arc::clone(&self.gate));
        let listener = TcpListener::bind(addr).await?;

        let issuer = self.config.auth.resolve_issuer()?;
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            issuer = %issuer,
            audience = %self.config.auth.audience,
            jwks_cache_ttl = ?self.config.auth.jwks_cache_ttl,
            users = ?self.config.users.backend,
            "Bearer gate configured"
        );
        if self.config.auth.jwks_cache_ttl.is_zero() {
            info!("JWKS fetched on every request (jwks_cache_ttl = 0)");
        }

        let shutdown_timeout = self.config.server.shutdown_timeout;
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .into_future();

        // Bound the drain once the signal fires; in-flight requests past the
        // deadline are dropped.
        tokio::select! {
            result = serve => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = drain_deadline(shutdown_timeout) => {
                warn!(timeout = ?shutdown_timeout, "Graceful shutdown timed out");
            }
        }

        Ok(())
    }
}

async fn drain_deadline(timeout: std::time::Duration) {
    shutdown_signal().await;
    tokio::time::sleep(timeout).await;
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
