use crate::Error;

use std::net::SocketAddr;
use std::sync::OnceLock;

use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

/// HTTP server for the gateway router.
///
/// Shutdown stops accepting connections and lets in-flight requests finish,
/// so a webhook that was being published still gets its answer.
#[derive(Debug)]
pub struct GatewayServer {
    listen_addr: SocketAddr,
    local_addr: OnceLock<SocketAddr>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl GatewayServer {
    /// Creates a new instance of `GatewayServer`.
    #[must_use]
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            local_addr: OnceLock::new(),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Binds the listen address and serves `router` until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the server was already started or the address can't be bound.
    pub async fn start(&self, router: Router) -> Result<JoinHandle<()>, Error> {
        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(Error::Bind)?;

        let local_addr = listener.local_addr().map_err(Error::Bind)?;
        let _ = self.local_addr.set(local_addr);

        let shutdown_token = self.shutdown_token.clone();

        let handle = self.task_tracker.spawn(async move {
            let result = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(shutdown_token.cancelled_owned())
                .await;

            if let Err(e) = result {
                error!(error = %e, "gateway server exited");
            }
        });

        self.task_tracker.close();

        info!(addr = %local_addr, "gateway listening");

        Ok(handle)
    }

    /// Stops the server and waits for in-flight requests.
    pub async fn shutdown(&self) {
        info!("gateway server shutting down...");

        self.shutdown_token.cancel();
        self.task_tracker.wait().await;

        info!("gateway server shutdown");
    }
}
