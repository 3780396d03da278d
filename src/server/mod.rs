//! The four network-facing servers plus the shared state they're built on.
//! Each server owns one listener; the supervisor starts and stops them
//! together.

pub mod admin;
pub mod approval;
pub mod domain_approver;
pub mod proxy;
pub mod request;
pub mod state;
pub mod supervisor;

use std::net::SocketAddr;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use state::GuardianState;

/// A running axum-based server: bound address plus the means to stop it.
/// Mirrors [`proxy::ProxyServer`]'s `{addr, shutdown, join}` shape so the
/// supervisor can treat all four servers uniformly.
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl ServerHandle {
    pub fn new(addr: SocketAddr, shutdown: oneshot::Sender<()>, join: JoinHandle<()>) -> Self {
        Self { addr, shutdown: Some(shutdown), join }
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
    }
}

/// Serve `router` on `addr` until the returned handle is told to shut down.
/// Shared by the request, approval, and admin servers — each builds its own
/// `axum::Router` and hands it here.
pub async fn serve(addr: SocketAddr, router: axum::Router) -> anyhow::Result<ServerHandle> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let join = tokio::spawn(async move {
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            tracing::warn!(error = %err, addr = %bound, "server exited with error");
        }
    });

    Ok(ServerHandle::new(bound, shutdown_tx, join))
}
