//! Process lifetime owner: builds the four servers on top of one
//! [`GuardianState`], starts them in a fixed order with clean rollback on
//! partial failure, and tears them down on a signal.

use crate::server::proxy::ProxyServer;
use crate::server::state::GuardianState;
use crate::server::{admin, approval, request, serve, ServerHandle};
use crate::token::TokenStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Listen addresses for the four servers. The admin address should always
/// be loopback — nothing inside a container is meant to reach it.
#[derive(Debug, Clone)]
pub struct SupervisorAddrs {
    pub proxy: SocketAddr,
    pub admin: SocketAddr,
    pub request: SocketAddr,
    pub approval: SocketAddr,
}

const STARTUP_ROLLBACK_DEADLINE: Duration = Duration::from_secs(5);
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// The four running servers, held only long enough to wait for a shutdown
/// signal.
pub struct Supervisor {
    state: Arc<GuardianState>,
    token_store: Option<Arc<TokenStore>>,
    proxy: ProxyServer,
    admin: ServerHandle,
    request: ServerHandle,
    approval: ServerHandle,
}

impl Supervisor {
    /// Start proxy, admin, request, approval in that order. If any fails to
    /// bind, the already-started servers are stopped (bounded by
    /// [`STARTUP_ROLLBACK_DEADLINE`]) and the original error is returned —
    /// a partially-started guardian is worse than no guardian at all.
    ///
    /// `token_store`, when set, is reconciled into the token registry on
    /// every SIGHUP alongside the policy/command-pattern reload — the
    /// `on_token_reload` half of the supervisor's reload contract.
    pub async fn start(
        state: Arc<GuardianState>,
        addrs: SupervisorAddrs,
        token_store: Option<Arc<TokenStore>>,
    ) -> anyhow::Result<Self> {
        state.wire_queues();

        let proxy = ProxyServer::start(addrs.proxy, state.clone()).await?;

        let admin = match serve(addrs.admin, admin::router(state.clone())).await {
            Ok(handle) => handle,
            Err(err) => {
                rollback(vec![AnyServer::Proxy(proxy)]).await;
                return Err(err);
            }
        };

        let request = match serve(addrs.request, request::router(state.clone())).await {
            Ok(handle) => handle,
            Err(err) => {
                rollback(vec![AnyServer::Proxy(proxy), AnyServer::Handle(admin)]).await;
                return Err(err);
            }
        };

        let approval = match serve(addrs.approval, approval::router(state.clone())).await {
            Ok(handle) => handle,
            Err(err) => {
                rollback(vec![
                    AnyServer::Proxy(proxy),
                    AnyServer::Handle(admin),
                    AnyServer::Handle(request),
                ])
                .await;
                return Err(err);
            }
        };

        tracing::info!(
            proxy = %proxy.addr,
            admin = %admin.addr,
            request = %request.addr,
            approval = %approval.addr,
            "all servers started"
        );

        Ok(Self { state, token_store, proxy, admin, request, approval })
    }

    pub fn addrs(&self) -> SupervisorAddrs {
        SupervisorAddrs {
            proxy: self.proxy.addr,
            admin: self.admin.addr,
            request: self.request.addr,
            approval: self.approval.addr,
        }
    }

    /// Stop all four servers, bounded by [`SHUTDOWN_DEADLINE`]. A server that
    /// does not stop in time is abandoned rather than blocking the process
    /// exit indefinitely.
    pub async fn shutdown(self) {
        let _ = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
            self.approval.shutdown().await;
            self.request.shutdown().await;
            self.admin.shutdown().await;
            self.proxy.shutdown().await;
        })
        .await;
    }

    /// Block until SIGINT/SIGTERM, reloading config on every SIGHUP in the
    /// meantime. Returns once a shutdown signal has been received; the
    /// caller is expected to call [`Self::shutdown`] next.
    #[cfg(unix)]
    pub async fn wait_for_shutdown_signal(&self) {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT, shutting down");
                    return;
                }
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                    return;
                }
                _ = sighup.recv() => {
                    tracing::info!("received SIGHUP, reloading config");
                    self.state.reload_config();
                    if let Some(store) = &self.token_store {
                        if let Err(err) = self.state.tokens.reconcile_with_store(store) {
                            tracing::warn!(error = %err, "token store reconciliation failed");
                        }
                    }
                }
            }
        }
    }

    /// Windows has no SIGHUP; only Ctrl-C is installed, matching the
    /// Unix-primary deployment target noted in the design. Reload on Windows
    /// is available only through the admin API, for test parity.
    #[cfg(not(unix))]
    pub async fn wait_for_shutdown_signal(&self) {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received Ctrl-C, shutting down");
    }
}

enum AnyServer {
    Proxy(ProxyServer),
    Handle(ServerHandle),
}

async fn rollback(servers: Vec<AnyServer>) {
    let _ = tokio::time::timeout(STARTUP_ROLLBACK_DEADLINE, async {
        for server in servers.into_iter().rev() {
            match server {
                AnyServer::Proxy(p) => p.shutdown().await,
                AnyServer::Handle(h) => h.shutdown().await,
            }
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSink;
    use crate::command::CommandMatcherRegistry;
    use crate::config::{DecisionsFile, GuardianConfig, ProjectLoader};
    use crate::events::EventHub;
    use crate::executor::{CommandExecutor, ExecReply, ExecRequest, ExecStatus};
    use crate::policy::PolicyEngine;
    use crate::queue::{CommandQueue, DomainQueue};
    use crate::token::TokenRegistry;
    use async_trait::async_trait;

    struct EmptyLoader;
    impl ProjectLoader for EmptyLoader {
        fn load(&self, _project: &str) -> anyhow::Result<(GuardianConfig, DecisionsFile)> {
            Ok((GuardianConfig::default(), DecisionsFile::default()))
        }
    }

    struct DummyExecutor;
    #[async_trait]
    impl CommandExecutor for DummyExecutor {
        async fn execute(&self, _req: ExecRequest) -> anyhow::Result<ExecReply> {
            Ok(ExecReply { status: ExecStatus::Completed, exit_code: Some(0), stdout: String::new(), stderr: String::new(), error: None })
        }
    }

    fn test_state() -> Arc<GuardianState> {
        Arc::new(GuardianState {
            tokens: Arc::new(TokenRegistry::new()),
            policy: Arc::new(PolicyEngine::new(&GuardianConfig::default(), Arc::new(EmptyLoader), None)),
            command_matchers: Arc::new(CommandMatcherRegistry::new(vec![], vec![], Arc::new(EmptyLoader))),
            command_queue: CommandQueue::new(Duration::from_secs(5)),
            domain_queue: DomainQueue::new(Duration::from_secs(5)),
            events: Arc::new(EventHub::new()),
            audit: Some(Arc::new(AuditSink::disabled())),
            executor: Arc::new(DummyExecutor),
            persister: None,
        })
    }

    fn loopback_zero() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_start_and_shutdown_binds_all_four() {
        let state = test_state();
        let addrs = SupervisorAddrs {
            proxy: loopback_zero(),
            admin: loopback_zero(),
            request: loopback_zero(),
            approval: loopback_zero(),
        };
        let supervisor = Supervisor::start(state, addrs, None).await.unwrap();
        let bound = supervisor.addrs();
        assert_ne!(bound.proxy.port(), 0);
        assert_ne!(bound.admin.port(), 0);
        assert_ne!(bound.request.port(), 0);
        assert_ne!(bound.approval.port(), 0);
        supervisor.shutdown().await;
    }
}
