//! The HTTP CONNECT proxy — the container-facing listener that every
//! outbound request from inside a cloister passes through. Raw `hyper`
//! rather than `axum`, because `CONNECT` tunneling needs direct access to
//! `hyper::upgrade::on` and a bidirectional byte splice that axum's router
//! doesn't model: one task per accepted connection, `http1::Builder`
//! with upgrades enabled, a oneshot to stop accepting on shutdown.

use crate::policy::{DecisionStatus, PolicyVerdict, Scope};
use crate::server::domain_approver::DomainApprover;
use crate::server::state::GuardianState;
use crate::utils::host::normalize_host;
use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, PROXY_AUTHORIZATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// Ports a cloister is never allowed to `CONNECT` to directly, regardless of
/// policy — SSH, mail, directory, and database ports have no business behind
/// an HTTPS-shaped tunnel.
const BLOCKED_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 110, 143, 389, 465, 587, 636, 993, 995, 3306, 5432, 6379, 27017,
];

type BoxBody = http_body_util::combinators::BoxBody<Bytes, std::convert::Infallible>;

fn empty_body() -> BoxBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

fn text_body(text: impl Into<Bytes>) -> BoxBody {
    Full::new(text.into()).map_err(|never| match never {}).boxed()
}

fn respond(status: StatusCode, body: BoxBody) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .body(body)
        .unwrap_or_else(|_| {
            let mut resp = Response::new(text_body(Bytes::from_static(b"internal error")));
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        })
}

fn error_response(status: StatusCode, reason: &str) -> Response<BoxBody> {
    respond(status, text_body(Bytes::copy_from_slice(reason.as_bytes())))
}

/// Decode `Proxy-Authorization: Basic base64("token:" + TOKEN)` into the
/// bearer token. Anything else — missing header, malformed base64,
/// wrong scheme, wrong username — is treated as "no credential".
fn extract_proxy_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(PROXY_AUTHORIZATION)?.to_str().ok()?;
    let encoded = raw.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, token) = decoded.split_once(':')?;
    if username != "token" || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

async fn handle_connect(req: Request<Incoming>, state: Arc<GuardianState>) -> Response<BoxBody> {
    let Some(authority) = req.uri().authority().cloned() else {
        return error_response(StatusCode::BAD_REQUEST, "CONNECT target must be host:port");
    };

    let Some(token) = extract_proxy_token(req.headers()) else {
        return error_response(StatusCode::PROXY_AUTHENTICATION_REQUIRED, "missing or invalid proxy credential");
    };
    let Some(info) = state.tokens.lookup(&token) else {
        return error_response(StatusCode::PROXY_AUTHENTICATION_REQUIRED, "unknown token");
    };

    let port = authority.port_u16().unwrap_or(443);
    if BLOCKED_PORTS.contains(&port) {
        let approver = DomainApprover::new(state.domain_queue.clone(), state.events.clone(), state.audit.clone());
        approver.deny_immediate(&info.cloister, &info.project, authority.host(), "port is blocked");
        return error_response(StatusCode::FORBIDDEN, "destination port is blocked");
    }

    let host = normalize_host(authority.host());
    let verdict = state.policy.evaluate(&token, &info.project, &host);
    let approver = DomainApprover::new(state.domain_queue.clone(), state.events.clone(), state.audit.clone());

    let allowed = match verdict {
        PolicyVerdict::Allowed { .. } => true,
        PolicyVerdict::Denied { .. } => {
            approver.deny_immediate(&info.cloister, &info.project, &host, "denied by policy");
            false
        }
        PolicyVerdict::Unlisted => match state.policy.unlisted_behavior {
            crate::config::UnlistedDomainBehavior::Reject => {
                approver.deny_immediate(&info.cloister, &info.project, &host, "unlisted domain, approval disabled");
                false
            }
            crate::config::UnlistedDomainBehavior::RequestApproval => {
                let decision = approver.request_approval(&info.cloister, &info.project, &host, &token).await;
                decision.status == DecisionStatus::Approved
            }
        },
    };

    if !allowed {
        return error_response(StatusCode::FORBIDDEN, "destination is not allowed");
    }

    let target = authority.as_str().to_string();
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let mut client_stream = TokioIo::new(upgraded);
                match TcpStream::connect(&target).await {
                    Ok(mut upstream) => {
                        let tunnel_timeout = std::time::Duration::from_secs(30 * 60);
                        match tokio::time::timeout(
                            tunnel_timeout,
                            tokio::io::copy_bidirectional(&mut client_stream, &mut upstream),
                        )
                        .await
                        {
                            Ok(Ok(_)) => {}
                            Ok(Err(err)) => tracing::debug!(target = %target, error = %err, "tunnel closed"),
                            Err(_) => tracing::info!(target = %target, "tunnel timed out after 30m"),
                        }
                    }
                    Err(err) => tracing::warn!(target = %target, error = %err, "failed to connect upstream"),
                }
            }
            Err(err) => tracing::warn!(error = %err, "CONNECT upgrade failed"),
        }
    });

    respond(StatusCode::OK, empty_body())
}

async fn route(req: Request<Incoming>, state: Arc<GuardianState>) -> Result<Response<BoxBody>, std::convert::Infallible> {
    if req.method() != Method::CONNECT {
        return Ok(error_response(StatusCode::METHOD_NOT_ALLOWED, "only CONNECT is supported"));
    }
    Ok(handle_connect(req, state).await)
}

pub struct ProxyServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: tokio::task::JoinHandle<()>,
}

impl ProxyServer {
    /// Bind and start accepting connections, one task per connection, until
    /// `shutdown` is called.
    pub async fn start(addr: SocketAddr, state: Arc<GuardianState>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let state = state.clone();
                                tokio::spawn(async move {
                                    let service = service_fn(move |req| route(req, state.clone()));
                                    if let Err(err) = http1::Builder::new()
                                        .preserve_header_case(true)
                                        .title_case_headers(true)
                                        .serve_connection(io, service)
                                        .with_upgrades()
                                        .await
                                    {
                                        tracing::debug!(error = %err, "proxy connection ended with error");
                                    }
                                });
                            }
                            Err(err) => tracing::warn!(error = %err, "proxy accept error"),
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            join,
        })
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
    }
}
