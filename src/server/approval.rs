//! The human-facing approval web UI: an HTML console plus a small
//! JSON+SSE API, bound to `127.0.0.1` only. Lists both pending queues,
//! streams updates to any number of subscribers, and turns an operator's
//! approve/deny click back into a [`crate::policy::Decision`] delivered on
//! the waiting request's response channel.
//!
//! HTML templates render via askama; static assets are embedded at build
//! time via `include_dir` so the console ships as part of the binary.

use crate::audit::Category;
use crate::config::DomainEntry;
use crate::error::GuardianError;
use crate::events::Event;
use crate::policy::{Decision, Scope};
use crate::queue::{PendingCommand, PendingDomain};
use crate::server::state::GuardianState;
use askama::Template;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};
use tokio_stream::{Stream, StreamExt};

static STATIC_ASSETS: include_dir::Dir = include_dir::include_dir!("$CARGO_MANIFEST_DIR/static");

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub fn router(state: Arc<GuardianState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/pending", get(list_pending_commands))
        .route("/pending-domains", get(list_pending_domains))
        .route("/events", get(events))
        .route("/approve/{id}", post(approve_command))
        .route("/deny/{id}", post(deny_command))
        .route("/approve-domain/{id}", post(approve_domain))
        .route("/deny-domain/{id}", post(deny_domain))
        .route("/static/{*path}", get(static_asset))
        .with_state(state)
}

// ── HTML console ─────────────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "approval_index.html", escape = "html")]
struct ApprovalIndexTemplate {
    commands: Vec<CommandRow>,
    domains: Vec<DomainRow>,
}

struct CommandRow {
    id: String,
    cloister: String,
    project: String,
    cmd: String,
    timestamp: String,
}

struct DomainRow {
    id: String,
    cloister: String,
    project: String,
    domain: String,
    timestamp: String,
}

fn command_row(item: PendingCommand) -> CommandRow {
    CommandRow {
        id: item.id,
        cloister: item.cloister,
        project: item.project,
        cmd: item.cmd,
        timestamp: item.timestamp.to_rfc3339(),
    }
}

fn domain_row(item: PendingDomain) -> DomainRow {
    DomainRow {
        id: item.id,
        cloister: item.cloister,
        project: item.project,
        domain: item.domain,
        timestamp: item.timestamp.to_rfc3339(),
    }
}

async fn index(State(state): State<Arc<GuardianState>>) -> Response {
    let template = ApprovalIndexTemplate {
        commands: state.command_queue.list().into_iter().map(command_row).collect(),
        domains: state.domain_queue.list().into_iter().map(domain_row).collect(),
    };
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to render approval console");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render approval console").into_response()
        }
    }
}

// ── JSON listings ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct PendingCommandView {
    id: String,
    cloister: String,
    project: String,
    cmd: String,
    timestamp: String,
}

impl From<PendingCommand> for PendingCommandView {
    fn from(item: PendingCommand) -> Self {
        Self {
            id: item.id,
            cloister: item.cloister,
            project: item.project,
            cmd: item.cmd,
            timestamp: item.timestamp.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct PendingDomainView {
    id: String,
    cloister: String,
    project: String,
    domain: String,
    timestamp: String,
}

impl From<PendingDomain> for PendingDomainView {
    fn from(item: PendingDomain) -> Self {
        Self {
            id: item.id,
            cloister: item.cloister,
            project: item.project,
            domain: item.domain,
            timestamp: item.timestamp.to_rfc3339(),
        }
    }
}

async fn list_pending_commands(State(state): State<Arc<GuardianState>>) -> Json<Vec<PendingCommandView>> {
    Json(state.command_queue.list().into_iter().map(Into::into).collect())
}

async fn list_pending_domains(State(state): State<Arc<GuardianState>>) -> Json<Vec<PendingDomainView>> {
    Json(state.domain_queue.list().into_iter().map(Into::into).collect())
}

// ── SSE ──────────────────────────────────────────────────────────────────

/// Wraps a body stream so that, when axum drops it on client disconnect, the
/// background task feeding it (subscriber forwarding + heartbeat ticker) is
/// aborted and the subscriber is dropped from the hub rather than leaking.
struct AbortOnDrop<S> {
    inner: S,
    task: tokio::task::JoinHandle<()>,
}

impl<S: Stream + Unpin> Stream for AbortOnDrop<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for AbortOnDrop<S> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn events(State(state): State<Arc<GuardianState>>) -> Response {
    let Some((sub_id, mut rx)) = state.events.subscribe() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "event hub is shut down").into_response();
    };

    let (out_tx, out_rx) = mpsc::channel::<Result<Bytes, Infallible>>(16);
    let hub = state.events.clone();
    let task = tokio::spawn(async move {
        let mut heartbeat = IntervalStream::new(tokio::time::interval(HEARTBEAT_INTERVAL));
        heartbeat.next().await; // the first tick fires immediately; discard it
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            if out_tx.send(Ok(Bytes::from(event.to_sse_text()))).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = heartbeat.next() => {
                    let hb = Event::new("heartbeat", "");
                    if out_tx.send(Ok(Bytes::from(hb.to_sse_text()))).await.is_err() {
                        break;
                    }
                }
            }
        }
        hub.unsubscribe(sub_id);
    });

    let body = Body::from_stream(AbortOnDrop {
        inner: ReceiverStream::new(out_rx),
        task,
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .expect("building an SSE response cannot fail")
}

// ── approve/deny: commands ───────────────────────────────────────────────

#[derive(Serialize)]
struct CommandApiResponse {
    status: &'static str,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

fn parse_reason(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    #[derive(Deserialize)]
    struct ReasonBody {
        reason: Option<String>,
    }
    serde_json::from_slice::<ReasonBody>(body).ok().and_then(|b| b.reason)
}

fn audit(state: &GuardianState, category: Category, event: &str, fields: &[(&str, &str)]) {
    if let Some(sink) = &state.audit {
        let owned: Vec<(&str, String)> = fields.iter().map(|(k, v)| (*k, v.to_string())).collect();
        sink.log(category, event, &owned);
    }
}

async fn approve_command(
    State(state): State<Arc<GuardianState>>,
    Path(id): Path<String>,
) -> Result<Json<CommandApiResponse>, GuardianError> {
    let item = state.command_queue.get(&id).ok_or(GuardianError::NotFound)?;
    audit(
        &state,
        Category::Hostexec,
        "APPROVE",
        &[("project", &item.project), ("cloister", &item.cloister), ("cmd", &item.cmd)],
    );
    if !state.command_queue.resolve(&id, Decision::approved()) {
        return Err(GuardianError::NotFound);
    }
    state
        .events
        .broadcast(Event::new("request-removed", format!("{{\"id\":\"{id}\"}}")));
    Ok(Json(CommandApiResponse { status: "approved", id, reason: None }))
}

async fn deny_command(
    State(state): State<Arc<GuardianState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<CommandApiResponse>, GuardianError> {
    let item = state.command_queue.get(&id).ok_or(GuardianError::NotFound)?;
    let reason = parse_reason(&body).unwrap_or_else(|| "Denied by user".to_string());
    audit(
        &state,
        Category::Hostexec,
        "DENY",
        &[
            ("project", &item.project),
            ("cloister", &item.cloister),
            ("cmd", &item.cmd),
            ("reason", &reason),
        ],
    );
    if !state.command_queue.resolve(&id, Decision::denied(reason.clone())) {
        return Err(GuardianError::NotFound);
    }
    state
        .events
        .broadcast(Event::new("request-removed", format!("{{\"id\":\"{id}\"}}")));
    Ok(Json(CommandApiResponse { status: "denied", id, reason: Some(reason) }))
}

// ── approve/deny: domains ────────────────────────────────────────────────

#[derive(Serialize)]
struct DomainApiResponse {
    status: &'static str,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    persistence_error: Option<String>,
}

fn scope_str(scope: Scope) -> &'static str {
    match scope {
        Scope::Once => "once",
        Scope::Session => "session",
        Scope::Project => "project",
        Scope::Global => "global",
    }
}

fn parse_scope(raw: &str) -> Option<Scope> {
    match raw {
        "once" => Some(Scope::Once),
        "session" => Some(Scope::Session),
        "project" => Some(Scope::Project),
        "global" => Some(Scope::Global),
        _ => None,
    }
}

#[derive(Deserialize)]
struct ApproveDomainBody {
    scope: String,
    #[serde(default)]
    pattern: Option<String>,
}

async fn approve_domain(
    State(state): State<Arc<GuardianState>>,
    Path(id): Path<String>,
    Json(body): Json<ApproveDomainBody>,
) -> Result<Json<DomainApiResponse>, GuardianError> {
    let scope = parse_scope(&body.scope)
        .ok_or_else(|| GuardianError::BadRequest(format!("invalid scope {:?}", body.scope)))?;
    if matches!(scope, Scope::Once) {
        return Err(GuardianError::BadRequest(
            "approve-domain scope must be session, project, or global".to_string(),
        ));
    }

    let item = state.domain_queue.get(&id).ok_or(GuardianError::NotFound)?;
    let entry = match &body.pattern {
        Some(pattern) => DomainEntry::pattern(pattern.clone()),
        None => DomainEntry::domain(item.domain.clone()),
    };

    let mut effective_scope = scope;
    let mut persistence_error = None;

    if matches!(scope, Scope::Project | Scope::Global) {
        if state.persister.is_none() {
            return Err(GuardianError::Configuration(
                "approve-domain requires a configured config persister for project/global scope".to_string(),
            ));
        }
        if let Err(err) = state
            .policy
            .record_decision(&item.token, &item.project, scope, entry.clone(), true)
            .await
        {
            persistence_error = Some(err.to_string());
            effective_scope = Scope::Session;
            let _ = state
                .policy
                .record_decision(&item.token, &item.project, Scope::Session, entry.clone(), true)
                .await;
        }
    } else {
        let _ = state
            .policy
            .record_decision(&item.token, &item.project, scope, entry.clone(), true)
            .await;
    }

    audit(
        &state,
        Category::Domain,
        "DOMAIN_APPROVE",
        &[
            ("project", &item.project),
            ("cloister", &item.cloister),
            ("domain", &item.domain),
            ("scope", scope_str(effective_scope)),
        ],
    );

    let mut decision = Decision::approved_scoped(effective_scope);
    if let Some(err) = &persistence_error {
        decision = decision.with_persistence_error(err.clone());
    }
    if !state.domain_queue.resolve(&id, decision) {
        return Err(GuardianError::NotFound);
    }
    state
        .events
        .broadcast(Event::new("domain-request-removed", format!("{{\"id\":\"{id}\"}}")));

    Ok(Json(DomainApiResponse {
        status: "approved",
        id,
        scope: Some(scope_str(effective_scope)),
        reason: None,
        persistence_error,
    }))
}

#[derive(Deserialize, Default)]
struct DenyDomainBody {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    pattern: Option<String>,
}

fn parse_deny_domain_body(body: &[u8]) -> DenyDomainBody {
    if body.is_empty() {
        return DenyDomainBody::default();
    }
    serde_json::from_slice(body).unwrap_or_default()
}

async fn deny_domain(
    State(state): State<Arc<GuardianState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<DomainApiResponse>, GuardianError> {
    let parsed = parse_deny_domain_body(&body);
    let scope = match parsed.scope.as_deref() {
        Some(raw) => parse_scope(raw).ok_or_else(|| GuardianError::BadRequest(format!("invalid scope {raw:?}")))?,
        None => Scope::Once,
    };

    let item = state.domain_queue.get(&id).ok_or(GuardianError::NotFound)?;
    let reason = parsed.reason.unwrap_or_else(|| "Denied by user".to_string());
    let entry = match &parsed.pattern {
        Some(pattern) => DomainEntry::pattern(pattern.clone()),
        None => DomainEntry::domain(item.domain.clone()),
    };

    match scope {
        Scope::Once => {}
        Scope::Session => {
            let _ = state
                .policy
                .record_decision(&item.token, &item.project, Scope::Session, entry.clone(), false)
                .await;
        }
        Scope::Project | Scope::Global => {
            if state.persister.is_none() {
                return Err(GuardianError::Configuration(
                    "deny-domain requires a configured config persister for project/global scope".to_string(),
                ));
            }
            state
                .policy
                .record_decision(&item.token, &item.project, scope, entry.clone(), false)
                .await
                .map_err(GuardianError::Internal)?;
        }
    }

    let mut audit_fields = vec![
        ("project", item.project.clone()),
        ("cloister", item.cloister.clone()),
        ("domain", item.domain.clone()),
        ("scope", scope_str(scope).to_string()),
    ];
    if let Some(pattern) = &parsed.pattern {
        audit_fields.push(("pattern", pattern.clone()));
    }
    audit_fields.push(("reason", reason.clone()));
    if let Some(sink) = &state.audit {
        sink.log(Category::Domain, "DOMAIN_DENY", &audit_fields);
    }

    let mut decision = Decision::denied(reason.clone());
    decision.scope = Some(scope);
    if !state.domain_queue.resolve(&id, decision) {
        return Err(GuardianError::NotFound);
    }
    state
        .events
        .broadcast(Event::new("domain-request-removed", format!("{{\"id\":\"{id}\"}}")));

    Ok(Json(DomainApiResponse {
        status: "denied",
        id,
        scope: Some(scope_str(scope)),
        reason: Some(reason),
        persistence_error: None,
    }))
}

// ── embedded static assets ───────────────────────────────────────────────

fn mime_for_path(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or("") {
        "css" => "text/css; charset=utf-8",
        "js" => "application/javascript; charset=utf-8",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

async fn static_asset(Path(path): Path<String>) -> Response {
    match STATIC_ASSETS.get_file(&path) {
        Some(file) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime_for_path(&path)), (header::CACHE_CONTROL, "no-cache")],
            file.contents(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHub;

    #[test]
    fn test_parse_reason_defaults_on_empty_body() {
        assert_eq!(parse_reason(b""), None);
    }

    #[test]
    fn test_parse_reason_reads_json() {
        assert_eq!(parse_reason(br#"{"reason":"looks risky"}"#), Some("looks risky".to_string()));
    }

    #[test]
    fn test_parse_scope_rejects_unknown() {
        assert!(parse_scope("whenever").is_none());
        assert_eq!(parse_scope("project"), Some(Scope::Project));
    }

    #[test]
    fn test_parse_deny_domain_body_defaults() {
        let parsed = parse_deny_domain_body(b"");
        assert!(parsed.reason.is_none());
        assert!(parsed.scope.is_none());
    }

    #[tokio::test]
    async fn test_sse_event_unsubscribes_on_drop() {
        let hub = Arc::new(EventHub::new());
        assert_eq!(hub.subscriber_count(), 0);
        let (id, rx) = hub.subscribe().unwrap();
        assert_eq!(hub.subscriber_count(), 1);
        drop(rx);
        hub.unsubscribe(id);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
