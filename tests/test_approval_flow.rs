//! Exercises the human approval console's JSON API: approving/denying a
//! pending command, and the domain queue's scope persistence — including the
//! project/global-scope fallback to a session decision when the persister
//! fails.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use cloisterd::audit::AuditSink;
use cloisterd::command::CommandMatcherRegistry;
use cloisterd::config::persist::DecisionKind;
use cloisterd::config::types::DomainEntry;
use cloisterd::config::{ConfigPersister, DecisionsFile, GuardianConfig, ProjectLoader};
use cloisterd::events::EventHub;
use cloisterd::executor::{CommandExecutor, ExecReply, ExecRequest, ExecStatus};
use cloisterd::policy::{Decision, PolicyEngine};
use cloisterd::queue::{CommandQueue, DomainQueue};
use cloisterd::server::approval;
use cloisterd::server::state::GuardianState;
use cloisterd::token::TokenRegistry;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

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

/// Always fails — used to exercise `approve_domain`'s persistence-error
/// fallback to session scope.
struct FailingPersister;
#[async_trait]
impl ConfigPersister for FailingPersister {
    async fn persist_global(&self, _kind: DecisionKind, _entry: DomainEntry) -> anyhow::Result<()> {
        anyhow::bail!("disk is full")
    }
    async fn persist_project(&self, _project: &str, _kind: DecisionKind, _entry: DomainEntry) -> anyhow::Result<()> {
        anyhow::bail!("disk is full")
    }
}

fn test_state(persister: Option<Arc<dyn ConfigPersister>>) -> Arc<GuardianState> {
    let state = Arc::new(GuardianState {
        tokens: Arc::new(TokenRegistry::new()),
        policy: Arc::new(PolicyEngine::new(&GuardianConfig::default(), Arc::new(EmptyLoader), persister)),
        command_matchers: Arc::new(CommandMatcherRegistry::new(vec![], vec![], Arc::new(EmptyLoader))),
        command_queue: CommandQueue::new(Duration::from_secs(5)),
        domain_queue: DomainQueue::new(Duration::from_secs(5)),
        events: Arc::new(EventHub::new()),
        audit: Some(Arc::new(AuditSink::disabled())),
        executor: Arc::new(DummyExecutor),
        persister,
    });
    state.wire_queues();
    state
}

async fn post(state: Arc<GuardianState>, uri: &str, body: Value) -> (StatusCode, Value) {
    let app = approval::router(state);
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

#[tokio::test]
async fn test_approve_command_resolves_the_waiting_request() {
    let state = test_state(None);
    let (id, mut rx) = state.command_queue.add("demo-main".into(), "demo".into(), "docker compose up -d".into(), vec!["docker".into(), "compose".into(), "up".into(), "-d".into()]);

    let (status, body) = post(state, &format!("/approve/{id}"), serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");
    assert_eq!(body["id"], id);

    let decision = rx.recv().await.unwrap();
    assert!(matches!(decision.status, cloisterd::policy::DecisionStatus::Approved));
}

#[tokio::test]
async fn test_deny_command_carries_reason_to_the_waiting_request() {
    let state = test_state(None);
    let (id, mut rx) = state.command_queue.add("demo-main".into(), "demo".into(), "rm -rf /tmp/x".into(), vec!["rm".into(), "-rf".into(), "/tmp/x".into()]);

    let (status, body) = post(state, &format!("/deny/{id}"), serde_json::json!({"reason": "too risky"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "denied");
    assert_eq!(body["reason"], "too risky");

    let decision = rx.recv().await.unwrap();
    assert_eq!(decision.reason.as_deref(), Some("too risky"));
}

#[tokio::test]
async fn test_approve_unknown_command_id_is_404() {
    let state = test_state(None);
    let (status, _) = post(state, "/approve/does-not-exist", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_approve_domain_session_scope_needs_no_persister() {
    let state = test_state(None);
    let (_outcome, mut rx) = state.domain_queue.add("demo-main".into(), "demo".into(), "api.example.com".into(), "tok-1".into());
    let id = state.domain_queue.list().into_iter().next().unwrap().id;

    let (status, body) = post(state, &format!("/approve-domain/{id}"), serde_json::json!({"scope": "session"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scope"], "session");
    assert!(body["persistence_error"].is_null());

    let decision = rx.recv().await.unwrap();
    assert!(matches!(decision.status, cloisterd::policy::DecisionStatus::Approved));
}

#[tokio::test]
async fn test_approve_domain_project_scope_without_persister_is_configuration_error() {
    let state = test_state(None);
    let (_outcome, _rx) = state.domain_queue.add("demo-main".into(), "demo".into(), "api.example.com".into(), "tok-1".into());
    let id = state.domain_queue.list().into_iter().next().unwrap().id;

    let (status, _) = post(state, &format!("/approve-domain/{id}"), serde_json::json!({"scope": "project"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_approve_domain_global_scope_falls_back_to_session_on_persist_failure() {
    let persister: Arc<dyn ConfigPersister> = Arc::new(FailingPersister);
    let state = test_state(Some(persister));
    let (_outcome, mut rx) = state.domain_queue.add("demo-main".into(), "demo".into(), "api.example.com".into(), "tok-1".into());
    let id = state.domain_queue.list().into_iter().next().unwrap().id;

    let (status, body) = post(state, &format!("/approve-domain/{id}"), serde_json::json!({"scope": "global"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");
    assert_eq!(body["scope"], "session");
    assert_eq!(body["persistence_error"], "disk is full");

    let decision = rx.recv().await.unwrap();
    assert_eq!(decision.persistence_error.as_deref(), Some("disk is full"));
}

#[tokio::test]
async fn test_deny_domain_once_scope_is_transient() {
    let state = test_state(None);
    let (_outcome, mut rx) = state.domain_queue.add("demo-main".into(), "demo".into(), "shady.example.com".into(), "tok-1".into());
    let id = state.domain_queue.list().into_iter().next().unwrap().id;

    let (status, body) = post(state, &format!("/deny-domain/{id}"), serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "denied");
    assert_eq!(body["scope"], "once");

    let decision = rx.recv().await.unwrap();
    assert!(matches!(decision.status, cloisterd::policy::DecisionStatus::Denied));
}
