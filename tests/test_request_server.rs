//! End-to-end exercise of the container-facing request server against a
//! fake executor: auto-approve, manual-approve-then-approve, and deny.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use cloisterd::audit::AuditSink;
use cloisterd::command::CommandMatcherRegistry;
use cloisterd::config::{DecisionsFile, GuardianConfig, ProjectLoader};
use cloisterd::events::EventHub;
use cloisterd::executor::{CommandExecutor, ExecReply, ExecRequest, ExecStatus};
use cloisterd::policy::{Decision, PolicyEngine};
use cloisterd::queue::{CommandQueue, DomainQueue};
use cloisterd::server::request;
use cloisterd::server::state::GuardianState;
use cloisterd::token::{TokenInfo, TokenRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct EmptyLoader;
impl ProjectLoader for EmptyLoader {
    fn load(&self, _project: &str) -> anyhow::Result<(GuardianConfig, DecisionsFile)> {
        Ok((GuardianConfig::default(), DecisionsFile::default()))
    }
}

/// Echoes back the command it was given so tests can assert the executor
/// actually received argv, not a shell string.
struct EchoExecutor;
#[async_trait]
impl CommandExecutor for EchoExecutor {
    async fn execute(&self, request: ExecRequest) -> anyhow::Result<ExecReply> {
        Ok(ExecReply {
            status: ExecStatus::Completed,
            exit_code: Some(0),
            stdout: format!("{} {}", request.command, request.args.join(" ")),
            stderr: String::new(),
            error: None,
        })
    }
}

/// Simulates an unreachable executor — every call fails at the transport
/// layer, never producing an `ExecReply` at all.
struct UnreachableExecutor;
#[async_trait]
impl CommandExecutor for UnreachableExecutor {
    async fn execute(&self, _request: ExecRequest) -> anyhow::Result<ExecReply> {
        anyhow::bail!("connection refused")
    }
}

fn test_state(timeout: Duration) -> Arc<GuardianState> {
    test_state_with_executor(timeout, Arc::new(EchoExecutor))
}

fn test_state_with_executor(timeout: Duration, executor: Arc<dyn CommandExecutor>) -> Arc<GuardianState> {
    let state = Arc::new(GuardianState {
        tokens: Arc::new(TokenRegistry::new()),
        policy: Arc::new(PolicyEngine::new(&GuardianConfig::default(), Arc::new(EmptyLoader), None)),
        command_matchers: Arc::new(CommandMatcherRegistry::new(
            vec!["^docker compose ps$".to_string()],
            vec!["^docker compose (up|down).*$".to_string()],
            Arc::new(EmptyLoader),
        )),
        command_queue: CommandQueue::new(timeout),
        domain_queue: DomainQueue::new(timeout),
        events: Arc::new(EventHub::new()),
        audit: Some(Arc::new(AuditSink::disabled())),
        executor,
        persister: None,
    });
    state.wire_queues();
    state.tokens.register(
        "tok-aa",
        TokenInfo { cloister: "demo-main".to_string(), project: "demo".to_string(), worktree: "/work/demo".to_string() },
    ).unwrap();
    state
}

async fn post_request(state: Arc<GuardianState>, token: &str, args: Value) -> (StatusCode, Value) {
    let app = request::router(state);
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/request")
                .header("content-type", "application/json")
                .header("X-Cloister-Token", token)
                .body(Body::from(json!({ "args": args }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_auto_approved_command_dispatches_to_executor() {
    let state = test_state(Duration::from_secs(5));
    let (status, body) = post_request(state, "tok-aa", json!(["docker", "compose", "ps"])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "auto_approved");
    assert_eq!(body["pattern"], "^docker compose ps$");
    assert_eq!(body["exit_code"], 0);
    assert_eq!(body["stdout"], "docker compose ps");
}

#[tokio::test]
async fn test_unmatched_command_is_denied() {
    let state = test_state(Duration::from_secs(5));
    let (status, body) = post_request(state, "tok-aa", json!(["rm", "-rf", "/"])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "denied");
    assert!(body["reason"].as_str().unwrap().contains("does not match"));
}

#[tokio::test]
async fn test_missing_token_is_unauthenticated() {
    let state = test_state(Duration::from_secs(5));
    let app = request::router(state);
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/request")
                .header("content-type", "application/json")
                .body(Body::from(json!({"args": ["ls"]}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_empty_args_is_bad_request() {
    let state = test_state(Duration::from_secs(5));
    let (status, _) = post_request(state, "tok-aa", json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_manual_approval_blocks_until_human_decision() {
    let state = test_state(Duration::from_secs(5));
    let approver_state = state.clone();

    // The human's approval arrives while the request handler is still
    // awaiting — resolve the queue entry as soon as it shows up.
    let approver = tokio::spawn(async move {
        loop {
            let pending = approver_state.command_queue.list();
            if let Some(item) = pending.into_iter().next() {
                assert_eq!(item.cmd, "docker compose up -d");
                approver_state.command_queue.resolve(&item.id, Decision::approved());
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let (status, body) = post_request(state, "tok-aa", json!(["docker", "compose", "up", "-d"])).await;
    approver.await.unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");
    assert_eq!(body["stdout"], "docker compose up -d");
}

#[tokio::test]
async fn test_executor_transport_failure_surfaces_as_error_status_not_500() {
    let state = test_state_with_executor(Duration::from_secs(5), Arc::new(UnreachableExecutor));
    let (status, body) = post_request(state, "tok-aa", json!(["docker", "compose", "ps"])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert!(body["reason"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_manual_approval_times_out() {
    let state = test_state(Duration::from_millis(30));
    let (status, body) = post_request(state, "tok-aa", json!(["docker", "compose", "down"])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "timeout");
}
