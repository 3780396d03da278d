//! The admin API — a loopback-only endpoint the CLI uses to
//! register a token when a cloister starts and revoke it when the cloister
//! stops. The only caller is `cloisterd token register|revoke`; nothing
//! inside a container ever reaches this port.

use crate::error::GuardianError;
use crate::server::state::GuardianState;
use crate::token::TokenInfo;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router(state: Arc<GuardianState>) -> Router {
    Router::new()
        .route("/token", post(register_token))
        .route("/token/{token}", delete(revoke_token))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    token: String,
    cloister: String,
    project: String,
    worktree: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    status: &'static str,
    cloister: String,
}

/// Register a token, priming the project's policy and command-matcher
/// caches so the cloister's very first proxy/request-server call is hot
/// via [`crate::policy::PolicyEngine::ensure_project`]. Rejects with 409 if the token is already
/// registered to a different cloister.
async fn register_token(
    State(state): State<Arc<GuardianState>>,
    Json(body): Json<RegisterBody>,
) -> Result<Json<RegisterResponse>, GuardianError> {
    let info = TokenInfo {
        cloister: body.cloister.clone(),
        project: body.project.clone(),
        worktree: body.worktree,
    };

    state
        .tokens
        .register(&body.token, info)
        .map_err(|err| GuardianError::BadRequest(err.to_string()))?;

    state
        .policy
        .ensure_project(&body.project)
        .map_err(GuardianError::Internal)?;

    tracing::info!(cloister = %body.cloister, project = %body.project, "token registered");

    Ok(Json(RegisterResponse {
        status: "registered",
        cloister: body.cloister,
    }))
}

/// Revoke a token: drop it from the registry, drop its token-session policy
/// state (I4), and remove its on-disk store entry.
async fn revoke_token(
    State(state): State<Arc<GuardianState>>,
    Path(token): Path<String>,
) -> Result<StatusCode, GuardianError> {
    let info = state.tokens.revoke(&token).ok_or(GuardianError::NotFound)?;
    state.policy.drop_session(&token);
    tracing::info!(cloister = %info.cloister, "token revoked");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSink;
    use crate::command::CommandMatcherRegistry;
    use crate::config::loader::ProjectLoader;
    use crate::config::{DecisionsFile, GuardianConfig};
    use crate::events::EventHub;
    use crate::executor::{CommandExecutor, ExecReply, ExecRequest, ExecStatus};
    use crate::policy::PolicyEngine;
    use crate::queue::{CommandQueue, DomainQueue};
    use crate::token::TokenRegistry;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
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

    #[tokio::test]
    async fn test_register_then_revoke() {
        let state = test_state();
        let app = router(state.clone());

        let body = r#"{"token":"abc123","cloister":"demo-main","project":"demo","worktree":"/w"}"#;
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/token")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.tokens.lookup("abc123").is_some());

        let resp = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/token/abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(state.tokens.lookup("abc123").is_none());
    }

    #[tokio::test]
    async fn test_revoke_unknown_token_is_404() {
        let state = test_state();
        let app = router(state);
        let resp = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/token/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_register_conflict_is_bad_request() {
        let state = test_state();
        let app = router(state);
        let body_a = r#"{"token":"abc123","cloister":"demo-main","project":"demo","worktree":"/w"}"#;
        let body_b = r#"{"token":"abc123","cloister":"other-main","project":"demo","worktree":"/w"}"#;

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/token")
                    .header("content-type", "application/json")
                    .body(Body::from(body_a))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/token")
                    .header("content-type", "application/json")
                    .body(Body::from(body_b))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
