//! The container-facing request server — the single `POST /request`
//! route `hostexec` calls with a pre-tokenized argv. Canonicalizes, matches
//! against the project's command patterns, and either dispatches straight to
//! the executor, blocks on a human decision, or denies.

use crate::audit::Category;
use crate::command::{canonicalize, contains_nul, MatchCategory, MatchResult};
use crate::error::GuardianError;
use crate::events::Event;
use crate::executor::{ExecReply, ExecRequest, ExecStatus};
use crate::policy::{Decision, DecisionStatus};
use crate::server::state::GuardianState;
use crate::token::TokenInfo;
use crate::utils::duration::render_duration;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Deserialize)]
struct RequestBody {
    args: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
struct RequestResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
}

pub fn router(state: Arc<GuardianState>) -> Router {
    Router::new()
        .route("/request", post(handle_request))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<Arc<GuardianState>>,
    headers: HeaderMap,
    mut req: Request,
    next: Next,
) -> Result<Response, GuardianError> {
    let token = headers
        .get("X-Cloister-Token")
        .and_then(|v| v.to_str().ok())
        .ok_or(GuardianError::Unauthenticated)?
        .to_string();
    let info = state.tokens.lookup(&token).ok_or(GuardianError::Unauthenticated)?;
    req.extensions_mut().insert((token, info));
    Ok(next.run(req).await)
}

async fn handle_request(
    State(state): State<Arc<GuardianState>>,
    axum::Extension((token, info)): axum::Extension<(String, TokenInfo)>,
    Json(body): Json<RequestBody>,
) -> Result<Json<RequestResponse>, GuardianError> {
    if body.args.is_empty() {
        return Err(GuardianError::BadRequest("args must not be empty".to_string()));
    }
    if contains_nul(&body.args) {
        return Err(GuardianError::BadRequest("args must not contain NUL bytes".to_string()));
    }

    let cmd = canonicalize(&body.args);
    audit(&state, "REQUEST", &[("project", &info.project), ("cloister", &info.cloister), ("cmd", &cmd)]);

    let matcher = state
        .command_matchers
        .get(&info.project)
        .map_err(|err| GuardianError::Configuration(err.to_string()))?;

    if matcher.is_empty() {
        audit(
            &state,
            "DENY",
            &[("project", &info.project), ("cloister", &info.cloister), ("cmd", &cmd)],
        );
        return Ok(Json(RequestResponse {
            status: "denied",
            reason: Some("no approval patterns configured".to_string()),
            ..Default::default()
        }));
    }

    match matcher.match_command(&cmd) {
        MatchResult::Matched { category: MatchCategory::Auto, pattern } => {
            audit(
                &state,
                "AUTO_APPROVE",
                &[("project", &info.project), ("cloister", &info.cloister), ("cmd", &cmd), ("pattern", &pattern)],
            );
            let reply = dispatch(&state, &info, &cmd, &body.args).await;
            Ok(Json(exec_response("auto_approved", Some(pattern), reply)))
        }
        MatchResult::Matched { category: MatchCategory::Manual, pattern } => {
            let (id, mut rx) = state
                .command_queue
                .add(info.cloister.clone(), info.project.clone(), cmd.clone(), body.args.clone());
            state.events.broadcast(Event::new(
                "request-added",
                format!("{{\"id\":\"{id}\",\"cmd\":\"{}\"}}", cmd.replace('"', "\\\"")),
            ));

            let decision = rx.recv().await.unwrap_or_else(Decision::timeout);
            match decision.status {
                DecisionStatus::Approved => {
                    audit(
                        &state,
                        "APPROVE",
                        &[("project", &info.project), ("cloister", &info.cloister), ("cmd", &cmd)],
                    );
                    let reply = dispatch(&state, &info, &cmd, &body.args).await;
                    Ok(Json(exec_response("approved", Some(pattern), reply)))
                }
                DecisionStatus::Denied => {
                    let reason = decision.reason.unwrap_or_else(|| "Denied by user".to_string());
                    audit(
                        &state,
                        "DENY",
                        &[("project", &info.project), ("cloister", &info.cloister), ("cmd", &cmd), ("reason", &reason)],
                    );
                    Ok(Json(RequestResponse {
                        status: "denied",
                        reason: Some(reason),
                        ..Default::default()
                    }))
                }
                DecisionStatus::Timeout => {
                    audit(
                        &state,
                        "TIMEOUT",
                        &[("project", &info.project), ("cloister", &info.cloister), ("cmd", &cmd)],
                    );
                    Ok(Json(RequestResponse {
                        status: "timeout",
                        reason: decision.reason,
                        ..Default::default()
                    }))
                }
            }
        }
        MatchResult::Deny => {
            audit(
                &state,
                "DENY",
                &[("project", &info.project), ("cloister", &info.cloister), ("cmd", &cmd)],
            );
            Ok(Json(RequestResponse {
                status: "denied",
                reason: Some("command does not match any approval pattern".to_string()),
                ..Default::default()
            }))
        }
    }
}

/// Send `args[]` straight to the executor — never a shell string — and
/// audit `COMPLETE` regardless of outcome. A transport-level failure (the
/// executor is unreachable, the connection drops mid-request, …) is itself
/// an "executor failure" per the error design, so it is folded into an
/// `ExecStatus::Error` reply rather than surfaced as a 500 — the container
/// caller always gets a `{"status":"error"}` body it can retry.
async fn dispatch(state: &GuardianState, info: &TokenInfo, cmd: &str, args: &[String]) -> ExecReply {
    let request = ExecRequest {
        command: args[0].clone(),
        args: args[1..].to_vec(),
        workdir: None,
        env: None,
        timeout_ms: None,
    };
    let started = Instant::now();
    let reply = match state.executor.execute(request).await {
        Ok(reply) => reply,
        Err(err) => {
            tracing::warn!(error = %err, "executor dispatch failed");
            ExecReply {
                status: ExecStatus::Error,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                error: Some(err.to_string()),
            }
        }
    };
    let duration = render_duration(started.elapsed());
    let exit = reply.exit_code.map(|e| e.to_string()).unwrap_or_else(|| "-".to_string());
    audit(
        state,
        "COMPLETE",
        &[
            ("project", &info.project),
            ("cloister", &info.cloister),
            ("cmd", cmd),
            ("exit", &exit),
            ("duration", &duration),
        ],
    );
    reply
}

fn exec_response(status: &'static str, pattern: Option<String>, reply: ExecReply) -> RequestResponse {
    match reply.status {
        ExecStatus::Completed => RequestResponse {
            status,
            pattern,
            exit_code: reply.exit_code,
            stdout: Some(reply.stdout),
            stderr: Some(reply.stderr),
            ..Default::default()
        },
        ExecStatus::Timeout => RequestResponse {
            status: "timeout",
            reason: reply.error.or(Some("executor request timed out".to_string())),
            ..Default::default()
        },
        ExecStatus::Error => RequestResponse {
            status: "error",
            reason: reply.error.or(Some("executor failed".to_string())),
            ..Default::default()
        },
    }
}

fn audit(state: &GuardianState, event: &str, fields: &[(&str, &str)]) {
    if let Some(sink) = &state.audit {
        let owned: Vec<(&str, String)> = fields.iter().map(|(k, v)| (*k, v.to_string())).collect();
        sink.log(Category::Hostexec, event, &owned);
    }
}

impl IntoResponse for RequestResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}
