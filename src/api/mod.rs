pub mod http;

use crate::auth::{authorize, AuthError, AuthErrorReason, Caller};
use crate::census::CensusApi;
use crate::config::Settings;
use crate::conflicts::Conflict;
use crate::orchestrator::{ExecuteOutcome, Orchestrator, RunCreation, StepOutcome};
use crate::plan::validate_plan;
use crate::planner::{propose_plan, PlanOracle, PlanRequest, PlannerError};
use crate::runs::{RunSnapshot, TransitionError, TransitionErrorCode};
use serde_json::{json, Value};
use std::sync::Arc;

/// Everything the handlers need. Built once at startup; handlers are pure
/// functions over this state plus the request.
pub struct ApiState {
    pub settings: Settings,
    pub orchestrator: Orchestrator,
    pub census: Arc<dyn CensusApi>,
    pub oracle: Option<Arc<dyn PlanOracle>>,
}

/// Transport-independent response: a status code plus a JSON body. The HTTP
/// layer only converts this; all decisions happen here.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

fn auth_failure(mode: &str, err: &AuthError) -> ApiResponse {
    // A server missing its own key is a config fault, not a caller fault.
    let status = match err.reason {
        AuthErrorReason::MissingApiKeyConfiguration => 500,
        _ => 403,
    };
    ApiResponse::new(
        status,
        json!({
            "ok": false,
            "mode": mode,
            "error": { "code": err.reason.as_str(), "message": err.message },
        }),
    )
}

fn conflict_response(mode: &str, conflicts: &[Conflict]) -> ApiResponse {
    ApiResponse::new(
        409,
        json!({
            "ok": false,
            "mode": mode,
            "error": { "code": "conflicts_found", "message": format!("{} conflict(s) found", conflicts.len()) },
            "conflicts": conflicts,
        }),
    )
}

fn transition_response(mode: &str, err: &TransitionError) -> ApiResponse {
    let status = match err.code {
        TransitionErrorCode::UnknownRun => 404,
        TransitionErrorCode::RunIdGeneration => 500,
        _ => 409,
    };
    let mut body = json!({
        "ok": false,
        "mode": mode,
        "error": { "code": err.code.to_string(), "message": err.message },
    });
    if let Some(snapshot) = &err.snapshot {
        body["run"] = json!(snapshot);
    }
    ApiResponse::new(status, body)
}

/// 202 while the run still has work or awaits input; 200 once terminal.
fn run_response(mode: &str, run: &RunSnapshot, extra: Value) -> ApiResponse {
    let status = if run.status.is_terminal() { 200 } else { 202 };
    let mut body = json!({ "ok": true, "mode": mode, "run": run });
    if let Value::Object(entries) = extra {
        for (key, value) in entries {
            body[key] = value;
        }
    }
    ApiResponse::new(status, body)
}

fn internal_error(mode: &str, message: &str) -> ApiResponse {
    ApiResponse::new(
        500,
        json!({
            "ok": false,
            "mode": mode,
            "error": { "code": "internal_error", "message": message },
        }),
    )
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// POST /execute. Validates, short-circuits for validate-only/dry-run,
/// detects conflicts, then either executes immediately or drives a durable
/// run via the `command` field.
pub fn handle_execute(state: &ApiState, api_key: Option<&str>, body: &Value) -> ApiResponse {
    let caller_email = body.get("callerEmail").and_then(Value::as_str);
    let command = body.get("command").and_then(Value::as_str);

    let caller = match authorize(&state.settings, api_key, caller_email) {
        Ok(caller) => caller,
        Err(err) => return auth_failure(mode_for(body), &err),
    };
    let email = match &caller {
        Caller::ApiKey => caller_email,
        Caller::AdminEmail(email) => Some(email.as_str()),
    };

    // Run sub-commands operate on an existing run and skip plan validation.
    if let Some(command) = command.filter(|command| *command != "create_run") {
        return handle_run_command(state, command, body, email);
    }

    let mode = mode_for(body);
    let plan = match validate_plan(body) {
        Ok(plan) => plan,
        Err(errors) => {
            return ApiResponse::new(
                400,
                json!({ "ok": false, "mode": mode, "errors": errors }),
            );
        }
    };

    let validate_only = body
        .get("validateOnly")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let dry_run = body.get("dryRun").and_then(Value::as_bool).unwrap_or(false);

    // Both short-circuit before any store access.
    if validate_only {
        return ApiResponse::new(
            200,
            json!({
                "ok": true,
                "mode": "validate_only",
                "plan": plan,
            }),
        );
    }
    if dry_run {
        return ApiResponse::new(
            200,
            json!({
                "ok": true,
                "mode": "dry_run",
                "estimate": plan.estimate,
                "caps": plan.caps,
                "warnings": plan.warnings,
            }),
        );
    }

    if command == Some("create_run") {
        return match state.orchestrator.create_run(&plan, email, now()) {
            Ok(RunCreation::Conflicts(conflicts)) => conflict_response("execute", &conflicts),
            Ok(RunCreation::Created(run)) => run_response("execute", &run, json!({})),
            Err(err) => internal_error("execute", &err.to_string()),
        };
    }

    match state.orchestrator.execute_immediate(&plan, email, now()) {
        Ok(ExecuteOutcome::Conflicts(conflicts)) => conflict_response("execute", &conflicts),
        Ok(ExecuteOutcome::Executed(results)) => ApiResponse::new(
            200,
            json!({ "ok": true, "mode": "execute", "results": results }),
        ),
        Err(err) => internal_error("execute", &err.to_string()),
    }
}

fn mode_for(body: &Value) -> &'static str {
    if body
        .get("validateOnly")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        "validate_only"
    } else if body.get("dryRun").and_then(Value::as_bool).unwrap_or(false) {
        "dry_run"
    } else {
        "execute"
    }
}

fn handle_run_command(
    state: &ApiState,
    command: &str,
    body: &Value,
    email: Option<&str>,
) -> ApiResponse {
    let Some(run_id) = body.get("runId").and_then(Value::as_str) else {
        return ApiResponse::new(
            400,
            json!({
                "ok": false,
                "mode": "execute",
                "errors": [{ "code": "invalid_request", "path": "runId", "message": "`runId` is required for run commands" }],
            }),
        );
    };

    let at = now();
    let outcome = match command {
        "approve_run" => state.orchestrator.approve_run(run_id, at),
        "pause_run" => state.orchestrator.pause_run(run_id, at),
        "resume_run" => state.orchestrator.resume_run(run_id, at),
        "stop_run" => state.orchestrator.stop_run(run_id, at),
        "run_next_step" => {
            return match state.orchestrator.run_next_step(run_id, email, at) {
                Ok(StepOutcome { run, result, error }) => {
                    // The transition succeeded either way; `ok` reports
                    // whether the step's executor did.
                    let status = if run.status.is_terminal() { 200 } else { 202 };
                    ApiResponse::new(
                        status,
                        json!({
                            "ok": error.is_none(),
                            "mode": "execute",
                            "run": run,
                            "result": result,
                            "stepError": error,
                        }),
                    )
                }
                Err(err) => transition_response("execute", &err),
            };
        }
        other => {
            return ApiResponse::new(
                400,
                json!({
                    "ok": false,
                    "mode": "execute",
                    "errors": [{ "code": "invalid_request", "path": "command", "message": format!("unknown command `{other}`") }],
                }),
            );
        }
    };

    match outcome {
        Ok(run) => run_response("execute", &run, json!({})),
        Err(err) => transition_response("execute", &err),
    }
}

/// POST /plan. Authenticates, gathers upstream evidence, and asks the plan
/// oracle for draft actions.
pub fn handle_plan(state: &ApiState, api_key: Option<&str>, body: &Value) -> ApiResponse {
    let caller_email = body.get("callerEmail").and_then(Value::as_str);
    if let Err(err) = authorize(&state.settings, api_key, caller_email) {
        return auth_failure("plan", &err);
    }

    let request: PlanRequest = match serde_json::from_value(body.clone()) {
        Ok(request) => request,
        Err(err) => {
            return ApiResponse::new(
                400,
                json!({
                    "ok": false,
                    "mode": "plan",
                    "errors": [{ "code": "invalid_request", "path": "", "message": err.to_string() }],
                }),
            );
        }
    };

    let Some(oracle) = &state.oracle else {
        return internal_error("plan", "no plan oracle is configured");
    };

    match propose_plan(oracle.as_ref(), state.census.as_ref(), &request) {
        Ok(proposal) => ApiResponse::new(
            200,
            json!({ "ok": true, "mode": "plan", "proposal": proposal }),
        ),
        Err(PlannerError::InvalidProposal(message)) => internal_error("plan", &message),
        Err(err) => internal_error("plan", &err.to_string()),
    }
}
