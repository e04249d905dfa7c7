use serde_json::{json, Value};
use statward::api::{handle_execute, handle_plan, ApiState};
use statward::census::{CensusApi, CensusError, VariableMetadata};
use statward::config::{Environment, Settings};
use statward::orchestrator::Orchestrator;
use statward::planner::{OracleProposal, PlanEvidence, PlanOracle, PlannerError};
use statward::store::{Granularity, MemoryStatStore};
use std::sync::Arc;

struct FakeCensus;

impl CensusApi for FakeCensus {
    fn variable_metadata(
        &self,
        _dataset: &str,
        _year: u16,
        variable: &str,
    ) -> Result<Option<VariableMetadata>, CensusError> {
        Ok(Some(VariableMetadata {
            name: variable.to_string(),
            label: format!("Estimate!!{variable}"),
            concept: "TEST".to_string(),
            predicate_type: "int".to_string(),
        }))
    }

    fn group_variable_count(
        &self,
        _dataset: &str,
        _year: u16,
        _group: &str,
    ) -> Result<u64, CensusError> {
        Ok(49)
    }

    fn area_values(
        &self,
        _dataset: &str,
        _year: u16,
        _variable: &str,
        granularity: Granularity,
    ) -> Result<Vec<(String, f64)>, CensusError> {
        Ok(match granularity {
            Granularity::Tract => vec![("06001400100".to_string(), 10.0)],
            Granularity::County => vec![("06001".to_string(), 20.0)],
        })
    }
}

/// Always proposes one import, one unmappable suggestion, and an
/// out-of-range confidence.
struct CannedOracle;

impl PlanOracle for CannedOracle {
    fn propose(
        &self,
        _prompt: &str,
        _evidence: &[PlanEvidence],
    ) -> Result<OracleProposal, PlannerError> {
        Ok(OracleProposal {
            actions: vec![
                json!({
                    "type": "import_census_stat",
                    "payload": { "dataset": "acs/acs5", "variable": "B01001_002E", "year": 2023 }
                }),
                json!({ "type": "recalculate_everything" }),
            ],
            unresolved: vec!["pick a denominator stat".to_string()],
            confidence: 3.5,
        })
    }
}

struct Harness {
    state: Arc<ApiState>,
    store: Arc<MemoryStatStore>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryStatStore::new());
    let census: Arc<dyn CensusApi> = Arc::new(FakeCensus);
    let settings = Settings {
        environment: Environment::Development,
        api_key: Some("secret".to_string()),
        admin_emails: vec!["boss@example.com".to_string()],
        admin_domains: vec!["example.org".to_string()],
        state_root: dir.path().to_path_buf(),
        store_base_url: None,
        store_app_id: None,
        store_admin_token: None,
        census_base_url: "https://api.census.gov/data".to_string(),
        census_api_key: None,
        oracle_base_url: None,
        oracle_api_key: None,
        oracle_model: "gpt-4o-mini".to_string(),
        listen_addr: "127.0.0.1:0".to_string(),
    };
    let orchestrator = Orchestrator::new(store.clone(), census.clone(), dir.path().to_path_buf());
    Harness {
        state: Arc::new(ApiState {
            settings,
            orchestrator,
            census,
            oracle: Some(Arc::new(CannedOracle)),
        }),
        store,
        _dir: dir,
    }
}

fn import_body(extra: Value) -> Value {
    let mut body = json!({
        "actions": [{
            "type": "import_census_stat",
            "payload": { "dataset": "acs/acs5", "variable": "B01001_002E", "year": 2023 }
        }]
    });
    if let Value::Object(entries) = extra {
        for (key, value) in entries {
            body[key] = value;
        }
    }
    body
}

#[test]
fn a_wrong_api_key_is_a_403_with_a_reason() {
    let h = harness();
    let response = handle_execute(&h.state, Some("not-secret"), &import_body(json!({})));
    assert_eq!(response.status, 403);
    assert_eq!(response.body["ok"], json!(false));
    assert_eq!(response.body["error"]["code"], json!("invalid_api_key"));
}

#[test]
fn a_key_against_an_unconfigured_server_is_a_500() {
    let mut h = harness();
    Arc::get_mut(&mut h.state)
        .expect("sole owner")
        .settings
        .api_key = None;
    let response = handle_execute(&h.state, Some("secret"), &import_body(json!({})));
    assert_eq!(response.status, 500);
    assert_eq!(
        response.body["error"]["code"],
        json!("missing_api_key_configuration")
    );
}

#[test]
fn admin_email_fallback_applies_outside_production() {
    let h = harness();

    let allowed = handle_execute(
        &h.state,
        None,
        &import_body(json!({ "validateOnly": true, "callerEmail": "dev@example.org" })),
    );
    assert_eq!(allowed.status, 200);

    let refused = handle_execute(
        &h.state,
        None,
        &import_body(json!({ "validateOnly": true, "callerEmail": "rando@elsewhere.net" })),
    );
    assert_eq!(refused.status, 403);
    assert_eq!(
        refused.body["error"]["code"],
        json!("admin_email_required")
    );
}

#[test]
fn validation_failures_are_a_400_with_the_issue_list() {
    let h = harness();
    let response = handle_execute(&h.state, Some("secret"), &json!({ "actions": [] }));
    assert_eq!(response.status, 400);
    assert_eq!(response.body["errors"][0]["code"], json!("empty_plan"));
}

#[test]
fn validate_only_and_dry_run_never_touch_the_store() {
    let h = harness();

    let response = handle_execute(
        &h.state,
        Some("secret"),
        &import_body(json!({ "validateOnly": true })),
    );
    assert_eq!(response.status, 200);
    assert_eq!(response.body["mode"], json!("validate_only"));
    assert_eq!(response.body["ok"], json!(true));

    let response = handle_execute(
        &h.state,
        Some("secret"),
        &import_body(json!({ "dryRun": true })),
    );
    assert_eq!(response.status, 200);
    assert_eq!(response.body["mode"], json!("dry_run"));
    assert!(response.body["estimate"]["estimatedRowsWritten"].is_number());

    assert_eq!(h.store.read_calls(), 0);
    assert_eq!(h.store.write_calls(), 0);
}

#[test]
fn immediate_execution_returns_results_with_a_200() {
    let h = harness();
    let response = handle_execute(&h.state, Some("secret"), &import_body(json!({})));
    assert_eq!(response.status, 200);
    assert_eq!(response.body["mode"], json!("execute"));
    assert_eq!(response.body["results"][0]["executed"], json!(true));
    assert_eq!(h.store.stat_count(), 1);
}

#[test]
fn conflicting_plans_are_a_409_enumerating_every_conflict() {
    let h = harness();
    let body = json!({
        "actions": [
            { "type": "create_derived_stat", "payload": { "name": "Male share", "formula": "percent", "operands": ["a", "b"] } },
            { "type": "create_derived_stat", "payload": { "name": "Male share", "formula": "ratio", "operands": ["c", "d"] } },
        ]
    });
    let response = handle_execute(&h.state, Some("secret"), &body);
    assert_eq!(response.status, 409);
    assert_eq!(response.body["error"]["code"], json!("conflicts_found"));
    assert_eq!(
        response.body["conflicts"].as_array().map(Vec::len),
        Some(2)
    );
    assert_eq!(
        response.body["conflicts"][0]["reason"],
        json!("duplicate_derived_name_in_plan")
    );
}

#[test]
fn run_commands_drive_a_run_through_its_lifecycle() {
    let h = harness();

    let created = handle_execute(
        &h.state,
        Some("secret"),
        &import_body(json!({ "command": "create_run" })),
    );
    assert_eq!(created.status, 202);
    assert_eq!(created.body["run"]["status"], json!("awaiting_approval"));
    let run_id = created.body["run"]["runId"]
        .as_str()
        .expect("run id")
        .to_string();

    let approved = handle_execute(
        &h.state,
        Some("secret"),
        &json!({ "command": "approve_run", "runId": run_id }),
    );
    assert_eq!(approved.status, 202);
    assert_eq!(approved.body["run"]["status"], json!("approved"));

    let stepped = handle_execute(
        &h.state,
        Some("secret"),
        &json!({ "command": "run_next_step", "runId": run_id }),
    );
    // Single-action plan: the run is terminal after its one step.
    assert_eq!(stepped.status, 200);
    assert_eq!(stepped.body["ok"], json!(true));
    assert_eq!(stepped.body["run"]["status"], json!("completed"));
    assert_eq!(stepped.body["result"]["executed"], json!(true));
}

#[test]
fn run_commands_validate_their_input() {
    let h = harness();

    let response = handle_execute(
        &h.state,
        Some("secret"),
        &json!({ "command": "approve_run" }),
    );
    assert_eq!(response.status, 400);

    let response = handle_execute(
        &h.state,
        Some("secret"),
        &json!({ "command": "approve_run", "runId": "run-nope" }),
    );
    assert_eq!(response.status, 404);
    assert_eq!(response.body["error"]["code"], json!("unknown_run"));

    let response = handle_execute(
        &h.state,
        Some("secret"),
        &json!({ "command": "reverse_run", "runId": "run-nope" }),
    );
    assert_eq!(response.status, 400);
}

#[test]
fn wrong_state_commands_are_a_409_with_the_snapshot() {
    let h = harness();
    let created = handle_execute(
        &h.state,
        Some("secret"),
        &import_body(json!({ "command": "create_run" })),
    );
    let run_id = created.body["run"]["runId"].as_str().expect("run id");

    // Not approved yet.
    let response = handle_execute(
        &h.state,
        Some("secret"),
        &json!({ "command": "run_next_step", "runId": run_id }),
    );
    assert_eq!(response.status, 409);
    assert_eq!(response.body["error"]["code"], json!("run_not_approved"));
    assert_eq!(response.body["run"]["status"], json!("awaiting_approval"));
}

#[test]
fn plan_requests_return_drafts_evidence_and_clamped_confidence() {
    let h = harness();
    let response = handle_plan(
        &h.state,
        Some("secret"),
        &json!({ "prompt": "male share of population by county" }),
    );
    assert_eq!(response.status, 200);
    assert_eq!(response.body["mode"], json!("plan"));
    let proposal = &response.body["proposal"];
    assert_eq!(proposal["confidence"], json!(1.0));
    assert_eq!(proposal["draftActions"].as_array().map(Vec::len), Some(1));
    assert_eq!(
        proposal["unresolved"].as_array().map(Vec::len),
        Some(2)
    );
    assert_eq!(proposal["evidence"][0]["variableCount"], json!(49));
}

#[test]
fn plan_requests_without_an_oracle_are_a_500() {
    let mut h = harness();
    Arc::get_mut(&mut h.state).expect("sole owner").oracle = None;
    let response = handle_plan(&h.state, Some("secret"), &json!({ "prompt": "anything" }));
    assert_eq!(response.status, 500);
}
