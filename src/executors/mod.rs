mod derived_stat;
mod family_links;
mod import_stat;

pub use derived_stat::execute_create_derived_stat;
pub use family_links::execute_create_family_links;
pub use import_stat::execute_import_census_stat;

use crate::census::CensusApi;
use crate::error::OrchestratorError;
use crate::plan::{Action, ActionType, RunCaps};
use crate::store::StatStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// External collaborators an executor may touch. Injected so tests run
/// against in-memory fakes.
pub struct ExecutorDeps<'a> {
    pub store: &'a dyn StatStore,
    pub census: &'a dyn CensusApi,
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: Option<String>,
    pub caps: RunCaps,
    pub caller_email: Option<String>,
}

impl ExecutionContext {
    pub fn caller(&self) -> &str {
        self.caller_email.as_deref().unwrap_or("api-key")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub action_id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub executed: bool,
    pub summary: String,
    #[serde(default)]
    pub detail: Map<String, Value>,
}

/// Dispatch one action to its executor. Executors are idempotent at the
/// step level (deterministic write keys, merge semantics) and never retry
/// themselves; retries belong to the run layer.
pub fn execute_action(
    deps: &ExecutorDeps<'_>,
    action: &Action,
    context: &ExecutionContext,
) -> Result<ActionResult, OrchestratorError> {
    match action.action_type {
        ActionType::ImportCensusStat => execute_import_census_stat(deps, action, context),
        ActionType::CreateDerivedStat => execute_create_derived_stat(deps, action, context),
        ActionType::CreateFamilyLinks => execute_create_family_links(deps, action, context),
        // Read-only research steps are accepted but not executed; a future
        // research runner will claim this arm.
        ActionType::Research => Ok(ActionResult {
            action_id: action.id.clone(),
            action_type: action.action_type,
            executed: false,
            summary: "research action acknowledged; no writes performed".to_string(),
            detail: Map::new(),
        }),
    }
}

pub(crate) fn require_str<'a>(
    action: &'a Action,
    field: &str,
) -> Result<&'a str, OrchestratorError> {
    action
        .payload_str(field)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| OrchestratorError::MissingPayloadField {
            action_id: action.id.clone(),
            field: field.to_string(),
        })
}
