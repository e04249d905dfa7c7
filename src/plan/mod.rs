pub mod validate;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use validate::{validate_plan, ValidationIssue};

pub const MAX_STEPS_CEILING: u32 = 25;
pub const MAX_STATS_CEILING: u32 = 10;
pub const MAX_ROWS_CEILING: u64 = 500_000;

pub const DEFAULT_MAX_STEPS: u32 = 8;
pub const DEFAULT_MAX_STATS: u32 = 4;
pub const DEFAULT_MAX_ROWS: u64 = 150_000;

/// Default per-year row expectation for imports and derives when the payload
/// does not declare one. One stat covers roughly every tract plus county in
/// a large state.
pub const DEFAULT_ROWS_PER_YEAR: u64 = 12_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Research,
    ImportCensusStat,
    CreateDerivedStat,
    CreateFamilyLinks,
}

impl ActionType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "research" => Some(Self::Research),
            "import_census_stat" => Some(Self::ImportCensusStat),
            "create_derived_stat" => Some(Self::CreateDerivedStat),
            "create_family_links" => Some(Self::CreateFamilyLinks),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::ImportCensusStat => "import_census_stat",
            Self::CreateDerivedStat => "create_derived_stat",
            Self::CreateFamilyLinks => "create_family_links",
        }
    }

    pub fn is_write(self) -> bool {
        !matches!(self, Self::Research)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned operation. Immutable once part of a validated plan; the id is
/// unique within the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Action {
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn payload_u64(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCaps {
    pub max_steps: u32,
    pub max_stats_created: u32,
    pub max_rows_written: u64,
}

impl Default for RunCaps {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_stats_created: DEFAULT_MAX_STATS,
            max_rows_written: DEFAULT_MAX_ROWS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEstimate {
    pub action_count: u32,
    pub write_action_count: u32,
    pub estimated_stats_created: u32,
    pub estimated_rows_written: u64,
}

/// A plan that passed validation. Produced fresh by the validator; never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedPlan {
    pub actions: Vec<Action>,
    pub caps: RunCaps,
    pub estimate: PlanEstimate,
    /// Non-fatal adjustments (caps clamped to the hard ceiling). The plan is
    /// valid; callers are informed the values were altered.
    #[serde(default)]
    pub warnings: Vec<ValidationIssue>,
}

/// Per-action resource heuristics. Estimates are what caps are enforced
/// against; executors report actuals but are never halted mid-flight.
pub fn estimate_action_rows(action: &Action) -> u64 {
    match action.action_type {
        ActionType::Research => 0,
        ActionType::ImportCensusStat => {
            let per_year = action
                .payload_u64("expectedRowsPerYear")
                .unwrap_or(DEFAULT_ROWS_PER_YEAR);
            let years = action.payload_u64("yearCount").unwrap_or(1).max(1);
            per_year.saturating_mul(years)
        }
        ActionType::CreateDerivedStat => action
            .payload_u64("expectedRows")
            .unwrap_or(DEFAULT_ROWS_PER_YEAR),
        ActionType::CreateFamilyLinks => action
            .payload
            .get("childStatIds")
            .and_then(Value::as_array)
            .map(|children| children.len() as u64)
            .unwrap_or(0),
    }
}

pub fn estimate_action_stats(action: &Action) -> u32 {
    match action.action_type {
        ActionType::ImportCensusStat | ActionType::CreateDerivedStat => 1,
        ActionType::Research | ActionType::CreateFamilyLinks => 0,
    }
}

pub fn estimate_plan(actions: &[Action]) -> PlanEstimate {
    let mut estimate = PlanEstimate {
        action_count: actions.len() as u32,
        ..PlanEstimate::default()
    };
    for action in actions {
        if action.action_type.is_write() {
            estimate.write_action_count += 1;
        }
        estimate.estimated_stats_created += estimate_action_stats(action);
        estimate.estimated_rows_written = estimate
            .estimated_rows_written
            .saturating_add(estimate_action_rows(action));
    }
    estimate
}
