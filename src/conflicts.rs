use crate::error::OrchestratorError;
use crate::plan::{Action, ActionType};
use crate::store::StatStore;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    DuplicateImportInPlan,
    DuplicateDerivedNameInPlan,
    ExistingStatByExternalId,
    ExistingStatByName,
}

impl ConflictReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateImportInPlan => "duplicate_import_in_plan",
            Self::DuplicateDerivedNameInPlan => "duplicate_derived_name_in_plan",
            Self::ExistingStatByExternalId => "existing_stat_by_external_id",
            Self::ExistingStatByName => "existing_stat_by_name",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub action_id: String,
    pub reason: ConflictReason,
    pub identity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_stat_id: Option<String>,
    pub message: String,
}

/// External identity an action would create if executed.
fn candidate_identity(action: &Action) -> Option<(String, ActionType)> {
    match action.action_type {
        ActionType::ImportCensusStat => {
            let dataset = action.payload_str("dataset")?;
            let variable = action.payload_str("variable")?;
            Some((format!("{dataset}:{variable}"), action.action_type))
        }
        ActionType::CreateDerivedStat => {
            let name = action.payload_str("name")?;
            Some((name.to_string(), action.action_type))
        }
        _ => None,
    }
}

/// Preflight scan of the plan's stat-creating actions against each other and
/// against existing store records. Read-only; conflicts are enumerated in
/// full rather than stopping at the first.
pub fn detect_conflicts(
    store: &dyn StatStore,
    actions: &[Action],
) -> Result<Vec<Conflict>, OrchestratorError> {
    let mut conflicts = Vec::new();

    // (identity, type) -> action ids claiming it within this plan.
    let mut claims: BTreeMap<(String, ActionType), Vec<String>> = BTreeMap::new();
    for action in actions {
        if let Some(key) = candidate_identity(action) {
            claims.entry(key).or_default().push(action.id.clone());
        }
    }

    for ((identity, action_type), action_ids) in &claims {
        if action_ids.len() < 2 {
            continue;
        }
        let reason = match action_type {
            ActionType::ImportCensusStat => ConflictReason::DuplicateImportInPlan,
            _ => ConflictReason::DuplicateDerivedNameInPlan,
        };
        // One conflict per claiming action so callers can map each back.
        for action_id in action_ids {
            conflicts.push(Conflict {
                action_id: action_id.clone(),
                reason,
                identity: identity.clone(),
                existing_stat_id: None,
                message: format!(
                    "`{identity}` is created by {} actions in the same plan",
                    action_ids.len()
                ),
            });
        }
    }

    let external_ids = claims
        .keys()
        .filter(|(_, action_type)| *action_type == ActionType::ImportCensusStat)
        .map(|(identity, _)| identity.clone())
        .collect::<Vec<_>>();
    let derived_names = claims
        .keys()
        .filter(|(_, action_type)| *action_type == ActionType::CreateDerivedStat)
        .map(|(identity, _)| identity.clone())
        .collect::<Vec<_>>();

    if !external_ids.is_empty() {
        for existing in store.find_stats_by_external_ids(&external_ids)? {
            for action_id in claims
                .get(&(existing.external_id.clone(), ActionType::ImportCensusStat))
                .into_iter()
                .flatten()
            {
                conflicts.push(Conflict {
                    action_id: action_id.clone(),
                    reason: ConflictReason::ExistingStatByExternalId,
                    identity: existing.external_id.clone(),
                    existing_stat_id: Some(existing.id.clone()),
                    message: format!(
                        "stat `{}` already imported as `{}`",
                        existing.external_id, existing.name
                    ),
                });
            }
        }
    }

    if !derived_names.is_empty() {
        for existing in store.find_stats_by_names(&derived_names)? {
            for action_id in claims
                .get(&(existing.name.clone(), ActionType::CreateDerivedStat))
                .into_iter()
                .flatten()
            {
                conflicts.push(Conflict {
                    action_id: action_id.clone(),
                    reason: ConflictReason::ExistingStatByName,
                    identity: existing.name.clone(),
                    existing_stat_id: Some(existing.id.clone()),
                    message: format!("a stat named `{}` already exists", existing.name),
                });
            }
        }
    }

    Ok(conflicts)
}
