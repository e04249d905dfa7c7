use super::{require_str, ActionResult, ExecutionContext, ExecutorDeps};
use crate::error::OrchestratorError;
use crate::plan::Action;
use crate::store::FamilyLink;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Links child stats under one parent. Children are deduplicated and
/// self-references dropped; only links whose (parent, child, attribute)
/// triple does not already exist are written.
pub fn execute_create_family_links(
    deps: &ExecutorDeps<'_>,
    action: &Action,
    _context: &ExecutionContext,
) -> Result<ActionResult, OrchestratorError> {
    let parent_id = require_str(action, "parentStatId")?;
    let attribute = action
        .payload_str("attribute")
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("member");

    let child_ids = action
        .payload
        .get("childStatIds")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|child| !child.is_empty() && *child != parent_id)
                .map(str::to_string)
                .collect::<BTreeSet<_>>()
        })
        .unwrap_or_default();
    if child_ids.is_empty() {
        return Err(OrchestratorError::MissingPayloadField {
            action_id: action.id.clone(),
            field: "childStatIds".to_string(),
        });
    }

    deps.store
        .get_stat(parent_id)?
        .ok_or_else(|| OrchestratorError::UnknownStat {
            stat_id: parent_id.to_string(),
        })?;

    let child_list = child_ids.iter().cloned().collect::<Vec<_>>();
    let existing = deps
        .store
        .existing_family_links(parent_id, &child_list)?
        .into_iter()
        .map(|link| link.composite_key())
        .collect::<BTreeSet<_>>();

    // Pure set difference: an existing triple is never re-written.
    let missing = child_ids
        .iter()
        .map(|child| FamilyLink::new(parent_id, child, attribute))
        .filter(|link| !existing.contains(&link.composite_key()))
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        deps.store.insert_family_links(&missing)?;
    }

    let mut detail = Map::new();
    detail.insert("parentStatId".to_string(), json!(parent_id));
    detail.insert("attribute".to_string(), json!(attribute));
    detail.insert("childrenRequested".to_string(), json!(child_ids.len()));
    detail.insert("linksCreated".to_string(), json!(missing.len()));
    detail.insert(
        "linksAlreadyPresent".to_string(),
        json!(child_ids.len() - missing.len()),
    );

    Ok(ActionResult {
        action_id: action.id.clone(),
        action_type: action.action_type,
        executed: true,
        summary: format!(
            "linked {} of {} child stat(s) under `{parent_id}` as `{attribute}`",
            missing.len(),
            child_ids.len()
        ),
        detail,
    })
}
