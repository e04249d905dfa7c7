use super::{require_str, ActionResult, ExecutionContext, ExecutorDeps};
use crate::census::{clean_area_values, CensusError};
use crate::error::OrchestratorError;
use crate::plan::Action;
use crate::shared::ids::content_id;
use crate::store::{Granularity, StatRecord, StatRow};
use serde_json::{json, Map};

/// Imports an upstream dataset variable as a new stat: one top-level record
/// (created on the first successful year) plus per-area time-series rows at
/// both granularities for every requested year, merged last-write-wins.
pub fn execute_import_census_stat(
    deps: &ExecutorDeps<'_>,
    action: &Action,
    context: &ExecutionContext,
) -> Result<ActionResult, OrchestratorError> {
    let dataset = require_str(action, "dataset")?;
    let variable = require_str(action, "variable")?;
    let raw_year = action
        .payload_u64("year")
        .ok_or_else(|| OrchestratorError::MissingPayloadField {
            action_id: action.id.clone(),
            field: "year".to_string(),
        })?;
    let year = u16::try_from(raw_year).map_err(|_| OrchestratorError::InvalidPayloadField {
        action_id: action.id.clone(),
        field: "year".to_string(),
        detail: format!("{raw_year} is not a plausible calendar year"),
    })?;
    let raw_count = action.payload_u64("yearCount").unwrap_or(1).max(1);
    let year_count =
        u16::try_from(raw_count).map_err(|_| OrchestratorError::InvalidPayloadField {
            action_id: action.id.clone(),
            field: "yearCount".to_string(),
            detail: format!("{raw_count} years cannot be imported in one action"),
        })?;

    let external_id = format!("{dataset}:{variable}");
    let stat_id = content_id(&["stat", &external_id]);

    let mut created_stat: Option<StatRecord> = None;
    let mut all_rows: Vec<StatRow> = Vec::new();
    let mut years_processed: Vec<u16> = Vec::new();

    // Strictly descending from the requested year.
    for offset in 0..year_count {
        let target_year = year.saturating_sub(offset);
        let metadata = deps
            .census
            .variable_metadata(dataset, target_year, variable)?
            .ok_or_else(|| {
                // A variable missing for a requested year is a bad request,
                // not a transient fault; fail the step permanently.
                OrchestratorError::Census(CensusError::VariableUnavailable {
                    dataset: dataset.to_string(),
                    variable: variable.to_string(),
                    year: target_year,
                })
            })?;

        let period = target_year.to_string();
        for granularity in [Granularity::Tract, Granularity::County] {
            let raw = deps
                .census
                .area_values(dataset, target_year, variable, granularity)?;
            let cleaned = clean_area_values(&raw);
            for (area_id, value) in cleaned {
                all_rows.push(StatRow::new(&stat_id, &area_id, granularity, &period, value));
            }
        }

        if created_stat.is_none() {
            let name = if metadata.label.is_empty() {
                variable.to_string()
            } else {
                metadata.label.clone()
            };
            let stat = StatRecord {
                id: stat_id.clone(),
                name,
                external_id: external_id.clone(),
                stat_type: if metadata.predicate_type.is_empty() {
                    "count".to_string()
                } else {
                    metadata.predicate_type.clone()
                },
                source: dataset.to_string(),
                created_by: context.caller().to_string(),
            };
            deps.store.create_stat(&stat)?;
            created_stat = Some(stat);
        }
        years_processed.push(target_year);
    }

    deps.store.merge_rows(&all_rows)?;

    let stat = created_stat.ok_or_else(|| OrchestratorError::NoOverlappingRows {
        detail: format!("no year produced any data for `{external_id}`"),
    })?;

    let mut detail = Map::new();
    detail.insert("createdStatId".to_string(), json!(stat.id));
    detail.insert("createdStatName".to_string(), json!(stat.name));
    detail.insert("yearsProcessed".to_string(), json!(years_processed));
    detail.insert("rowsWritten".to_string(), json!(all_rows.len()));

    Ok(ActionResult {
        action_id: action.id.clone(),
        action_type: action.action_type,
        executed: true,
        summary: format!(
            "imported `{}` as stat `{}` ({} rows across {} year(s))",
            external_id,
            stat.name,
            all_rows.len(),
            years_processed.len()
        ),
        detail,
    })
}
