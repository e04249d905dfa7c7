use super::{require_str, ActionResult, ExecutionContext, ExecutorDeps};
use crate::error::OrchestratorError;
use crate::plan::Action;
use crate::shared::ids::content_id;
use crate::store::{Granularity, StatRecord, StatRow, StatSummary};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Cell key inside one operand's time series.
type CellKey = (String, Granularity, String); // (area, granularity, period)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Formula {
    Percent,
    Ratio,
    Sum,
    Difference,
    RatePer1000,
    Index,
    ChangeOverTime,
}

impl Formula {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "percent" => Some(Self::Percent),
            "ratio" => Some(Self::Ratio),
            "sum" => Some(Self::Sum),
            "difference" => Some(Self::Difference),
            "rate_per_1000" => Some(Self::RatePer1000),
            "index" => Some(Self::Index),
            "change_over_time" => Some(Self::ChangeOverTime),
            _ => None,
        }
    }

    fn scale(self) -> f64 {
        match self {
            Self::RatePer1000 => 1000.0,
            Self::Index => 100.0,
            _ => 1.0,
        }
    }
}

/// Derives a new stat from existing stats via a formula, commits the result
/// rows plus one summary record per granularity.
pub fn execute_create_derived_stat(
    deps: &ExecutorDeps<'_>,
    action: &Action,
    context: &ExecutionContext,
) -> Result<ActionResult, OrchestratorError> {
    let name = require_str(action, "name")?;
    let formula_raw = require_str(action, "formula")?;
    let formula =
        Formula::parse(formula_raw).ok_or_else(|| OrchestratorError::UnsupportedFormula {
            formula: formula_raw.to_string(),
        })?;

    let operand_ids = action
        .payload
        .get("operands")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    // Sum takes two or more operands; change_over_time takes one source
    // stat; every other formula is a strict a/b pair.
    let valid_count = match formula {
        Formula::Sum => operand_ids.len() >= 2,
        Formula::ChangeOverTime => operand_ids.len() == 1,
        _ => operand_ids.len() == 2,
    };
    if !valid_count {
        return Err(OrchestratorError::InsufficientOperands {
            formula: formula_raw.to_string(),
            needed: if formula == Formula::ChangeOverTime { 1 } else { 2 },
            got: operand_ids.len(),
        });
    }

    let mut operands = Vec::with_capacity(operand_ids.len());
    for operand_id in &operand_ids {
        deps.store
            .get_stat(operand_id)?
            .ok_or_else(|| OrchestratorError::UnknownStat {
                stat_id: operand_id.clone(),
            })?;
        let rows = deps.store.rows_for_stat(operand_id)?;
        let mut cells: BTreeMap<CellKey, f64> = BTreeMap::new();
        for row in rows {
            cells.insert((row.area_id, row.granularity, row.period), row.value);
        }
        operands.push(cells);
    }

    let stat_id = content_id(&["stat", "derived", name]);
    let cells = match formula {
        Formula::Sum => derive_sum(&operands),
        Formula::Difference => derive_difference(&operands[0], &operands[1]),
        Formula::ChangeOverTime => {
            let start = require_str(action, "startPeriod")?;
            let end = require_str(action, "endPeriod")?;
            derive_change_over_time(&operands[0], start, end)
        }
        ratio_family => {
            check_operand_compatibility(&operands[0], &operands[1])?;
            derive_ratio(&operands[0], &operands[1], ratio_family.scale())
        }
    };

    if cells.is_empty() {
        return Err(OrchestratorError::NoOverlappingRows {
            detail: format!("formula `{formula_raw}` produced no rows for `{name}`"),
        });
    }

    let rows = cells
        .iter()
        .map(|((area, granularity, period), value)| {
            StatRow::new(&stat_id, area, *granularity, period, *value)
        })
        .collect::<Vec<_>>();

    let stat = StatRecord {
        id: stat_id.clone(),
        name: name.to_string(),
        external_id: name.to_string(),
        stat_type: "derived".to_string(),
        source: format!("derived:{formula_raw}"),
        created_by: context.caller().to_string(),
    };
    deps.store.create_stat(&stat)?;
    deps.store.merge_rows(&rows)?;

    let summaries = summarize(&stat_id, &rows);
    deps.store.upsert_summaries(&summaries)?;

    let mut detail = Map::new();
    detail.insert("createdStatId".to_string(), json!(stat_id));
    detail.insert("createdStatName".to_string(), json!(name));
    detail.insert("rowsWritten".to_string(), json!(rows.len()));
    detail.insert("summaryCount".to_string(), json!(summaries.len()));

    Ok(ActionResult {
        action_id: action.id.clone(),
        action_type: action.action_type,
        executed: true,
        summary: format!(
            "derived `{name}` via {formula_raw} from {} operand(s) ({} rows)",
            operand_ids.len(),
            rows.len()
        ),
        detail,
    })
}

/// Hard precondition for a/b formulas: both operands must cover the same
/// period set and the same granularity set. A mismatch fails the whole step
/// rather than skipping rows.
fn check_operand_compatibility(
    a: &BTreeMap<CellKey, f64>,
    b: &BTreeMap<CellKey, f64>,
) -> Result<(), OrchestratorError> {
    let periods = |cells: &BTreeMap<CellKey, f64>| {
        cells
            .keys()
            .map(|(_, _, period)| period.clone())
            .collect::<BTreeSet<_>>()
    };
    let granularities = |cells: &BTreeMap<CellKey, f64>| {
        cells
            .keys()
            .map(|(_, granularity, _)| *granularity)
            .collect::<BTreeSet<_>>()
    };
    if periods(a) != periods(b) {
        return Err(OrchestratorError::IncompatibleOperands {
            detail: "operand period sets differ".to_string(),
        });
    }
    if granularities(a) != granularities(b) {
        return Err(OrchestratorError::IncompatibleOperands {
            detail: "operand granularity sets differ".to_string(),
        });
    }
    Ok(())
}

/// a/b per cell, scaled; cells with b == 0 or missing on either side are
/// omitted, never emitted as zero.
fn derive_ratio(
    a: &BTreeMap<CellKey, f64>,
    b: &BTreeMap<CellKey, f64>,
    scale: f64,
) -> BTreeMap<CellKey, f64> {
    let mut out = BTreeMap::new();
    for (key, numerator) in a {
        let Some(denominator) = b.get(key) else {
            continue;
        };
        if *denominator == 0.0 {
            continue;
        }
        out.insert(key.clone(), (numerator / denominator) * scale);
    }
    out
}

/// Union over operand cells; a missing operand contributes nothing (not a
/// zero, not a failure).
fn derive_sum(operands: &[BTreeMap<CellKey, f64>]) -> BTreeMap<CellKey, f64> {
    let mut out: BTreeMap<CellKey, f64> = BTreeMap::new();
    for cells in operands {
        for (key, value) in cells {
            *out.entry(key.clone()).or_insert(0.0) += value;
        }
    }
    out
}

fn derive_difference(
    a: &BTreeMap<CellKey, f64>,
    b: &BTreeMap<CellKey, f64>,
) -> BTreeMap<CellKey, f64> {
    let mut out = BTreeMap::new();
    for (key, left) in a {
        let Some(right) = b.get(key) else {
            continue;
        };
        out.insert(key.clone(), left - right);
    }
    out
}

/// Relative change (end - start) / |start| between two explicit period keys,
/// grouped per (area, granularity); start == 0 cells are skipped.
fn derive_change_over_time(
    cells: &BTreeMap<CellKey, f64>,
    start_period: &str,
    end_period: &str,
) -> BTreeMap<CellKey, f64> {
    let mut starts: BTreeMap<(String, Granularity), f64> = BTreeMap::new();
    let mut ends: BTreeMap<(String, Granularity), f64> = BTreeMap::new();
    for ((area, granularity, period), value) in cells {
        if period == start_period {
            starts.insert((area.clone(), *granularity), *value);
        } else if period == end_period {
            ends.insert((area.clone(), *granularity), *value);
        }
    }

    let result_period = format!("{start_period}->{end_period}");
    let mut out = BTreeMap::new();
    for ((area, granularity), start) in &starts {
        if *start == 0.0 {
            continue;
        }
        let Some(end) = ends.get(&(area.clone(), *granularity)) else {
            continue;
        };
        out.insert(
            (area.clone(), *granularity, result_period.clone()),
            (end - start) / start.abs(),
        );
    }
    out
}

/// One summary per granularity across areas and periods.
fn summarize(stat_id: &str, rows: &[StatRow]) -> Vec<StatSummary> {
    let mut grouped: BTreeMap<Granularity, Vec<f64>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.granularity).or_default().push(row.value);
    }
    grouped
        .into_iter()
        .map(|(granularity, values)| {
            let sum: f64 = values.iter().sum();
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            StatSummary {
                id: content_id(&["summary", stat_id, granularity.as_str()]),
                stat_id: stat_id.to_string(),
                granularity,
                row_count: values.len() as u64,
                sum,
                avg: sum / values.len() as f64,
                min,
                max,
            }
        })
        .collect()
}
