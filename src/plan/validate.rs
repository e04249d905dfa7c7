use super::{
    estimate_plan, Action, ActionType, RunCaps, ValidatedPlan, MAX_ROWS_CEILING,
    MAX_STATS_CEILING, MAX_STEPS_CEILING,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Verbs that signal mutation intent. The walk is deliberately coarse and
/// syntactic: a false positive blocks a harmless plan, a false negative
/// would let a destructive one through.
const MUTATION_DENYLIST: &[&str] = &[
    "delete",
    "remove",
    "update",
    "edit",
    "drop",
    "truncate",
    "destroy",
    "unlink",
    "overwrite",
    "replace",
];

/// Plausible calendar-year bounds for an import. Anything outside is a typo
/// or a unit mix-up, not a real request.
const MIN_IMPORT_YEAR: u64 = 1900;
const MAX_IMPORT_YEAR: u64 = 2100;
const MAX_IMPORT_YEAR_COUNT: u64 = 50;

const KNOWN_FORMULAS: &[&str] = &[
    "percent",
    "ratio",
    "sum",
    "difference",
    "rate_per_1000",
    "index",
    "change_over_time",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub code: String,
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(code: &str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Validates a raw execute request into an immutable plan. All-or-nothing:
/// any invalid action rejects the whole plan, and nothing here touches
/// storage.
pub fn validate_plan(raw: &Value) -> Result<ValidatedPlan, Vec<ValidationIssue>> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Some(request) = raw.as_object() else {
        return Err(vec![ValidationIssue::new(
            "invalid_request",
            "$",
            "request body must be a json object",
        )]);
    };

    let caps = validate_caps(request.get("caps"), &mut errors, &mut warnings);

    let actions = match request.get("actions").and_then(Value::as_array) {
        Some(actions) if !actions.is_empty() => actions,
        Some(_) => {
            errors.push(ValidationIssue::new(
                "empty_plan",
                "actions",
                "plan must contain at least one action",
            ));
            return Err(errors);
        }
        None => {
            errors.push(ValidationIssue::new(
                "invalid_request",
                "actions",
                "`actions` must be an array",
            ));
            return Err(errors);
        }
    };

    let mut parsed = Vec::with_capacity(actions.len());
    for (index, entry) in actions.iter().enumerate() {
        let path = format!("actions[{index}]");
        let Some(entry) = entry.as_object() else {
            errors.push(ValidationIssue::new(
                "invalid_request",
                &path,
                "action must be a json object",
            ));
            continue;
        };

        let raw_type = entry.get("type").and_then(Value::as_str).unwrap_or("");
        let Some(action_type) = ActionType::parse(raw_type) else {
            errors.push(ValidationIssue::new(
                "unsupported_action_type",
                format!("{path}.type"),
                format!("`{raw_type}` is not an allowed action type"),
            ));
            continue;
        };

        let payload = entry
            .get("payload")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let id = entry
            .get("id")
            .and_then(Value::as_str)
            .map(|value| value.to_string())
            .unwrap_or_else(|| format!("a{}", index + 1));

        let action = Action {
            id,
            action_type,
            payload,
        };

        scan_mutation_intent(
            &Value::Object(action.payload.clone()),
            &format!("{path}.payload"),
            &mut errors,
        );
        check_payload_shape(&action, &path, &mut errors);
        parsed.push(action);
    }

    let mut seen_ids = std::collections::BTreeSet::new();
    for (index, action) in parsed.iter().enumerate() {
        if !seen_ids.insert(action.id.clone()) {
            errors.push(ValidationIssue::new(
                "duplicate_action_id",
                format!("actions[{index}].id"),
                format!("action id `{}` is not unique within the plan", action.id),
            ));
        }
    }

    let estimate = estimate_plan(&parsed);
    if estimate.action_count > caps.max_steps {
        errors.push(ValidationIssue::new(
            "caps_exceeded",
            "actions",
            format!(
                "plan has {} actions but maxSteps is {}",
                estimate.action_count, caps.max_steps
            ),
        ));
    }
    if estimate.estimated_stats_created > caps.max_stats_created {
        errors.push(ValidationIssue::new(
            "caps_exceeded",
            "actions",
            format!(
                "plan would create an estimated {} stats but maxStatsCreated is {}",
                estimate.estimated_stats_created, caps.max_stats_created
            ),
        ));
    }
    if estimate.estimated_rows_written > caps.max_rows_written {
        errors.push(ValidationIssue::new(
            "caps_exceeded",
            "actions",
            format!(
                "plan would write an estimated {} rows but maxRowsWritten is {}",
                estimate.estimated_rows_written, caps.max_rows_written
            ),
        ));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ValidatedPlan {
        actions: parsed,
        caps,
        estimate,
        warnings,
    })
}

/// Caps below 1 or non-numeric reject the request; caps above the hard
/// ceiling are clamped with a warning so callers know the value was altered.
fn validate_caps(
    raw: Option<&Value>,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) -> RunCaps {
    let mut caps = RunCaps::default();
    let Some(raw) = raw else {
        return caps;
    };
    let Some(map) = raw.as_object() else {
        errors.push(ValidationIssue::new(
            "invalid_request",
            "caps",
            "`caps` must be a json object",
        ));
        return caps;
    };

    caps.max_steps = clamp_cap(
        map,
        "maxSteps",
        caps.max_steps as u64,
        MAX_STEPS_CEILING as u64,
        errors,
        warnings,
    ) as u32;
    caps.max_stats_created = clamp_cap(
        map,
        "maxStatsCreated",
        caps.max_stats_created as u64,
        MAX_STATS_CEILING as u64,
        errors,
        warnings,
    ) as u32;
    caps.max_rows_written = clamp_cap(
        map,
        "maxRowsWritten",
        caps.max_rows_written,
        MAX_ROWS_CEILING,
        errors,
        warnings,
    );
    caps
}

fn clamp_cap(
    map: &Map<String, Value>,
    key: &str,
    default: u64,
    ceiling: u64,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) -> u64 {
    let Some(raw) = map.get(key) else {
        return default;
    };
    let path = format!("caps.{key}");
    let value = match raw {
        Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
        _ => f64::NAN,
    };
    if !value.is_finite() || value < 1.0 {
        errors.push(ValidationIssue::new(
            "invalid_caps",
            &path,
            format!("`{key}` must be a number of at least 1"),
        ));
        return default;
    }
    let value = value.floor() as u64;
    if value > ceiling {
        warnings.push(ValidationIssue::new(
            "caps_clamped",
            &path,
            format!("`{key}` {value} exceeds the hard ceiling {ceiling}; clamped"),
        ));
        return ceiling;
    }
    value
}

/// Recursive walk over every payload key, including nested maps and arrays.
/// Keys are split on case/underscore/digit boundaries into lowercase tokens
/// and checked against the denylist.
fn scan_mutation_intent(value: &Value, path: &str, errors: &mut Vec<ValidationIssue>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let key_path = format!("{path}.{key}");
                if let Some(token) = denylisted_token(key) {
                    errors.push(ValidationIssue::new(
                        "blocked_mutation_intent",
                        &key_path,
                        format!("payload key `{key}` contains blocked verb `{token}`"),
                    ));
                }
                scan_mutation_intent(nested, &key_path, errors);
            }
        }
        Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                scan_mutation_intent(nested, &format!("{path}[{index}]"), errors);
            }
        }
        _ => {}
    }
}

fn denylisted_token(key: &str) -> Option<&'static str> {
    for token in split_key_tokens(key) {
        if let Some(hit) = MUTATION_DENYLIST.iter().find(|verb| **verb == token) {
            return Some(hit);
        }
    }
    None
}

fn split_key_tokens(key: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in key.chars() {
        if ch == '_' || ch == '-' || ch.is_ascii_digit() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        if ch.is_ascii_uppercase() && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        current.push(ch.to_ascii_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn check_payload_shape(action: &Action, path: &str, errors: &mut Vec<ValidationIssue>) {
    match action.action_type {
        ActionType::Research => {}
        ActionType::ImportCensusStat => {
            for key in ["dataset", "variable"] {
                if action.payload_str(key).map(str::trim).unwrap_or("").is_empty() {
                    errors.push(ValidationIssue::new(
                        "invalid_payload",
                        format!("{path}.payload.{key}"),
                        format!("import requires a non-empty `{key}`"),
                    ));
                }
            }
            match action.payload_u64("year") {
                None => {
                    errors.push(ValidationIssue::new(
                        "invalid_payload",
                        format!("{path}.payload.year"),
                        "import requires a numeric `year`",
                    ));
                }
                Some(year) if !(MIN_IMPORT_YEAR..=MAX_IMPORT_YEAR).contains(&year) => {
                    errors.push(ValidationIssue::new(
                        "invalid_payload",
                        format!("{path}.payload.year"),
                        format!(
                            "`year` {year} is outside the supported range \
                             {MIN_IMPORT_YEAR}-{MAX_IMPORT_YEAR}"
                        ),
                    ));
                }
                Some(_) => {}
            }
            if action.payload.get("yearCount").is_some() {
                let count = action.payload_u64("yearCount").unwrap_or(0);
                if !(1..=MAX_IMPORT_YEAR_COUNT).contains(&count) {
                    errors.push(ValidationIssue::new(
                        "invalid_payload",
                        format!("{path}.payload.yearCount"),
                        format!(
                            "`yearCount` must be a whole number between 1 and \
                             {MAX_IMPORT_YEAR_COUNT}"
                        ),
                    ));
                }
            }
        }
        ActionType::CreateDerivedStat => {
            if action.payload_str("name").map(str::trim).unwrap_or("").is_empty() {
                errors.push(ValidationIssue::new(
                    "invalid_payload",
                    format!("{path}.payload.name"),
                    "derived stat requires a non-empty `name`",
                ));
            }
            let formula = action.payload_str("formula").unwrap_or("");
            if !KNOWN_FORMULAS.contains(&formula) {
                errors.push(ValidationIssue::new(
                    "invalid_payload",
                    format!("{path}.payload.formula"),
                    format!("`{formula}` is not a supported formula"),
                ));
            }
            let operand_count = action
                .payload
                .get("operands")
                .and_then(Value::as_array)
                .map(|operands| operands.len())
                .unwrap_or(0);
            if operand_count == 0 {
                errors.push(ValidationIssue::new(
                    "invalid_payload",
                    format!("{path}.payload.operands"),
                    "derived stat requires at least one operand stat id",
                ));
            }
        }
        ActionType::CreateFamilyLinks => {
            if action
                .payload_str("parentStatId")
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
            {
                errors.push(ValidationIssue::new(
                    "invalid_payload",
                    format!("{path}.payload.parentStatId"),
                    "family links require a `parentStatId`",
                ));
            }
            let has_children = action
                .payload
                .get("childStatIds")
                .and_then(Value::as_array)
                .map(|children| !children.is_empty())
                .unwrap_or(false);
            if !has_children {
                errors.push(ValidationIssue::new(
                    "invalid_payload",
                    format!("{path}.payload.childStatIds"),
                    "family links require a non-empty `childStatIds` array",
                ));
            }
        }
    }
}
