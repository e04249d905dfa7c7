use serde_json::json;
use statward::plan::{
    validate_plan, DEFAULT_MAX_ROWS, DEFAULT_MAX_STATS, DEFAULT_MAX_STEPS, MAX_STEPS_CEILING,
};

fn import_action(variable: &str) -> serde_json::Value {
    json!({
        "type": "import_census_stat",
        "payload": { "dataset": "acs/acs5", "variable": variable, "year": 2023 }
    })
}

#[test]
fn accepts_a_minimal_import_plan_with_default_caps() {
    let plan = validate_plan(&json!({ "actions": [import_action("B01001_001E")] }))
        .expect("plan should validate");
    assert_eq!(plan.actions.len(), 1);
    assert_eq!(plan.actions[0].id, "a1");
    assert_eq!(plan.caps.max_steps, DEFAULT_MAX_STEPS);
    assert_eq!(plan.caps.max_stats_created, DEFAULT_MAX_STATS);
    assert_eq!(plan.caps.max_rows_written, DEFAULT_MAX_ROWS);
    assert_eq!(plan.estimate.estimated_stats_created, 1);
    assert!(plan.warnings.is_empty());
}

#[test]
fn rejects_a_non_object_request() {
    let errors = validate_plan(&json!([1, 2, 3])).expect_err("arrays are not requests");
    assert_eq!(errors[0].code, "invalid_request");
}

#[test]
fn rejects_an_empty_action_list() {
    let errors = validate_plan(&json!({ "actions": [] })).expect_err("empty plans are invalid");
    assert_eq!(errors[0].code, "empty_plan");
}

#[test]
fn rejects_unknown_action_types_per_action() {
    let errors = validate_plan(&json!({
        "actions": [
            import_action("B01001_001E"),
            { "type": "drop_table", "payload": {} },
            { "type": "export_csv", "payload": {} },
        ]
    }))
    .expect_err("unknown types reject the plan");
    let unsupported: Vec<_> = errors
        .iter()
        .filter(|issue| issue.code == "unsupported_action_type")
        .collect();
    assert_eq!(unsupported.len(), 2);
    assert_eq!(unsupported[0].path, "actions[1].type");
}

#[test]
fn blocks_mutation_intent_in_nested_payload_keys() {
    let errors = validate_plan(&json!({
        "actions": [{
            "type": "import_census_stat",
            "payload": {
                "dataset": "acs/acs5",
                "variable": "B01001_001E",
                "year": 2023,
                "options": { "deleteExisting": true }
            }
        }]
    }))
    .expect_err("delete intent must be blocked");
    assert!(errors
        .iter()
        .any(|issue| issue.code == "blocked_mutation_intent"
            && issue.path.ends_with("deleteExisting")));
}

#[test]
fn does_not_flag_keys_whose_tokens_merely_contain_a_verb_substring() {
    // "dateSelected" contains "delete" nowhere as a token.
    let plan = validate_plan(&json!({
        "actions": [{
            "type": "import_census_stat",
            "payload": {
                "dataset": "acs/acs5",
                "variable": "B01001_001E",
                "year": 2023,
                "dateSelected": "2023-01-01"
            }
        }]
    }))
    .expect("token split avoids substring false positives");
    assert_eq!(plan.actions.len(), 1);
}

#[test]
fn rejects_caps_below_one_or_non_numeric() {
    let errors = validate_plan(&json!({
        "actions": [import_action("B01001_001E")],
        "caps": { "maxSteps": 0, "maxRowsWritten": "lots" }
    }))
    .expect_err("bad caps reject the request");
    let caps_errors: Vec<_> = errors
        .iter()
        .filter(|issue| issue.code == "invalid_caps")
        .collect();
    assert_eq!(caps_errors.len(), 2);
}

#[test]
fn clamps_caps_above_the_ceiling_with_a_warning() {
    let plan = validate_plan(&json!({
        "actions": [import_action("B01001_001E")],
        "caps": { "maxSteps": 9999 }
    }))
    .expect("over-ceiling caps are clamped, not rejected");
    assert_eq!(plan.caps.max_steps, MAX_STEPS_CEILING);
    assert_eq!(plan.warnings.len(), 1);
    assert_eq!(plan.warnings[0].code, "caps_clamped");
}

#[test]
fn rejects_plans_with_more_actions_than_max_steps() {
    let actions: Vec<_> = (0..3).map(|i| import_action(&format!("B0{i}"))).collect();
    let errors = validate_plan(&json!({
        "actions": actions,
        "caps": { "maxSteps": 2 }
    }))
    .expect_err("too many steps");
    assert!(errors.iter().any(|issue| issue.code == "caps_exceeded"));
}

#[test]
fn rejects_plans_whose_row_estimate_exceeds_the_cap() {
    let errors = validate_plan(&json!({
        "actions": [{
            "type": "import_census_stat",
            "payload": {
                "dataset": "acs/acs5",
                "variable": "B01001_001E",
                "year": 2023,
                "yearCount": 5,
                "expectedRowsPerYear": 40000
            }
        }],
        "caps": { "maxRowsWritten": 100000 }
    }))
    .expect_err("200k estimated rows over a 100k cap");
    assert!(errors.iter().any(|issue| issue.code == "caps_exceeded"
        && issue.message.contains("200000")));
}

#[test]
fn rejects_implausible_years_and_year_counts() {
    let errors = validate_plan(&json!({
        "actions": [
            {
                "type": "import_census_stat",
                "payload": { "dataset": "acs/acs5", "variable": "B01001_001E", "year": 70000 }
            },
            {
                "type": "import_census_stat",
                "payload": {
                    "dataset": "acs/acs5",
                    "variable": "B01001_002E",
                    "year": 2023,
                    "yearCount": 0
                }
            },
            {
                "type": "import_census_stat",
                "payload": {
                    "dataset": "acs/acs5",
                    "variable": "B01001_003E",
                    "year": 2023,
                    "yearCount": 10000
                }
            },
        ]
    }))
    .expect_err("out-of-range years reject the plan");
    assert!(errors.iter().any(|issue| issue.code == "invalid_payload"
        && issue.path == "actions[0].payload.year"));
    assert!(errors.iter().any(|issue| issue.code == "invalid_payload"
        && issue.path == "actions[1].payload.yearCount"));
    assert!(errors.iter().any(|issue| issue.code == "invalid_payload"
        && issue.path == "actions[2].payload.yearCount"));
}

#[test]
fn rejects_duplicate_action_ids() {
    let errors = validate_plan(&json!({
        "actions": [
            { "id": "x", "type": "research", "payload": { "question": "?" } },
            { "id": "x", "type": "research", "payload": { "question": "??" } },
        ]
    }))
    .expect_err("ids must be unique");
    assert!(errors.iter().any(|issue| issue.code == "duplicate_action_id"));
}

#[test]
fn rejects_incomplete_write_payloads() {
    let errors = validate_plan(&json!({
        "actions": [
            { "type": "import_census_stat", "payload": { "dataset": "acs/acs5" } },
            { "type": "create_derived_stat", "payload": { "name": "x", "formula": "cube" } },
            { "type": "create_family_links", "payload": { "parentStatId": "p" } },
        ]
    }))
    .expect_err("missing payload fields");
    assert!(errors.iter().any(|issue| issue.path == "actions[0].payload.variable"));
    assert!(errors.iter().any(|issue| issue.path == "actions[0].payload.year"));
    assert!(errors.iter().any(|issue| issue.path == "actions[1].payload.formula"));
    assert!(errors.iter().any(|issue| issue.path == "actions[2].payload.childStatIds"));
}
