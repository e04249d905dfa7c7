use serde_json::json;
use statward::census::{CensusApi, CensusError, VariableMetadata};
use statward::error::OrchestratorError;
use statward::executors::{execute_action, ExecutionContext, ExecutorDeps};
use statward::plan::validate_plan;
use statward::store::{Granularity, MemoryStatStore};

/// Serves one variable across a fixed year range, with a sentinel value and
/// a non-numeric cell mixed into the tract table.
struct FakeCensus {
    first_year: u16,
    last_year: u16,
}

impl CensusApi for FakeCensus {
    fn variable_metadata(
        &self,
        _dataset: &str,
        year: u16,
        variable: &str,
    ) -> Result<Option<VariableMetadata>, CensusError> {
        if variable != "B01001_002E" || year < self.first_year || year > self.last_year {
            return Ok(None);
        }
        Ok(Some(VariableMetadata {
            name: variable.to_string(),
            label: "Estimate!!Total:!!Male:".to_string(),
            concept: "SEX BY AGE".to_string(),
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
        year: u16,
        _variable: &str,
        granularity: Granularity,
    ) -> Result<Vec<(String, f64)>, CensusError> {
        let base = f64::from(year - 2000);
        Ok(match granularity {
            Granularity::Tract => vec![
                ("06001400100".to_string(), 100.0 + base),
                ("06001400200".to_string(), -666_666_666.0),
                ("06001400300".to_string(), f64::NAN),
            ],
            Granularity::County => vec![("06001".to_string(), 5000.0 + base)],
        })
    }
}

fn import_plan(year: u16, year_count: u16) -> statward::plan::ValidatedPlan {
    validate_plan(&json!({
        "actions": [{
            "id": "i1",
            "type": "import_census_stat",
            "payload": {
                "dataset": "acs/acs5",
                "variable": "B01001_002E",
                "year": year,
                "yearCount": year_count
            }
        }]
    }))
    .expect("plan should validate")
}

fn context() -> ExecutionContext {
    ExecutionContext {
        run_id: None,
        caps: Default::default(),
        caller_email: Some("ops@example.com".to_string()),
    }
}

#[test]
fn single_year_import_creates_one_stat_and_clean_rows() {
    let store = MemoryStatStore::new();
    let census = FakeCensus {
        first_year: 2020,
        last_year: 2023,
    };
    let deps = ExecutorDeps {
        store: &store,
        census: &census,
    };
    let plan = import_plan(2023, 1);

    let result = execute_action(&deps, &plan.actions[0], &context()).expect("import");
    assert!(result.executed);
    assert_eq!(result.action_id, "i1");
    assert!(result.detail.get("createdStatId").is_some());
    assert_eq!(
        result.detail.get("createdStatName").and_then(|v| v.as_str()),
        Some("Estimate!!Total:!!Male:")
    );
    assert_eq!(result.detail.get("yearsProcessed"), Some(&json!([2023])));

    // One tract row survives the sentinel/NaN filter, plus one county row.
    assert_eq!(store.stat_count(), 1);
    assert_eq!(store.row_count(), 2);
    let rows = store.all_rows();
    assert!(rows.iter().all(|row| row.period == "2023"));
    assert!(rows.iter().any(|row| row.granularity == Granularity::Tract
        && row.area_id == "06001400100"
        && row.value == 123.0));
}

#[test]
fn multi_year_import_walks_years_descending() {
    let store = MemoryStatStore::new();
    let census = FakeCensus {
        first_year: 2020,
        last_year: 2023,
    };
    let deps = ExecutorDeps {
        store: &store,
        census: &census,
    };
    let plan = import_plan(2023, 3);

    let result = execute_action(&deps, &plan.actions[0], &context()).expect("import");
    assert_eq!(
        result.detail.get("yearsProcessed"),
        Some(&json!([2023, 2022, 2021]))
    );
    assert_eq!(store.stat_count(), 1);
    assert_eq!(store.row_count(), 6);
}

#[test]
fn reimporting_the_same_cell_is_last_write_wins() {
    let store = MemoryStatStore::new();
    let census = FakeCensus {
        first_year: 2020,
        last_year: 2023,
    };
    let deps = ExecutorDeps {
        store: &store,
        census: &census,
    };
    let plan = import_plan(2023, 1);

    execute_action(&deps, &plan.actions[0], &context()).expect("first import");
    execute_action(&deps, &plan.actions[0], &context()).expect("second import");
    assert_eq!(store.row_count(), 2);
}

#[test]
fn an_unavailable_year_fails_the_step_permanently() {
    let store = MemoryStatStore::new();
    let census = FakeCensus {
        first_year: 2022,
        last_year: 2023,
    };
    let deps = ExecutorDeps {
        store: &store,
        census: &census,
    };
    // 2021 falls outside the fake's range.
    let plan = import_plan(2023, 3);

    let err = execute_action(&deps, &plan.actions[0], &context())
        .expect_err("missing year must fail");
    match err {
        OrchestratorError::Census(CensusError::VariableUnavailable { year, .. }) => {
            assert_eq!(year, 2021);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn a_year_too_large_for_a_period_is_rejected_not_truncated() {
    let store = MemoryStatStore::new();
    let census = FakeCensus {
        first_year: 2020,
        last_year: 2023,
    };
    let deps = ExecutorDeps {
        store: &store,
        census: &census,
    };
    let action = statward::plan::Action {
        id: "i1".to_string(),
        action_type: statward::plan::ActionType::ImportCensusStat,
        payload: json!({ "dataset": "acs/acs5", "variable": "B01001_002E", "year": 70000 })
            .as_object()
            .cloned()
            .expect("object"),
    };
    let err = execute_action(&deps, &action, &context()).expect_err("70000 is not a year");
    match err {
        OrchestratorError::InvalidPayloadField { field, .. } => assert_eq!(field, "year"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.stat_count(), 0);
    assert_eq!(store.row_count(), 0);
}

#[test]
fn missing_payload_fields_are_reported_by_name() {
    let store = MemoryStatStore::new();
    let census = FakeCensus {
        first_year: 2020,
        last_year: 2023,
    };
    let deps = ExecutorDeps {
        store: &store,
        census: &census,
    };
    let action = statward::plan::Action {
        id: "i1".to_string(),
        action_type: statward::plan::ActionType::ImportCensusStat,
        payload: json!({ "dataset": "acs/acs5", "variable": "B01001_002E" })
            .as_object()
            .cloned()
            .expect("object"),
    };
    let err = execute_action(&deps, &action, &context()).expect_err("year is required");
    match err {
        OrchestratorError::MissingPayloadField { field, .. } => assert_eq!(field, "year"),
        other => panic!("unexpected error: {other}"),
    }
}
