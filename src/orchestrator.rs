use crate::census::CensusApi;
use crate::conflicts::{detect_conflicts, Conflict};
use crate::error::OrchestratorError;
use crate::executors::{execute_action, ActionResult, ExecutionContext, ExecutorDeps};
use crate::plan::ValidatedPlan;
use crate::runs::{RunSnapshot, RunStore, TransitionError};
use crate::shared::logging::{append_audit_line, audit_line};
use crate::store::StatStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Immediate (non-run) execution either refuses on conflicts or carries the
/// per-action results.
#[derive(Debug)]
pub enum ExecuteOutcome {
    Conflicts(Vec<Conflict>),
    Executed(Vec<ActionResult>),
}

#[derive(Debug)]
pub enum RunCreation {
    Conflicts(Vec<Conflict>),
    Created(RunSnapshot),
}

/// Result of advancing one step. `error` is set when the executor failed and
/// the run was marked failed; the snapshot always reflects the outcome.
#[derive(Debug)]
pub struct StepOutcome {
    pub run: RunSnapshot,
    pub result: Option<ActionResult>,
    pub error: Option<String>,
}

/// Drives validated plans against the store: immediate sequential execution
/// or durable, steppable runs. Holds the run registry; one instance per
/// server or test.
pub struct Orchestrator {
    store: Arc<dyn StatStore>,
    census: Arc<dyn CensusApi>,
    runs: RunStore,
    state_root: PathBuf,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StatStore>,
        census: Arc<dyn CensusApi>,
        state_root: PathBuf,
    ) -> Self {
        Self {
            store,
            census,
            runs: RunStore::new(),
            state_root,
        }
    }

    pub fn run_store(&self) -> &RunStore {
        &self.runs
    }

    /// Conflict preflight, then every write action in plan order, halting on
    /// the first executor failure. No run record is kept.
    pub fn execute_immediate(
        &self,
        plan: &ValidatedPlan,
        caller_email: Option<&str>,
        now: i64,
    ) -> Result<ExecuteOutcome, OrchestratorError> {
        let conflicts = detect_conflicts(self.store.as_ref(), &plan.actions)?;
        if !conflicts.is_empty() {
            self.audit(now, None, &format!("refused: {} conflict(s)", conflicts.len()));
            return Ok(ExecuteOutcome::Conflicts(conflicts));
        }

        let context = ExecutionContext {
            run_id: None,
            caps: plan.caps,
            caller_email: caller_email.map(str::to_string),
        };
        let deps = self.deps();
        let mut results = Vec::with_capacity(plan.actions.len());
        for action in &plan.actions {
            let result = execute_action(&deps, action, &context).map_err(|err| {
                self.audit(
                    now,
                    None,
                    &format!("action {} failed: {err}", action.id),
                );
                err
            })?;
            self.audit(now, None, &format!("action {}: {}", action.id, result.summary));
            results.push(result);
        }
        Ok(ExecuteOutcome::Executed(results))
    }

    /// Conflict preflight, then a durable run awaiting approval.
    pub fn create_run(
        &self,
        plan: &ValidatedPlan,
        caller_email: Option<&str>,
        now: i64,
    ) -> Result<RunCreation, OrchestratorError> {
        let conflicts = detect_conflicts(self.store.as_ref(), &plan.actions)?;
        if !conflicts.is_empty() {
            self.audit(now, None, &format!("refused: {} conflict(s)", conflicts.len()));
            return Ok(RunCreation::Conflicts(conflicts));
        }
        let requested_by = caller_email.unwrap_or("api-key");
        let run = self.runs.create_run(plan, requested_by, now)?;
        self.audit(
            now,
            Some(&run.run_id),
            &format!("created with {} actions, awaiting approval", run.actions.len()),
        );
        Ok(RunCreation::Created(run))
    }

    pub fn approve_run(&self, run_id: &str, now: i64) -> Result<RunSnapshot, TransitionError> {
        let run = self.runs.approve(run_id, now)?;
        self.audit(now, Some(run_id), "approved");
        Ok(run)
    }

    pub fn pause_run(&self, run_id: &str, now: i64) -> Result<RunSnapshot, TransitionError> {
        let run = self.runs.pause(run_id, now)?;
        self.audit(now, Some(run_id), "paused");
        Ok(run)
    }

    pub fn resume_run(&self, run_id: &str, now: i64) -> Result<RunSnapshot, TransitionError> {
        let run = self.runs.resume(run_id, now)?;
        self.audit(now, Some(run_id), "resumed");
        Ok(run)
    }

    pub fn stop_run(&self, run_id: &str, now: i64) -> Result<RunSnapshot, TransitionError> {
        let run = self.runs.stop(run_id, now)?;
        self.audit(now, Some(run_id), "stopped");
        Ok(run)
    }

    /// Claims and executes exactly one step. Executor failure fails the run;
    /// success advances the cursor and completes the run at the last step.
    pub fn run_next_step(
        &self,
        run_id: &str,
        caller_email: Option<&str>,
        now: i64,
    ) -> Result<StepOutcome, TransitionError> {
        let (claimed, action) = self.runs.start_next_step(run_id, now)?;
        let context = ExecutionContext {
            run_id: Some(run_id.to_string()),
            caps: claimed.caps,
            caller_email: caller_email.map(str::to_string),
        };
        let deps = self.deps();
        match execute_action(&deps, &action, &context) {
            Ok(result) => {
                let run = self.runs.complete_step(run_id, &result.summary, now)?;
                self.audit(
                    now,
                    Some(run_id),
                    &format!("step {} completed: {}", action.id, result.summary),
                );
                Ok(StepOutcome {
                    run,
                    result: Some(result),
                    error: None,
                })
            }
            Err(err) => {
                let message = err.to_string();
                let run = self.runs.fail_step(run_id, &message, now)?;
                self.audit(now, Some(run_id), &format!("step {} failed: {message}", action.id));
                Ok(StepOutcome {
                    run,
                    result: None,
                    error: Some(message),
                })
            }
        }
    }

    pub fn get_run(&self, run_id: &str) -> Option<RunSnapshot> {
        self.runs.get(run_id)
    }

    fn deps(&self) -> ExecutorDeps<'_> {
        ExecutorDeps {
            store: self.store.as_ref(),
            census: self.census.as_ref(),
        }
    }

    fn audit(&self, now: i64, run_id: Option<&str>, message: &str) {
        let line = audit_line(now, run_id, message);
        let _ = append_audit_line(&self.state_root, &line);
    }
}
