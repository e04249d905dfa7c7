use crate::plan::{Action, PlanEstimate, RunCaps, ValidatedPlan};
use crate::shared::ids::generate_run_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Draft,
    AwaitingApproval,
    Approved,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (RunStatus::Draft, RunStatus::AwaitingApproval)
                | (RunStatus::Draft, RunStatus::Approved)
                | (RunStatus::AwaitingApproval, RunStatus::Approved)
                | (RunStatus::Approved, RunStatus::Running)
                | (RunStatus::Approved, RunStatus::Paused)
                | (RunStatus::Running, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Paused)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Paused, RunStatus::Running)
        ) || (!self.is_terminal() && next == RunStatus::Stopped)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Stopped
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Draft => "draft",
            RunStatus::AwaitingApproval => "awaiting_approval",
            RunStatus::Approved => "approved",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub index: usize,
    pub action_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(default)]
    pub result_summary: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub at: i64,
    pub kind: String,
    pub summary: String,
}

/// Deep-copied view of a run. Everything callers ever see; internals stay
/// behind the store's mutex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    pub caps: RunCaps,
    pub estimate: PlanEstimate,
    pub actions: Vec<Action>,
    pub steps: Vec<StepRecord>,
    pub next_action_index: usize,
    pub requested_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub events: Vec<RunEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionErrorCode {
    UnknownRun,
    InvalidTransition,
    RunNotApproved,
    RunPaused,
    RunStopped,
    RunCompleted,
    RunFailed,
    NoPendingSteps,
    StepNotRunning,
    RunIdGeneration,
}

impl std::fmt::Display for TransitionErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransitionErrorCode::UnknownRun => "unknown_run",
            TransitionErrorCode::InvalidTransition => "invalid_transition",
            TransitionErrorCode::RunNotApproved => "run_not_approved",
            TransitionErrorCode::RunPaused => "run_paused",
            TransitionErrorCode::RunStopped => "run_stopped",
            TransitionErrorCode::RunCompleted => "run_completed",
            TransitionErrorCode::RunFailed => "run_failed",
            TransitionErrorCode::NoPendingSteps => "no_pending_steps",
            TransitionErrorCode::StepNotRunning => "step_not_running",
            TransitionErrorCode::RunIdGeneration => "run_id_generation",
        };
        f.write_str(name)
    }
}

/// A rejected transition. Carries the current snapshot when the run exists
/// so callers can reconcile without a second read. State is never mutated on
/// rejection.
#[derive(Debug, Clone, thiserror::Error)]
#[error("run transition rejected ({code}): {message}")]
pub struct TransitionError {
    pub code: TransitionErrorCode,
    pub message: String,
    pub snapshot: Option<RunSnapshot>,
}

impl TransitionError {
    fn new(code: TransitionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            snapshot: None,
        }
    }

    fn with_snapshot(mut self, snapshot: RunSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// In-process registry of run state machines. One record per run; all
/// mutation goes through the transition methods below, serialized by the
/// store mutex. Construct one per server (or per test); there is no
/// process-wide singleton.
#[derive(Debug, Default)]
pub struct RunStore {
    runs: Mutex<BTreeMap<String, RunSnapshot>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-isolation teardown: drops every run.
    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn run_count(&self) -> usize {
        self.lock().len()
    }

    pub fn get(&self, run_id: &str) -> Option<RunSnapshot> {
        self.lock().get(run_id).cloned()
    }

    /// Creates a run from a validated plan: born `draft`, immediately moved
    /// to `awaiting_approval`.
    pub fn create_run(
        &self,
        plan: &ValidatedPlan,
        requested_by: &str,
        now: i64,
    ) -> Result<RunSnapshot, TransitionError> {
        let run_id = generate_run_id(now)
            .map_err(|err| TransitionError::new(TransitionErrorCode::RunIdGeneration, err))?;
        let steps = plan
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| StepRecord {
                index,
                action_id: action.id.clone(),
                status: StepStatus::Pending,
                started_at: None,
                finished_at: None,
                result_summary: None,
                error: None,
            })
            .collect();
        let mut run = RunSnapshot {
            run_id: run_id.clone(),
            status: RunStatus::Draft,
            caps: plan.caps,
            estimate: plan.estimate,
            actions: plan.actions.clone(),
            steps,
            next_action_index: 0,
            requested_by: requested_by.to_string(),
            created_at: now,
            updated_at: now,
            events: vec![RunEvent {
                at: now,
                kind: "created".to_string(),
                summary: format!("run created with {} actions", plan.actions.len()),
            }],
        };
        run.status = RunStatus::AwaitingApproval;
        run.events.push(RunEvent {
            at: now,
            kind: "awaiting_approval".to_string(),
            summary: "run awaiting human approval".to_string(),
        });
        let snapshot = run.clone();
        self.lock().insert(run_id, run);
        Ok(snapshot)
    }

    pub fn approve(&self, run_id: &str, now: i64) -> Result<RunSnapshot, TransitionError> {
        self.transition(run_id, RunStatus::Approved, now, "approved", "run approved")
    }

    pub fn pause(&self, run_id: &str, now: i64) -> Result<RunSnapshot, TransitionError> {
        self.transition(run_id, RunStatus::Paused, now, "paused", "run paused")
    }

    pub fn resume(&self, run_id: &str, now: i64) -> Result<RunSnapshot, TransitionError> {
        let mut runs = self.lock();
        let run = Self::require(&mut runs, run_id)?;
        if run.status != RunStatus::Paused {
            let message = format!("cannot resume a run in status `{}`", run.status);
            return Err(
                TransitionError::new(TransitionErrorCode::InvalidTransition, message)
                    .with_snapshot(run.clone()),
            );
        }
        run.status = RunStatus::Running;
        Self::record(run, now, "resumed", "run resumed".to_string());
        Ok(run.clone())
    }

    pub fn stop(&self, run_id: &str, now: i64) -> Result<RunSnapshot, TransitionError> {
        let mut runs = self.lock();
        let run = Self::require(&mut runs, run_id)?;
        if run.status.is_terminal() {
            let message = format!("cannot stop a run in terminal status `{}`", run.status);
            return Err(
                TransitionError::new(Self::blocked_code(run.status), message)
                    .with_snapshot(run.clone()),
            );
        }
        run.status = RunStatus::Stopped;
        Self::record(run, now, "stopped", "run stopped by operator".to_string());
        Ok(run.clone())
    }

    /// Claims the next pending step: the run moves to `running` and the step
    /// at the cursor moves `pending -> running`. Returns the claimed action
    /// alongside the snapshot. Distinguishes "blocked" (`run_paused`,
    /// `run_stopped`, ...) from "nothing to do" (`no_pending_steps`).
    pub fn start_next_step(
        &self,
        run_id: &str,
        now: i64,
    ) -> Result<(RunSnapshot, Action), TransitionError> {
        let mut runs = self.lock();
        let run = Self::require(&mut runs, run_id)?;
        match run.status {
            RunStatus::Approved | RunStatus::Running => {}
            blocked => {
                let message = format!("cannot start a step while the run is `{blocked}`");
                return Err(
                    TransitionError::new(Self::blocked_code(blocked), message)
                        .with_snapshot(run.clone()),
                );
            }
        }
        if run.next_action_index >= run.actions.len() {
            return Err(TransitionError::new(
                TransitionErrorCode::NoPendingSteps,
                "every step has already been executed",
            )
            .with_snapshot(run.clone()));
        }
        if run
            .steps
            .iter()
            .any(|step| step.status == StepStatus::Running)
        {
            return Err(TransitionError::new(
                TransitionErrorCode::InvalidTransition,
                "another step is still running",
            )
            .with_snapshot(run.clone()));
        }

        run.status = RunStatus::Running;
        let index = run.next_action_index;
        let action = run.actions[index].clone();
        let step = &mut run.steps[index];
        step.status = StepStatus::Running;
        step.started_at = Some(now);
        Self::record(
            run,
            now,
            "step_started",
            format!("step {index} ({}) started", action.action_type),
        );
        Ok((run.clone(), action))
    }

    /// Marks the running step completed and advances the cursor; the run
    /// completes exactly when the cursor reaches the end. A run stopped while
    /// the step was in flight keeps its terminal status; only the step
    /// outcome is recorded. A paused run stays paused unless this was the
    /// final step.
    pub fn complete_step(
        &self,
        run_id: &str,
        summary: &str,
        now: i64,
    ) -> Result<RunSnapshot, TransitionError> {
        let mut runs = self.lock();
        let run = Self::require(&mut runs, run_id)?;
        let index = run.next_action_index;
        let step_running = run
            .steps
            .get(index)
            .map(|step| step.status == StepStatus::Running)
            .unwrap_or(false);
        if !step_running {
            let message = format!("step {index} is not running");
            return Err(
                TransitionError::new(TransitionErrorCode::StepNotRunning, message)
                    .with_snapshot(run.clone()),
            );
        }
        let step = &mut run.steps[index];
        step.status = StepStatus::Completed;
        step.finished_at = Some(now);
        step.result_summary = Some(summary.to_string());
        run.next_action_index += 1;
        let at_end = run.next_action_index == run.actions.len();
        if run.status == RunStatus::Stopped {
            Self::record(
                run,
                now,
                "step_completed",
                format!("step {index} completed; run already stopped"),
            );
        } else if at_end {
            run.status = RunStatus::Completed;
            Self::record(
                run,
                now,
                "completed",
                format!("step {index} completed; run completed"),
            );
        } else if run.status == RunStatus::Paused {
            Self::record(
                run,
                now,
                "step_completed",
                format!("step {index} completed; run stays paused"),
            );
        } else {
            Self::record(run, now, "step_completed", format!("step {index} completed"));
        }
        Ok(run.clone())
    }

    /// Marks the running step failed and fails the run. Run-level failure is
    /// not resumable. A run stopped while the step was in flight keeps its
    /// terminal status; only the step outcome is recorded.
    pub fn fail_step(
        &self,
        run_id: &str,
        error: &str,
        now: i64,
    ) -> Result<RunSnapshot, TransitionError> {
        let mut runs = self.lock();
        let run = Self::require(&mut runs, run_id)?;
        let index = run.next_action_index;
        let step_running = run
            .steps
            .get(index)
            .map(|step| step.status == StepStatus::Running)
            .unwrap_or(false);
        if !step_running {
            let message = format!("step {index} is not running");
            return Err(
                TransitionError::new(TransitionErrorCode::StepNotRunning, message)
                    .with_snapshot(run.clone()),
            );
        }
        let step = &mut run.steps[index];
        step.status = StepStatus::Failed;
        step.finished_at = Some(now);
        step.error = Some(error.to_string());
        if run.status == RunStatus::Stopped {
            Self::record(
                run,
                now,
                "step_failed",
                format!("step {index} failed after stop: {error}"),
            );
        } else {
            run.status = RunStatus::Failed;
            Self::record(
                run,
                now,
                "failed",
                format!("step {index} failed: {error}"),
            );
        }
        Ok(run.clone())
    }

    fn transition(
        &self,
        run_id: &str,
        next: RunStatus,
        now: i64,
        kind: &str,
        summary: &str,
    ) -> Result<RunSnapshot, TransitionError> {
        let mut runs = self.lock();
        let run = Self::require(&mut runs, run_id)?;
        if !run.status.can_transition_to(next) {
            let message = format!("transition `{}` -> `{next}` is invalid", run.status);
            return Err(
                TransitionError::new(TransitionErrorCode::InvalidTransition, message)
                    .with_snapshot(run.clone()),
            );
        }
        run.status = next;
        Self::record(run, now, kind, summary.to_string());
        Ok(run.clone())
    }

    fn blocked_code(status: RunStatus) -> TransitionErrorCode {
        match status {
            RunStatus::Paused => TransitionErrorCode::RunPaused,
            RunStatus::Stopped => TransitionErrorCode::RunStopped,
            RunStatus::Completed => TransitionErrorCode::RunCompleted,
            RunStatus::Failed => TransitionErrorCode::RunFailed,
            _ => TransitionErrorCode::RunNotApproved,
        }
    }

    fn require<'a>(
        runs: &'a mut BTreeMap<String, RunSnapshot>,
        run_id: &str,
    ) -> Result<&'a mut RunSnapshot, TransitionError> {
        runs.get_mut(run_id).ok_or_else(|| {
            TransitionError::new(
                TransitionErrorCode::UnknownRun,
                format!("run `{run_id}` not found"),
            )
        })
    }

    /// Every successful mutation appends exactly one event and bumps
    /// `updated_at`.
    fn record(run: &mut RunSnapshot, now: i64, kind: &str, summary: String) {
        run.updated_at = now;
        run.events.push(RunEvent {
            at: now,
            kind: kind.to_string(),
            summary,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, RunSnapshot>> {
        match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
