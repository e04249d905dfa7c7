pub mod run_store;

pub use run_store::{
    RunEvent, RunSnapshot, RunStatus, RunStore, StepRecord, StepStatus, TransitionError,
    TransitionErrorCode,
};
