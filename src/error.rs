use crate::census::CensusError;
use crate::runs::TransitionError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Census(#[from] CensusError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("action `{action_id}` payload is missing `{field}`")]
    MissingPayloadField { action_id: String, field: String },
    #[error("action `{action_id}` field `{field}` is invalid: {detail}")]
    InvalidPayloadField {
        action_id: String,
        field: String,
        detail: String,
    },
    #[error("stat `{stat_id}` does not exist in the store")]
    UnknownStat { stat_id: String },
    #[error("formula `{formula}` is not supported")]
    UnsupportedFormula { formula: String },
    #[error("formula `{formula}` requires at least {needed} operands, got {got}")]
    InsufficientOperands {
        formula: String,
        needed: usize,
        got: usize,
    },
    #[error("incompatible year/boundary sets: {detail}")]
    IncompatibleOperands { detail: String },
    #[error("no overlapping rows: {detail}")]
    NoOverlappingRows { detail: String },
}
