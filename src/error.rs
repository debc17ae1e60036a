use std::io;

use thiserror::Error;

/// Every failure an evaluator can report.
///
/// Construction-time variants (`ModelLoad`, `CorruptTable`, `Io`) abort the
/// constructor; the others are per-call and leave the evaluator usable.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("sentence {sentence:?} produced no tokens")]
    EmptyInput { sentence: String },

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    ModelInference(String),

    #[error("corrupt table {path}, line {line}: {reason}")]
    CorruptTable {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("unknown topic id {0}")]
    UnknownTopic(u32),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::ModelLoad(format!("malformed JSON: {}", err))
    }
}

impl From<safetensors::SafeTensorError> for EvalError {
    fn from(err: safetensors::SafeTensorError) -> Self {
        EvalError::ModelLoad(format!("unreadable checkpoint: {:?}", err))
    }
}

impl From<ndarray::ShapeError> for EvalError {
    fn from(err: ndarray::ShapeError) -> Self {
        EvalError::ModelInference(format!("shape error: {}", err))
    }
}
