use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Result of a run as seen by a calling layer that must never receive a raw fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome<T> {
    /// Whether the run completed.
    pub success: bool,
    /// Human-readable summary or the failure reason.
    pub message: String,
    /// Report of a completed run.
    pub value: Option<T>,
}

impl<T> RunOutcome<T> {
    /// Completed run.
    pub fn succeeded(value: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            value: Some(value),
        }
    }

    /// Failed run.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            message: reason.into(),
            value: None,
        }
    }

    /// Folds a pipeline result, summarizing success with `describe`.
    pub fn from_result(result: Result<T>, describe: impl FnOnce(&T) -> String) -> Self {
        match result {
            Ok(value) => {
                let message = describe(&value);
                Self::succeeded(value, message)
            }
            Err(err) => Self::failed(err.to_string()),
        }
    }
}
