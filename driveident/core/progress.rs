use std::fmt;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::LogLevel;

use crate::telemetry::PipelineTelemetry;

/// Event type carrying a [`ProgressStatus`] payload.
pub const PROGRESS_EVENT: &str = "pipeline.progress";

/// File name of the status file under the artifacts directory.
pub const STATUS_FILE_NAME: &str = "pipeline_progress.json";

/// Stage a run is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    /// Run accepted, nothing computed yet.
    Starting,
    /// Loading recordings and building feature rows.
    Extraction,
    /// Cross-validating and fitting model families.
    Training,
    /// Scoring persisted models.
    Prediction,
    /// Run finished, successfully or not.
    Done,
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Extraction => "extraction",
            Self::Training => "training",
            Self::Prediction => "prediction",
            Self::Done => "done",
        })
    }
}

/// Snapshot of run progress, as written to the status file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStatus {
    /// Current stage.
    pub phase: ProgressPhase,
    /// Steps in this stage.
    pub total: usize,
    /// Names of finished steps, e.g. model families.
    pub completed: Vec<String>,
    /// Names of running steps.
    pub in_progress: Vec<String>,
    /// Free-form description of the current step.
    pub message: String,
    /// `total - completed - in_progress` step counts, floored at zero.
    pub remaining: usize,
    /// Completion percentage with one decimal, capped at 100.
    pub percent: f64,
}

impl ProgressStatus {
    /// Builds a status, deriving `remaining` and `percent` from the step lists.
    #[must_use]
    pub fn new(
        phase: ProgressPhase,
        total: usize,
        completed: Vec<String>,
        in_progress: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        let remaining = total
            .saturating_sub(completed.len())
            .saturating_sub(in_progress.len());
        let percent = if total > 0 {
            ((completed.len() as f64 / total as f64 * 100.0 * 10.0).round() / 10.0).min(100.0)
        } else if phase == ProgressPhase::Done {
            100.0
        } else {
            0.0
        };
        Self {
            phase,
            total,
            completed,
            in_progress,
            message: message.into(),
            remaining,
            percent,
        }
    }

    /// Status without step accounting, used for phase transitions.
    #[must_use]
    pub fn phase(phase: ProgressPhase, message: impl Into<String>) -> Self {
        Self::new(phase, 0, Vec::new(), Vec::new(), message)
    }
}

/// Step names for a run over `items`, split at `index`: the items before it are
/// completed and the item at it is running.
pub fn step_lists<T: fmt::Display>(items: &[T], index: usize) -> (Vec<String>, Vec<String>) {
    let completed = items[..index.min(items.len())]
        .iter()
        .map(ToString::to_string)
        .collect();
    let in_progress = items.get(index).map(ToString::to_string).into_iter().collect();
    (completed, in_progress)
}

/// Emits progress snapshots as `pipeline.progress` events.
///
/// Publisher failures never abort the run; they are logged and dropped.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    telemetry: Option<PipelineTelemetry>,
}

impl ProgressReporter {
    /// Reporter bound to a telemetry handle, or a silent one for `None`.
    #[must_use]
    pub fn new(telemetry: Option<&PipelineTelemetry>) -> Self {
        Self {
            telemetry: telemetry.cloned(),
        }
    }

    /// Publishes one snapshot.
    pub fn emit(&self, status: &ProgressStatus) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        let payload = match serde_json::to_value(status) {
            Ok(payload) => payload,
            Err(err) => {
                eprintln!("progress encode failed: {err:?}");
                return;
            }
        };
        if let Err(err) = telemetry.event(PROGRESS_EVENT, payload) {
            let _ = telemetry.log(
                LogLevel::Warn,
                "progress.publish_failed",
                serde_json::json!({ "error": err.to_string() }),
            );
        }
    }

    /// Shorthand for building and emitting a snapshot.
    pub fn report(
        &self,
        phase: ProgressPhase,
        total: usize,
        completed: Vec<String>,
        in_progress: Vec<String>,
        message: impl Into<String>,
    ) {
        self.emit(&ProgressStatus::new(
            phase,
            total,
            completed,
            in_progress,
            message,
        ));
    }

    /// Emits a phase transition without step accounting.
    pub fn transition(&self, phase: ProgressPhase, message: impl Into<String>) {
        self.emit(&ProgressStatus::phase(phase, message));
    }
}

/// Event publisher that hands decoded progress snapshots to a closure.
pub struct CallbackPublisher<F> {
    callback: F,
}

impl<F> CallbackPublisher<F>
where
    F: Fn(&ProgressStatus) + Send + Sync,
{
    /// Wraps the callback.
    pub const fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> EventPublisher for CallbackPublisher<F>
where
    F: Fn(&ProgressStatus) + Send + Sync,
{
    async fn publish(&self, event: EventRecord) -> AnyResult<()> {
        if event.event_type == PROGRESS_EVENT {
            let status: ProgressStatus = serde_json::from_value(event.payload)?;
            (self.callback)(&status);
        }
        Ok(())
    }
}
