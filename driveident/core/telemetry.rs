use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord, StatusFilePublisher};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::runtime::{Builder, Runtime};

use crate::progress::{PROGRESS_EVENT, STATUS_FILE_NAME};

/// Log file written under the artifacts directory by [`PipelineTelemetry::for_artifacts`].
pub const LOG_FILE_NAME: &str = "logs/pipeline.log.jsonl";

/// Builder for pipeline telemetry sinks.
pub struct PipelineTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl PipelineTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Debug,
            publishers: Vec::new(),
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops log records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Adds an event publisher. Every event goes to every publisher, in the order added.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<PipelineTelemetry> {
        PipelineTelemetry::new(self.module, self.log_path, self.min_level, self.publishers)
    }
}

/// Telemetry handle shared by the orchestrators and the stages they drive.
#[derive(Clone)]
pub struct PipelineTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for PipelineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTelemetry")
            .field("module", &self.inner.module)
            .field("publishers", &self.inner.event.as_ref().map_or(0, |e| e.publishers.len()))
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    event: Option<EventHandle>,
}

struct EventHandle {
    runtime: Runtime,
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl EventHandle {
    fn new(publishers: Vec<Arc<dyn EventPublisher>>) -> Result<Self> {
        Ok(Self {
            runtime: Builder::new_current_thread().enable_all().build()?,
            publishers,
        })
    }

    // Publishing blocks so status writes land in emission order.
    fn publish(&self, record: &EventRecord) -> Result<()> {
        let mut first_error = None;
        for publisher in &self.publishers {
            if let Err(err) = self.runtime.block_on(publisher.publish(record.clone())) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl PipelineTelemetry {
    fn new(
        module: impl Into<String>,
        log_path: Option<PathBuf>,
        min_level: LogLevel,
        publishers: Vec<Arc<dyn EventPublisher>>,
    ) -> Result<Self> {
        let logger = if let Some(path) = log_path {
            Some(JsonLogger::with_min_level(path, min_level)?)
        } else {
            None
        };
        let event = if publishers.is_empty() {
            None
        } else {
            Some(EventHandle::new(publishers)?)
        };
        Ok(Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger,
                event,
            }),
        })
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> PipelineTelemetryBuilder {
        PipelineTelemetryBuilder::new(module)
    }

    /// Handle with no sinks; logging and events become no-ops.
    #[must_use]
    pub fn disabled(module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger: None,
                event: None,
            }),
        }
    }

    /// Standard sinks for a run: a JSON-lines log under `artifacts/logs` and the
    /// progress status file at the artifacts root, plus any extra publishers.
    pub fn for_artifacts(
        module: impl Into<String>,
        artifacts_dir: impl AsRef<Path>,
        extra: Vec<Arc<dyn EventPublisher>>,
    ) -> Result<Self> {
        let artifacts_dir = artifacts_dir.as_ref();
        let mut builder = Self::builder(module)
            .log_path(artifacts_dir.join(LOG_FILE_NAME))
            .min_level(LogLevel::Info)
            .event_publisher(Arc::new(StatusFilePublisher::new(
                artifacts_dir.join(STATUS_FILE_NAME),
                PROGRESS_EVENT,
            )));
        for publisher in extra {
            builder = builder.event_publisher(publisher);
        }
        builder.build()
    }

    /// Component name stamped on every record.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    /// Path of the log file, if logging is enabled.
    #[must_use]
    pub fn log_path(&self) -> Option<&Path> {
        self.inner.logger.as_ref().map(JsonLogger::path)
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Emits an event to every publisher.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(handle) = &self.inner.event {
            handle.publish(&EventRecord::new(
                self.inner.module.clone(),
                event_type,
                payload,
            ))?;
        }
        Ok(())
    }
}

/// Logs through an optional handle, discarding sink failures.
pub(crate) fn trace(
    telemetry: Option<&PipelineTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: Value,
) {
    if let Some(telemetry) = telemetry {
        if let Err(err) = telemetry.log(level, message, metadata) {
            eprintln!("telemetry log failed: {err:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("pipeline.log");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = PipelineTelemetry::builder("train")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "train.start", json!({ "models": 3 }))
            .unwrap();
        telemetry
            .event("train.completed", json!({ "accuracy": 0.9 }))
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("train.start"));
        assert_eq!(bus.snapshot().len(), 1);
        assert_eq!(bus.snapshot()[0].source, "train");
    }

    #[test]
    fn events_reach_every_publisher() {
        let first = Arc::new(MemoryEventBus::new(4));
        let second = Arc::new(MemoryEventBus::new(4));
        let telemetry = PipelineTelemetry::builder("predict")
            .event_publisher(first.clone())
            .event_publisher(second.clone())
            .build()
            .unwrap();
        telemetry.event("pipeline.progress", json!({})).unwrap();
        assert_eq!(first.snapshot().len(), 1);
        assert_eq!(second.snapshot().len(), 1);
    }

    #[test]
    fn disabled_handle_is_silent() {
        let telemetry = PipelineTelemetry::disabled("train");
        telemetry.log(LogLevel::Error, "ignored", json!({})).unwrap();
        telemetry.event("ignored", json!({})).unwrap();
        assert!(telemetry.log_path().is_none());
    }

    #[test]
    fn artifact_sinks_write_status_file() {
        let tmp = tempdir().unwrap();
        let telemetry = PipelineTelemetry::for_artifacts("train", tmp.path(), Vec::new()).unwrap();
        telemetry
            .event(PROGRESS_EVENT, json!({ "phase": "starting" }))
            .unwrap();
        telemetry.log(LogLevel::Info, "train.start", json!({})).unwrap();
        let status = std::fs::read_to_string(tmp.path().join(STATUS_FILE_NAME)).unwrap();
        assert!(status.contains("starting"));
        assert!(tmp.path().join(LOG_FILE_NAME).exists());
    }
}
