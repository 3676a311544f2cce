use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use uuid::Uuid;

/// Builder configuring orchestrator telemetry sinks.
pub struct OrchestratorTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl OrchestratorTelemetryBuilder {
    /// Creates a new builder for the given module label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            event_publisher: None,
        }
    }

    /// Sets the JSON log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Registers the event publisher for engine lifecycle events.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Finalizes the builder.
    pub fn build(self) -> Result<OrchestratorTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(Arc::new(JsonLogger::new(path)?)),
            None => None,
        };
        Ok(OrchestratorTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared by the engine and the run lifecycle.
#[derive(Clone)]
pub struct OrchestratorTelemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    module: String,
    logger: Option<Arc<JsonLogger>>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl fmt::Debug for OrchestratorTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorTelemetry")
            .field("module", &self.inner.module)
            .finish()
    }
}

impl OrchestratorTelemetry {
    /// Starts a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> OrchestratorTelemetryBuilder {
        OrchestratorTelemetryBuilder::new(module)
    }

    /// Writes a structured log line. Failures are swallowed: telemetry
    /// never interferes with a run.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(self.inner.module.clone(), level, message)
                .with_metadata(metadata);
            let _ = logger.log(&record);
        }
    }

    /// Publishes a lifecycle event.
    pub async fn event(&self, event_type: &str, analysis_id: Option<&str>, payload: Value) {
        if let Some(publisher) = &self.inner.publisher {
            let _ = publisher
                .publish(EventRecord {
                    id: Uuid::new_v4().to_string(),
                    source: self.inner.module.clone(),
                    event_type: event_type.to_string(),
                    timestamp: Utc::now().to_rfc3339(),
                    analysis_id: analysis_id.map(ToString::to_string),
                    payload,
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn logs_and_publishes() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = OrchestratorTelemetry::builder("engine")
            .log_path(dir.path().join("engine.log"))
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry.log(LogLevel::Info, "engine.plan.generated", json!({"steps": 15}));
        telemetry
            .event("engine.plan.generated", Some("run-1"), json!({"steps": 15}))
            .await;
        let content = std::fs::read_to_string(dir.path().join("engine.log")).unwrap();
        assert!(content.contains("engine.plan.generated"));
        assert_eq!(bus.snapshot_of("engine.plan.generated").len(), 1);
    }

    #[tokio::test]
    async fn sinks_are_optional() {
        let telemetry = OrchestratorTelemetry::builder("engine").build().unwrap();
        telemetry.log(LogLevel::Debug, "noop", json!({}));
        telemetry.event("noop", None, json!({})).await;
    }
}
