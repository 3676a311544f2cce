use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_event_bus::{EventPublisher, EventRecord};
use uuid::Uuid;

use crate::entry::SafetyLevel;

/// Out-of-band alert raised for HIGH-safety ledger entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertRecord {
    /// Run the alert belongs to.
    pub analysis_id: String,
    /// Classified level (always HIGH today; the record keeps the field
    /// so receivers need not assume).
    pub safety_level: SafetyLevel,
    /// Non-PHI one-line summary.
    pub summary: String,
    /// Alert time.
    pub ts: DateTime<Utc>,
}

/// Best-effort alert capability. Failures are reported to the caller
/// but never roll back the ledger append that raised the alert.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Raises an alert. Implementations rate-limit to one alert per
    /// `analysis_id`.
    async fn alert(&self, record: AlertRecord) -> Result<()>;
}

/// Notifier publishing `audit.alert.high` events on the shared bus.
pub struct EventBusNotifier {
    publisher: Arc<dyn EventPublisher>,
    alerted: Mutex<HashSet<String>>,
}

impl EventBusNotifier {
    /// Creates a notifier over the given publisher.
    #[must_use]
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            publisher,
            alerted: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl Notifier for EventBusNotifier {
    async fn alert(&self, record: AlertRecord) -> Result<()> {
        {
            let mut alerted = self.alerted.lock();
            if !alerted.insert(record.analysis_id.clone()) {
                return Ok(());
            }
        }
        self.publisher
            .publish(EventRecord {
                id: Uuid::new_v4().to_string(),
                source: "audit".into(),
                event_type: "audit.alert.high".into(),
                timestamp: record.ts.to_rfc3339(),
                analysis_id: Some(record.analysis_id.clone()),
                payload: json!({
                    "safety_level": record.safety_level.label(),
                    "summary": record.summary,
                }),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_event_bus::MemoryEventBus;

    fn record(analysis_id: &str) -> AlertRecord {
        AlertRecord {
            analysis_id: analysis_id.into(),
            safety_level: SafetyLevel::High,
            summary: "melanoma assessed as high risk".into(),
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publishes_alert_events() {
        let bus = Arc::new(MemoryEventBus::new(8));
        let notifier = EventBusNotifier::new(bus.clone());
        notifier.alert(record("run-1")).await.unwrap();
        let events = bus.snapshot_of("audit.alert.high");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].analysis_id.as_deref(), Some("run-1"));
    }

    #[tokio::test]
    async fn rate_limits_per_analysis_id() {
        let bus = Arc::new(MemoryEventBus::new(8));
        let notifier = EventBusNotifier::new(bus.clone());
        notifier.alert(record("run-1")).await.unwrap();
        notifier.alert(record("run-1")).await.unwrap();
        notifier.alert(record("run-2")).await.unwrap();
        assert_eq!(bus.snapshot_of("audit.alert.high").len(), 2);
    }
}
