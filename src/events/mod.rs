//! Completion and failure events.
//!
//! Events use the same envelope the stages accept as triggers, so a line
//! from the event log can be fed straight back into the next stage.

use crate::error::EventError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use uuid::Uuid;

pub const INGESTOR_SOURCE: &str = "health.data.ingestor";
pub const ANALYZER_SOURCE: &str = "health.data.analyzer";

pub const INGESTION_COMPLETE: &str = "Data Ingestion Complete";
pub const INGESTION_FAILED: &str = "Data Ingestion Failed";
pub const ANALYSIS_COMPLETE: &str = "Data Analysis Complete";
pub const ANALYSIS_FAILED: &str = "Data Analysis Failed";

/// Event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub source: String,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub time: String,
    pub detail: Value,
}

impl Event {
    pub fn new(source: &str, detail_type: &str, detail: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            detail_type: detail_type.to_string(),
            time: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            detail,
        }
    }
}

/// Event publishing capability.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one event and return its id.
    async fn publish(&self, source: &str, detail_type: &str, detail: Value)
        -> Result<String, EventError>;
}

/// Appends events as JSON lines to a local file.
#[derive(Debug, Clone)]
pub struct JsonlEventBus {
    path: PathBuf,
}

impl JsonlEventBus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EventBus for JsonlEventBus {
    async fn publish(
        &self,
        source: &str,
        detail_type: &str,
        detail: Value,
    ) -> Result<String, EventError> {
        let event = Event::new(source, detail_type, detail);
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(event.id)
    }
}

/// Publish and log the outcome. Failures are logged, never returned.
pub async fn publish_logged(
    bus: &dyn EventBus,
    source: &str,
    detail_type: &str,
    detail: Value,
    correlation_id: &str,
) -> Option<String> {
    match bus.publish(source, detail_type, detail).await {
        Ok(event_id) => {
            info!(
                correlation_id = %correlation_id,
                event_type = %detail_type,
                event_id = %event_id,
                "event_sent"
            );
            Some(event_id)
        }
        Err(e) => {
            error!(
                correlation_id = %correlation_id,
                event_type = %detail_type,
                error = %e,
                "failed_to_send_event"
            );
            None
        }
    }
}
