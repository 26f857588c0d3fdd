//! Trigger normalization.
//!
//! Three payload shapes start a stage: a storage-change notification list,
//! a manual invocation naming bucket and key, and the completion event of
//! the ingestion stage. All of them become [`UnitOfWork`]s here. An
//! ingestion failure event names no usable input and yields no units.

use crate::error::TriggerError;
use crate::events::{ANALYZER_SOURCE, INGESTION_FAILED, INGESTOR_SOURCE};
use crate::models::{TriggerOrigin, UnitOfWork};
use serde_json::Value;
use tracing::info;

/// Version id used when the trigger carries none.
pub const NULL_VERSION: &str = "null";

/// Convert a trigger payload into units of work.
///
/// An empty notification list is valid and yields no units.
pub fn normalize(event: &Value) -> Result<Vec<UnitOfWork>, TriggerError> {
    if !event.is_object() {
        return Err(TriggerError::Malformed("trigger is not a JSON object".to_string()));
    }

    if str_field(event, "source") == Some(INGESTOR_SOURCE) {
        if is_failure_event(event) {
            info!(correlation_id = ?failed_correlation_id(event), "skip_failed_ingestion");
            return Ok(Vec::new());
        }
        return upstream_event(event).map(|unit| vec![unit]);
    }

    if let Some(records) = event.get("Records") {
        return storage_notification(records);
    }

    if event.get("bucket").is_some() && event.get("key").is_some() {
        return manual_invocation(event).map(|unit| vec![unit]);
    }

    Err(TriggerError::Malformed(
        "expected Records, bucket/key or an ingestion event".to_string(),
    ))
}

/// Build a manual unit of work.
pub fn manual(bucket: &str, key: &str, version_id: Option<&str>) -> UnitOfWork {
    let version_id = version_id.unwrap_or(NULL_VERSION);
    UnitOfWork {
        correlation_id: UnitOfWork::default_correlation_id(bucket, key, version_id),
        bucket: bucket.to_string(),
        key: key.to_string(),
        version_id: version_id.to_string(),
        content_hash: None,
        origin: TriggerOrigin::Manual,
    }
}

fn str_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value.get(name).and_then(Value::as_str)
}

fn required<'a>(value: &'a Value, name: &str, context: &str) -> Result<&'a str, TriggerError> {
    str_field(value, name)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TriggerError::Malformed(format!("{} is missing {}", context, name)))
}

fn storage_notification(records: &Value) -> Result<Vec<UnitOfWork>, TriggerError> {
    let records = records
        .as_array()
        .ok_or_else(|| TriggerError::Malformed("Records is not a list".to_string()))?;

    records
        .iter()
        .map(|record| {
            let s3 = record
                .get("s3")
                .ok_or_else(|| TriggerError::Malformed("record is missing s3".to_string()))?;
            let bucket = s3
                .get("bucket")
                .and_then(|b| str_field(b, "name"))
                .ok_or_else(|| TriggerError::Malformed("record is missing bucket name".to_string()))?;
            let object = s3
                .get("object")
                .ok_or_else(|| TriggerError::Malformed("record is missing object".to_string()))?;
            let key = required(object, "key", "object")?;
            let version_id = str_field(object, "versionId").unwrap_or(NULL_VERSION);

            Ok(UnitOfWork {
                correlation_id: UnitOfWork::default_correlation_id(bucket, key, version_id),
                bucket: bucket.to_string(),
                key: key.to_string(),
                version_id: version_id.to_string(),
                content_hash: None,
                origin: TriggerOrigin::StorageNotification,
            })
        })
        .collect()
}

fn manual_invocation(event: &Value) -> Result<UnitOfWork, TriggerError> {
    let bucket = required(event, "bucket", "trigger")?;
    let key = required(event, "key", "trigger")?;
    let version_id = str_field(event, "versionId").or_else(|| str_field(event, "version_id"));

    let mut unit = manual(bucket, key, version_id);
    if let Some(correlation_id) = str_field(event, "correlation_id").filter(|c| !c.is_empty()) {
        unit.correlation_id = correlation_id.to_string();
    }
    Ok(unit)
}

fn is_failure_event(event: &Value) -> bool {
    str_field(event, "detail-type") == Some(INGESTION_FAILED)
        || event
            .get("detail")
            .and_then(|d| str_field(d, "status"))
            .is_some_and(|status| status == "failed")
}

fn failed_correlation_id(event: &Value) -> Option<&str> {
    event.get("detail").and_then(|d| str_field(d, "correlation_id"))
}

fn upstream_event(event: &Value) -> Result<UnitOfWork, TriggerError> {
    let detail = event
        .get("detail")
        .ok_or_else(|| TriggerError::Malformed("ingestion event is missing detail".to_string()))?;
    let bucket = required(detail, "bucket", "detail")?;
    let key = str_field(detail, "processed_key")
        .filter(|k| !k.is_empty())
        .or_else(|| str_field(detail, "raw_key").filter(|k| !k.is_empty()))
        .ok_or_else(|| {
            TriggerError::Malformed("detail is missing processed_key and raw_key".to_string())
        })?;
    let version_id = str_field(detail, "version_id").unwrap_or(NULL_VERSION);
    let correlation_id = str_field(detail, "correlation_id")
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UnitOfWork::default_correlation_id(bucket, key, version_id));

    Ok(UnitOfWork {
        correlation_id,
        bucket: bucket.to_string(),
        key: key.to_string(),
        version_id: version_id.to_string(),
        content_hash: str_field(detail, "content_hash")
            .filter(|h| !h.is_empty())
            .map(str::to_string),
        origin: TriggerOrigin::UpstreamEvent,
    })
}

/// What a notification trigger asks to report on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyTrigger {
    /// Completion event of the analysis stage.
    Event(String),
    /// Direct invocation naming a correlation id.
    Direct(String),
    /// Anything else: report on the most recent records.
    Fallback,
}

impl NotifyTrigger {
    pub fn parse(event: &Value) -> Self {
        let correlation_id = |v: &Value| {
            str_field(v, "correlation_id")
                .filter(|c| !c.is_empty())
                .map(str::to_string)
        };

        if str_field(event, "source") == Some(ANALYZER_SOURCE) {
            if let Some(id) = event.get("detail").and_then(correlation_id) {
                return NotifyTrigger::Event(id);
            }
        }

        match correlation_id(event) {
            Some(id) => NotifyTrigger::Direct(id),
            None => NotifyTrigger::Fallback,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NotifyTrigger::Event(_) => "event",
            NotifyTrigger::Direct(_) => "direct",
            NotifyTrigger::Fallback => "fallback",
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            NotifyTrigger::Event(id) | NotifyTrigger::Direct(id) => Some(id),
            NotifyTrigger::Fallback => None,
        }
    }
}
