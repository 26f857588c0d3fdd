//! Data models for the telemetry pipeline.
//!
//! This module contains the core data structures shared by every stage:
//! raw and typed readings, validation outcomes, anomaly findings,
//! persisted analysis results, manifests and the aggregated report.

use crate::analysis::summary::Summary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// A declared column of the telemetry schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    EventTime,
    UserId,
    HeartRate,
    Spo2,
    Steps,
    TempC,
    SystolicBp,
    DiastolicBp,
}

impl Field {
    /// All required fields, in schema order.
    pub const ALL: [Field; 8] = [
        Field::EventTime,
        Field::UserId,
        Field::HeartRate,
        Field::Spo2,
        Field::Steps,
        Field::TempC,
        Field::SystolicBp,
        Field::DiastolicBp,
    ];

    /// Column name as it appears in CSV headers.
    pub fn name(&self) -> &'static str {
        match self {
            Field::EventTime => "event_time",
            Field::UserId => "user_id",
            Field::HeartRate => "heart_rate",
            Field::Spo2 => "spo2",
            Field::Steps => "steps",
            Field::TempC => "temp_c",
            Field::SystolicBp => "systolic_bp",
            Field::DiastolicBp => "diastolic_bp",
        }
    }

    /// Schema column names, in order.
    pub fn schema_names() -> Vec<String> {
        Self::ALL.iter().map(|f| f.name().to_string()).collect()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Why a row was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    Ok,
    Missing(Field),
    Invalid(Field),
    DbpGtSbp,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonCode::Ok => write!(f, "ok"),
            ReasonCode::Missing(field) => write!(f, "missing_{}", field),
            ReasonCode::Invalid(field) => write!(f, "invalid_{}", field),
            ReasonCode::DbpGtSbp => write!(f, "dbp_gt_sbp"),
        }
    }
}

impl Serialize for ReasonCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Result of validating one raw row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub accepted: bool,
    pub reason: ReasonCode,
}

impl ValidationOutcome {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: ReasonCode::Ok,
        }
    }

    pub fn rejected(reason: ReasonCode) -> Self {
        Self {
            accepted: false,
            reason,
        }
    }
}

/// One CSV row as raw strings, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    values: HashMap<String, String>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from `(column, value)` pairs.
    #[cfg(test)]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<String> {
        self.values.remove(column)
    }

    /// Values laid out in the given column order; absent columns become empty.
    pub fn to_row(&self, headers: &[String]) -> Vec<String> {
        headers
            .iter()
            .map(|h| self.get(h).unwrap_or_default().to_string())
            .collect()
    }
}

/// A typed reading produced by a row that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsReading {
    pub event_time: String,
    pub user_id: String,
    pub heart_rate: i64,
    pub spo2: i64,
    pub steps: i64,
    pub temp_c: f64,
    pub systolic_bp: i64,
    pub diastolic_bp: i64,
}

/// A row that triggered at least one clinical rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyFinding {
    pub event_time: String,
    pub user_id: String,
    pub heart_rate: i64,
    pub spo2: i64,
    pub steps: i64,
    pub temp_c: f64,
    pub systolic_bp: i64,
    pub diastolic_bp: i64,
    /// Triggered reasons joined by `", "` in rule order.
    pub anomaly: String,
}

impl AnomalyFinding {
    pub fn new(reading: &VitalsReading, reasons: &[&str]) -> Self {
        Self {
            event_time: reading.event_time.clone(),
            user_id: reading.user_id.clone(),
            heart_rate: reading.heart_rate,
            spo2: reading.spo2,
            steps: reading.steps,
            temp_c: reading.temp_c,
            systolic_bp: reading.systolic_bp,
            diastolic_bp: reading.diastolic_bp,
            anomaly: reasons.join(", "),
        }
    }

    /// Label used for frequency counting.
    pub fn label(&self) -> &str {
        let label = self.anomaly.trim();
        if label.is_empty() {
            "Unknown"
        } else {
            label
        }
    }
}

/// Persisted outcome of analyzing one unit of work.
///
/// Every field is optional on read so records written by older versions
/// (or by hand) still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisResult {
    pub correlation_id: String,
    pub analysis_id: String,
    /// RFC 3339 UTC timestamp; also the sort key for recency.
    pub analysis_timestamp: String,
    pub source_file: String,
    pub processed_file: String,
    pub records_analyzed: usize,
    pub anomalies: Vec<AnomalyFinding>,
    #[serde(deserialize_with = "lenient_strings")]
    pub insights: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub recommendations: Vec<String>,
    pub summary: Summary,
    pub notification_sent: bool,
    pub notification_timestamp: Option<String>,
    /// Unix seconds after which the record is hidden; 0 disables expiry.
    pub expires_at: i64,
}

impl AnalysisResult {
    /// Whether the record has passed its expiry time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > 0 && self.expires_at <= now.timestamp()
    }
}

/// Accept any JSON for a string list: strings stay, other values are kept
/// as compact JSON text, and a non-array becomes an empty list.
fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_strings(&value))
}

/// Flatten a JSON value into display strings.
pub fn value_to_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Row counts recorded by an ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestCounts {
    pub input: usize,
    pub valid: usize,
    pub rejected: usize,
}

/// Audit record written once per ingested source object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestRecord {
    pub correlation_id: String,
    pub source_bucket: String,
    pub source_key: String,
    pub source_version: String,
    pub processed_key: Option<String>,
    pub rejected_key: Option<String>,
    pub counts: ManifestCounts,
    pub timestamp_utc: String,
    pub schema_fields: Vec<String>,
    /// SHA-256 of the processed CSV, when one was written.
    pub content_hash: Option<String>,
}

/// Where a unit of work came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrigin {
    StorageNotification,
    Manual,
    UpstreamEvent,
}

/// Normalized description of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfWork {
    pub correlation_id: String,
    pub bucket: String,
    pub key: String,
    pub version_id: String,
    pub content_hash: Option<String>,
    pub origin: TriggerOrigin,
}

impl UnitOfWork {
    /// Correlation id used when the trigger does not carry one.
    pub fn default_correlation_id(bucket: &str, key: &str, version_id: &str) -> String {
        format!("{}/{}@{}", bucket, key, version_id)
    }
}

/// Final status of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Success,
    Skipped,
    Failed,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Success => write!(f, "success"),
            UnitStatus::Skipped => write!(f, "skipped"),
            UnitStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One entry of a batch result list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub correlation_id: String,
    pub status: UnitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Primary object written by the stage (analysis or manifest key).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    #[serde(default)]
    pub rows: usize,
    #[serde(default)]
    pub anomalies: usize,
}

impl UnitOutcome {
    pub fn success(correlation_id: &str, output_key: String, rows: usize, anomalies: usize) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            status: UnitStatus::Success,
            reason: None,
            error: None,
            stage: None,
            output_key: Some(output_key),
            rows,
            anomalies,
        }
    }

    pub fn skipped(correlation_id: &str, reason: &str) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            status: UnitStatus::Skipped,
            reason: Some(reason.to_string()),
            error: None,
            stage: None,
            output_key: None,
            rows: 0,
            anomalies: 0,
        }
    }

    pub fn failed(correlation_id: &str, stage: &str, error: String) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            status: UnitStatus::Failed,
            reason: None,
            error: Some(error),
            stage: Some(stage.to_string()),
            output_key: None,
            rows: 0,
            anomalies: 0,
        }
    }
}

/// Result of one stage invocation over a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// `ok` when the trigger was understood, `failed` otherwise.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub results: Vec<UnitOutcome>,
}

impl BatchReport {
    pub fn ok(results: Vec<UnitOutcome>) -> Self {
        Self {
            status: "ok".to_string(),
            reason: None,
            results,
        }
    }

    pub fn malformed() -> Self {
        Self {
            status: "failed".to_string(),
            reason: Some("invalid_event_format".to_string()),
            results: Vec::new(),
        }
    }

    pub fn count(&self, status: UnitStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// True when the trigger was rejected or any unit failed.
    pub fn has_failures(&self) -> bool {
        self.status != "ok" || self.count(UnitStatus::Failed) > 0
    }
}

/// Row counts summed over the manifests of the reported units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_input: usize,
    pub total_valid: usize,
    pub total_rejected: usize,
    pub files_processed: usize,
}

impl ProcessingStats {
    pub fn add(&mut self, counts: &ManifestCounts) {
        self.total_input += counts.input;
        self.total_valid += counts.valid;
        self.total_rejected += counts.rejected;
        self.files_processed += 1;
    }

    /// Share of input rows that passed validation, in percent.
    pub fn data_quality_pct(&self) -> f64 {
        if self.total_input == 0 {
            100.0
        } else {
            self.total_valid as f64 / self.total_input as f64 * 100.0
        }
    }
}

/// How several analysis records are folded into one report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    /// Narrative fields come from the most recent record only.
    #[default]
    Latest,
    /// Narrative fields are merged across all records.
    Merge,
}

impl fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationMode::Latest => write!(f, "latest"),
            AggregationMode::Merge => write!(f, "merge"),
        }
    }
}

/// Occurrences of one anomaly label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyCount {
    pub label: String,
    pub count: usize,
}

/// Metadata about a generated report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    /// Human description of which records are included.
    pub scope: String,
    pub mode: AggregationMode,
    pub analyses_included: usize,
    pub latest_analysis_timestamp: Option<String>,
}

/// The aggregated health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub metadata: ReportMetadata,
    pub processing: ProcessingStats,
    pub total_records_analyzed: usize,
    pub total_anomalies: usize,
    /// Most frequent first; ties keep first-seen order.
    pub anomaly_frequency: Vec<AnomalyCount>,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub executive_summary: String,
}
