//! Analysis stage.
//!
//! For each unit of work: check the analysis marker, load the processed
//! rows, flag anomalies, ask the summarizer for an interpretation, persist
//! the [`AnalysisResult`] to the record store and as a blob, write the
//! marker, then publish a completion event.
//!
//! Units run one after another. Each runs in its own task so that even a
//! panic is reported as a failed unit instead of ending the batch.

use crate::analysis::{stats, AnomalyDetector};
use crate::error::{PipelineError, StoreError};
use crate::events::{publish_logged, EventBus, ANALYSIS_COMPLETE, ANALYSIS_FAILED, ANALYZER_SOURCE};
use crate::idempotency::{GateStatus, IdempotencyGate, MarkerKey, ANALYSIS_STAGE};
use crate::models::{AnalysisResult, BatchReport, UnitOfWork, UnitOutcome, VitalsReading};
use crate::pipeline::trigger;
use crate::pipeline::{AtStage, Layout, Stage, UnitError};
use crate::storage::{basename, stem, ObjectStore, RecordStore};
use crate::summarizer::{interpret_response, prompt, Summarizer};
use crate::validation::{read_csv, read_reading};
use chrono::{SecondsFormat, Utc};
use indicatif::ProgressBar;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of the work done for one unit before events are published.
enum Step {
    Skipped(&'static str),
    Done {
        analysis_key: String,
        result: AnalysisResult,
    },
}

/// Runs anomaly detection and summarization over processed batches.
pub struct AnalysisOrchestrator {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    summarizer: Arc<dyn Summarizer>,
    events: Arc<dyn EventBus>,
    detector: AnomalyDetector,
    gate: IdempotencyGate,
    layout: Layout,
}

impl AnalysisOrchestrator {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
        summarizer: Arc<dyn Summarizer>,
        events: Arc<dyn EventBus>,
        detector: AnomalyDetector,
        layout: Layout,
    ) -> Self {
        let gate = IdempotencyGate::new(
            objects.clone(),
            layout.bucket.clone(),
            layout.markers_prefix.clone(),
            ANALYSIS_STAGE,
        );
        Self {
            objects,
            records,
            summarizer,
            events,
            detector,
            gate,
            layout,
        }
    }

    /// Normalize a trigger and analyze every unit it names.
    pub async fn run(self: &Arc<Self>, event: &Value, progress: &ProgressBar) -> BatchReport {
        match trigger::normalize(event) {
            Ok(units) => BatchReport::ok(self.run_batch(&units, progress).await),
            Err(e) => {
                error!(error = %e, "invalid_event_format");
                BatchReport::malformed()
            }
        }
    }

    /// Analyze units sequentially, isolating each one.
    pub async fn run_batch(
        self: &Arc<Self>,
        units: &[UnitOfWork],
        progress: &ProgressBar,
    ) -> Vec<UnitOutcome> {
        progress.set_length(units.len() as u64);
        let mut outcomes = Vec::with_capacity(units.len());

        for unit in units {
            progress.set_message(basename(&unit.key).to_string());

            let this = Arc::clone(self);
            let owned = unit.clone();
            let outcome = match tokio::spawn(async move { this.process(&owned).await }).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let message = format!("unit task aborted: {}", e);
                    error!(correlation_id = %unit.correlation_id, error = %message, "analysis_failed");
                    self.publish_failure(unit, "panic", &message).await;
                    UnitOutcome::failed(&unit.correlation_id, "panic", message)
                }
            };

            outcomes.push(outcome);
            progress.inc(1);
        }

        outcomes
    }

    /// Analyze one unit of work. Never fails; failures become outcomes.
    pub async fn process(&self, unit: &UnitOfWork) -> UnitOutcome {
        let correlation_id = unit.correlation_id.as_str();
        info!(correlation_id = %correlation_id, key = %unit.key, "analysis_started");

        let marker = match &unit.content_hash {
            Some(hash) => MarkerKey::ContentHash(hash.clone()),
            None => MarkerKey::composite(&unit.bucket, &unit.key, &unit.version_id),
        };

        match self.analyze(unit, &marker).await {
            Ok(Step::Skipped(reason)) => UnitOutcome::skipped(correlation_id, reason),
            Ok(Step::Done {
                analysis_key,
                result,
            }) => {
                self.publish_completion(unit, &analysis_key, &result).await;
                UnitOutcome::success(
                    correlation_id,
                    analysis_key,
                    result.records_analyzed,
                    result.anomalies.len(),
                )
            }
            Err(e) => {
                let stage = e.stage.to_string();
                let message = e.source.to_string();
                error!(
                    correlation_id = %correlation_id,
                    stage = %stage,
                    error = %message,
                    "analysis_failed"
                );
                self.publish_failure(unit, &stage, &message).await;
                UnitOutcome::failed(correlation_id, &stage, message)
            }
        }
    }

    async fn analyze(&self, unit: &UnitOfWork, marker: &MarkerKey) -> Result<Step, UnitError> {
        let correlation_id = unit.correlation_id.as_str();

        if self.gate.check(marker).await? == GateStatus::AlreadyDone {
            info!(
                correlation_id = %correlation_id,
                marker = %self.gate.marker_key(marker),
                "already_analyzed"
            );
            return Ok(Step::Skipped("already_analyzed"));
        }

        let Some((bucket, key, mapped)) = self.resolve_source(unit) else {
            info!(correlation_id = %correlation_id, "skip_non_processed_prefix");
            return Ok(Step::Skipped("non_processed_prefix"));
        };

        let Some(readings) = self.load_readings(&bucket, &key, mapped).await? else {
            info!(correlation_id = %correlation_id, "no_data_to_analyze");
            return Ok(Step::Skipped("no_data"));
        };

        let anomalies = self.detector.detect(&readings);
        debug!(
            correlation_id = %correlation_id,
            rows = readings.len(),
            anomalies = anomalies.len(),
            "anomalies_detected"
        );

        let statistics = stats::compute(&readings);
        let prompt = prompt::build_prompt(&readings, anomalies.len(), statistics.as_ref());
        let raw = self.summarizer.invoke(&prompt).await.at(Stage::Summarize)?;
        let interpreted = interpret_response(&raw);
        info!(
            correlation_id = %correlation_id,
            insights = interpreted.insights.len(),
            recommendations = interpreted.recommendations.len(),
            parsed = interpreted.parsed,
            "llm_analysis_completed"
        );

        let now = Utc::now();
        let id = Uuid::new_v4().simple().to_string();
        let expires_at = match self.layout.ttl_days {
            0 => 0,
            days => now.timestamp() + i64::from(days) * 86_400,
        };

        let result = AnalysisResult {
            correlation_id: correlation_id.to_string(),
            analysis_id: format!("analysis_{}_{}", now.timestamp(), &id[..8]),
            analysis_timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            source_file: unit.key.clone(),
            processed_file: key.clone(),
            records_analyzed: readings.len(),
            anomalies,
            insights: interpreted.insights,
            recommendations: interpreted.recommendations,
            summary: interpreted.summary,
            notification_sent: false,
            notification_timestamp: None,
            expires_at,
        };

        self.records.put(&result).await.at(Stage::Persist)?;

        let analysis_key = format!("{}{}_analysis.json", self.layout.analysis_prefix, stem(&key));
        let body = serde_json::to_vec_pretty(&result).at(Stage::Persist)?;
        self.objects
            .put(&self.layout.bucket, &analysis_key, &body, "application/json")
            .await
            .at(Stage::Persist)?;

        self.gate.activate(marker).await?;

        info!(
            correlation_id = %correlation_id,
            analysis_key = %analysis_key,
            rows_analyzed = result.records_analyzed,
            anomalies_detected = result.anomalies.len(),
            "analysis_completed"
        );

        Ok(Step::Done {
            analysis_key,
            result,
        })
    }

    /// Where the processed rows of a unit live.
    ///
    /// Raw keys map to their processed counterpart in the layout bucket.
    /// Returns `(bucket, key, mapped)`, or `None` when the key is neither
    /// raw nor processed CSV.
    fn resolve_source(&self, unit: &UnitOfWork) -> Option<(String, String, bool)> {
        if !unit.key.ends_with(".csv") {
            return None;
        }
        if unit.key.starts_with(&self.layout.processed_prefix) {
            return Some((unit.bucket.clone(), unit.key.clone(), false));
        }
        if unit.key.starts_with(&self.layout.raw_prefix) {
            let key = format!("{}{}", self.layout.processed_prefix, basename(&unit.key));
            return Some((self.layout.bucket.clone(), key, true));
        }
        None
    }

    /// Typed readings of a processed object, `None` when there are none.
    async fn load_readings(
        &self,
        bucket: &str,
        key: &str,
        mapped: bool,
    ) -> Result<Option<Vec<VitalsReading>>, UnitError> {
        let body = match self.objects.get(bucket, key).await {
            Ok(body) => body,
            // A raw upload with no accepted rows has no processed object
            Err(StoreError::NotFound { .. }) if mapped => {
                warn!(bucket = %bucket, key = %key, "processed_object_missing");
                return Ok(None);
            }
            Err(e) => return Err(UnitError::new(Stage::Load, e)),
        };

        let table = read_csv(&body).at(Stage::Load)?;
        if table.rows.is_empty() {
            return Ok(None);
        }

        let readings = table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                read_reading(row).map_err(|reason| PipelineError::CorruptRow {
                    line: i + 2,
                    reason: reason.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .at(Stage::Load)?;

        Ok(Some(readings))
    }

    async fn publish_completion(&self, unit: &UnitOfWork, analysis_key: &str, result: &AnalysisResult) {
        let detail = json!({
            "correlation_id": unit.correlation_id,
            "bucket": self.layout.bucket,
            "source_key": unit.key,
            "analysis_key": analysis_key,
            "analysis_id": result.analysis_id,
            "row_count": result.records_analyzed,
            "anomaly_count": result.anomalies.len(),
            "status": "success",
            "summary": result.summary.text(),
        });
        publish_logged(
            self.events.as_ref(),
            ANALYZER_SOURCE,
            ANALYSIS_COMPLETE,
            detail,
            &unit.correlation_id,
        )
        .await;
    }

    async fn publish_failure(&self, unit: &UnitOfWork, stage: &str, message: &str) {
        let detail = json!({
            "correlation_id": unit.correlation_id,
            "bucket": unit.bucket,
            "source_key": unit.key,
            "status": "failed",
            "stage": stage,
            "error": message,
        });
        publish_logged(
            self.events.as_ref(),
            ANALYZER_SOURCE,
            ANALYSIS_FAILED,
            detail,
            &unit.correlation_id,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::content_hash;
    use crate::models::{TriggerOrigin, UnitStatus};
    use crate::storage::memory::{
        MemoryEventBus, MemoryObjectStore, MemoryRecordStore, ScriptedSummarizer,
    };

    const PROCESSED: &str = "\
event_time,user_id,heart_rate,spo2,steps,temp_c,systolic_bp,diastolic_bp
2024-01-15T08:00:00Z,user_001,72,98,1200,36.6,118,76
2024-01-15T08:05:00Z,user_001,165,85,3400,36.9,125,82
2024-01-15T08:10:00Z,user_002,75,98,800,36.5,120,80
";

    const RESPONSE: &str = r#"```json
{"insights": ["One reading shows tachycardia with low SpO2"], "recommendations": ["Recheck user_001"], "summary": "Mostly stable"}
```"#;

    struct Harness {
        objects: Arc<MemoryObjectStore>,
        records: Arc<MemoryRecordStore>,
        events: Arc<MemoryEventBus>,
        summarizer: Arc<ScriptedSummarizer>,
        orchestrator: Arc<AnalysisOrchestrator>,
    }

    fn harness(summarizer: ScriptedSummarizer) -> Harness {
        let objects = Arc::new(MemoryObjectStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let events = Arc::new(MemoryEventBus::new());
        let summarizer = Arc::new(summarizer);
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            objects.clone(),
            records.clone(),
            summarizer.clone(),
            events.clone(),
            AnomalyDetector::default(),
            Layout::default(),
        ));
        Harness {
            objects,
            records,
            events,
            summarizer,
            orchestrator,
        }
    }

    fn processed_unit(h: &Harness, name: &str) -> UnitOfWork {
        let key = format!("processed/{}", name);
        h.objects.insert("health-data", &key, PROCESSED.as_bytes());
        trigger::manual("health-data", &key, None)
    }

    #[tokio::test]
    async fn test_analyze_processed_file() {
        let h = harness(ScriptedSummarizer::always(RESPONSE));
        let unit = processed_unit(&h, "day1.csv");

        let outcome = h.orchestrator.process(&unit).await;
        assert_eq!(outcome.status, UnitStatus::Success);
        assert_eq!(outcome.rows, 3);
        assert_eq!(outcome.anomalies, 1);
        assert_eq!(outcome.output_key.as_deref(), Some("analysis/day1_analysis.json"));

        let stored = h.records.all();
        assert_eq!(stored.len(), 1);
        let record = &stored[0];
        assert_eq!(record.correlation_id, unit.correlation_id);
        assert!(record.analysis_id.starts_with("analysis_"));
        assert!(record.analysis_timestamp.ends_with('Z'));
        assert_eq!(record.anomalies[0].anomaly, "Abnormal heart rate, Low SpO2");
        assert_eq!(record.recommendations, vec!["Recheck user_001"]);
        assert_eq!(record.summary.text(), "Mostly stable");
        assert!(record.expires_at > Utc::now().timestamp());

        let blob: AnalysisResult = serde_json::from_slice(
            &h.objects
                .get("health-data", "analysis/day1_analysis.json")
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(blob.analysis_id, record.analysis_id);

        let events = h.events.of_type(ANALYSIS_COMPLETE);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["status"], "success");
        assert_eq!(events[0]["anomaly_count"], 1);
        assert_eq!(events[0]["summary"], "Mostly stable");
    }

    #[tokio::test]
    async fn test_second_analysis_is_skipped() {
        let h = harness(ScriptedSummarizer::always(RESPONSE));
        let unit = processed_unit(&h, "day1.csv");

        assert_eq!(h.orchestrator.process(&unit).await.status, UnitStatus::Success);
        let second = h.orchestrator.process(&unit).await;
        assert_eq!(second.status, UnitStatus::Skipped);
        assert_eq!(second.reason.as_deref(), Some("already_analyzed"));
        assert_eq!(h.summarizer.calls(), 1);
        assert_eq!(h.records.all().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_isolates_summarizer_failure() {
        let h = harness(ScriptedSummarizer::new(vec![
            Ok(RESPONSE.to_string()),
            Err("model overloaded".to_string()),
            Ok(RESPONSE.to_string()),
        ]));
        let units = vec![
            processed_unit(&h, "a.csv"),
            processed_unit(&h, "b.csv"),
            processed_unit(&h, "c.csv"),
        ];

        let outcomes = h
            .orchestrator
            .run_batch(&units, &ProgressBar::hidden())
            .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].status, UnitStatus::Success);
        assert_eq!(outcomes[1].status, UnitStatus::Failed);
        assert_eq!(outcomes[1].stage.as_deref(), Some("summarize"));
        assert!(outcomes[1].error.as_deref().unwrap_or_default().contains("model overloaded"));
        assert_eq!(outcomes[2].status, UnitStatus::Success);

        let failures = h.events.of_type(ANALYSIS_FAILED);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0]["correlation_id"], units[1].correlation_id.as_str());
        assert_eq!(h.events.of_type(ANALYSIS_COMPLETE).len(), 2);

        // The failed unit stays retryable
        let retry = h.orchestrator.process(&units[1]).await;
        assert_eq!(retry.status, UnitStatus::Success);
    }

    #[tokio::test]
    async fn test_unparseable_summary_degrades() {
        let h = harness(ScriptedSummarizer::always("Everything looks fine."));
        let unit = processed_unit(&h, "day1.csv");

        assert_eq!(h.orchestrator.process(&unit).await.status, UnitStatus::Success);
        let record = &h.records.all()[0];
        assert!(record.insights.is_empty());
        assert!(record.recommendations.is_empty());
        assert_eq!(record.summary.text(), "Everything looks fine.");
    }

    #[tokio::test]
    async fn test_skip_reasons() {
        let h = harness(ScriptedSummarizer::always(RESPONSE));

        h.objects.insert("health-data", "uploads/x.csv", PROCESSED.as_bytes());
        let outside = trigger::manual("health-data", "uploads/x.csv", None);
        assert_eq!(
            h.orchestrator.process(&outside).await.reason.as_deref(),
            Some("non_processed_prefix")
        );

        let manifest = trigger::manual("health-data", "processed/x_manifest.json", None);
        assert_eq!(
            h.orchestrator.process(&manifest).await.reason.as_deref(),
            Some("non_processed_prefix")
        );

        h.objects.insert(
            "health-data",
            "processed/empty.csv",
            b"event_time,user_id,heart_rate,spo2,steps,temp_c,systolic_bp,diastolic_bp\n",
        );
        let empty = trigger::manual("health-data", "processed/empty.csv", None);
        assert_eq!(h.orchestrator.process(&empty).await.reason.as_deref(), Some("no_data"));

        let raw_without_output = trigger::manual("health-data", "raw/nothing.csv", None);
        assert_eq!(
            h.orchestrator.process(&raw_without_output).await.reason.as_deref(),
            Some("no_data")
        );
        assert_eq!(h.summarizer.calls(), 0);
    }

    #[tokio::test]
    async fn test_upstream_unit_uses_content_hash_marker() {
        let h = harness(ScriptedSummarizer::always(RESPONSE));
        h.objects.insert("health-data", "processed/day1.csv", PROCESSED.as_bytes());
        let hash = content_hash(PROCESSED.as_bytes());

        let unit = UnitOfWork {
            correlation_id: "health-data/raw/day1.csv@null".to_string(),
            bucket: "health-data".to_string(),
            key: "raw/day1.csv".to_string(),
            version_id: "null".to_string(),
            content_hash: Some(hash.clone()),
            origin: TriggerOrigin::UpstreamEvent,
        };

        let outcome = h.orchestrator.process(&unit).await;
        assert_eq!(outcome.status, UnitStatus::Success);
        assert_eq!(h.records.all()[0].processed_file, "processed/day1.csv");
        assert_eq!(h.records.all()[0].source_file, "raw/day1.csv");

        let marker = MarkerKey::ContentHash(hash).object_key("markers/", ANALYSIS_STAGE);
        assert!(h.objects.exists("health-data", &marker).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_processed_row_fails_load() {
        let h = harness(ScriptedSummarizer::always(RESPONSE));
        h.objects.insert(
            "health-data",
            "processed/bad.csv",
            b"event_time,user_id,heart_rate,spo2,steps,temp_c,systolic_bp,diastolic_bp\n2024-01-01T00:00:00Z,u1,fast,98,1,36.5,120,80\n",
        );
        let unit = trigger::manual("health-data", "processed/bad.csv", None);

        let outcome = h.orchestrator.process(&unit).await;
        assert_eq!(outcome.status, UnitStatus::Failed);
        assert_eq!(outcome.stage.as_deref(), Some("load"));
        assert!(outcome.error.as_deref().unwrap_or_default().contains("row 2"));
        assert_eq!(h.events.of_type(ANALYSIS_FAILED)[0]["stage"], "load");
    }

    #[tokio::test]
    async fn test_record_store_failure_is_persist_stage() {
        let h = harness(ScriptedSummarizer::always(RESPONSE));
        h.records.fail_puts();
        let unit = processed_unit(&h, "day1.csv");

        let outcome = h.orchestrator.process(&unit).await;
        assert_eq!(outcome.stage.as_deref(), Some("persist"));
        let marker = MarkerKey::composite("health-data", "processed/day1.csv", "null");
        assert!(!h
            .objects
            .exists("health-data", &marker.object_key("markers/", ANALYSIS_STAGE))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_unit() {
        let objects = Arc::new(MemoryObjectStore::new());
        objects.insert("health-data", "processed/day1.csv", PROCESSED.as_bytes());
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            objects,
            Arc::new(MemoryRecordStore::new()),
            Arc::new(ScriptedSummarizer::always(RESPONSE)),
            Arc::new(MemoryEventBus::failing()),
            AnomalyDetector::default(),
            Layout::default(),
        ));

        let unit = trigger::manual("health-data", "processed/day1.csv", None);
        assert_eq!(orchestrator.process(&unit).await.status, UnitStatus::Success);
    }

    #[tokio::test]
    async fn test_malformed_trigger_runs_nothing() {
        let h = harness(ScriptedSummarizer::always(RESPONSE));
        let report = h
            .orchestrator
            .run(&json!({"unexpected": true}), &ProgressBar::hidden())
            .await;
        assert!(report.has_failures());
        assert_eq!(h.summarizer.calls(), 0);
    }
}
