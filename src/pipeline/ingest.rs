//! Ingestion stage.
//!
//! Reads a raw CSV object, splits its rows with the [`Validator`], and
//! writes three outputs to the layout bucket:
//!
//! - `<processed_prefix><name>`: accepted rows, original columns
//! - `<rejected_prefix><stem>_rejected.csv`: rejected rows plus `reject_reason`
//! - `<processed_prefix><stem>_manifest.json`: the [`ManifestRecord`]
//!
//! The first two are only written when they have rows. The unit's marker
//! is written after all outputs, then an ingestion event is published. A
//! unit that fails publishes a failure event instead and stays retryable.

use crate::error::StoreResult;
use crate::events::{
    publish_logged, EventBus, INGESTION_COMPLETE, INGESTION_FAILED, INGESTOR_SOURCE,
};
use crate::idempotency::{content_hash, GateOutcome, IdempotencyGate, MarkerKey, INGEST_STAGE};
use crate::models::{BatchReport, Field, ManifestCounts, ManifestRecord, UnitOfWork, UnitOutcome};
use crate::pipeline::trigger::{self, NULL_VERSION};
use crate::pipeline::{AtStage, Layout, Stage, UnitError};
use crate::storage::{basename, stem, ObjectStore};
use crate::validation::{read_csv, write_csv, Validator, REJECT_REASON_COLUMN};
use chrono::Utc;
use indicatif::ProgressBar;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What one successful ingestion produced.
#[derive(Debug, Clone)]
struct Ingested {
    manifest_key: String,
    manifest: ManifestRecord,
}

/// Validates raw uploads into processed and rejected outputs.
pub struct IngestionStage {
    objects: Arc<dyn ObjectStore>,
    events: Arc<dyn EventBus>,
    validator: Validator,
    gate: IdempotencyGate,
    layout: Layout,
}

impl IngestionStage {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        events: Arc<dyn EventBus>,
        validator: Validator,
        layout: Layout,
    ) -> Self {
        let gate = IdempotencyGate::new(
            objects.clone(),
            layout.bucket.clone(),
            layout.markers_prefix.clone(),
            INGEST_STAGE,
        );
        Self {
            objects,
            events,
            validator,
            gate,
            layout,
        }
    }

    /// Normalize a trigger and ingest every unit it names.
    pub async fn run(&self, event: &Value, progress: &ProgressBar) -> BatchReport {
        match trigger::normalize(event) {
            Ok(units) => BatchReport::ok(self.run_batch(&units, progress).await),
            Err(e) => {
                error!(error = %e, "invalid_event_format");
                BatchReport::malformed()
            }
        }
    }

    /// Ingest units one after another. Failures never stop the batch.
    pub async fn run_batch(&self, units: &[UnitOfWork], progress: &ProgressBar) -> Vec<UnitOutcome> {
        progress.set_length(units.len() as u64);
        let mut outcomes = Vec::with_capacity(units.len());
        for unit in units {
            progress.set_message(basename(&unit.key).to_string());
            outcomes.push(self.process(unit).await);
            progress.inc(1);
        }
        outcomes
    }

    /// Raw CSV objects currently in the layout bucket, as manual units.
    pub async fn discover(&self) -> StoreResult<Vec<UnitOfWork>> {
        let keys = self
            .objects
            .list(&self.layout.bucket, &self.layout.raw_prefix)
            .await?;

        let mut units = Vec::new();
        for key in keys.iter().filter(|k| k.ends_with(".csv")) {
            let version = self.objects.version_id(&self.layout.bucket, key).await?;
            units.push(trigger::manual(&self.layout.bucket, key, Some(&version)));
        }
        Ok(units)
    }

    /// Ingest one unit of work.
    pub async fn process(&self, unit: &UnitOfWork) -> UnitOutcome {
        let correlation_id = unit.correlation_id.as_str();
        info!(correlation_id = %correlation_id, key = %unit.key, "ingestion_started");

        if !unit.key.starts_with(&self.layout.raw_prefix) {
            info!(correlation_id = %correlation_id, "skip_non_raw_prefix");
            return UnitOutcome::skipped(correlation_id, "non_raw_prefix");
        }

        let version_id = if unit.version_id.is_empty() {
            NULL_VERSION
        } else {
            unit.version_id.as_str()
        };
        let marker = MarkerKey::composite(&unit.bucket, &unit.key, version_id);

        match self.gate.check_and_run(&marker, || self.ingest(unit)).await {
            Ok(GateOutcome::AlreadyDone) => {
                info!(
                    correlation_id = %correlation_id,
                    marker = %self.gate.marker_key(&marker),
                    "already_processed"
                );
                UnitOutcome::skipped(correlation_id, "already_processed")
            }
            Ok(GateOutcome::Completed { value, .. }) => {
                self.publish_completion(unit, &value).await;
                UnitOutcome::success(
                    correlation_id,
                    value.manifest_key,
                    value.manifest.counts.input,
                    0,
                )
            }
            Err(e) => {
                error!(
                    correlation_id = %correlation_id,
                    stage = %e.stage,
                    error = %e.source,
                    "ingestion_failed"
                );
                let stage = e.stage.to_string();
                let message = e.source.to_string();
                self.publish_failure(unit, &stage, &message).await;
                UnitOutcome::failed(correlation_id, &stage, message)
            }
        }
    }

    async fn ingest(&self, unit: &UnitOfWork) -> Result<Ingested, UnitError> {
        let body = self.objects.get(&unit.bucket, &unit.key).await.at(Stage::Load)?;
        let table = read_csv(&body).at(Stage::Load)?;
        let partition = self.validator.partition(table.rows);

        let bucket = self.layout.bucket.as_str();
        let name = basename(&unit.key);
        let stem = stem(&unit.key);

        let mut processed_key = None;
        let mut processed_hash = None;
        if !partition.valid.is_empty() {
            let key = format!("{}{}", self.layout.processed_prefix, name);
            let bytes = write_csv(&table.headers, partition.valid.iter().map(|(row, _)| row))
                .at(Stage::Persist)?;
            self.objects
                .put(bucket, &key, &bytes, "text/csv")
                .await
                .at(Stage::Persist)?;
            processed_hash = Some(content_hash(&bytes));
            processed_key = Some(key);
        }

        let mut rejected_key = None;
        if !partition.rejected.is_empty() {
            let key = format!("{}{}_rejected.csv", self.layout.rejected_prefix, stem);
            let mut headers = table.headers.clone();
            headers.push(REJECT_REASON_COLUMN.to_string());
            let audit = partition.rejected_audit_rows();
            let bytes = write_csv(&headers, audit.iter()).at(Stage::Persist)?;
            self.objects
                .put(bucket, &key, &bytes, "text/csv")
                .await
                .at(Stage::Persist)?;
            rejected_key = Some(key);
        }

        let manifest = ManifestRecord {
            correlation_id: unit.correlation_id.clone(),
            source_bucket: unit.bucket.clone(),
            source_key: unit.key.clone(),
            source_version: unit.version_id.clone(),
            processed_key,
            rejected_key,
            counts: ManifestCounts {
                input: partition.total(),
                valid: partition.valid.len(),
                rejected: partition.rejected.len(),
            },
            timestamp_utc: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            schema_fields: Field::schema_names(),
            content_hash: processed_hash,
        };

        let manifest_key = self.layout.manifest_key(&unit.key);
        let bytes = serde_json::to_vec_pretty(&manifest).at(Stage::Persist)?;
        self.objects
            .put(bucket, &manifest_key, &bytes, "application/json")
            .await
            .at(Stage::Persist)?;

        if manifest.counts.valid == 0 {
            warn!(correlation_id = %unit.correlation_id, "no_valid_rows");
        }
        info!(
            correlation_id = %unit.correlation_id,
            processed_key = ?manifest.processed_key,
            rejected_key = ?manifest.rejected_key,
            manifest_key = %manifest_key,
            valid = manifest.counts.valid,
            rejected = manifest.counts.rejected,
            "ingestion_completed"
        );

        Ok(Ingested {
            manifest_key,
            manifest,
        })
    }

    async fn publish_completion(&self, unit: &UnitOfWork, ingested: &Ingested) {
        let manifest = &ingested.manifest;
        let detail = json!({
            "correlation_id": unit.correlation_id,
            "bucket": self.layout.bucket,
            "raw_key": unit.key,
            "version_id": unit.version_id,
            "processed_key": manifest.processed_key,
            "content_hash": manifest.content_hash,
            "manifest_key": ingested.manifest_key,
            "counts": manifest.counts,
        });
        publish_logged(
            self.events.as_ref(),
            INGESTOR_SOURCE,
            INGESTION_COMPLETE,
            detail,
            &unit.correlation_id,
        )
        .await;
    }

    async fn publish_failure(&self, unit: &UnitOfWork, stage: &str, message: &str) {
        let detail = json!({
            "correlation_id": unit.correlation_id,
            "bucket": unit.bucket,
            "raw_key": unit.key,
            "status": "failed",
            "stage": stage,
            "error": message,
        });
        publish_logged(
            self.events.as_ref(),
            INGESTOR_SOURCE,
            INGESTION_FAILED,
            detail,
            &unit.correlation_id,
        )
        .await;
    }
}
