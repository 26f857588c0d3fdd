//! Notification stage.
//!
//! Picks the analysis records a trigger asks about, folds them into a
//! [`HealthReport`] enriched with manifest row counts, and emails it.
//! Records are flagged as notified only after the email went out.

use crate::analysis::aggregate;
use crate::config::NotifierConfig;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    AggregationMode, AnalysisResult, HealthReport, ManifestRecord, ProcessingStats, ReportMetadata,
};
use crate::notify::{send_with_retry, EmailMessage, EmailSender};
use crate::pipeline::trigger::NotifyTrigger;
use crate::pipeline::Layout;
use crate::report;
use crate::storage::{select_records, ObjectStore, RecordStore, Selection};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of one notification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyOutcome {
    /// `success`, `failed` or `no_data`.
    pub status: String,
    /// Trigger kind: `event`, `direct` or `fallback`.
    pub trigger: String,
    pub scope: String,
    pub analyses_included: usize,
    pub email_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotifyOutcome {
    pub fn is_failure(&self) -> bool {
        self.status == "failed"
    }
}

/// Builds and delivers health reports.
pub struct NotificationStage {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    email: Arc<dyn EmailSender>,
    settings: NotifierConfig,
    layout: Layout,
}

impl NotificationStage {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
        email: Arc<dyn EmailSender>,
        settings: NotifierConfig,
        layout: Layout,
    ) -> Self {
        Self {
            objects,
            records,
            email,
            settings,
            layout,
        }
    }

    /// Records a trigger covers.
    pub fn selection_for(&self, trigger: &NotifyTrigger) -> Selection {
        match trigger.correlation_id() {
            Some(id) => Selection::Correlation {
                correlation_id: id.to_string(),
                limit: self.settings.correlation_limit.max(1),
            },
            None => Selection::Recent {
                limit: self.settings.recent_limit.max(1),
            },
        }
    }

    /// Resolve a selection, newest first.
    pub async fn select(&self, selection: &Selection) -> StoreResult<Vec<AnalysisResult>> {
        select_records(self.records.as_ref(), selection, self.settings.page_size.max(1)).await
    }

    /// Fold records into a report. Never fails.
    pub async fn compose(
        &self,
        records: &[AnalysisResult],
        selection: &Selection,
        mode: AggregationMode,
    ) -> HealthReport {
        let aggregate = aggregate(records, mode);
        let processing = self.processing_stats(records).await;

        HealthReport {
            metadata: ReportMetadata {
                generated_at: Utc::now(),
                scope: selection.describe(records.len()),
                mode,
                analyses_included: records.len(),
                latest_analysis_timestamp: records
                    .first()
                    .map(|r| r.analysis_timestamp.clone())
                    .filter(|ts| !ts.is_empty()),
            },
            processing,
            total_records_analyzed: aggregate.total_records_analyzed,
            total_anomalies: aggregate.total_anomalies,
            anomaly_frequency: aggregate.anomaly_frequency,
            insights: aggregate.insights,
            recommendations: aggregate.recommendations,
            executive_summary: aggregate.executive_summary,
        }
    }

    /// Row counts from the manifests of the given records.
    ///
    /// Missing or unreadable manifests are logged and left out.
    async fn processing_stats(&self, records: &[AnalysisResult]) -> ProcessingStats {
        let mut stats = ProcessingStats::default();
        let mut seen = HashSet::new();

        for record in records {
            let file = if record.processed_file.is_empty() {
                &record.source_file
            } else {
                &record.processed_file
            };
            if file.is_empty() {
                continue;
            }

            let key = self.layout.manifest_key(file);
            if !seen.insert(key.clone()) {
                continue;
            }

            match self.objects.get(&self.layout.bucket, &key).await {
                Ok(bytes) => match serde_json::from_slice::<ManifestRecord>(&bytes) {
                    Ok(manifest) => stats.add(&manifest.counts),
                    Err(e) => warn!(manifest = %key, error = %e, "manifest_unreadable"),
                },
                Err(StoreError::NotFound { .. }) => {
                    warn!(manifest = %key, "manifest_missing");
                }
                Err(e) => warn!(manifest = %key, error = %e, "manifest_unreadable"),
            }
        }

        debug!(
            files = stats.files_processed,
            input = stats.total_input,
            "processing_stats_collected"
        );
        stats
    }

    /// Handle one notification trigger.
    pub async fn run(&self, event: &Value) -> NotifyOutcome {
        let trigger = NotifyTrigger::parse(event);
        let selection = self.selection_for(&trigger);
        let scope = selection.describe(0);
        info!(trigger = trigger.kind(), scope = %scope, "notification_started");

        let mut outcome = NotifyOutcome {
            status: "failed".to_string(),
            trigger: trigger.kind().to_string(),
            scope,
            analyses_included: 0,
            email_sent: false,
            error: None,
        };

        let records = match self.select(&selection).await {
            Ok(records) => records,
            Err(e) => {
                error!(trigger = trigger.kind(), error = %e, "record_query_failed");
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        if records.is_empty() {
            info!(trigger = trigger.kind(), "no_analysis_records");
            outcome.status = "no_data".to_string();
            return outcome;
        }

        let report = self.compose(&records, &selection, self.settings.mode).await;
        outcome.scope = report.metadata.scope.clone();
        outcome.analyses_included = records.len();
        info!(
            scope = %report.metadata.scope,
            total_input_rows = report.processing.total_input,
            total_analyzed_rows = report.total_records_analyzed,
            total_anomalies = report.total_anomalies,
            anomaly_types = report.anomaly_frequency.len(),
            "email_data_prepared"
        );

        let message = EmailMessage {
            sender: self.settings.sender.clone(),
            recipients: self.settings.recipients.clone(),
            subject: report::email_subject(&report),
            text_body: report::generate_text_report(&report),
            html_body: report::generate_html_report(&report),
        };

        if !send_with_retry(self.email.as_ref(), &message, self.settings.retry_policy()).await {
            outcome.error = Some("email delivery failed".to_string());
            return outcome;
        }

        outcome.email_sent = true;
        outcome.status = "success".to_string();
        self.mark_notified(&records).await;
        outcome
    }

    async fn mark_notified(&self, records: &[AnalysisResult]) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        for record in records {
            match self
                .records
                .update_notification(&record.correlation_id, &record.analysis_id, &timestamp)
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!(
                    correlation_id = %record.correlation_id,
                    analysis_id = %record.analysis_id,
                    "notification_update_missing_record"
                ),
                Err(e) => warn!(
                    correlation_id = %record.correlation_id,
                    error = %e,
                    "notification_update_failed"
                ),
            }
        }
    }
}
