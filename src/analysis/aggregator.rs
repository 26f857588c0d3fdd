//! Result aggregation and statistics.
//!
//! This module folds one or more persisted analysis records into a single
//! report payload. Input records are expected most-recent first.

use crate::analysis::summary;
use crate::models::{AggregationMode, AnalysisResult, AnomalyCount};
use std::collections::{HashMap, HashSet};

/// Used when no record carries a meaningful summary.
pub const DEFAULT_EXECUTIVE_SUMMARY: &str =
    "Health data analysis completed successfully. Regular monitoring continues.";

/// Aggregated view over a set of analysis records.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub total_records_analyzed: usize,
    pub total_anomalies: usize,
    pub anomaly_frequency: Vec<AnomalyCount>,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub executive_summary: String,
}

/// Aggregate records according to `mode`. Never fails.
pub fn aggregate(records: &[AnalysisResult], mode: AggregationMode) -> Aggregate {
    let (insights, recommendations) = match mode {
        AggregationMode::Latest => records
            .first()
            .map(|latest| {
                (
                    dedup_non_sentinel(latest.insights.iter()),
                    dedup_non_sentinel(latest.recommendations.iter()),
                )
            })
            .unwrap_or_default(),
        AggregationMode::Merge => (
            dedup_non_sentinel(records.iter().flat_map(|r| r.insights.iter())),
            dedup_non_sentinel(records.iter().flat_map(|r| r.recommendations.iter())),
        ),
    };

    Aggregate {
        total_records_analyzed: records.iter().map(|r| r.records_analyzed).sum(),
        total_anomalies: records.iter().map(|r| r.anomalies.len()).sum(),
        anomaly_frequency: anomaly_frequency(records),
        insights,
        recommendations,
        executive_summary: executive_summary(records, mode),
    }
}

/// Count findings per label, most frequent first.
///
/// Ties keep the order in which labels were first seen.
pub fn anomaly_frequency(records: &[AnalysisResult]) -> Vec<AnomalyCount> {
    let labels = records
        .iter()
        .flat_map(|r| r.anomalies.iter())
        .map(|finding| finding.label());
    count_labels(labels)
}

fn count_labels<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<AnomalyCount> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<AnomalyCount> = Vec::new();

    for label in labels {
        match index.get(label) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(label, counts.len());
                counts.push(AnomalyCount {
                    label: label.to_string(),
                    count: 1,
                });
            }
        }
    }

    // Stable sort keeps first-seen order among equal counts
    counts.sort_by_key(|c| std::cmp::Reverse(c.count));
    counts
}

/// Build the executive summary from the records' summaries.
pub fn executive_summary(records: &[AnalysisResult], mode: AggregationMode) -> String {
    let mut texts = records
        .iter()
        .filter(|r| !r.summary.is_trivial())
        .map(|r| r.summary.text());

    let summary = match mode {
        AggregationMode::Latest => texts.next().unwrap_or_default(),
        AggregationMode::Merge => {
            let mut seen = HashSet::new();
            texts
                .filter(|text| seen.insert(text.clone()))
                .collect::<Vec<_>>()
                .join("\n")
        }
    };

    if summary.is_empty() {
        DEFAULT_EXECUTIVE_SUMMARY.to_string()
    } else {
        summary
    }
}

/// Whether a narrative line is a placeholder.
pub fn is_sentinel(text: &str) -> bool {
    summary::is_trivial(text)
}

fn dedup_non_sentinel<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .map(|s| s.trim())
        .filter(|s| !is_sentinel(s))
        .filter(|s| seen.insert(s.to_string()))
        .map(String::from)
        .collect()
}
