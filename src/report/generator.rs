//! Health report generation.
//!
//! This module renders an aggregated [`HealthReport`] as the plain-text
//! email body, as Markdown for files, as a minimal HTML email body, and as
//! JSON.

use crate::models::{AnomalyCount, HealthReport, ProcessingStats, ReportMetadata};
use anyhow::{Context, Result};
use std::path::Path;

/// Entries shown per list section.
const MAX_ITEMS: usize = 10;

const NO_ANOMALIES: &str = "No anomalies detected";
const NO_INSIGHTS: &str = "Continuing to monitor health patterns";
const NO_RECOMMENDATIONS: &str = "Continue regular health monitoring";

const DISCLAIMER: &str = "This report is automatically generated from your health monitoring system.\n\
If you have concerns about any anomalies, please consult with a healthcare professional.";

/// Email subject for a report generated now.
pub fn email_subject(report: &HealthReport) -> String {
    format!(
        "Health Data Analysis Report - {}",
        report.metadata.generated_at.format("%B %d, %Y")
    )
}

/// Generate the plain-text report.
pub fn generate_text_report(report: &HealthReport) -> String {
    let mut output = String::new();

    output.push_str("Health Data Analysis Report\n");
    output.push_str(&format!(
        "Generated on: {}\n",
        report.metadata.generated_at.format("%B %d, %Y at %I:%M %p UTC")
    ));
    output.push_str(&format!("Scope: {}\n\n", report.metadata.scope));

    output.push_str("=== DATA PROCESSING OVERVIEW ===\n");
    output.push_str(&generate_processing_lines(&report.processing));
    output.push('\n');

    output.push_str("=== ANALYSIS OVERVIEW ===\n");
    output.push_str(&format!(
        "Records Analyzed: {}\n",
        thousands(report.total_records_analyzed)
    ));
    output.push_str(&format!(
        "Total Anomalies Detected: {}\n\n",
        thousands(report.total_anomalies)
    ));

    output.push_str("=== TOP HEALTH ANOMALIES ===\n");
    output.push_str(&bullets(
        report
            .anomaly_frequency
            .iter()
            .map(|a| format!("{}: {} occurrences", a.label, a.count)),
        NO_ANOMALIES,
    ));
    output.push('\n');

    output.push_str("=== KEY HEALTH INSIGHTS ===\n");
    output.push_str(&bullets(report.insights.iter().cloned(), NO_INSIGHTS));
    output.push('\n');

    output.push_str("=== RECOMMENDATIONS ===\n");
    output.push_str(&bullets(
        report.recommendations.iter().cloned(),
        NO_RECOMMENDATIONS,
    ));
    output.push('\n');

    output.push_str("=== EXECUTIVE SUMMARY ===\n");
    output.push_str(&report.executive_summary);
    output.push_str("\n\n");
    output.push_str(DISCLAIMER);
    output.push('\n');

    output
}

fn generate_processing_lines(stats: &ProcessingStats) -> String {
    format!(
        "Total Raw Records (this scope): {}\nValid Records: {}\nRejected Records: {}\nData Quality: {:.1}%\n",
        thousands(stats.total_input),
        thousands(stats.total_valid),
        thousands(stats.total_rejected),
        stats.data_quality_pct()
    )
}

/// `  • item` lines, capped, or a single fallback line.
fn bullets(items: impl Iterator<Item = String>, fallback: &str) -> String {
    let lines: Vec<String> = items
        .take(MAX_ITEMS)
        .map(|item| format!("  • {}\n", item))
        .collect();
    if lines.is_empty() {
        format!("  • {}\n", fallback)
    } else {
        lines.concat()
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &HealthReport) -> String {
    let mut output = String::new();

    output.push_str("# Health Data Analysis Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_overview_section(report));
    output.push_str(&generate_anomaly_section(&report.anomaly_frequency));
    output.push_str(&generate_list_section("Key Health Insights", &report.insights, NO_INSIGHTS));
    output.push_str(&generate_list_section(
        "Recommendations",
        &report.recommendations,
        NO_RECOMMENDATIONS,
    ));

    output.push_str("## Executive Summary\n\n");
    output.push_str(&report.executive_summary);
    output.push_str("\n\n");

    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Scope:** {}\n", metadata.scope));
    section.push_str(&format!("- **Aggregation:** `{}`\n", metadata.mode));
    section.push_str(&format!(
        "- **Analyses Included:** {}\n",
        metadata.analyses_included
    ));
    if let Some(ref latest) = metadata.latest_analysis_timestamp {
        section.push_str(&format!("- **Latest Analysis:** {}\n", latest));
    }
    section.push('\n');

    section
}

/// Generate the processing and analysis overview table.
fn generate_overview_section(report: &HealthReport) -> String {
    let stats = &report.processing;
    let mut section = String::new();

    section.push_str("## Overview\n\n");
    section.push_str("| Raw Records | Valid | Rejected | Data Quality | Analyzed | Anomalies |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {:.1}% | {} | {} |\n\n",
        thousands(stats.total_input),
        thousands(stats.total_valid),
        thousands(stats.total_rejected),
        stats.data_quality_pct(),
        thousands(report.total_records_analyzed),
        thousands(report.total_anomalies)
    ));

    section
}

/// Generate the anomaly frequency table.
fn generate_anomaly_section(frequency: &[AnomalyCount]) -> String {
    let mut section = String::new();

    section.push_str("## Top Health Anomalies\n\n");
    if frequency.is_empty() {
        section.push_str(NO_ANOMALIES);
        section.push_str("\n\n");
        return section;
    }

    section.push_str("| Anomaly | Occurrences |\n");
    section.push_str("|:---|:---:|\n");
    for entry in frequency.iter().take(MAX_ITEMS) {
        section.push_str(&format!("| {} | {} |\n", entry.label, entry.count));
    }
    section.push('\n');

    section
}

fn generate_list_section(title: &str, items: &[String], fallback: &str) -> String {
    let mut section = format!("## {}\n\n", title);

    if items.is_empty() {
        section.push_str(&format!("- {}\n", fallback));
    }
    for item in items.iter().take(MAX_ITEMS) {
        section.push_str(&format!("- {}\n", item));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Report generated by VitalWatch*\n");

    footer
}

/// Generate the HTML email body: the text report, escaped and preformatted.
pub fn generate_html_report(report: &HealthReport) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"UTF-8\"><title>Health Data Analysis Report</title></head>\n<body>\n<pre>{}</pre>\n</body>\n</html>\n",
        escape_html(&generate_text_report(report))
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Generate a JSON report.
pub fn generate_json_report(report: &HealthReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write rendered report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report: {}", path.display()))
}

/// Format a count with `,` thousands separators.
fn thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
