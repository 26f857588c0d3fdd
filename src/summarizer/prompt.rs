//! Prompt construction for the summarizer.

use crate::analysis::stats::VitalStatistics;
use crate::models::VitalsReading;

/// Maximum number of readings included verbatim.
pub const SAMPLE_ROWS: usize = 20;

/// System prompt sent with every request.
pub const SYSTEM_PROMPT: &str = r#"You are a health data analysis assistant.
You interpret wearable telemetry and explain trends and risks in plain language.
Only output valid JSON, no explanations or markdown."#;

/// Build the user prompt for one batch of readings.
pub fn build_prompt(
    readings: &[VitalsReading],
    anomaly_count: usize,
    stats: Option<&VitalStatistics>,
) -> String {
    let sample = &readings[..readings.len().min(SAMPLE_ROWS)];
    let sample_json = serde_json::to_string(sample).unwrap_or_else(|_| "[]".to_string());

    let mut prompt = String::new();
    prompt.push_str("Analyze the health metrics below and describe trends, patterns and health risks.\n\n");

    prompt.push_str("Dataset overview:\n");
    prompt.push_str(&format!("- Total records: {}\n", readings.len()));
    prompt.push_str(&format!(
        "- {} anomalies detected in {} records.\n",
        anomaly_count,
        readings.len()
    ));
    if let Some(stats) = stats {
        prompt.push_str(&format!(
            "- Averages: heart rate {} bpm, SpO2 {}%, temperature {}°C, blood pressure {}/{} mmHg, steps {}\n",
            stats.avg_heart_rate,
            stats.avg_spo2,
            stats.avg_temp,
            stats.avg_systolic,
            stats.avg_diastolic,
            stats.avg_steps
        ));
        prompt.push_str(&format!(
            "- Ranges: heart rate {}-{} bpm, max temperature {}°C, min SpO2 {}%\n",
            stats.min_heart_rate, stats.max_heart_rate, stats.max_temp, stats.min_spo2
        ));
    }

    prompt.push_str(&format!(
        "\nSample health records (first {}):\n{}\n\n",
        sample.len(),
        sample_json
    ));

    prompt.push_str("Respond with a JSON object with these keys:\n");
    prompt.push_str("- insights: array of specific health observations\n");
    prompt.push_str("- recommendations: array of actionable health advice\n");
    prompt.push_str("- summary: executive summary of key findings and health status\n\n");
    prompt.push_str("Focus on cardiovascular patterns, SpO2 trends, fever patterns, blood pressure risks and activity levels.\n");
    prompt.push_str("Return only valid JSON.");

    prompt
}
