//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.vitalwatch.toml` files.

use crate::analysis::ThresholdTable;
use crate::models::AggregationMode;
use crate::notify::RetryPolicy;
use crate::validation::RangeTable;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".vitalwatch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage layout.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Analysis settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Sensor-plausibility bounds used during ingestion.
    #[serde(default)]
    pub validation: RangeTable,

    /// Clinical thresholds used during analysis.
    #[serde(default)]
    pub detection: ThresholdTable,

    /// Report delivery settings.
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// Where objects, records and events live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the local storage adapters.
    #[serde(default = "default_root")]
    pub root: String,

    /// Bucket receiving every output and marker.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default = "default_raw_prefix")]
    pub raw_prefix: String,

    #[serde(default = "default_processed_prefix")]
    pub processed_prefix: String,

    #[serde(default = "default_rejected_prefix")]
    pub rejected_prefix: String,

    #[serde(default = "default_analysis_prefix")]
    pub analysis_prefix: String,

    #[serde(default = "default_markers_prefix")]
    pub markers_prefix: String,

    /// Prefix for messages written by the outbox email sender.
    #[serde(default = "default_outbox_prefix")]
    pub outbox_prefix: String,

    /// Event log, relative to `root`.
    #[serde(default = "default_events_file")]
    pub events_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            bucket: default_bucket(),
            raw_prefix: default_raw_prefix(),
            processed_prefix: default_processed_prefix(),
            rejected_prefix: default_rejected_prefix(),
            analysis_prefix: default_analysis_prefix(),
            markers_prefix: default_markers_prefix(),
            outbox_prefix: default_outbox_prefix(),
            events_file: default_events_file(),
        }
    }
}

impl StorageConfig {
    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(&self.root)
    }

    /// Directory of the record store.
    pub fn records_path(&self) -> PathBuf {
        self.root_path().join("records")
    }

    pub fn events_path(&self) -> PathBuf {
        self.root_path().join(&self.events_file)
    }
}

fn default_root() -> String {
    ".vitalwatch".to_string()
}

fn default_bucket() -> String {
    "health-data".to_string()
}

fn default_raw_prefix() -> String {
    "raw/".to_string()
}

fn default_processed_prefix() -> String {
    "processed/".to_string()
}

fn default_rejected_prefix() -> String {
    "rejected/".to_string()
}

fn default_analysis_prefix() -> String {
    "analysis/".to_string()
}

fn default_markers_prefix() -> String {
    "markers/".to_string()
}

fn default_outbox_prefix() -> String {
    "outbox/".to_string()
}

fn default_events_file() -> String {
    "events.jsonl".to_string()
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_timeout() -> u64 {
    300
}

/// Analysis stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Days an analysis record stays visible; 0 keeps it forever.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
        }
    }
}

fn default_ttl_days() -> u32 {
    7
}

/// Report delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// From address.
    #[serde(default)]
    pub sender: String,

    #[serde(default)]
    pub recipients: Vec<String>,

    /// Mail relay URL; without one reports go to the outbox prefix.
    #[serde(default)]
    pub relay_url: Option<String>,

    #[serde(default = "default_relay_timeout")]
    pub relay_timeout_seconds: u64,

    /// Delivery attempts before giving up.
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Delay after the first failed attempt; doubles each time.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Records included when the trigger names a correlation id.
    #[serde(default = "default_correlation_limit")]
    pub correlation_limit: usize,

    /// Records included when the trigger names nothing.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,

    #[serde(default)]
    pub mode: AggregationMode,

    /// Page size for record scans.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            sender: String::new(),
            recipients: Vec::new(),
            relay_url: None,
            relay_timeout_seconds: default_relay_timeout(),
            retries: default_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            correlation_limit: default_correlation_limit(),
            recent_limit: default_recent_limit(),
            mode: AggregationMode::default(),
            page_size: default_page_size(),
        }
    }
}

impl NotifierConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

fn default_relay_timeout() -> u64 {
    30
}

fn default_retries() -> usize {
    3
}

fn default_retry_base_delay() -> u64 {
    2000
}

fn default_correlation_limit() -> usize {
    1
}

fn default_recent_limit() -> usize {
    5
}

fn default_page_size() -> usize {
    100
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given on the command line (or through their
    /// environment variables) override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if let Some(ref root) = args.storage_root {
            self.storage.root = root.clone();
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
