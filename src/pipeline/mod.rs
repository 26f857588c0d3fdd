//! Pipeline stages.
//!
//! Each stage turns a trigger into units of work and processes them one at
//! a time. A failing unit is reported in the batch results and never stops
//! its siblings.

pub mod analyze;
pub mod ingest;
pub mod notify;
pub mod trigger;

use crate::config::Config;
use crate::error::{PipelineError, StoreError};
use std::fmt;

pub use analyze::AnalysisOrchestrator;
pub use ingest::IngestionStage;
pub use notify::{NotificationStage, NotifyOutcome};

/// Step of a unit of work where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading source or processed objects.
    Load,
    Summarize,
    /// Writing outputs, records or manifests.
    Persist,
    /// Checking or writing the idempotency marker.
    Activate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Summarize => "summarize",
            Stage::Persist => "persist",
            Stage::Activate => "activate",
        };
        write!(f, "{}", name)
    }
}

/// A unit-of-work failure tagged with its stage.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct UnitError {
    pub stage: Stage,
    #[source]
    pub source: PipelineError,
}

impl UnitError {
    pub fn new(stage: Stage, source: impl Into<PipelineError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// Marker reads and writes surface as activation failures.
impl From<StoreError> for UnitError {
    fn from(err: StoreError) -> Self {
        Self::new(Stage::Activate, err)
    }
}

/// Tag an error with the stage it happened in.
pub trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, UnitError>;
}

impl<T, E: Into<PipelineError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, UnitError> {
        self.map_err(|e| UnitError::new(stage, e))
    }
}

/// Object layout shared by all stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Bucket receiving every output and marker.
    pub bucket: String,
    pub raw_prefix: String,
    pub processed_prefix: String,
    pub rejected_prefix: String,
    pub analysis_prefix: String,
    pub markers_prefix: String,
    /// Record lifetime; zero keeps records forever.
    pub ttl_days: u32,
}

impl Default for Layout {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for Layout {
    fn from(config: &Config) -> Self {
        let storage = &config.storage;
        Self {
            bucket: storage.bucket.clone(),
            raw_prefix: storage.raw_prefix.clone(),
            processed_prefix: storage.processed_prefix.clone(),
            rejected_prefix: storage.rejected_prefix.clone(),
            analysis_prefix: storage.analysis_prefix.clone(),
            markers_prefix: storage.markers_prefix.clone(),
            ttl_days: config.analysis.ttl_days,
        }
    }
}

impl Layout {
    /// Manifest key for a source or processed object key.
    pub fn manifest_key(&self, key: &str) -> String {
        format!(
            "{}{}_manifest.json",
            self.processed_prefix,
            crate::storage::stem(key)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SummarizerError;

    #[test]
    fn test_stage_tagging() {
        let result: Result<(), SummarizerError> = Err(SummarizerError::Timeout(5));
        let err = result.at(Stage::Summarize).unwrap_err();
        assert_eq!(err.stage, Stage::Summarize);
        assert!(err.to_string().starts_with("summarize failed"));
    }

    #[test]
    fn test_manifest_key() {
        let layout = Layout::default();
        assert_eq!(
            layout.manifest_key("raw/day1.csv"),
            "processed/day1_manifest.json"
        );
    }
}
