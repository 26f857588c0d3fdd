//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::AggregationMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// VitalWatch - wearable telemetry validation, anomaly detection and
/// LLM-assisted health reports
///
/// Each stage reads a trigger (a storage notification, a manual bucket/key
/// or the previous stage's event), does its work idempotently and reports
/// per-file results.
///
/// Examples:
///   vitalwatch ingest --key raw/2024-01-15.csv
///   vitalwatch ingest --scan
///   vitalwatch analyze --event trigger.json
///   vitalwatch notify --correlation-id health-data/raw/2024-01-15.csv@null
///   vitalwatch report --limit 10 --mode merge --format markdown -o report.md
///   vitalwatch init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .vitalwatch.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Ollama model used for summaries
    #[arg(long, env = "VITALWATCH_MODEL", global = true)]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL", global = true)]
    pub ollama_url: Option<String>,

    /// Summarizer request timeout in seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Root directory of the local object, record and event stores
    #[arg(long, value_name = "DIR", env = "VITALWATCH_STORAGE_ROOT", global = true)]
    pub storage_root: Option<String>,
}

/// Pipeline commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Validate raw CSV uploads into processed and rejected outputs
    Ingest {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Ingest every raw CSV currently in the bucket
        #[arg(long, conflicts_with_all = ["event", "key"])]
        scan: bool,
    },

    /// Detect anomalies and summarize processed files
    Analyze {
        #[command(flatten)]
        trigger: TriggerArgs,
    },

    /// Email a report for one correlation id or the latest analyses
    Notify {
        /// Notification trigger payload as JSON (`-` reads stdin)
        #[arg(long, value_name = "FILE")]
        event: Option<PathBuf>,

        /// Report on this correlation id only
        #[arg(long, conflicts_with = "event")]
        correlation_id: Option<String>,

        /// How multiple analyses are combined
        #[arg(long, value_name = "MODE")]
        mode: Option<AggregationMode>,
    },

    /// Render a report without sending it
    Report {
        /// Report on this correlation id only
        #[arg(long)]
        correlation_id: Option<String>,

        /// Number of analyses to include
        #[arg(long, default_value = "5", value_name = "COUNT")]
        limit: usize,

        /// How multiple analyses are combined
        #[arg(long, value_name = "MODE")]
        mode: Option<AggregationMode>,

        /// Output format
        #[arg(long, default_value = "text", value_name = "FORMAT")]
        format: OutputFormat,

        /// Write the report to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Generate a default .vitalwatch.toml configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Where a stage's trigger comes from.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct TriggerArgs {
    /// Trigger payload as JSON (`-` reads stdin)
    #[arg(long, value_name = "FILE", conflicts_with = "key")]
    pub event: Option<PathBuf>,

    /// Bucket of the object; defaults to the configured bucket
    #[arg(long, requires = "key")]
    pub bucket: Option<String>,

    /// Object key to process
    #[arg(long)]
    pub key: Option<String>,

    /// Object version
    #[arg(long, requires = "key")]
    pub version_id: Option<String>,

    /// Correlation id to carry through the pipeline
    #[arg(long, requires = "key")]
    pub correlation_id: Option<String>,
}

impl TriggerArgs {
    pub fn is_empty(&self) -> bool {
        self.event.is_none() && self.key.is_none()
    }
}

/// Output format for rendered reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Plain text, as sent by email (default)
    #[default]
    Text,
    /// Markdown format
    Markdown,
    /// HTML email body
    Html,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        match &self.command {
            Command::Ingest { trigger, scan } if trigger.is_empty() && !scan => {
                Err("ingest needs --event, --key or --scan".to_string())
            }
            Command::Analyze { trigger } if trigger.is_empty() => {
                Err("analyze needs --event or --key".to_string())
            }
            Command::Report { limit, .. } if *limit == 0 => {
                Err("Report limit must be at least 1".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("vitalwatch").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_ingest_key() {
        let args = parse(&["ingest", "--key", "raw/a.csv", "--version-id", "3"]);
        match &args.command {
            Command::Ingest { trigger, scan } => {
                assert_eq!(trigger.key.as_deref(), Some("raw/a.csv"));
                assert_eq!(trigger.version_id.as_deref(), Some("3"));
                assert!(trigger.bucket.is_none());
                assert!(!*scan);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_scan_conflicts_with_key() {
        let result = Args::try_parse_from(["vitalwatch", "ingest", "--scan", "--key", "raw/a.csv"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_bucket_requires_key() {
        let result = Args::try_parse_from(["vitalwatch", "analyze", "--bucket", "b"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_missing_trigger() {
        assert!(parse(&["analyze"]).validate().is_err());
        assert!(parse(&["ingest"]).validate().is_err());
        assert!(parse(&["ingest", "--scan"]).validate().is_ok());
        assert!(parse(&["notify"]).validate().is_ok());
    }

    #[test]
    fn test_report_options() {
        let args = parse(&["report", "--mode", "merge", "--format", "json", "--limit", "3"]);
        match args.command {
            Command::Report {
                mode,
                format,
                limit,
                ..
            } => {
                assert_eq!(mode, Some(AggregationMode::Merge));
                assert_eq!(format, OutputFormat::Json);
                assert_eq!(limit, 3);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(parse(&["report", "--limit", "0"]).validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let args = parse(&["-v", "-q", "notify"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_url() {
        let args = parse(&["notify", "--ollama-url", "localhost:11434"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        assert_eq!(parse(&["notify"]).log_level(), tracing::Level::INFO);
        assert_eq!(parse(&["notify", "--verbose"]).log_level(), tracing::Level::DEBUG);
        assert_eq!(parse(&["notify", "--quiet"]).log_level(), tracing::Level::ERROR);
    }
}
