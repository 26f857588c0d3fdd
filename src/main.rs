//! VitalWatch - wearable telemetry pipeline
//!
//! A CLI that validates raw vital-sign uploads, detects anomalies,
//! summarizes them with a local Ollama model and emails health reports.
//! Every stage is idempotent and reports one outcome per file.
//!
//! Exit codes:
//!   0 - Success (every unit succeeded or was skipped)
//!   1 - Runtime error (config, storage setup, unreadable trigger, etc.)
//!   2 - Invalid trigger or at least one failed unit

mod analysis;
mod cli;
mod config;
mod error;
mod events;
mod idempotency;
mod models;
mod notify;
mod pipeline;
mod report;
mod storage;
mod summarizer;
mod validation;

use analysis::AnomalyDetector;
use anyhow::{Context, Result};
use cli::{Args, Command, OutputFormat, TriggerArgs};
use config::{Config, CONFIG_FILE};
use events::{EventBus, JsonlEventBus};
use indicatif::{ProgressBar, ProgressStyle};
use models::{AggregationMode, BatchReport};
use notify::{EmailSender, HttpEmailSender, OutboxEmailSender};
use pipeline::{AnalysisOrchestrator, IngestionStage, Layout, NotificationStage};
use serde_json::{json, Value};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use storage::{FsObjectStore, FsRecordStore, ObjectStore, RecordStore, Selection};
use summarizer::{OllamaSettings, OllamaSummarizer};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use validation::Validator;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // No logging needed to write a config file
    if let Command::InitConfig { force } = args.command {
        return handle_init_config(force);
    }

    init_logging(&args);

    info!("VitalWatch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .vitalwatch.toml.
fn handle_init_config(force: bool) -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() && !force {
        eprintln!(
            "⚠️  {} already exists. Pass --force to overwrite or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set storage, model, thresholds and email recipients.");
    Ok(())
}

/// Initialize logging. `RUST_LOG` wins over the verbosity flags.
fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level().to_string().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if args.json_logs {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };

    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Shared adapters built from the configuration.
struct Adapters {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    events: Arc<dyn EventBus>,
}

impl Adapters {
    fn from_config(config: &Config) -> Self {
        let root = config.storage.root_path();
        info!("Storage root: {}", root.display());
        Self {
            objects: Arc::new(FsObjectStore::new(root)),
            records: Arc::new(FsRecordStore::new(config.storage.records_path())),
            events: Arc::new(JsonlEventBus::new(config.storage.events_path())),
        }
    }
}

/// Dispatch a pipeline command. Returns exit code (0 or 2).
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let adapters = Adapters::from_config(&config);
    let layout = Layout::from(&config);
    let progress = progress_bar(args.quiet);

    match args.command {
        Command::Ingest { ref trigger, scan } => {
            let stage = IngestionStage::new(
                adapters.objects.clone(),
                adapters.events.clone(),
                Validator::new(config.validation.clone()),
                layout.clone(),
            );

            let report = if scan {
                let units = stage
                    .discover()
                    .await
                    .context("Failed to list raw uploads")?;
                info!("Discovered {} raw files", units.len());
                BatchReport::ok(stage.run_batch(&units, &progress).await)
            } else {
                let event = trigger_payload(trigger, &layout.bucket)?;
                stage.run(&event, &progress).await
            };
            progress.finish_and_clear();
            print_batch(&report)
        }

        Command::Analyze { ref trigger } => {
            let event = trigger_payload(trigger, &layout.bucket)?;

            println!("🤖 Summarizer: {} via {}", config.model.name, config.model.ollama_url);
            let summarizer = OllamaSummarizer::new(OllamaSettings {
                ollama_url: config.model.ollama_url.clone(),
                model_name: config.model.name.clone(),
                temperature: config.model.temperature,
                timeout_seconds: config.model.timeout_seconds,
            })?;

            let orchestrator = Arc::new(AnalysisOrchestrator::new(
                adapters.objects.clone(),
                adapters.records.clone(),
                Arc::new(summarizer),
                adapters.events.clone(),
                AnomalyDetector::new(config.detection.clone()),
                layout,
            ));

            let report = orchestrator.run(&event, &progress).await;
            progress.finish_and_clear();
            print_batch(&report)
        }

        Command::Notify {
            ref event,
            ref correlation_id,
            mode,
        } => {
            let payload = match (event, correlation_id) {
                (Some(path), _) => read_payload(path)?,
                (None, Some(id)) => json!({ "correlation_id": id }),
                (None, None) => json!({}),
            };

            let mut settings = config.notifier.clone();
            if let Some(mode) = mode {
                settings.mode = mode;
            }
            if settings.recipients.is_empty() {
                warn!("No recipients configured; set [notifier].recipients");
            }

            let stage = NotificationStage::new(
                adapters.objects.clone(),
                adapters.records.clone(),
                email_sender(&config, &adapters)?,
                settings,
                layout,
            );

            let outcome = stage.run(&payload).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(if outcome.is_failure() { 2 } else { 0 })
        }

        Command::Report {
            ref correlation_id,
            limit,
            mode,
            format,
            ref output,
        } => {
            let selection = match correlation_id {
                Some(id) => Selection::Correlation {
                    correlation_id: id.clone(),
                    limit,
                },
                None => Selection::Recent { limit },
            };
            let mode = mode.unwrap_or(config.notifier.mode);

            handle_report(&config, &adapters, layout, &selection, mode, format, output.as_deref())
                .await
        }

        // Handled before logging starts
        Command::InitConfig { .. } => Ok(0),
    }
}

/// Render a report to stdout or a file without sending it.
async fn handle_report(
    config: &Config,
    adapters: &Adapters,
    layout: Layout,
    selection: &Selection,
    mode: AggregationMode,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<i32> {
    let stage = NotificationStage::new(
        adapters.objects.clone(),
        adapters.records.clone(),
        email_sender(config, adapters)?,
        config.notifier.clone(),
        layout,
    );

    let records = stage
        .select(selection)
        .await
        .context("Failed to query analysis records")?;
    if records.is_empty() {
        println!("No analysis records found for: {}", selection.describe(0));
        return Ok(0);
    }

    let health = stage.compose(&records, selection, mode).await;
    let content = match format {
        OutputFormat::Text => report::generate_text_report(&health),
        OutputFormat::Markdown => report::generate_markdown_report(&health),
        OutputFormat::Html => report::generate_html_report(&health),
        OutputFormat::Json => report::generate_json_report(&health)?,
    };

    match output {
        Some(path) => {
            report::write_report(&content, path)?;
            println!("✅ Report saved to: {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(0)
}

/// Outbox sender unless a relay is configured.
fn email_sender(config: &Config, adapters: &Adapters) -> Result<Arc<dyn EmailSender>> {
    match config.notifier.relay_url {
        Some(ref url) => {
            info!("Delivering email through relay {}", url);
            let sender = HttpEmailSender::new(url.clone(), config.notifier.relay_timeout_seconds)?;
            Ok(Arc::new(sender))
        }
        None => Ok(Arc::new(OutboxEmailSender::new(
            adapters.objects.clone(),
            config.storage.bucket.clone(),
            config.storage.outbox_prefix.clone(),
        ))),
    }
}

/// Build the trigger payload from --event or --key.
fn trigger_payload(trigger: &TriggerArgs, default_bucket: &str) -> Result<Value> {
    if let Some(ref path) = trigger.event {
        return read_payload(path);
    }

    let key = trigger
        .key
        .as_deref()
        .context("Either --event or --key is required")?;
    let mut payload = json!({
        "bucket": trigger.bucket.as_deref().unwrap_or(default_bucket),
        "key": key,
    });
    if let Some(ref version) = trigger.version_id {
        payload["versionId"] = json!(version);
    }
    if let Some(ref id) = trigger.correlation_id {
        payload["correlation_id"] = json!(id);
    }
    Ok(payload)
}

/// Read a JSON payload from a file, or stdin for `-`.
fn read_payload(path: &Path) -> Result<Value> {
    let raw = if path.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read trigger from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read trigger file: {}", path.display()))?
    };

    serde_json::from_str(&raw).context("Trigger is not valid JSON")
}

/// Print a batch report and map it to an exit code.
fn print_batch(report: &BatchReport) -> Result<i32> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(if report.has_failures() { 2 } else { 0 })
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
