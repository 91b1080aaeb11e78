//! Mindscope CLI - Command-line interface for the Mindscope analysis pipeline
//!
//! Commands:
//! - analyze: Run the analysis pipeline on a measurement config
//! - collect: Replay a recorded metrics stream through the collector
//! - engines: List the default engines and their health
//! - reports: List stored reports for an organization

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use mindscope::collector::{
    CollectionObserver, CollectionProgress, CollectorConfig, MetricsCollector, SessionIdentity,
};
use mindscope::config::{Settings, ENV_LOG};
use mindscope::engines::bootstrap_default_engines;
use mindscope::pipeline::{PipelineConfig, PipelineOrchestrator, PipelineStatus};
use mindscope::registry::{ListOptions, SharedEngineRegistry, SortBy};
use mindscope::report::{InMemoryReportStore, NewReport, Page, ReportStore};
use mindscope::source::ReplaySource;
use mindscope::types::{FusedMetrics, ProcessedMetrics};
use mindscope::{ComputeError, PROCESSING_VERSION};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Mindscope - biometric metrics collection and analysis pipeline
#[derive(Parser)]
#[command(name = "mindscope")]
#[command(version = PROCESSING_VERSION)]
#[command(about = "Collect EEG/PPG/ACC metrics and run multi-engine analysis", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true, env = "MINDSCOPE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis pipeline on a PipelineConfig JSON document
    Analyze {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Persist the result into this JSON report store file
        #[arg(long)]
        store: Option<PathBuf>,

        /// Organization owning the report (required with --store)
        #[arg(long)]
        organization: Option<String>,

        /// User the measurement belongs to
        #[arg(long, default_value = "unknown")]
        user: String,

        /// Measurement data id (generated when omitted)
        #[arg(long)]
        measurement: Option<String>,
    },

    /// Replay an NDJSON metrics recording through the collector
    Collect {
        /// NDJSON recording, one metrics snapshot per line (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Sampling interval override in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Number of samples override
        #[arg(long)]
        samples: Option<usize>,

        /// Session id (generated when omitted)
        #[arg(long)]
        session_id: Option<String>,

        /// Measurement id (generated when omitted)
        #[arg(long)]
        measurement_id: Option<String>,

        /// User id
        #[arg(long, default_value = "unknown")]
        user_id: String,

        /// Write per-field session statistics instead of the full series
        #[arg(long)]
        summary: bool,
    },

    /// List the default analysis engines and their health
    Engines {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored reports for an organization
    Reports {
        /// JSON report store file
        #[arg(long)]
        store: PathBuf,

        /// Organization id
        #[arg(long)]
        organization: String,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), MindscopeCliError> {
    // Settings loading logs too; route it through a scoped subscriber until
    // the configured level is known.
    let early_level = std::env::var(ENV_LOG).unwrap_or_else(|_| "info".to_string());
    let early = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&early_level))
        .with_writer(io::stderr)
        .finish();
    let settings =
        tracing::subscriber::with_default(early, || Settings::load(cli.config.as_deref()))?;
    init_tracing(&settings.logging.level);

    match cli.command {
        Commands::Analyze {
            input,
            output,
            store,
            organization,
            user,
            measurement,
        } => {
            let target = match store {
                Some(path) => Some(StoreTarget {
                    path,
                    organization: organization.ok_or(MindscopeCliError::MissingOrganization)?,
                    user,
                    measurement: measurement.unwrap_or_else(|| Uuid::new_v4().to_string()),
                }),
                None => None,
            };
            cmd_analyze(&settings, &input, &output, target).await
        }

        Commands::Collect {
            input,
            output,
            interval_ms,
            samples,
            session_id,
            measurement_id,
            user_id,
            summary,
        } => {
            let mut config = settings.collector.clone();
            if let Some(interval_ms) = interval_ms {
                config.sampling_interval_ms = interval_ms;
            }
            if let Some(samples) = samples {
                config.target_samples = samples;
            }
            let identity = SessionIdentity::new(
                session_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                measurement_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                user_id,
            );
            cmd_collect(&input, &output, identity, config, summary).await
        }

        Commands::Engines { json } => cmd_engines(&settings, json),

        Commands::Reports {
            store,
            organization,
            offset,
            limit,
        } => cmd_reports(&store, &organization, Page { offset, limit }).await,
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn init_tracing(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(io::stderr)
        .try_init();
}

struct StoreTarget {
    path: PathBuf,
    organization: String,
    user: String,
    measurement: String,
}

async fn cmd_analyze(
    settings: &Settings,
    input: &Path,
    output: &Path,
    store: Option<StoreTarget>,
) -> Result<(), MindscopeCliError> {
    let config: PipelineConfig = serde_json::from_str(&read_input(input)?)?;

    let registry = SharedEngineRegistry::new();
    let bootstrap_registry = registry.clone();
    let gemini = settings.gemini.clone();
    let orchestrator = PipelineOrchestrator::new(Arc::new(registry))
        .with_settings(settings.pipeline.clone())
        .with_bootstrap(move || bootstrap_default_engines(&bootstrap_registry, &gemini));

    let cancel = cancel_on_ctrl_c();
    let result = orchestrator.run_pipeline_with_cancel(&config, cancel).await?;
    let status = result.metadata.status;

    write_output(output, &serde_json::to_string_pretty(&result)?)?;

    if let Some(target) = store {
        let report_store = load_store(&target.path)?;
        let saved = report_store
            .save(NewReport {
                organization_id: target.organization,
                user_id: target.user,
                measurement_data_id: target.measurement,
                result,
            })
            .await?;
        fs::write(&target.path, report_store.to_json()?)?;
        info!(report_id = %saved.id, store = %target.path.display(), "Report saved");
    }

    if status == PipelineStatus::Completed {
        Ok(())
    } else {
        Err(MindscopeCliError::PipelineFailed(status))
    }
}

/// Logs collector progress every ten ticks
struct ProgressLogger;

impl CollectionObserver for ProgressLogger {
    fn on_tick(
        &mut self,
        progress: &CollectionProgress,
        _metrics: &ProcessedMetrics,
        fused: &FusedMetrics,
    ) {
        if progress.tick % 10 == 0 {
            info!(
                tick = progress.tick,
                target = progress.target,
                overall_stress = fused.overall_stress,
                "Collecting"
            );
        }
    }

    fn on_error(&mut self, tick: usize, error: &ComputeError) {
        warn!(tick, error = %error, "Sample skipped");
    }
}

async fn cmd_collect(
    input: &Path,
    output: &Path,
    identity: SessionIdentity,
    config: CollectorConfig,
    summary: bool,
) -> Result<(), MindscopeCliError> {
    let source = ReplaySource::from_ndjson(&read_input(input)?)?;
    if source.is_empty() {
        return Err(MindscopeCliError::NoSnapshots);
    }

    let mut collector = MetricsCollector::with_config(identity, Arc::new(source), config);
    let stop = collector.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let series = collector
        .start(&mut ProgressLogger)
        .await?
        .ok_or(MindscopeCliError::Interrupted)?;

    let content = if summary {
        serde_json::to_string_pretty(&series.summary())?
    } else {
        serde_json::to_string_pretty(&series)?
    };
    write_output(output, &content)
}

fn cmd_engines(settings: &Settings, json: bool) -> Result<(), MindscopeCliError> {
    let registry = SharedEngineRegistry::new();
    bootstrap_default_engines(&registry, &settings.gemini)?;

    let guard = registry.read();
    let engines = guard.get_all(&ListOptions {
        include_disabled: true,
        sort_by: Some(SortBy::Name),
        ..Default::default()
    });
    let report = guard.generate_health_report();

    if json {
        let descriptors: Vec<_> = engines.iter().map(|e| e.descriptor().clone()).collect();
        let body = serde_json::json!({
            "engines": descriptors,
            "health": report,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("Mindscope {PROCESSING_VERSION}");
    println!();
    for engine in &engines {
        let descriptor = engine.descriptor();
        println!(
            "  {:<32} v{:<8} cost {:>3}  {}",
            descriptor.id, descriptor.version, descriptor.cost_per_analysis, descriptor.name
        );
    }
    println!();
    println!(
        "Health: {:?} ({}/{} valid, {} with warnings)",
        report.overall_health,
        report.valid_engines,
        report.total_engines,
        report.engines_with_warnings
    );
    if settings.gemini.api_key.is_none() {
        println!("Gemini API key: not configured (set MINDSCOPE_GEMINI_API_KEY)");
    }
    Ok(())
}

async fn cmd_reports(
    store: &Path,
    organization: &str,
    page: Page,
) -> Result<(), MindscopeCliError> {
    let report_store = load_store(store)?;
    let reports = report_store.list_by_organization(organization, page).await?;
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn load_store(path: &Path) -> Result<InMemoryReportStore, MindscopeCliError> {
    if path.exists() {
        Ok(InMemoryReportStore::from_json(&fs::read_to_string(path)?)?)
    } else {
        Ok(InMemoryReportStore::new())
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

fn read_input(input: &Path) -> Result<String, MindscopeCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(MindscopeCliError::NoInput);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, content: &str) -> Result<(), MindscopeCliError> {
    if output.to_string_lossy() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{content}")?;
        handle.flush()?;
    } else {
        fs::write(output, content)?;
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum MindscopeCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoInput,
    NoSnapshots,
    MissingOrganization,
    Interrupted,
    PipelineFailed(PipelineStatus),
}

impl From<io::Error> for MindscopeCliError {
    fn from(e: io::Error) -> Self {
        MindscopeCliError::Io(e)
    }
}

impl From<ComputeError> for MindscopeCliError {
    fn from(e: ComputeError) -> Self {
        MindscopeCliError::Compute(e)
    }
}

impl From<serde_json::Error> for MindscopeCliError {
    fn from(e: serde_json::Error) -> Self {
        MindscopeCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<MindscopeCliError> for CliError {
    fn from(e: MindscopeCliError) -> Self {
        match e {
            MindscopeCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            MindscopeCliError::Compute(e) => {
                let hint = match &e {
                    ComputeError::MissingPersonalInfo => "Add personal_info to the pipeline config",
                    ComputeError::MissingIntegratedEngine(_) => {
                        "Run 'mindscope engines' to check registration"
                    }
                    ComputeError::Config(_) => "Check the settings file and MINDSCOPE_* variables",
                    _ => "Check input format",
                };
                CliError {
                    code: "COMPUTE_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            MindscopeCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            MindscopeCliError::NoInput => CliError {
                code: "NO_INPUT".to_string(),
                message: "No input piped on stdin".to_string(),
                hint: Some("Pass --input <file> or pipe data into '-'".to_string()),
            },
            MindscopeCliError::NoSnapshots => CliError {
                code: "NO_SNAPSHOTS".to_string(),
                message: "Recording contains no metrics snapshots".to_string(),
                hint: Some("Ensure the NDJSON file is not empty".to_string()),
            },
            MindscopeCliError::MissingOrganization => CliError {
                code: "MISSING_ORGANIZATION".to_string(),
                message: "--store requires --organization".to_string(),
                hint: None,
            },
            MindscopeCliError::Interrupted => CliError {
                code: "INTERRUPTED".to_string(),
                message: "Collection stopped before completion".to_string(),
                hint: None,
            },
            MindscopeCliError::PipelineFailed(status) => CliError {
                code: "PIPELINE_FAILED".to_string(),
                message: format!("Pipeline finished with status {status:?}"),
                hint: Some("See metadata.errors in the output".to_string()),
            },
        }
    }
}
