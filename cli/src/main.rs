//! Operator CLI: run analyses, verify the audit chain, and inspect the
//! reasoning bank.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use derma_audit::AuditLedger;
use derma_orchestrator::{
    AnalysisRuntime, ArtifactKind, ExecutorRegistry, ImageMime, OrchestratorConfig,
    OrchestratorTelemetry, RequestedAction, RouteRequest, RunInput, ServiceRegistry,
};
use derma_reasoning::{BankConfig, HashingEmbedder, ReasoningBank};
use shared_event_bus::FileEventPublisher;

#[derive(Parser, Debug)]
#[command(name = "derma", version, about = "Dermatology analysis orchestrator")]
struct Cli {
    /// Directory holding the reasoning bank, audit ledger, and logs.
    #[arg(long, global = true, default_value = "derma-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyses one image end to end.
    Analyze {
        /// Image file (jpeg, png, or webp).
        image: PathBuf,
        /// Declared mime type; inferred from the extension when absent.
        #[arg(long)]
        mime: Option<String>,
        /// Restrict what the learning agent stores.
        #[arg(long)]
        privacy: bool,
        /// Run the quick screening pipeline instead of the full one.
        #[arg(long)]
        screening: bool,
        /// Treat the input as a clinical photograph rather than a
        /// dermoscope capture.
        #[arg(long)]
        clinical: bool,
        /// JSON configuration overriding the defaults.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Verifies the audit-ledger hash chain.
    Ledger {
        /// Ledger file; defaults to `<data-dir>/audit.log`.
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Lists stored reasoning patterns.
    Patterns {
        /// Restrict to one task type.
        #[arg(long)]
        task_type: Option<String>,
        /// Maximum patterns to print.
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// JSON configuration overriding the defaults.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    match path {
        Some(path) => OrchestratorConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(OrchestratorConfig::default()),
    }
}

fn mime_for(image: &Path, declared: Option<&str>) -> Result<ImageMime> {
    if let Some(declared) = declared {
        return ImageMime::parse(declared)
            .with_context(|| format!("unsupported mime {declared}"));
    }
    let extension = image
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_lowercase();
    ImageMime::parse(&extension)
        .with_context(|| format!("cannot infer mime from extension {extension:?}"))
}

async fn analyze(
    data_dir: &Path,
    image: &Path,
    mime: Option<&str>,
    privacy: bool,
    screening: bool,
    clinical: bool,
    config: Option<&Path>,
) -> Result<()> {
    let config = load_config(config)?;
    let image_mime = mime_for(image, mime)?;
    let image_bytes =
        std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;

    let publisher = Arc::new(FileEventPublisher::new(
        data_dir.join("logs").join("events.log"),
    )?);
    let telemetry = OrchestratorTelemetry::builder("orchestrator")
        .log_path(data_dir.join("logs").join("orchestrator.log"))
        .event_publisher(publisher.clone())
        .build()?;
    let registry = ServiceRegistry::local(data_dir, &config, Some(publisher))?;
    let runtime = AnalysisRuntime::new(registry, ExecutorRegistry::standard(), config)?
        .with_telemetry(telemetry);

    let request = RouteRequest {
        artifact_kind: if clinical {
            ArtifactKind::ClinicalPhoto
        } else {
            ArtifactKind::DermoscopyImage
        },
        action: if screening {
            RequestedAction::QuickScreening
        } else {
            RequestedAction::FullAnalysis
        },
    };
    let input = RunInput {
        image_bytes,
        image_mime,
        privacy_mode: privacy,
        goal_override: None,
    };

    match runtime.analyze(input, request).await {
        Ok(output) => {
            let payload = output.result_payload.as_ref().map(|payload| {
                json!({
                    "algorithm": payload.encrypted.algorithm,
                    "payload_size": payload.encrypted.payload_size,
                    "public_summary": payload.public_summary,
                })
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "run_id": output.run_id,
                    "safety_level": output.audit_entry.safety_level.label(),
                    "event_type": output.audit_entry.event_type.label(),
                    "persistence": output.persistence,
                    "agents": output.trace.action_names(),
                    "replans": output.trace.replans,
                    "result": payload,
                }))?
            );
            Ok(())
        }
        Err(failure) => {
            // Operator output carries the category and run id only.
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "run_id": failure.run_id,
                    "failed": true,
                    "category": failure.category,
                }))?
            );
            bail!("{failure}");
        }
    }
}

fn verify_ledger(data_dir: &Path, path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(|| data_dir.join("audit.log"));
    let report = AuditLedger::verify_file(&path)
        .with_context(|| format!("verifying {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_intact() {
        bail!("ledger verification failed");
    }
    Ok(())
}

fn list_patterns(
    data_dir: &Path,
    task_type: Option<&str>,
    limit: usize,
    config: Option<&Path>,
) -> Result<()> {
    let config = load_config(config)?;
    let bank = ReasoningBank::open(
        data_dir.join("reasoning"),
        Arc::new(HashingEmbedder::new(config.reasoning_bank_dimension)),
        BankConfig {
            dimension: config.reasoning_bank_dimension,
            max_patterns_brute_force: config.max_patterns_brute_force,
            persistence_flush_interval_ms: config.persistence_flush_interval_ms,
        },
    )?;
    let patterns: Vec<_> = bank
        .patterns()
        .into_iter()
        .filter(|pattern| task_type.is_none_or(|task| pattern.task_type == task))
        .take(limit)
        .map(|pattern| {
            json!({
                "id": pattern.id.as_str(),
                "task_type": pattern.task_type,
                "outcome": pattern.outcome,
                "success_rate": pattern.success_rate,
                "is_correction": pattern.metadata.is_correction,
                "timestamp": pattern.timestamp,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&patterns)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Analyze {
            image,
            mime,
            privacy,
            screening,
            clinical,
            config,
        } => {
            analyze(
                &cli.data_dir,
                &image,
                mime.as_deref(),
                privacy,
                screening,
                clinical,
                config.as_deref(),
            )
            .await
        }
        Commands::Ledger { path } => verify_ledger(&cli.data_dir, path),
        Commands::Patterns {
            task_type,
            limit,
            config,
        } => list_patterns(&cli.data_dir, task_type.as_deref(), limit, config.as_deref()),
    }
}
