//! riskflow - bulk financial risk scoring
//!
//! ## Commands
//!
//! - `score`: submit a batch of rows, wait for it and print the status report
//! - `serve`: run the queue, worker pool and autoscaler until interrupted
//! - `config`: print the effective configuration
//! - `artifacts`: describe the loaded model artifacts

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use riskflow_core::{
    init_tracing, level_for_verbosity, PriorityHint, RiskflowService, ServiceConfig, Submission,
    METRICS,
};
use riskflow_inference::{
    fixtures, ArtifactStore, EnsemblePolicy, FeatureVector, InferenceEngine, ModelFamily,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "riskflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Adaptive bulk risk scoring", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Artifact bundle (JSON); the built-in reference bundle when omitted
    #[arg(long, global = true, env = "RISKFLOW_ARTIFACTS")]
    artifacts: Option<PathBuf>,

    /// Ensemble policy table (JSON); policy v1 when omitted
    #[arg(long, global = true, env = "RISKFLOW_POLICY")]
    policy: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a batch of rows and print the status report as JSON
    Score {
        /// Model family: annual or quarterly
        #[arg(short, long)]
        family: ModelFamily,

        /// JSON array of feature objects
        #[arg(short, long)]
        input: PathBuf,

        /// Priority hint: urgent, normal or bulk
        #[arg(short, long)]
        priority: Option<PriorityHint>,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "3600")]
        wait_secs: u64,
    },

    /// Run the scoring service until Ctrl-C
    Serve,

    /// Print the configuration read from the environment
    Config,

    /// Describe the loaded artifacts
    Artifacts,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, level_for_verbosity(cli.verbose));

    match cli.command {
        Commands::Score {
            family,
            input,
            priority,
            wait_secs,
        } => {
            let engine = load_engine(cli.artifacts.as_deref(), cli.policy.as_deref())?;
            cmd_score(engine, family, &input, priority, wait_secs).await
        }
        Commands::Serve => {
            let engine = load_engine(cli.artifacts.as_deref(), cli.policy.as_deref())?;
            cmd_serve(engine).await
        }
        Commands::Config => cmd_config(),
        Commands::Artifacts => {
            let engine = load_engine(cli.artifacts.as_deref(), cli.policy.as_deref())?;
            cmd_artifacts(&engine)
        }
    }
}

fn load_engine(artifacts: Option<&Path>, policy: Option<&Path>) -> Result<InferenceEngine> {
    let store = match artifacts {
        Some(path) => ArtifactStore::load(path)
            .with_context(|| format!("Failed to load artifacts from {}", path.display()))?,
        None => ArtifactStore::from_bundle(fixtures::reference_bundle())
            .context("Built-in artifact bundle is invalid")?,
    };
    let policy = match policy {
        Some(path) => EnsemblePolicy::load(path)
            .with_context(|| format!("Failed to load policy from {}", path.display()))?,
        None => EnsemblePolicy::v1(),
    };
    InferenceEngine::new(store, policy).context("Failed to build inference engine")
}

fn read_rows(path: &Path) -> Result<Vec<FeatureVector>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let rows: Vec<FeatureVector> = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a JSON array of feature objects", path.display()))?;
    if rows.is_empty() {
        bail!("{} contains no rows", path.display());
    }
    Ok(rows)
}

/// Submit, wait, print
async fn cmd_score(
    engine: InferenceEngine,
    family: ModelFamily,
    input: &Path,
    priority: Option<PriorityHint>,
    wait_secs: u64,
) -> Result<()> {
    let rows = read_rows(input)?;
    let config = ServiceConfig::from_env().context("Invalid configuration")?;
    let service = RiskflowService::start(config, Arc::new(engine))
        .await
        .context("Failed to start riskflow service")?;

    let receipt = service
        .jobs()
        .submit(Submission {
            family,
            priority,
            rows,
        })
        .await
        .context("Submission rejected")?;
    info!(
        submission_id = %receipt.submission_id,
        lane = %receipt.lane,
        chunks = receipt.chunks,
        eta_minutes = receipt.estimated_completion_minutes,
        "waiting for submission"
    );

    let report = service
        .jobs()
        .wait(
            &receipt.submission_id,
            Duration::from_millis(100),
            Duration::from_secs(wait_secs),
        )
        .await?;
    service.shutdown().await;
    METRICS.flush();

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.status.is_terminal() {
        bail!("submission still {} after {}s", report.status, wait_secs);
    }
    Ok(())
}

async fn cmd_serve(engine: InferenceEngine) -> Result<()> {
    let config = ServiceConfig::from_env().context("Invalid configuration")?;
    let service = RiskflowService::start(config, Arc::new(engine))
        .await
        .context("Failed to start riskflow service")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    service.shutdown().await;
    METRICS.flush();
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = ServiceConfig::from_env().context("Invalid configuration")?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct ArtifactSummary {
    family: ModelFamily,
    id: String,
    version: String,
    features: usize,
}

#[derive(Debug, Serialize)]
struct ArtifactsReport {
    fingerprint: String,
    policy_version: String,
    artifacts: Vec<ArtifactSummary>,
}

fn artifacts_report(engine: &InferenceEngine) -> ArtifactsReport {
    let store = engine.artifacts();
    let artifacts = [ModelFamily::Annual, ModelFamily::Quarterly]
        .into_iter()
        .map(|family| {
            let artifact = store.get(family);
            ArtifactSummary {
                family,
                id: artifact.id.clone(),
                version: artifact.version.clone(),
                features: artifact.features.len(),
            }
        })
        .collect();
    ArtifactsReport {
        fingerprint: store.fingerprint().to_string(),
        policy_version: engine.policy().version.clone(),
        artifacts,
    }
}

fn cmd_artifacts(engine: &InferenceEngine) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&artifacts_report(engine))?);
    Ok(())
}
