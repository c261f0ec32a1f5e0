//! `claims-agents` command line: run a scripted claim through the workflow,
//! or compute a payout on its own.

use std::path::PathBuf;
use std::sync::Arc;

use adjudication::{CoverageItem, PayoutRequest};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use claims_agents::{
    append_telemetry, EngineConfig, HttpPayoutClient, LocalPayoutService, PayoutService,
    RunMetrics, Scenario, WorkflowExecutor,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "claims-agents", about = "Insurance claim adjudication workflow")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scripted claim through the workflow and print the final state
    Run {
        /// Scenario TOML file
        #[arg(long)]
        scenario: PathBuf,

        /// Engine configuration TOML file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Append run metrics to this JSONL file
        #[arg(long)]
        telemetry: Option<PathBuf>,
    },

    /// Compute a payout and print the breakdown
    Payout {
        #[arg(long)]
        claim_id: String,

        #[arg(long)]
        policy_id: String,

        /// Coverage item as `description=amount`; repeatable
        #[arg(long = "item", value_parser = parse_item)]
        items: Vec<CoverageItem>,

        /// Engine configuration TOML file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_item(raw: &str) -> Result<CoverageItem, String> {
    let (description, amount) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected description=amount, got '{raw}'"))?;
    let amount: f64 = amount
        .trim()
        .parse()
        .map_err(|e| format!("bad amount in '{raw}': {e}"))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(format!("amount must be a non-negative number, got {amount}"));
    }
    Ok(CoverageItem::new(description.trim(), amount))
}

fn payout_service(config: &EngineConfig) -> Result<Arc<dyn PayoutService>> {
    match config.payout_service_url.as_deref() {
        Some(url) => {
            let client = HttpPayoutClient::new(url, config.retry.stage_timeout())
                .context("Failed to build payout client")?;
            info!(endpoint = client.endpoint(), "Using remote payout service");
            Ok(Arc::new(client))
        }
        None => Ok(Arc::new(LocalPayoutService::new(config.payout.clone()))),
    }
}

async fn run_scenario(
    scenario_path: PathBuf,
    config_path: Option<PathBuf>,
    telemetry: Option<PathBuf>,
) -> Result<()> {
    let config = EngineConfig::load(config_path.as_deref())?;
    let scenario = Scenario::load(&scenario_path)?;
    let stages = scenario.stage_set(Some(payout_service(&config)?))?;
    let executor = WorkflowExecutor::new(config, stages);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling after the current stage");
            on_signal.cancel();
        }
    });

    let report = executor
        .run(scenario.initial_state(), &cancel)
        .await
        .context("Workflow run did not finish")?;

    let metrics = RunMetrics::from_report(&report);
    metrics.emit();
    if let Some(path) = telemetry {
        if let Err(e) = append_telemetry(&metrics, &path) {
            warn!(path = %path.display(), "Failed to record run metrics: {e}");
        }
    }

    let output = serde_json::json!({
        "state": report.state,
        "summary": report.summary,
        "visits": report.visits,
        "elapsed_ms": report.elapsed_ms,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_payout(
    claim_id: String,
    policy_id: String,
    items: Vec<CoverageItem>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = EngineConfig::load(config_path.as_deref())?;
    let service = payout_service(&config)?;
    let request = PayoutRequest {
        claim_id,
        policy_id,
        coverage_items: items,
    };
    let response = service
        .calculate(&request)
        .await
        .context("Payout calculation failed")?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            scenario,
            config,
            telemetry,
        } => run_scenario(scenario, config, telemetry).await,
        Command::Payout {
            claim_id,
            policy_id,
            items,
            config,
        } => run_payout(claim_id, policy_id, items, config).await,
    }
}
