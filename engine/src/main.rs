use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use vertex_observability::{init_process_logging, ProcessKind};
use vertex_optimizer::SleepTimeOptimizer;
use vertex_orchestrator::{BatchController, ModelTaskExecutor, TaskOrchestrator};
use vertex_providers::ProviderRegistry;
use vertex_resources::{
    CostAwareSelector, CreditLedger, PredictiveBatchScheduler, ResourceOptimizer,
};
use vertex_server::{serve, AppState, ServerConfig};

const LOG_RETENTION_DAYS: u64 = 7;

#[derive(Parser, Debug)]
#[command(name = "vertex-engine")]
#[command(about = "Headless Vertex orchestration backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 3000)]
        port: u16,
        /// Directory for rolling JSON logs; defaults to ./logs.
        #[arg(long)]
        logs_dir: Option<PathBuf>,
        /// Starting credit balance.
        #[arg(long, default_value_t = 0.0)]
        initial_credits: f64,
        /// Hard cap on the global credit balance.
        #[arg(long)]
        credit_budget: Option<f64>,
        /// Disable the POST /batches endpoint.
        #[arg(long, default_value_t = false)]
        disable_batching: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            logs_dir,
            initial_credits,
            credit_budget,
            disable_batching,
        } => {
            let logs_dir = logs_dir.unwrap_or_else(|| PathBuf::from("logs"));
            let (_guard, log_info) =
                init_process_logging(ProcessKind::Engine, &logs_dir, LOG_RETENTION_DAYS)?;
            info!(logs_dir = %log_info.logs_dir, "logging initialized");

            let state = build_state(initial_credits, credit_budget, disable_batching);
            state.optimizer.start().await;

            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            info!(%addr, "starting vertex engine");
            serve(addr, state).await?;
        }
    }

    Ok(())
}

/// Wire the engine bottom-up: ledger and registry first, then the selector
/// and scheduler over them, then the orchestrator and batch controller.
fn build_state(
    initial_credits: f64,
    credit_budget: Option<f64>,
    disable_batching: bool,
) -> AppState {
    let ledger = Arc::new(CreditLedger::new(initial_credits, credit_budget));
    let registry = ProviderRegistry::new();

    let selector = Arc::new(CostAwareSelector::new(registry.clone(), ledger.clone()));
    let scheduler = Arc::new(PredictiveBatchScheduler::new(ledger.clone()));
    let resources = Arc::new(ResourceOptimizer::new(ledger, selector.clone(), scheduler));

    let executor = Arc::new(ModelTaskExecutor::new(registry.clone(), selector));
    let orchestrator = TaskOrchestrator::new(executor);
    let batches = Arc::new(BatchController::new(orchestrator.clone()));

    let optimizer = SleepTimeOptimizer::with_defaults();

    let config = if disable_batching {
        ServerConfig::default().with_feature("advanced_batching", false)
    } else {
        ServerConfig::default()
    };

    AppState {
        registry,
        resources,
        orchestrator,
        batches,
        optimizer,
        config,
    }
}
