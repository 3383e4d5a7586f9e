//! solforge CLI
//!
//! ```bash
//! solforge run --prompt "create ERC20 token" --network sepolia
//! solforge run --prompt "an NFT collection" --test-only
//! solforge resume 5b1c...      # continue an interrupted workflow
//! solforge show 5b1c...        # print the status table and fix history
//! ```
//!
//! Exit codes: 0 success (warnings included), 1 terminal failure,
//! 2 cancelled, 3 infrastructure error.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solforge::adapters::foundry::Forge;
use solforge::adapters::generator::{self, ChatGenerator};
use solforge::adapters::slither::Slither;
use solforge::report::format_report;
use solforge::{Adapters, PipelineConfig, WorkflowOrchestrator, WorkflowResult};
use solforge_engine::context::WorkflowRequest;
use solforge_engine::{ContextManager, FileContextStore, WorkflowId};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const EXIT_INFRA: i32 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ./solforge.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate, compile, audit, deploy, verify and test a contract
    Run {
        /// What to build, in plain language
        #[arg(long)]
        prompt: String,

        /// Stop after auditing; nothing touches a network
        #[arg(long, default_value_t = false)]
        test_only: bool,

        /// Deploy even when the audit reports high-severity findings
        #[arg(long, default_value_t = false)]
        allow_insecure: bool,

        /// anvil, sepolia, base-sepolia or arbitrum-sepolia
        #[arg(long)]
        network: Option<String>,

        /// Constructor argument, repeatable
        #[arg(long = "arg")]
        constructor_args: Vec<String>,
    },
    /// Continue an interrupted or cancelled workflow
    Resume { id: WorkflowId },
    /// Print a workflow's status table, fixes and next step
    Show { id: WorkflowId },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let code = match dispatch(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            EXIT_INFRA
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let config = PipelineConfig::load(cli.config.as_deref())?;
    let store = Arc::new(FileContextStore::new(&config.state_dir));

    match cli.command {
        Command::Show { id } => {
            let contexts = ContextManager::new(store);
            let ctx = contexts.load(id)?;
            let bundle = contexts.load_bundle(id)?;
            println!("{}", format_report(&ctx, bundle.as_ref()));
            Ok(0)
        }
        Command::Run {
            prompt,
            test_only,
            allow_insecure,
            network,
            constructor_args,
        } => {
            let network = network.unwrap_or_else(|| config.default_network.clone());
            let mut request = WorkflowRequest::new(prompt, network)
                .test_only(test_only)
                .allow_insecure(allow_insecure);
            request.constructor_args = constructor_args;

            let orchestrator = build_orchestrator(config, store).await?;
            let result = orchestrator.run(request).await?;
            Ok(conclude(result))
        }
        Command::Resume { id } => {
            let orchestrator = build_orchestrator(config, store).await?;
            let result = orchestrator.resume(id).await?;
            Ok(conclude(result))
        }
    }
}

async fn build_orchestrator(
    config: PipelineConfig,
    store: Arc<FileContextStore>,
) -> Result<WorkflowOrchestrator> {
    if !generator::check_endpoint(&config.generator.url).await {
        warn!(url = %config.generator.url, "Generator endpoint not answering; generation will be retried");
    }

    let forge = Arc::new(Forge::from_config(&config)?);
    let adapters = Adapters {
        generator: Arc::new(ChatGenerator::new(config.generator.clone())?),
        package_manager: forge.clone(),
        compiler: forge.clone(),
        auditor: Arc::new(Slither::new(&config.tools.slither).context("Invalid slither command")?),
        deployer: forge.clone(),
        verifier: forge.clone(),
        tester: forge,
    };
    info!(
        model = %config.generator.model,
        work_root = %config.work_root.display(),
        state_dir = %config.state_dir.display(),
        "solforge starting"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping before the next stage attempt");
            on_signal.cancel();
        }
    });

    Ok(WorkflowOrchestrator::new(config, adapters, store).with_cancellation(cancel))
}

fn conclude(result: WorkflowResult) -> i32 {
    println!("{}", format_report(&result.context, result.bundle.as_ref()));
    result.exit_code()
}
