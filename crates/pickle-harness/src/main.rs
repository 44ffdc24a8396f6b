use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pickle_harness::chains::{Chain, RpcChain, SimulatedChain};
use pickle_harness::config::{DeployStep, HarnessConfig};
use pickle_harness::contracts::ArtifactStore;
use pickle_harness::deploy::Deployer;
use pickle_harness::keystore::KeyManager;
use pickle_harness::metrics::HarnessMetrics;
use pickle_harness::node::LocalNode;
use pickle_harness::scenario::{Scenario, ScenarioRunner};

#[derive(Parser)]
#[command(name = "harness")]
#[command(about = "Deployment and vault lifecycle harness for Pickle jars and farms")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/harness.toml")]
    pub config: String,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Run against the in-memory fork instead of the configured node
    #[arg(long)]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy the token and the MasterChef and hand over the admin role
    Deploy {
        /// Steps to run, in order (defaults to deployment.steps)
        #[arg(long = "step", value_enum)]
        steps: Vec<DeployStep>,
    },
    /// Run a lifecycle scenario
    Run {
        /// Built-in scenario name or path to a TOML/JSON scenario
        #[arg(long, default_value = "full-suite")]
        scenario: String,
        /// Write the JSON run report here
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Show chain information
    Status,
    /// Write the default configuration
    InitConfig {
        #[arg(long, default_value = "config/harness.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("pickle_harness={0},{1}={0}", cli.log_level, env!("CARGO_CRATE_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Commands::InitConfig { output } = &cli.command {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        HarnessConfig::default().save(output)?;
        info!("Wrote default configuration to {}", output.display());
        return Ok(());
    }

    // Load configuration
    let mut config = HarnessConfig::load(&cli.config)?;
    info!("Loaded configuration from: {}", cli.config);

    let (chain, _node) = connect(&mut config, cli.simulate).await?;

    match cli.command {
        Commands::Deploy { steps } => {
            let steps = if steps.is_empty() { config.deployment.steps.clone() } else { steps };
            deploy(&config, chain, &steps).await?;
        }
        Commands::Run { scenario, report } => {
            run_scenario(&config, chain, &scenario, report).await?;
        }
        Commands::Status => {
            show_status(chain.as_ref()).await?;
        }
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

/// Chain client for the run. The node handle must outlive the run.
async fn connect(config: &mut HarnessConfig, simulate: bool) -> anyhow::Result<(Arc<dyn Chain>, Option<LocalNode>)> {
    if simulate {
        info!("Using the simulated chain");
        config.artifacts.placeholder = true;
        return Ok((Arc::new(SimulatedChain::from_config(config)), None));
    }

    let node = LocalNode::ensure(&config.network).await?;
    let chain = RpcChain::from_config(config);

    if let Some(expected) = config.network.chain_id {
        let actual = chain.chain_id().await?;
        if actual != expected {
            anyhow::bail!("{} reports chain id {}, expected {}", chain.rpc_endpoint(), actual, expected);
        }
    }

    Ok((Arc::new(chain), Some(node)))
}

async fn deploy(config: &HarnessConfig, chain: Arc<dyn Chain>, steps: &[DeployStep]) -> anyhow::Result<()> {
    let mut keys = KeyManager::new(config.keystore.clone())?;

    let admin_key = &config.deployment.handover.admin_key;
    let password = if steps.contains(&DeployStep::Handover) && keys.load_from_env(admin_key).is_err() {
        Some(rpassword::prompt_password(format!("Password for key '{}': ", admin_key))?)
    } else {
        None
    };

    let mut deployer = Deployer::new(
        chain,
        ArtifactStore::from_config(&config.artifacts),
        config.deployment.clone(),
    )
    .await?;
    info!("Deploying from {}", deployer.deployer());

    let outcome = deployer.run(steps, &mut keys, password.as_deref()).await?;
    if let Some(token) = outcome.pickle_token {
        println!("{}", token);
    }
    if let Some(chef) = outcome.master_chef {
        println!("{}", chef);
    }
    Ok(())
}

async fn run_scenario(
    config: &HarnessConfig,
    chain: Arc<dyn Chain>,
    name: &str,
    report_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let scenario = Scenario::resolve(name)?;
    let metrics = if config.metrics.enabled {
        Some(Arc::new(HarnessMetrics::new()?))
    } else {
        None
    };

    let mut runner = ScenarioRunner::new(chain, config, &scenario).await?;
    if let Some(metrics) = &metrics {
        runner = runner.with_metrics(metrics.clone());
    }

    let outcome = runner.run(&scenario).await;

    if let Some(path) = report_path {
        runner.report().save(&path)?;
        info!("Run report written to {}", path.display());
    }
    if let Some(metrics) = &metrics {
        print!("{}", metrics.render()?);
    }

    let report = outcome?;
    info!("Run {} finished with {} steps", report.run_id, report.steps.len());
    Ok(())
}

async fn show_status(chain: &dyn Chain) -> anyhow::Result<()> {
    let accounts = chain.accounts().await?;
    println!("chain id:  {}", chain.chain_id().await?);
    println!("block:     {}", chain.block_number().await?);
    println!("timestamp: {}", chain.timestamp().await?);
    println!("accounts:");
    for (index, account) in accounts.iter().enumerate() {
        println!("  [{}] {}", index, account);
    }
    if accounts.is_empty() {
        warn!("Node manages no accounts; only impersonated or keyed senders will work");
    }
    Ok(())
}
