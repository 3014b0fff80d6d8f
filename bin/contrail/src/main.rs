//! contrail deploys interdependent smart contracts in dependency order and remembers
//! what it deployed, so re-running is always safe.

mod cli;

use std::collections::BTreeMap;
use std::time::Duration;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use cli::{Cli, Command, DeployArgs, SelectionArgs};
use contrail_deploy::config::resolve_named_accounts;
use contrail_deploy::{
    ArtifactPersistence, ArtifactStore, ChainClient, Engine, EngineConfig, ExecutionPlan,
    FileArtifactPersistence, ForceRedeploy, InterfaceCatalog, MemoryChainClient,
    MemoryPersistence, NamedAccount, NetworkConfig, ProjectConfig, RpcChainClient, UnitRegistry,
    preview, resolve,
};

/// Named account transactions are sent from. Falls back to the node's first account.
const DEPLOYER_ACCOUNT: &str = "deployer";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = ProjectConfig::load(&cli.config)?;

    match cli.command {
        Command::Deploy(args) => deploy(&config, &args).await,
        Command::Plan(args) => plan(&config, &args),
        Command::Records { network } => records(&config, &network),
    }
}

/// Build the registry and resolve the plan. Fails before anything touches the network.
fn resolve_plan(config: &ProjectConfig, args: &SelectionArgs) -> Result<(UnitRegistry, ExecutionPlan)> {
    let registry = config.registry()?;
    let requested = args.selection().select(&registry)?;
    let plan = resolve(&registry, &requested)?;

    tracing::info!(
        network = %args.network,
        units = %plan.join(", "),
        "Execution plan resolved"
    );
    Ok((registry, plan))
}

async fn deploy(config: &ProjectConfig, args: &DeployArgs) -> Result<()> {
    let network_name = &args.selection.network;
    let network = config.network(network_name)?;
    let (registry, plan) = resolve_plan(config, &args.selection)?;

    let interfaces = InterfaceCatalog::load_dir(&config.artifacts)?;
    let persistence = FileArtifactPersistence::open(config.deployments.clone())?;

    let settings = RunSettings {
        named_accounts: config.named_accounts_for(network_name)?,
        confirmation_timeout: args
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| network.timeout()),
        force: args.force(),
        track_calls: config.track_calls || args.track_calls,
        abort: abort_on_interrupt(),
    };

    if args.dry_run {
        tracing::info!(network = %network_name, "Dry run: using an in-memory chain, nothing is persisted");
        let seeded = MemoryPersistence::seeded(persistence.list_all()?);
        drop(persistence);

        let client = dry_run_client(node_accounts(network).await);
        let store = ArtifactStore::new(seeded, network_name.clone()).with_interfaces(interfaces);
        return execute(client, store, &registry, &plan, settings).await;
    }

    let client = RpcChainClient::new(network.url.clone(), interfaces.clone())?
        .with_poll_interval(network.poll_interval())
        .with_gas_limit(network.gas_limit);

    if let Some(expected) = network.chain_id {
        let actual = client
            .chain_id()
            .await
            .context(format!("Failed to reach {} at {}", network_name, network.url))?;
        if actual != expected {
            anyhow::bail!(
                "Chain ID mismatch on {}: configured {} but the node reports {}",
                network_name,
                expected,
                actual
            );
        }
    }

    let store = ArtifactStore::new(persistence, network_name.clone()).with_interfaces(interfaces);
    execute(client, store, &registry, &plan, settings).await
}

async fn node_accounts(network: &NetworkConfig) -> Result<Vec<Address>> {
    RpcChainClient::new(network.url.clone(), InterfaceCatalog::new())?
        .accounts()
        .await
}

/// In-memory chain for a dry run, sending from the node's real accounts when
/// the node is reachable so named accounts resolve as they would for real.
fn dry_run_client(node_accounts: Result<Vec<Address>>) -> MemoryChainClient {
    match node_accounts {
        Ok(accounts) if !accounts.is_empty() => MemoryChainClient::new(accounts),
        Ok(_) => {
            tracing::warn!("Node reports no accounts, dry run uses placeholder accounts");
            MemoryChainClient::default()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Node unreachable, dry run uses placeholder accounts");
            MemoryChainClient::default()
        }
    }
}

/// Everything a run needs besides the client and the store.
struct RunSettings {
    named_accounts: BTreeMap<String, NamedAccount>,
    confirmation_timeout: Duration,
    force: ForceRedeploy,
    track_calls: bool,
    abort: watch::Receiver<bool>,
}

async fn execute<C: ChainClient, P: ArtifactPersistence>(
    client: C,
    mut store: ArtifactStore<P>,
    registry: &UnitRegistry,
    plan: &ExecutionPlan,
    settings: RunSettings,
) -> Result<()> {
    let available = client.accounts().await?;
    let accounts = resolve_named_accounts(&settings.named_accounts, &available)?;
    let sender = accounts
        .get(DEPLOYER_ACCOUNT)
        .or_else(|| available.first())
        .copied()
        .context("No account to send transactions from: configure a deployer named account")?;

    let engine = Engine::new(
        client,
        EngineConfig {
            sender,
            accounts,
            confirmation_timeout: settings.confirmation_timeout,
            force: settings.force,
            track_calls: settings.track_calls,
        },
    )
    .with_abort(settings.abort);

    let report = engine.run(registry, plan, &mut store).await;
    println!("{}", report.to_table());

    if let Some(failed) = report.failed() {
        anyhow::bail!("Unit {} failed: {}", failed.name, failed.state);
    }
    if report.aborted {
        anyhow::bail!(
            "Run aborted, {} units not started. Re-run to continue where it stopped",
            report.pending_count()
        );
    }

    tracing::info!("✓ Deployment complete!");
    Ok(())
}

/// Ctrl-C stops the run before the next unit starts.
fn abort_on_interrupt() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping before the next unit...");
            let _ = tx.send(true);
        }
    });
    rx
}

fn plan(config: &ProjectConfig, args: &SelectionArgs) -> Result<()> {
    config.network(&args.network)?;
    let (registry, plan) = resolve_plan(config, args)?;

    let persistence = FileArtifactPersistence::open_read_only(config.deployments.clone())?;
    let store = ArtifactStore::new(persistence, args.network.clone());

    for (idx, unit) in preview(&registry, &plan, &store, &ForceRedeploy::None)?
        .iter()
        .enumerate()
    {
        let status = match unit.recorded_address {
            Some(address) if unit.skip => format!("skip (deployed at {})", address),
            _ => "run".to_string(),
        };
        println!("{:>3}. {} [{}] {}", idx + 1, unit.name, unit.kind, status);
    }
    Ok(())
}

fn records(config: &ProjectConfig, network: &str) -> Result<()> {
    config.network(network)?;
    let persistence = FileArtifactPersistence::open_read_only(config.deployments.clone())?;
    let store = ArtifactStore::new(persistence, network);

    let records = store.records()?;
    if records.is_empty() {
        println!("No records for network {}", network);
        return Ok(());
    }

    for record in records {
        println!(
            "{} ({} {}) {} tx={}",
            record.unit_name, record.kind, record.contract_name, record.address, record.transaction_hash
        );
    }
    Ok(())
}
