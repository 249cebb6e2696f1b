use alloy::primitives::utils::{format_ether, format_units};
use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use clap::Parser;
use core_logic::{setup_logger, AccountManager, ProxyManager, RunTally, Worker, WorkerRunner};
use dotenv::dotenv;
use martius_bot::config::ModeSetting;
use martius_bot::{
    parse_recipient, Account, AccountWorker, ActionPlan, AlloyTransportFactory, ConnectionProvider,
    ContractCatalog, DeploymentStore, GasLimits, HttpListSource, HttpProbe, InteractionRegistry,
    MartiusConfig, NonceGate, PoolKind, ProxyRotator, ProxySource, ResultReporter, SharedRuntime,
    SubmissionConfig, SubmissionEngine, TxBuilder,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Rotations tried before refusing to start
const STARTUP_ROTATIONS: u32 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/martius.toml")]
    config: String,

    /// bounded | persistent
    #[arg(short, long)]
    mode: Option<String>,

    #[arg(long)]
    max_attempts: Option<u32>,

    #[arg(long, default_value = "false")]
    no_proxy: bool,

    /// Write periodic tally snapshots (JSON) to this file
    #[arg(long)]
    export_metrics: Option<String>,

    #[arg(long, default_value = "60")]
    metrics_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let _log_guard = setup_logger("martius");

    let mut config = MartiusConfig::from_path(&args.config).context("Failed to load config")?;
    if let Some(mode) = &args.mode {
        config.submission.mode = match mode.to_lowercase().as_str() {
            "bounded" => ModeSetting::Bounded,
            "persistent" => ModeSetting::Persistent,
            other => bail!("Unknown mode '{}', expected bounded or persistent", other),
        };
    }
    if let Some(max) = args.max_attempts {
        config.submission.max_attempts = max;
    }
    if args.no_proxy {
        config.proxy.enabled = false;
    }
    config.validate()?;

    println!(
        r#"
        ╔════════════════════════════════════════════════════════════╗
        ║                 MARTIUS BOT - LIVE LOG                     ║
        ╚════════════════════════════════════════════════════════════╝
        "#
    );
    info!(target: "task_result", "Target RPC: {}", config.chain.rpc_url);
    info!(target: "task_result", "Target Chain ID: {}", config.chain.chain_id);
    info!(target: "task_result", "Mode: {:?}", config.submission.mode);

    // Accounts
    let raw_accounts = AccountManager::load_accounts(&config.files.accounts)?;
    let accounts: Vec<Account> = raw_accounts
        .iter()
        .filter_map(|raw| match Account::from_raw(raw) {
            Ok(account) => Some(account),
            Err(e) => {
                warn!("Skipping account: {:#}", e);
                None
            }
        })
        .collect();
    if accounts.is_empty() {
        error!("No usable accounts in {}", config.files.accounts);
        return Ok(());
    }
    info!(target: "task_result", "Accounts: {}", accounts.len());

    // Contracts
    let catalog = match ContractCatalog::from_path(&config.files.artifacts) {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!("No contract artifacts loaded ({:#}); deployments disabled", e);
            ContractCatalog::default()
        }
    };
    info!(target: "task_result", "Contracts: {}", catalog.names().join(", "));
    let catalog = Arc::new(catalog);
    let registry = Arc::new(InteractionRegistry::stock());

    // Connection + proxies
    let factory = Arc::new(AlloyTransportFactory::new(
        config.chain.rpc_url.clone(),
        Duration::from_secs(config.chain.request_timeout_secs),
    ));

    let rotator = if config.proxy.enabled {
        let local = ProxyManager::load_proxies(&config.files.proxies)?;
        let timeout = Duration::from_millis(config.proxy.probe_timeout_ms);
        let sources: Vec<Arc<dyn ProxySource>> = config
            .proxy
            .online_sources
            .iter()
            .map(|url| Arc::new(HttpListSource::new(url.clone(), timeout)) as Arc<dyn ProxySource>)
            .collect();
        let probe = Arc::new(HttpProbe::new(config.proxy.test_url.clone(), timeout));
        info!(target: "task_result", "Local proxies: {}", local.len());
        Some(Arc::new(
            ProxyRotator::new(local, sources, probe).with_max_probes(config.proxy.max_probes),
        ))
    } else {
        None
    };

    let initial = match &rotator {
        Some(rotator) => rotator.next(PoolKind::Local).await,
        None => None,
    };
    if rotator.is_some() && initial.is_none() {
        warn!("No working proxy found, starting direct");
    }

    let connection = Arc::new(ConnectionProvider::new(
        factory,
        config.chain.chain_id,
        initial,
    ));
    let runtime = Arc::new(SharedRuntime::new(connection.clone(), rotator));

    // Startup connection test
    let current = runtime
        .ensure_healthy(STARTUP_ROTATIONS)
        .await
        .with_context(|| format!("RPC health check failed at {}", config.chain.rpc_url))?;
    let block = current.transport.block_number().await.unwrap_or_default();
    let gas_gwei = match current.transport.gas_price().await {
        Ok(price) => format_units(price, "gwei").unwrap_or_else(|_| price.to_string()),
        Err(_) => "?".to_string(),
    };
    info!(
        target: "task_result",
        "✅ Connected: block {} | gas {} gwei | via {}",
        block,
        gas_gwei,
        current.route()
    );

    // Engine
    let submission = SubmissionConfig::from_section(&config.submission);
    let nonce_gate = Arc::new(NonceGate::new(
        connection.clone(),
        Duration::from_millis(config.submission.balance_poll_ms),
    ));
    let builder = Arc::new(TxBuilder::new(
        config.chain.chain_id,
        catalog.clone(),
        registry,
        GasLimits {
            deploy: config.gas.deploy_limit,
            call: config.gas.call_limit,
            transfer: config.gas.transfer_limit,
            safety_margin: config.gas.safety_margin,
        },
    ));

    let tally = Arc::new(RunTally::default());
    let store = Arc::new(DeploymentStore::open(&config.files.deployments).await?);
    let reporter = Arc::new(
        ResultReporter::new(tally.clone(), config.chain_config()).with_sink(store.clone()),
    );
    let engine = Arc::new(
        SubmissionEngine::new(runtime.clone(), nonce_gate, builder, submission)
            .with_observer(reporter.clone()),
    );

    // Balance overview
    for account in &accounts {
        match current.transport.balance(account.address()).await {
            Ok(balance) => info!(
                target: "task_result",
                "💰 {}: {} {}",
                account.short(),
                format_ether(balance),
                config.chain.currency
            ),
            Err(e) => warn!("Balance check failed for {}: {:#}", account.short(), e),
        }
    }

    let recipients = Arc::new(load_recipients(config.files.recipients.as_deref()).await);
    let plan = Arc::new(ActionPlan::from_section(&config.plan, catalog.deployable()));
    let slots = (config.plan.workers > 0).then(|| Arc::new(Semaphore::new(config.plan.workers)));

    let workers: Vec<Box<dyn Worker>> = accounts
        .into_iter()
        .enumerate()
        .map(|(index, account)| {
            let worker = AccountWorker::new(
                index,
                account,
                engine.clone(),
                reporter.clone(),
                plan.clone(),
                recipients.clone(),
            )
            .with_store(store.clone());
            let worker = match &slots {
                Some(slots) => worker.with_slots(slots.clone()),
                None => worker,
            };
            Box::new(worker) as Box<dyn Worker>
        })
        .collect();

    // Periodic metrics export
    let exporter = args.export_metrics.clone().map(|path| {
        let tally = tally.clone();
        let connection = connection.clone();
        let interval = Duration::from_secs(args.metrics_interval.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tally.set_rotations(connection.rotations());
                if let Err(e) = tally.export_to_file(&path).await {
                    warn!("Failed to export metrics: {}", e);
                }
            }
        })
    });

    let totals = WorkerRunner::run_workers(workers).await?;

    if let Some(handle) = exporter {
        handle.abort();
    }
    tally.set_rotations(connection.rotations());
    if let Some(path) = &args.export_metrics {
        if let Err(e) = tally.export_to_file(path).await {
            warn!("Failed to export metrics: {}", e);
        }
    }

    let snapshot = tally.snapshot();
    info!(
        target: "task_result",
        "Run finished: {} ok / {} failed | deploy {}/{} | interact {}/{} | transfer {}/{} | {} broadcasts | {} rotations | {:.1}%",
        totals.success,
        totals.failed,
        snapshot.deployments.succeeded,
        snapshot.deployments.attempted,
        snapshot.interactions.succeeded,
        snapshot.interactions.attempted,
        snapshot.transfers.succeeded,
        snapshot.transfers.attempted,
        snapshot.broadcasts,
        snapshot.rotations,
        snapshot.success_rate()
    );
    if !snapshot.failures.is_empty() {
        info!(target: "task_result", "Failures: {:?}", snapshot.failures);
    }

    Ok(())
}

/// One address per line; invalid lines are skipped.
async fn load_recipients(path: Option<&str>) -> Vec<Address> {
    let Some(path) = path else {
        return Vec::new();
    };
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read recipients from {}: {}", path, e);
            return Vec::new();
        }
    };

    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|line| match parse_recipient(line) {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!("Skipping recipient: {}", e);
                None
            }
        })
        .collect()
}
