//! Lisk Sepolia keeper
//!
//! Periodic on-chain maintenance for the wallet-risk backend:
//! - Price-feed updates (IDRX, BTC, ETH, USDT) through `updateAnswer`
//! - Liquidation sweeps over every borrower x collateral token of the pool
//! - A single transaction writer so both jobs share one nonce sequence

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keeper_api::RateOracle;
use keeper_chain::{ChainClient, ChainHandle, KeeperChain, TxWriter};
use keeper_core::{
    JobHandle, KeeperConfig, LiquidationJob, PriceFeedUpdater, Supervisor, WalletConfigStore,
};

/// Set to `json` for machine-readable logs.
const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

#[tokio::main]
async fn main() -> Result<()> {
    // Print startup banner
    print_banner();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,keeper_core=debug,keeper_chain=debug")),
        )
        .init();

    // KEEPER_CONFIG selects a TOML file, KEEPER_PROFILE a built-in profile
    let config = KeeperConfig::from_env()?;
    config.log_config();

    info!("Starting keeper");
    info!(chain_id = config.chain.chain_id, "Chain: Lisk Sepolia");

    // No job runs without the owner wallet
    let wallet = WalletConfigStore::from_settings(&config.wallet)
        .load()
        .context("Failed to load owner wallet")?;

    let client = Arc::new(ChainClient::new(
        config.chain.rpc_url.clone(),
        config.chain.chain_id,
        wallet.account.clone(),
        config.chain.timeouts(),
        config.chain.gas_limit_policy(),
    )?);

    if let Err(e) = client.health_check().await {
        warn!(error = %e, "Provider health check failed, jobs will retry on their schedule");
    }

    // Every write from every job goes through this one task
    let (writer, writer_task) = TxWriter::spawn(client.clone(), config.scheduler.writer_capacity);
    let chain: Arc<dyn KeeperChain> = Arc::new(ChainHandle::new(
        client.clone(),
        writer,
        config.price_feed.gas_pricing(),
        config.liquidation.gas_pricing(),
    ));

    let mut supervisor = Supervisor::new(config.scheduler.restart_policy());
    let mut exits = supervisor
        .take_exits()
        .context("supervisor exit channel already taken")?;
    let exit_logger = tokio::spawn(async move {
        while let Some(exit) = exits.recv().await {
            info!(task = %exit.name, exit = ?exit.kind, restarts = exit.restarts, "Job task exited");
        }
    });

    let price_job = spawn_price_feed_job(&config, &chain, &mut supervisor);
    let liquidation_job = spawn_liquidation_job(&config, &chain, &mut supervisor);
    if price_job.is_none() && liquidation_job.is_none() {
        bail!("no job could be started");
    }

    info!("All jobs running");
    wait_for_shutdown(price_job.as_ref(), liquidation_job.as_ref()).await;

    info!("Shutdown requested, waiting for jobs to finish their current cycle");
    supervisor.shutdown().await;

    // Writer drains once the last write handle is gone
    drop(chain);
    if let Err(e) = writer_task.await {
        error!(error = %e, "Transaction writer did not exit cleanly");
    }
    exit_logger.abort();

    for job in price_job.iter().chain(liquidation_job.iter()) {
        info!(job = %job.name(), cycles = job.cycles(), state = ?job.state(), "Job stopped");
    }
    info!("Keeper stopped");
    Ok(())
}

fn spawn_price_feed_job(
    config: &KeeperConfig,
    chain: &Arc<dyn KeeperChain>,
    supervisor: &mut Supervisor,
) -> Option<JobHandle> {
    if !config.price_feed.enabled {
        info!("Price feed job disabled");
        return None;
    }

    let targets = match config.price_feed.resolve_targets() {
        Ok(targets) => targets,
        Err(e) => {
            error!(error = %e, "Price feed job not started");
            return None;
        }
    };
    let rates = match RateOracle::with_endpoints(config.price_feed.endpoints()) {
        Ok(rates) => rates,
        Err(e) => {
            error!(error = %e, "Price feed job not started: HTTP client unavailable");
            return None;
        }
    };

    info!(
        feeds = ?targets.iter().map(|t| t.symbol.as_str()).collect::<Vec<_>>(),
        "Price feed job configured"
    );
    let job = PriceFeedUpdater::new(
        targets,
        Arc::new(rates),
        chain.clone(),
        config.price_feed.settings(),
    );
    Some(supervisor.spawn_job(
        Arc::new(job),
        config.price_feed.schedule(&config.scheduler),
    ))
}

fn spawn_liquidation_job(
    config: &KeeperConfig,
    chain: &Arc<dyn KeeperChain>,
    supervisor: &mut Supervisor,
) -> Option<JobHandle> {
    if !config.liquidation.enabled {
        info!("Liquidation job disabled");
        return None;
    }

    let pool = match config.liquidation.pool_address() {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "Liquidation job not started");
            return None;
        }
    };

    info!(pool = %pool, "Liquidation job configured");
    let job = LiquidationJob::new(chain.clone(), pool);
    Some(supervisor.spawn_job(
        Arc::new(job),
        config.liquidation.schedule(&config.scheduler),
    ))
}

/// Block until Ctrl-C or SIGTERM.
///
/// On unix, SIGUSR1 and SIGUSR2 queue a manual price-feed and liquidation
/// cycle respectively.
async fn wait_for_shutdown(price_job: Option<&JobHandle>, liquidation_job: Option<&JobHandle>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut term, mut usr1, mut usr2) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::user_defined1()),
            signal(SignalKind::user_defined2()),
        ) {
            (Ok(term), Ok(usr1), Ok(usr2)) => (term, usr1, usr2),
            _ => {
                warn!("Unix signal handlers unavailable, only Ctrl-C stops the keeper");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return,
                _ = term.recv() => return,
                _ = usr1.recv() => trigger(price_job),
                _ = usr2.recv() => trigger(liquidation_job),
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (price_job, liquidation_job);
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(unix)]
fn trigger(job: Option<&JobHandle>) {
    match job {
        Some(job) => {
            let ack = job.trigger();
            info!(job = %job.name(), ack = ?ack, "Manual cycle requested");
        }
        None => warn!("Manual cycle requested for a job that is not running"),
    }
}

/// Print startup banner.
fn print_banner() {
    println!(
        r#"
    ╦╔═┌─┐┌─┐┌─┐┌─┐┬─┐
    ╠╩╗├┤ ├┤ ├─┘├┤ ├┬┘
    ╩ ╩└─┘└─┘┴  └─┘┴└─
    Lisk Sepolia Keeper v0.1.0
    "#
    );
}
