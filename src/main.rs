//! tickwatch - concentrated-liquidity range monitor
//!
//! Run with: cargo run
//!
//! Polls the position registry for a wallet's concentrated-liquidity
//! positions, checks each range against the pool's current tick and
//! pushes alerts on in-range/out-of-range and staked/unstaked
//! transitions. One cycle = fetch positions, resolve pools, evaluate
//! transitions, notify.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use alloy_primitives::Address;
use clap::Parser;
use color_eyre::eyre::Result;
use console::style;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cache;
mod config;
mod endpoints;
mod fetcher;
mod monitor;
mod notify;
mod rpc;

use config::Config;
use endpoints::EndpointRotation;
use fetcher::{PoolResolver, PositionFetcher};
use monitor::{Monitor, PositionStatus};
use notify::PushClient;
use rpc::{BatchExecutor, RateLimiter};

#[derive(Parser, Debug)]
#[command(name = "tickwatch", about = "Concentrated-liquidity range monitor")]
struct Cli {
    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,

    /// Load configuration from a TOML file instead of the environment
    #[arg(long)]
    config: Option<PathBuf>,
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 📡 TICKWATCH - Concentrated-Liquidity Range Monitor").cyan().bold()
    );
    println!(
        "{}",
        style("    Batched RPC | TTL Cache | Cooldown-Gated Alerts").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tickwatch=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    print_banner();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    if let Err(e) = config.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        tracing::error!("Please check your .env file");
        return Err(e);
    }

    config.print_summary();
    println!();

    let wallet = config.wallet()?;
    let registry = config.registry()?;

    let mut runner = CycleRunner::new(&config, wallet, registry);

    if cli.once {
        runner.run_cycle().await;
        return Ok(());
    }

    let mut interval = tokio::time::interval(config.poll_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(
        "Monitoring {:?} every {} ms (ctrl-c to stop)",
        wallet, config.poll_interval_ms
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, stopping monitor");
                break;
            }
            _ = interval.tick() => {
                runner.run_cycle().await;
            }
        }
    }

    Ok(())
}

// ============================================
// CYCLE RUNNER
// ============================================

/// Owns every component for the poll loop; one instance per process.
struct CycleRunner {
    wallet: Address,
    endpoints: EndpointRotation,
    executor: BatchExecutor,
    fetcher: PositionFetcher,
    resolver: PoolResolver,
    monitor: Monitor,
    notifier: PushClient,
    summary_sent: bool,
    cycle: u64,
}

impl CycleRunner {
    fn new(config: &Config, wallet: Address, registry: Address) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.min_call_delay(),
            config.max_retries,
        ));
        let endpoints = EndpointRotation::new(
            config.rpc_url.clone(),
            config.backup_rpc_urls.clone(),
        );
        let executor = BatchExecutor::new(
            endpoints.current().to_string(),
            config.batch_chunk_size,
            limiter,
        );
        let alert_log = if config.alert_log_path.is_empty() {
            None
        } else {
            Some(PathBuf::from(&config.alert_log_path))
        };

        Self {
            wallet,
            endpoints,
            executor,
            fetcher: PositionFetcher::new(registry, config.max_pool_scan),
            resolver: PoolResolver::new(config.cache_ttl()),
            monitor: Monitor::new(config.alert_cooldown()),
            notifier: PushClient::new(
                config.pushover_token.clone(),
                config.pushover_user.clone(),
                alert_log,
            ),
            summary_sent: false,
            cycle: 0,
        }
    }

    /// One full poll cycle. Every failure inside is degraded, logged
    /// and survived - the next tick gets a fresh chance.
    async fn run_cycle(&mut self) {
        self.cycle += 1;
        let start = Instant::now();

        // Fetch positions
        let report = self.fetcher.fetch(&self.executor, self.wallet).await;
        if report.all_pages_failed() {
            warn!("Entire fetch plan failed, rotating RPC endpoint");
            let url = self.endpoints.advance().to_string();
            self.executor.set_url(url);
            return;
        }

        let cl_positions: Vec<_> = report
            .positions
            .iter()
            .filter(|p| p.tick_lower < p.tick_upper)
            .collect();

        // Resolve pools for the concentrated positions
        let pool_addresses: Vec<Address> = cl_positions.iter().map(|p| p.pool).collect();
        let pools = self.resolver.resolve(&self.executor, &pool_addresses).await;

        // Join into statuses; a pool missing from the map is
        // temporarily unavailable, skip its positions this cycle
        let mut statuses: Vec<PositionStatus> = Vec::new();
        for &position in &cl_positions {
            match pools.get(&position.pool) {
                Some(pool) => statuses.push(PositionStatus::from_parts(position, pool)),
                None => warn!(
                    "Skipping position {} this cycle: pool {:?} unavailable",
                    position.id, position.pool
                ),
            }
        }

        if !self.summary_sent {
            let summary =
                Monitor::startup_summary(self.wallet, report.positions.len(), &statuses);
            self.notifier.send_startup_summary(&summary).await;
            self.summary_sent = true;
        }

        // Evaluate transitions and ship alerts
        let alerts = self.monitor.evaluate(&statuses);
        for alert in &alerts {
            self.notifier.send_alert(alert).await;
        }

        let in_range = statuses.iter().filter(|s| s.in_range).count();
        println!(
            "{} cycle {} | {} positions ({} in range) | {} pools cached | {} alerts | {:?}",
            style("✓").green(),
            self.cycle,
            statuses.len(),
            in_range,
            self.resolver.cached_pools(),
            alerts.len(),
            start.elapsed()
        );
    }
}
