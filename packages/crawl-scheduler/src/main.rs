//! Operator CLI for the crawl scheduler.
//!
//! ```text
//! crawl-scheduler migrate          apply schema migrations
//! crawl-scheduler seed <family>    record the dataset slice and insert jobs
//! crawl-scheduler run <family>     measure every outstanding job
//! crawl-scheduler status <family>  per-partition progress as JSON lines
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crawl_scheduler::classify::{SecurityHeaderSnapshot, SiteResolver};
use crawl_scheduler::executor::HttpCrawlExecutor;
use crawl_scheduler::network::{ContextManager, HmaVpnDriver, HttpEgressProbe, TorDriver};
use crawl_scheduler::seed::{self, Seeder};
use crawl_scheduler::stores::{FsContentStore, PostgresJobQueue, PostgresObservationSink};
use crawl_scheduler::traits::JobQueue;
use crawl_scheduler::types::Family;
use crawl_scheduler::{Config, CrawlDeps, SchedulerDriver};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "crawl-scheduler")]
#[command(about = "Repeated header measurements across network and presentation contexts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,

    /// Record the dataset slice and insert the family's jobs
    Seed { family: Family },

    /// Measure every outstanding job of the family
    Run { family: Family },

    /// Print per-partition progress
    Status { family: Family },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crawl_scheduler=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let queue = PostgresJobQueue::connect(&config.database_url, pool_size(&config))
        .await
        .context("Failed to connect to database")?;

    match cli.command {
        Commands::Migrate => queue.migrate().await?,
        Commands::Seed { family } => seed_family(&config, queue, family).await?,
        Commands::Run { family } => run_family(&config, queue, family).await?,
        Commands::Status { family } => print_status(&queue, family).await?,
    }

    Ok(())
}

/// Every worker holds one connection for its claim and briefly a second one
/// for observation writes.
fn pool_size(config: &Config) -> u32 {
    (config.num_processes as u32).saturating_mul(2).saturating_add(2)
}

async fn seed_family(config: &Config, queue: PostgresJobQueue, family: Family) -> Result<()> {
    let urls = seed::read_dataset(&config.domains_file, config.url_lower, config.num_domains)
        .await
        .with_context(|| format!("Failed to read {}", config.domains_file.display()))?;

    let dimensions = match family {
        Family::Browser => seed::browser_dimensions(),
        Family::Client => seed::client_dimensions(),
        Family::Onion => {
            seed::fetch_onion_dimensions(&reqwest::Client::new(), seed::EXIT_RELAYS_URL)
                .await
                .context("Failed to list exit relay countries")?
        }
        Family::Vpn => {
            let servers = HmaVpnDriver::new(config.vpn_dir.clone())
                .list_servers()
                .await
                .context("Failed to list VPN servers")?;
            seed::vpn_dimensions(&servers)
        }
    };

    let seeder = Seeder::new(Arc::new(queue), Arc::new(SiteResolver::default()));
    seeder.seed_dataset(&urls).await?;
    let inserted = seeder.seed_family(family, &urls, &dimensions).await?;
    tracing::info!(family = %family, inserted, "seed complete");
    Ok(())
}

async fn run_family(config: &Config, queue: PostgresJobQueue, family: Family) -> Result<()> {
    let store = Arc::new(FsContentStore::new(config.data_directory.clone()));
    let deps = CrawlDeps {
        sink: Arc::new(PostgresObservationSink::new(queue.pool().clone())),
        queue: Arc::new(queue),
        executor: Arc::new(HttpCrawlExecutor::new(config.executor_config(), store)),
        classifier: Arc::new(SecurityHeaderSnapshot),
        sites: Arc::new(SiteResolver::default()),
    };

    let contexts = ContextManager::new(Arc::new(HttpEgressProbe::default()), config.retry_policy())
        .with_vpn_driver(Arc::new(HmaVpnDriver::new(config.vpn_dir.clone())))
        .with_anonymity_driver(Arc::new(TorDriver::new(
            config.torrc_path.clone(),
            config.tor_socks_proxy.clone(),
        )))
        .with_alert_webhook(config.alert_webhook_url.clone());

    let driver = SchedulerDriver::new(config.driver_config(), deps, Arc::new(contexts));
    let report = driver.run_family(family).await?;
    tracing::info!(
        family = %family,
        slices_run = report.slices_run,
        slices_failed = report.slices_failed,
        observations = report.workers.observations,
        "run complete"
    );
    Ok(())
}

async fn print_status(queue: &PostgresJobQueue, family: Family) -> Result<()> {
    for summary in queue.summarize(family).await? {
        println!("{}", serde_json::to_string(&summary)?);
    }
    Ok(())
}
