use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use futures::future::join_all;
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use flip_scout::adapters::AdapterRegistry;
use flip_scout::config::{self, Config};
use flip_scout::db;
use flip_scout::listing::SearchParams;
use flip_scout::model::{Condition, Platform};
use flip_scout::pipeline::{ScrapePipeline, ScrapeRequest};
use flip_scout::poster::RelayPoster;
use flip_scout::queue;
use flip_scout::store::SqliteStore;
use flip_scout::valuation::Estimator;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search one or more marketplaces, score results and store them
    Scrape(ScrapeArgs),
    /// Queue a stored listing for re-posting on other platforms
    Enqueue {
        listing_id: i64,
        /// Target platforms; the listing's own platform is dropped
        #[arg(required = true, num_args = 1..)]
        targets: Vec<Platform>,
    },
    /// Reschedule a failed posting
    Retry { id: String },
    /// Cancel a pending or failed posting
    Cancel { id: String },
    /// Delete a posting that is not in progress
    Delete { id: String },
    /// Move a stored listing along the reseller workflow
    Status {
        listing_id: i64,
        /// NEW, OPPORTUNITY, CONTACTED, PURCHASED, LISTED or SOLD
        status: String,
    },
    /// Process the posting queue until interrupted
    Worker,
}

#[derive(Debug, ClapArgs)]
struct ScrapeArgs {
    #[arg(long = "platform", required = true)]
    platforms: Vec<Platform>,
    #[arg(long)]
    keywords: String,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    min_price: Option<f64>,
    #[arg(long)]
    max_price: Option<f64>,
    #[arg(long, value_parser = parse_condition)]
    condition: Option<Condition>,
    #[arg(long, default_value_t = 25)]
    limit: usize,
}

fn parse_condition(s: &str) -> Result<Condition, String> {
    Condition::parse(s).ok_or_else(|| format!("unknown condition '{s}'"))
}

impl ScrapeArgs {
    fn params(&self) -> SearchParams {
        SearchParams {
            keywords: self.keywords.clone(),
            category: self.category.clone(),
            location: self.location.clone(),
            min_price: self.min_price,
            max_price: self.max_price,
            condition: self.condition,
            limit: self.limit,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(args.config.as_path()))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Scrape(scrape) => run_scrape(&cfg, pool, scrape).await,
        Command::Enqueue { listing_id, targets } => {
            let items =
                queue::enqueue_batch(&pool, listing_id, &targets, &cfg.queue_settings(), Utc::now()).await?;
            for item in items {
                println!("{}\t{}\t{}", item.id, item.target_platform, item.status);
            }
            Ok(())
        }
        Command::Retry { id } => {
            let item = queue::retry(&pool, &id, Utc::now()).await?;
            println!("{}\t{}\tretry {}", item.id, item.status, item.retry_count);
            Ok(())
        }
        Command::Cancel { id } => {
            let item = queue::cancel(&pool, &id, Utc::now()).await?;
            println!("{}\t{}", item.id, item.status);
            Ok(())
        }
        Command::Delete { id } => {
            queue::delete(&pool, &id).await?;
            println!("{id}\tdeleted");
            Ok(())
        }
        Command::Status { listing_id, status } => {
            let store = SqliteStore::new(pool);
            let status = store.set_listing_status(listing_id, &status).await?;
            println!("{listing_id}\t{}", status.as_str());
            Ok(())
        }
        Command::Worker => run_worker(&cfg, pool).await,
    }
}

async fn run_scrape(cfg: &Config, pool: db::Pool, args: ScrapeArgs) -> Result<()> {
    let registry = AdapterRegistry::from_config(&cfg.marketplaces)?;
    let store = Arc::new(SqliteStore::new(pool));
    let pipeline = ScrapePipeline::new(
        registry,
        store,
        Estimator::with_settings(cfg.valuation_settings()),
    );

    let params = args.params();
    let runs = args.platforms.iter().map(|&platform| {
        let request = ScrapeRequest {
            platform,
            params: params.clone(),
        };
        let pipeline = &pipeline;
        async move { (platform, pipeline.run(request).await) }
    });

    let mut failed = 0;
    for (platform, outcome) in join_all(runs).await {
        match outcome {
            Ok(report) if report.succeeded() => println!(
                "{platform}\tjob {}\t{} listings\t{} opportunities\t{} skipped",
                report.job.id, report.listings_found, report.opportunities_found, report.skipped
            ),
            Ok(report) => {
                failed += 1;
                let hint = report
                    .retry_after_secs
                    .map(|s| format!("\tretry after {s}s"))
                    .unwrap_or_default();
                println!(
                    "{platform}\tjob {}\tFAILED: {}{hint}",
                    report.job.id,
                    report.job.error_message.as_deref().unwrap_or_default()
                );
            }
            Err(err) => {
                failed += 1;
                println!("{platform}\trejected: {err}");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} scrape runs failed", args.platforms.len());
    }
    Ok(())
}

async fn run_worker(cfg: &Config, pool: db::Pool) -> Result<()> {
    let Some(relay_url) = cfg.posting.relay_url.as_deref() else {
        bail!("posting.relay_url must be set to run the worker");
    };
    let poster = RelayPoster::new(
        Url::parse(relay_url).context("invalid posting.relay_url")?,
        cfg.posting.relay_token.clone(),
    )?;
    let settings = cfg.queue_settings();
    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);

    info!("starting posting worker");
    let worker = async {
        loop {
            match queue::process_next(&pool, &poster, &settings, Utc::now()).await {
                Ok(processed) => {
                    if !processed {
                        tokio::time::sleep(poll_sleep).await;
                    }
                }
                Err(err) => {
                    error!(error = %err, "posting worker error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    };

    tokio::select! {
        _ = worker => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                warn!(?err, "failed to listen for ctrl-c");
            }
            info!("posting worker stopped");
        }
    }
    Ok(())
}
