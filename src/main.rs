use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use cadence::campaign::CampaignService;
use cadence::config::Config;
use cadence::metrics::PerformanceScorer;
use cadence::models::{CampaignSpec, Channel, Frequency};
use cadence::optimizer::{RebalanceOutcome, RebalanceReason, RebalanceTrigger};
use cadence::orchestrator::Orchestrator;
use cadence::publish::{MockMetricsProvider, MockPublisher};
use cadence::scheduler::ScheduleGenerator;
use cadence::storage::Database;

#[derive(Parser)]
#[command(
    name = "cadence",
    version,
    about = "Recurring campaign scheduler with performance-driven budget orchestration",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Configuration file (TOML); environment variables otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run,

    /// Print the occurrence timetable for given schedule parameters
    Preview {
        /// Repeat frequency (daily, weekly, monthly, none)
        #[arg(short, long)]
        frequency: String,

        /// Start time (RFC 3339); defaults to now
        #[arg(short, long)]
        start: Option<String>,

        /// Planning horizon in months
        #[arg(long, default_value = "6")]
        horizon: u32,
    },

    /// Run one budget rebalance pass over active campaigns
    Rebalance,

    /// Print performance scores for all campaigns
    Score {
        /// Scoring window in days
        #[arg(short, long, default_value = "7")]
        window: i64,
    },

    /// Seed a demo campaign portfolio and run the scheduler
    Demo {
        /// Number of campaigns to seed
        #[arg(short, long, default_value = "3")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    init_tracing(&config, cli.verbose, &cli.log_format);

    match cli.command {
        Commands::Run => run(config, 0).await,
        Commands::Preview {
            frequency,
            start,
            horizon,
        } => preview(&frequency, start.as_deref(), horizon),
        Commands::Rebalance => rebalance(config).await,
        Commands::Score { window } => score(config, window),
        Commands::Demo { count } => run(config, count).await,
    }
}

fn init_tracing(config: &Config, verbose: bool, format_flag: &str) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let format = if format_flag != "text" {
        format_flag
    } else {
        config.logging.format.as_str()
    };

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Start the orchestrator (optionally seeding a demo portfolio first) and
/// run until ctrl-c
async fn run(config: Config, seed_campaigns: usize) -> Result<()> {
    let db = Arc::new(Database::open(&config.database.path)?);

    let orchestrator = Orchestrator::new(
        config,
        db,
        Arc::new(MockPublisher::new()),
        Arc::new(MockMetricsProvider::new()),
    );

    if seed_campaigns > 0 {
        seed_demo_portfolio(orchestrator.service(), seed_campaigns).await?;
    }

    orchestrator.start().await?;
    tracing::info!("Scheduler running; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    orchestrator.shutdown().await;
    println!("Total accumulated reach: {:.0}", orchestrator.reach_total());
    Ok(())
}

fn preview(frequency: &str, start: Option<&str>, horizon: u32) -> Result<()> {
    let frequency: Frequency = frequency
        .parse()
        .map_err(|_| cadence::scheduler::SchedulerError::invalid_frequency(frequency))?;
    let start = match start {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .context("start must be an RFC 3339 timestamp")?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let occurrences = ScheduleGenerator::new().generate(start, frequency, horizon)?;

    println!("{} occurrences over {horizon} month(s):", occurrences.len());
    for (i, ts) in occurrences.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, ts.to_rfc3339());
    }
    Ok(())
}

async fn rebalance(config: Config) -> Result<()> {
    let db = Arc::new(Database::open(&config.database.path)?);
    let scorer = PerformanceScorer::new(Arc::clone(&db), config.metrics.clone());
    let trigger = RebalanceTrigger::new(Arc::clone(&db), scorer, config.budget);

    let outcome = trigger.rebalance(RebalanceReason::Manual).await?;

    match outcome {
        RebalanceOutcome::Applied { changes, held } => {
            println!("Applied {} change(s), held {held} below threshold", changes.len());
            for change in changes {
                println!(
                    "  {}: {:.2} -> {:.2}",
                    change.campaign_id, change.previous, change.new
                );
            }
        }
        RebalanceOutcome::Skipped { reason } => {
            println!("Rebalance skipped: {reason}");
        }
    }
    Ok(())
}

fn score(config: Config, window: i64) -> Result<()> {
    let db = Arc::new(Database::open(&config.database.path)?);
    let scorer = PerformanceScorer::new(Arc::clone(&db), config.metrics.clone());

    let campaigns = db.list_campaigns()?;
    if campaigns.is_empty() {
        println!("No campaigns found");
        return Ok(());
    }

    println!("{:<38} {:<10} {:<8} score", "campaign", "channel", "status");
    for campaign in campaigns {
        let value = scorer.score(campaign.id, window)?;
        println!(
            "{:<38} {:<10} {:<8} {value:.4}",
            campaign.name, campaign.channel, campaign.status
        );
    }
    Ok(())
}

/// Seed a small portfolio spread across channels and cadences
async fn seed_demo_portfolio(service: &CampaignService, count: usize) -> Result<()> {
    let channels = Channel::ALL;
    let frequencies = [Frequency::Daily, Frequency::Weekly, Frequency::Monthly];
    let names = [
        "spring-awakening",
        "loyalty-winback",
        "new-arrivals",
        "clearance-countdown",
        "vip-preview",
        "weekend-flash",
    ];

    let mut created = Vec::new();
    for i in 0..count {
        let campaign = service.create_campaign(CampaignSpec {
            name: names[i % names.len()].to_string(),
            product_id: Some(Uuid::new_v4()),
            channel: channels[i % channels.len()],
            frequency: frequencies[i % frequencies.len()],
            start_time: Utc::now() + chrono::Duration::seconds(5 + i as i64 * 10),
            budget: 0.0,
        })?;
        created.push(campaign.id);
    }

    for id in created {
        service.activate_campaign(id).await?;
    }

    tracing::info!(count, "Seeded demo portfolio");
    Ok(())
}
