use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lexcura_curation::CurationProcessor;
use lexcura_storage::JsonLinesLog;
use lexcura_sync::{AppConfig, SchedulerConfig};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "lexcura")]
#[command(about = "Brazilian legal text collection and curation")]
struct Cli {
    /// Scheduler config document (overrides LEXCURA_CONFIG_PATH).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape every source once, then purge and curate per config.
    RunOnce {
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Curate records that have not been processed yet.
    Process {
        #[arg(long)]
        max_records: Option<u32>,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    HealthCheck,
    /// Retention purge plus backup.
    Maintenance,
    Stats,
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Append processed records above a quality bar as JSON lines.
    ExportTraining {
        output: PathBuf,
        #[arg(long, default_value_t = 1000)]
        limit: u32,
        #[arg(long, default_value_t = 0.5)]
        min_quality: f64,
    },
    /// Run the cron scheduler until Ctrl+C.
    Start,
}

fn init_tracing(json: bool) {
    let filter = std::env::var("LEXCURA_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut app = AppConfig::from_env();
    if let Some(path) = cli.config {
        app.config_path = path;
    }
    let mut config = SchedulerConfig::load(&app.config_path).await;

    match cli.command.unwrap_or(Commands::RunOnce { limit: None }) {
        Commands::RunOnce { limit } => {
            if let Some(limit) = limit {
                config.scraping.limit_per_scraper = limit;
            }
            let scheduler = lexcura_sync::build_scheduler(&app, config).await?;
            let report = scheduler.run_scraping_now().await?;
            match &report.scrape {
                Some(scrape) => println!(
                    "scraping completed: {} scraped, {} saved, {} alerts",
                    scrape.total_scraped,
                    scrape.total_saved,
                    report.alerts.len()
                ),
                None => println!(
                    "scraping failed: {}",
                    report.error.as_deref().unwrap_or("unknown error")
                ),
            }
        }
        Commands::Process {
            max_records,
            batch_size,
        } => {
            if let Some(max_records) = max_records {
                config.processing.max_records = max_records;
            }
            if let Some(batch_size) = batch_size {
                config.processing.batch_size = batch_size.max(1);
            }
            let scheduler = lexcura_sync::build_scheduler(&app, config).await?;
            let summary = scheduler.run_processing_now().await?;
            print_json(&summary)?;
        }
        Commands::HealthCheck => {
            let scheduler = lexcura_sync::build_scheduler(&app, config).await?;
            print_json(&scheduler.health_check().await?)?;
        }
        Commands::Maintenance => {
            let scheduler = lexcura_sync::build_scheduler(&app, config).await?;
            print_json(&scheduler.maintenance().await?)?;
        }
        Commands::Stats => {
            let store = lexcura_sync::open_store(&app).await?;
            let processor = CurationProcessor::new(
                store.clone(),
                Arc::new(lexcura_sync::load_rules(&app)?),
                lexcura_sync::text_analyzer(&app)?,
            );
            let store_stats = store.stats().await?;
            let processing = processor.processing_stats().await?;
            let sessions = store.recent_sessions(10).await?;
            print_json(&json!({
                "store": store_stats,
                "processing": processing,
                "recent_sessions": sessions,
            }))?;
        }
        Commands::Search { query, limit } => {
            let store = lexcura_sync::open_store(&app).await?;
            for record in store.search(&query, limit).await? {
                println!(
                    "[{}] {} | {} | {:.2} | {}",
                    record.id.unwrap_or_default(),
                    record.source,
                    record.category,
                    record.quality_score(),
                    record.title
                );
            }
        }
        Commands::ExportTraining {
            output,
            limit,
            min_quality,
        } => {
            let store = lexcura_sync::open_store(&app).await?;
            let processor = CurationProcessor::new(
                store,
                Arc::new(lexcura_sync::load_rules(&app)?),
                lexcura_sync::text_analyzer(&app)?,
            );
            let examples = processor.training_examples(limit, min_quality).await?;
            let sink = JsonLinesLog::new(&output);
            for example in &examples {
                sink.append(example).await?;
            }
            println!("exported {} examples to {}", examples.len(), output.display());
        }
        Commands::Start => {
            let scheduler = lexcura_sync::build_scheduler(&app, config).await?;
            scheduler.start().await?;
            let status = scheduler.status().await;
            info!(next_run = ?status.next_scraping_run, jobs = status.job_count, "scheduler running");
            println!("scheduler started; press Ctrl+C to stop");

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            println!("stopping scheduler...");
            scheduler.stop().await?;
        }
    }

    Ok(())
}
