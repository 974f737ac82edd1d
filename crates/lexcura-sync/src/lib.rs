//! Scrape orchestration, curation scheduling and run notifications.

pub mod config;
pub mod notify;
pub mod orchestrator;
pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lexcura_adapters::{default_adapters, SourceAdapter};
use lexcura_curation::{
    CurationProcessor, CurationRules, DisabledAnalyzer, GeminiAnalyzer, RuleSet, TextAnalyzer,
};
use lexcura_storage::{BackoffPolicy, ContentStore, HttpClientConfig, HttpFetcher};
use tracing::info;

pub use config::{AppConfig, ConfigError, SchedulerConfig};
pub use notify::{HttpWebhook, Mailer, NotifyError, SmtpMailer, WebhookPoster};
pub use orchestrator::{Orchestrator, ScrapeSummary, SourceResult};
pub use scheduler::{
    HealthReport, JobKind, JobOutcome, JobState, MaintenanceReport, RunReport, RunStatus, Scheduler,
    SchedulerError, SchedulerStatus,
};

pub const CRATE_NAME: &str = "lexcura-sync";

/// Every built-in source as a shareable trait object.
pub fn source_adapters() -> Vec<Arc<dyn SourceAdapter>> {
    default_adapters()
        .into_iter()
        .map(|adapter| Arc::new(adapter) as Arc<dyn SourceAdapter>)
        .collect()
}

pub fn http_fetcher(app: &AppConfig, scheduler: &SchedulerConfig) -> Result<HttpFetcher> {
    HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(app.http_timeout_secs),
        user_agent: app.user_agent.clone(),
        backoff: BackoffPolicy {
            max_retries: scheduler.scraping.max_retries as usize,
            ..Default::default()
        },
    })
}

pub fn load_rules(app: &AppConfig) -> Result<RuleSet> {
    let rules = match &app.rules_path {
        Some(path) => CurationRules::from_path(path)
            .with_context(|| format!("loading curation rules from {}", path.display()))?,
        None => CurationRules::builtin().context("loading builtin curation rules")?,
    };
    RuleSet::compile(&rules).context("compiling curation rules")
}

pub fn text_analyzer(app: &AppConfig) -> Result<Arc<dyn TextAnalyzer>> {
    match &app.gemini_api_key {
        Some(key) => {
            let analyzer = GeminiAnalyzer::new(
                key.clone(),
                app.gemini_model.clone(),
                Duration::from_secs(app.http_timeout_secs),
            )?;
            info!(model = %app.gemini_model, "ai enhancement enabled");
            Ok(Arc::new(analyzer))
        }
        None => {
            info!("no GEMINI_API_KEY; ai enhancement disabled");
            Ok(Arc::new(DisabledAnalyzer))
        }
    }
}

pub async fn open_store(app: &AppConfig) -> Result<ContentStore> {
    ContentStore::open(&app.db_path)
        .await
        .with_context(|| format!("opening content store at {}", app.db_path.display()))
}

/// Load the scheduler document named by `app` and wire everything up.
pub async fn scheduler_from_config(app: &AppConfig) -> Result<Scheduler> {
    let config = SchedulerConfig::load(&app.config_path).await;
    build_scheduler(app, config).await
}

/// Wire store, sources, curation and notifications into a scheduler.
pub async fn build_scheduler(app: &AppConfig, config: SchedulerConfig) -> Result<Scheduler> {
    let store = open_store(app).await?;
    let http = http_fetcher(app, &config)?;
    let orchestrator = Orchestrator::new(source_adapters(), http, store.clone());
    let processor = CurationProcessor::new(
        store.clone(),
        Arc::new(load_rules(app)?),
        text_analyzer(app)?,
    );

    let scheduler = Scheduler::builder(config, store, orchestrator, processor)
        .log_dir(&app.log_dir)
        .backup_dir(&app.backup_dir)
        .build()
        .context("building scheduler")?;
    Ok(scheduler)
}
