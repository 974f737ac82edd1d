//! One scraping pass over every registered source.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lexcura_adapters::{AdapterRun, SourceAdapter};
use lexcura_core::{ScrapeSession, SessionStatus};
use lexcura_storage::{ContentStore, HttpFetcher};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub source: String,
    pub scraped: u32,
    pub saved: u32,
    pub errors: u32,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub total_scraped: u32,
    pub total_saved: u32,
    pub sources: Vec<SourceResult>,
    pub errors: Vec<String>,
}

impl ScrapeSummary {
    pub fn success_rate(&self) -> f64 {
        f64::from(self.total_saved) / f64::from(self.total_scraped.max(1))
    }
}

pub struct Orchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    http: Arc<HttpFetcher>,
    store: ContentStore,
}

impl Orchestrator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, http: HttpFetcher, store: ContentStore) -> Self {
        Self {
            adapters,
            http: Arc::new(http),
            store,
        }
    }

    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.source_name()).collect()
    }

    /// Scrape every source with up to `limit` candidates each. Never fails:
    /// adapter, panic and persistence problems end up in the summary.
    pub async fn run(&self, limit: usize) -> ScrapeSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, sources = self.adapters.len(), limit, "scrape run started");

        let mut sources = Vec::with_capacity(self.adapters.len());
        let mut errors = Vec::new();
        let mut total_scraped = 0u32;
        let mut total_saved = 0u32;

        for adapter in &self.adapters {
            let result = self.run_adapter(Arc::clone(adapter), limit, &mut errors).await;
            total_scraped += result.scraped;
            total_saved += result.saved;
            sources.push(result);
        }

        let finished_at = Utc::now();
        let duration_secs = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
        info!(
            %run_id,
            total_scraped,
            total_saved,
            errors = errors.len(),
            duration_secs,
            "scrape run finished"
        );

        ScrapeSummary {
            run_id,
            started_at,
            finished_at,
            duration_secs,
            total_scraped,
            total_saved,
            sources,
            errors,
        }
    }

    async fn run_adapter(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        limit: usize,
        run_errors: &mut Vec<String>,
    ) -> SourceResult {
        let source = adapter.source_name();
        let started_at = Utc::now();
        let http = Arc::clone(&self.http);

        let outcome = tokio::spawn(async move { adapter.fetch(&http, limit).await }).await;
        let (run, status, detail) = match outcome {
            Ok(Ok(run)) => (run, SessionStatus::Completed, String::new()),
            Ok(Err(err)) => {
                error!(source, error = %err, "adapter failed");
                let msg = format!("Error in {source}: {err}");
                let run = AdapterRun {
                    errors: vec![msg.clone()],
                    ..Default::default()
                };
                (run, SessionStatus::Failed, msg)
            }
            Err(join_err) => {
                error!(source, error = %join_err, "adapter task aborted");
                let msg = format!("Error in {source}: {join_err}");
                let run = AdapterRun {
                    errors: vec![msg.clone()],
                    ..Default::default()
                };
                (run, SessionStatus::Failed, msg)
            }
        };

        let AdapterRun { records, mut errors } = run;
        let scraped = records.len() as u32;
        let mut saved = 0u32;
        for record in &records {
            match self.store.save(record).await {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(source, url = %record.url, error = %err, "saving record failed");
                    errors.push(format!("Error saving {}: {err}", record.url));
                }
            }
        }

        let session = ScrapeSession {
            id: None,
            source: source.to_string(),
            started_at,
            finished_at: Utc::now(),
            status,
            items_scraped: scraped,
            items_saved: saved,
            errors: errors.clone(),
            detail,
        };
        if let Err(err) = self.store.record_session(&session).await {
            error!(source, error = %err, "recording scrape session failed");
        }
        info!(source, scraped, saved, errors = errors.len(), status = status.as_str(), "source done");

        let result = SourceResult {
            source: source.to_string(),
            scraped,
            saved,
            errors: errors.len() as u32,
            status,
        };
        run_errors.extend(errors);
        result
    }
}
