//! Cron-driven jobs (weekly scraping, daily health check, weekly maintenance)
//! plus fire-and-forget manual triggers.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use lexcura_curation::{CurationProcessor, ProcessingSummary};
use lexcura_storage::{ContentStore, JsonLinesLog};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, SchedulerConfig};
use crate::notify::{alert_email, webhook_payload, HttpWebhook, Mailer, NotifyError, SmtpMailer, WebhookPoster};
use crate::orchestrator::{Orchestrator, ScrapeSummary};

/// Daily at 06:00, seconds-first.
pub const HEALTH_CHECK_CRON: &str = "0 0 6 * * *";
/// Sundays at 01:00.
pub const MAINTENANCE_CRON: &str = "0 0 1 * * SUN";

pub const RUN_LOG_FILE: &str = "scraping_runs.jsonl";
pub const HEALTH_LOG_FILE: &str = "health_checks.jsonl";

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);
/// Finished manual jobs remembered for `job_state`; older ones are forgotten.
const FINISHED_JOBS_KEPT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Scraping,
    Processing,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Scraping => f.write_str("scraping"),
            JobKind::Processing => f.write_str("processing"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cron scheduler: {0}")]
    Cron(#[from] JobSchedulerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("a {0} run is already in progress")]
    JobInProgress(JobKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Result of one scraping job, as written to the run log and sent to webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub job_start: DateTime<Utc>,
    pub job_end: DateTime<Utc>,
    pub scrape: Option<ScrapeSummary>,
    pub purged_records: Option<u64>,
    pub processing: Option<ProcessingSummary>,
    pub success_rate: f64,
    pub alerts: Vec<String>,
    pub error: Option<String>,
}

impl RunReport {
    fn failed(job_start: DateTime<Utc>, error: String) -> Self {
        Self {
            status: RunStatus::Failed,
            job_start,
            job_end: Utc::now(),
            scrape: None,
            purged_records: None,
            processing: None,
            success_rate: 0.0,
            alerts: vec![error.clone()],
            error: Some(error),
        }
    }

    /// Keep the counts of a scrape that finished before the job failed.
    fn with_scrape(mut self, scrape: ScrapeSummary) -> Self {
        self.success_rate = scrape.success_rate();
        self.scrape = Some(scrape);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub database_status: String,
    pub recent_activity: String,
    pub total_documents: u64,
    pub recent_documents: u64,
    pub sources_active: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub timestamp: DateTime<Utc>,
    pub deleted_records: u64,
    pub backup_created: bool,
    pub backup_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum JobOutcome {
    Scraping(RunReport),
    Processing(ProcessingSummary),
}

#[derive(Debug, Clone)]
pub enum JobState {
    Running(JobKind),
    Finished(JobOutcome),
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub next_scraping_run: Option<DateTime<Utc>>,
    pub last_run: Option<RunReport>,
    pub config: SchedulerConfig,
    pub job_count: usize,
}

#[derive(Default)]
struct JobTable {
    states: HashMap<Uuid, JobState>,
    finished: VecDeque<Uuid>,
}

impl JobTable {
    fn begin(&mut self, id: Uuid, kind: JobKind) {
        self.states.insert(id, JobState::Running(kind));
    }

    fn finish(&mut self, id: Uuid, outcome: JobOutcome) {
        self.states.insert(id, JobState::Finished(outcome));
        self.finished.push_back(id);
        while self.finished.len() > FINISHED_JOBS_KEPT {
            if let Some(old) = self.finished.pop_front() {
                self.states.remove(&old);
            }
        }
    }

    fn get(&self, id: Uuid) -> Option<JobState> {
        self.states.get(&id).cloned()
    }
}

/// Holds a per-kind "run in progress" flag; released on drop.
struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct CronHandle {
    sched: JobScheduler,
    scraping_job: Uuid,
    job_count: usize,
}

struct Inner {
    config: SchedulerConfig,
    store: ContentStore,
    orchestrator: Orchestrator,
    processor: CurationProcessor,
    mailer: Option<Arc<dyn Mailer>>,
    webhook: Arc<dyn WebhookPoster>,
    run_log: JsonLinesLog,
    health_log: JsonLinesLog,
    backup_dir: PathBuf,
    scraping: Arc<AtomicBool>,
    processing: Arc<AtomicBool>,
    jobs: Mutex<JobTable>,
    last_run: Mutex<Option<RunReport>>,
    cron: tokio::sync::Mutex<Option<CronHandle>>,
}

pub struct SchedulerBuilder {
    config: SchedulerConfig,
    store: ContentStore,
    orchestrator: Orchestrator,
    processor: CurationProcessor,
    mailer: Option<Arc<dyn Mailer>>,
    webhook: Option<Arc<dyn WebhookPoster>>,
    log_dir: PathBuf,
    backup_dir: PathBuf,
}

impl SchedulerBuilder {
    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn webhook(mut self, webhook: Arc<dyn WebhookPoster>) -> Self {
        self.webhook = Some(webhook);
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    pub fn build(self) -> Result<Scheduler, NotifyError> {
        let mailer = match self.mailer {
            Some(mailer) => Some(mailer),
            None if self.config.email.is_complete() => match SmtpMailer::from_config(&self.config.email) {
                Ok(mailer) => Some(Arc::new(mailer) as Arc<dyn Mailer>),
                Err(err) => {
                    warn!(error = %err, "smtp mailer unavailable; email alerts disabled");
                    None
                }
            },
            None => None,
        };
        let webhook: Arc<dyn WebhookPoster> = match self.webhook {
            Some(webhook) => webhook,
            None => Arc::new(HttpWebhook::new(WEBHOOK_TIMEOUT)?),
        };

        Ok(Scheduler {
            inner: Arc::new(Inner {
                config: self.config,
                store: self.store,
                orchestrator: self.orchestrator,
                processor: self.processor,
                mailer,
                webhook,
                run_log: JsonLinesLog::new(self.log_dir.join(RUN_LOG_FILE)),
                health_log: JsonLinesLog::new(self.log_dir.join(HEALTH_LOG_FILE)),
                backup_dir: self.backup_dir,
                scraping: Arc::new(AtomicBool::new(false)),
                processing: Arc::new(AtomicBool::new(false)),
                jobs: Mutex::new(JobTable::default()),
                last_run: Mutex::new(None),
                cron: tokio::sync::Mutex::new(None),
            }),
        })
    }
}

/// Cheap to clone; every clone drives the same jobs.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn builder(
        config: SchedulerConfig,
        store: ContentStore,
        orchestrator: Orchestrator,
        processor: CurationProcessor,
    ) -> SchedulerBuilder {
        SchedulerBuilder {
            config,
            store,
            orchestrator,
            processor,
            mailer: None,
            webhook: None,
            log_dir: PathBuf::from("logs"),
            backup_dir: PathBuf::from("backups"),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Register the three cron jobs and start polling. A second call is a no-op.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut cron = self.inner.cron.lock().await;
        if cron.is_some() {
            warn!("scheduler is already running");
            return Ok(());
        }

        let schedule = &self.inner.config.schedule;
        let tz = schedule.tz()?;
        let weekly = schedule.weekly_cron()?;
        let sched = JobScheduler::new().await?;

        let inner = Arc::clone(&self.inner);
        let scraping = Job::new_async_tz(weekly.as_str(), tz, move |_uuid, _l| {
            let inner = Arc::clone(&inner);
            Box::pin(async move {
                match RunGuard::try_acquire(&inner.scraping) {
                    Some(guard) => {
                        inner.scraping_job(guard).await;
                    }
                    None => warn!("previous scraping run still in progress; skipping scheduled run"),
                }
            })
        })?;
        let scraping_job = sched.add(scraping).await?;

        let inner = Arc::clone(&self.inner);
        let health = Job::new_async_tz(HEALTH_CHECK_CRON, tz, move |_uuid, _l| {
            let inner = Arc::clone(&inner);
            Box::pin(async move {
                if let Err(err) = inner.health_check().await {
                    error!(error = %format!("{err:#}"), "health check failed");
                }
            })
        })?;
        sched.add(health).await?;

        let inner = Arc::clone(&self.inner);
        let maintenance = Job::new_async_tz(MAINTENANCE_CRON, tz, move |_uuid, _l| {
            let inner = Arc::clone(&inner);
            Box::pin(async move {
                if let Err(err) = inner.maintenance().await {
                    error!(error = %format!("{err:#}"), "database maintenance failed");
                }
            })
        })?;
        sched.add(maintenance).await?;

        sched.start().await?;
        info!(
            day = %schedule.day_of_week,
            time = %schedule.time,
            timezone = %schedule.timezone,
            "scheduler started"
        );
        *cron = Some(CronHandle {
            sched,
            scraping_job,
            job_count: 3,
        });
        Ok(())
    }

    /// Stop triggering new runs. In-flight jobs finish on their own.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut cron = self.inner.cron.lock().await;
        let Some(mut handle) = cron.take() else {
            warn!("scheduler is not running");
            return Ok(());
        };
        handle.sched.shutdown().await?;
        info!("scheduler stopped");
        Ok(())
    }

    pub async fn status(&self) -> SchedulerStatus {
        let (running, next_scraping_run, job_count) = {
            let cron = self.inner.cron.lock().await;
            match cron.as_ref() {
                Some(handle) => {
                    let mut sched = handle.sched.clone();
                    let next = match sched.next_tick_for_job(handle.scraping_job).await {
                        Ok(next) => next,
                        Err(err) => {
                            warn!(error = %err, "could not read next scraping tick");
                            None
                        }
                    };
                    (true, next, handle.job_count)
                }
                None => (false, None, 0),
            }
        };
        SchedulerStatus {
            running,
            next_scraping_run,
            last_run: self.last_run(),
            config: self.inner.config.clone(),
            job_count,
        }
    }

    pub fn last_run(&self) -> Option<RunReport> {
        self.inner
            .last_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn job_state(&self, id: Uuid) -> Option<JobState> {
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
    }

    /// Start a scraping run in the background and return its job id.
    pub fn trigger_scraping(&self) -> Result<Uuid, SchedulerError> {
        let guard = RunGuard::try_acquire(&self.inner.scraping)
            .ok_or(SchedulerError::JobInProgress(JobKind::Scraping))?;
        let id = self.inner.begin(JobKind::Scraping);
        let started = Utc::now();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let job = Arc::clone(&inner);
            let report = match tokio::spawn(async move { job.scraping_job(guard).await }).await {
                Ok(report) => report,
                Err(err) => {
                    error!(job_id = %id, error = %err, "scraping job aborted");
                    RunReport::failed(started, format!("Scraping job failed: {err}"))
                }
            };
            inner.finish(id, JobOutcome::Scraping(report));
        });
        Ok(id)
    }

    pub fn trigger_processing(&self) -> Result<Uuid, SchedulerError> {
        let guard = RunGuard::try_acquire(&self.inner.processing)
            .ok_or(SchedulerError::JobInProgress(JobKind::Processing))?;
        let id = self.inner.begin(JobKind::Processing);
        let started = Utc::now();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let job = Arc::clone(&inner);
            let summary = match tokio::spawn(async move { job.processing_job(guard).await }).await {
                Ok(summary) => summary,
                Err(err) => {
                    error!(job_id = %id, error = %err, "processing job aborted");
                    ProcessingSummary {
                        started_at: started,
                        finished_at: Utc::now(),
                        total_found: 0,
                        processed: 0,
                        error_count: 1,
                        errors: vec![format!("Batch processing failed: {err}")],
                    }
                }
            };
            inner.finish(id, JobOutcome::Processing(summary));
        });
        Ok(id)
    }

    /// Run a scraping job on the caller's task.
    pub async fn run_scraping_now(&self) -> Result<RunReport, SchedulerError> {
        let guard = RunGuard::try_acquire(&self.inner.scraping)
            .ok_or(SchedulerError::JobInProgress(JobKind::Scraping))?;
        Ok(self.inner.scraping_job(guard).await)
    }

    pub async fn run_processing_now(&self) -> Result<ProcessingSummary, SchedulerError> {
        let guard = RunGuard::try_acquire(&self.inner.processing)
            .ok_or(SchedulerError::JobInProgress(JobKind::Processing))?;
        Ok(self.inner.processing_job(guard).await)
    }

    pub async fn health_check(&self) -> anyhow::Result<HealthReport> {
        self.inner.health_check().await
    }

    pub async fn maintenance(&self) -> anyhow::Result<MaintenanceReport> {
        self.inner.maintenance().await
    }
}

impl Inner {
    fn begin(&self, kind: JobKind) -> Uuid {
        let id = Uuid::new_v4();
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .begin(id, kind);
        info!(job_id = %id, %kind, "manual job started");
        id
    }

    fn finish(&self, id: Uuid, outcome: JobOutcome) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish(id, outcome);
        info!(job_id = %id, "manual job finished");
    }

    async fn scraping_job(&self, _guard: RunGuard) -> RunReport {
        let job_start = Utc::now();
        info!("scraping job started");

        let report = self.scraping_pass(job_start).await;

        *self.last_run.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());

        if !report.alerts.is_empty() && self.config.monitoring.email_notifications {
            self.send_alert_email(&report).await;
        }
        if let Some(url) = self.config.monitoring.webhook() {
            if let Err(err) = self.webhook.post(url, &webhook_payload(&report)).await {
                error!(url, error = %err, "webhook notification failed");
            }
        }
        if let Err(err) = self.run_log.append(&report).await {
            error!(error = %format!("{err:#}"), "saving run log failed");
        }

        match (&report.scrape, report.status) {
            (Some(scrape), RunStatus::Completed) => info!(
                scraped = scrape.total_scraped,
                saved = scrape.total_saved,
                alerts = report.alerts.len(),
                "scraping job completed"
            ),
            _ => info!(status = ?report.status, "scraping job ended"),
        }
        report
    }

    async fn scraping_pass(&self, job_start: DateTime<Utc>) -> RunReport {
        let limit = self.config.scraping.limit_per_scraper as usize;
        let scrape = self.orchestrator.run(limit).await;

        let purged_records = match self.retention_purge().await {
            Ok(purged) => purged,
            Err(err) => {
                let msg = format!("Scraping job failed: {err:#}");
                error!(error = %msg, "scraping job failed");
                return RunReport::failed(job_start, msg).with_scrape(scrape);
            }
        };

        let processing = if self.config.processing.enabled {
            match RunGuard::try_acquire(&self.processing) {
                Some(guard) => Some(self.processing_job(guard).await),
                None => {
                    warn!("curation already running; skipping post-scrape processing");
                    None
                }
            }
        } else {
            None
        };

        let success_rate = scrape.success_rate();
        let thresholds = &self.config.monitoring.alert_thresholds;
        let mut alerts = Vec::new();
        if success_rate < thresholds.min_success_rate {
            alerts.push(format!("Low success rate: {:.2}%", success_rate * 100.0));
        }
        if scrape.errors.len() > thresholds.max_error_count as usize {
            alerts.push(format!("High error count: {}", scrape.errors.len()));
        }
        for alert in &alerts {
            warn!(alert = %alert, "scraping alert");
        }

        RunReport {
            status: RunStatus::Completed,
            job_start,
            job_end: Utc::now(),
            scrape: Some(scrape),
            purged_records,
            processing,
            success_rate,
            alerts,
            error: None,
        }
    }

    async fn retention_purge(&self) -> anyhow::Result<Option<u64>> {
        if !self.config.database.cleanup_enabled {
            return Ok(None);
        }
        let deleted = self
            .store
            .purge(self.config.database.days_to_keep)
            .await
            .context("retention purge")?;
        Ok(Some(deleted))
    }

    async fn processing_job(&self, _guard: RunGuard) -> ProcessingSummary {
        let settings = &self.config.processing;
        self.processor
            .process_unprocessed(settings.max_records, settings.batch_size)
            .await
    }

    async fn send_alert_email(&self, report: &RunReport) {
        let email = &self.config.email;
        let Some(mailer) = self.mailer.as_ref().filter(|_| email.is_complete()) else {
            warn!("email configuration incomplete, skipping notification");
            return;
        };
        let (subject, body) = alert_email(report);
        if let Err(err) = mailer.send(&subject, &body, &email.recipient_emails).await {
            error!(error = %err, "email notification failed");
        }
    }

    async fn health_check(&self) -> anyhow::Result<HealthReport> {
        info!("running health check");
        let stats = self.store.stats().await.context("reading store stats")?;
        self.store
            .record_quality_snapshot(&stats.to_snapshot())
            .await
            .context("recording quality snapshot")?;

        let report = HealthReport {
            timestamp: Utc::now(),
            database_status: if stats.total_documents > 0 { "healthy" } else { "empty" }.to_string(),
            recent_activity: if stats.recent_documents > 0 { "active" } else { "inactive" }.to_string(),
            total_documents: stats.total_documents,
            recent_documents: stats.recent_documents,
            sources_active: stats.documents_by_source.len() as u64,
        };
        self.health_log
            .append(&report)
            .await
            .context("appending health log")?;
        info!(
            database_status = %report.database_status,
            recent_activity = %report.recent_activity,
            total = report.total_documents,
            "health check completed"
        );
        Ok(report)
    }

    async fn maintenance(&self) -> anyhow::Result<MaintenanceReport> {
        info!("running database maintenance");
        let database = &self.config.database;
        let deleted_records = if database.cleanup_enabled {
            self.store
                .purge(database.days_to_keep)
                .await
                .context("retention purge")?
        } else {
            0
        };

        let backup_path = if database.backup_enabled {
            match self.store.backup_to(&self.backup_dir).await {
                Ok(path) => {
                    info!(path = %path.display(), "database backup created");
                    Some(path)
                }
                Err(err) => {
                    error!(error = %err, "database backup failed");
                    None
                }
            }
        } else {
            None
        };

        let report = MaintenanceReport {
            timestamp: Utc::now(),
            deleted_records,
            backup_created: backup_path.is_some(),
            backup_path,
        };
        info!(
            deleted = report.deleted_records,
            backup = report.backup_created,
            "database maintenance completed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lexcura_adapters::{AdapterError, AdapterRun, SourceAdapter};
    use lexcura_core::Record;
    use lexcura_curation::Pacing;
    use lexcura_storage::{HttpClientConfig, HttpFetcher};
    use serde_json::Value;
    use std::path::Path;
    use tempfile::tempdir;
    use tokio::sync::Notify;

    struct FixedAdapter {
        records: Vec<Record>,
        errors: usize,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl SourceAdapter for FixedAdapter {
        fn source_name(&self) -> &'static str {
            "STF - Supremo Tribunal Federal"
        }

        async fn fetch(&self, _http: &HttpFetcher, limit: usize) -> Result<AdapterRun, AdapterError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(AdapterRun {
                records: self.records.iter().take(limit).cloned().collect(),
                errors: (0..self.errors).map(|i| format!("Error fetching page {i}")).collect(),
            })
        }

        fn parse(&self, _url: &str, _html: &str) -> Result<Option<Record>, AdapterError> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String, Vec<String>)>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string(), recipients.to_vec()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingWebhook {
        posts: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl WebhookPoster for RecordingWebhook {
        async fn post(&self, url: &str, payload: &Value) -> Result<(), NotifyError> {
            self.posts.lock().unwrap().push((url.to_string(), payload.clone()));
            Ok(())
        }
    }

    struct Harness {
        scheduler: Scheduler,
        store: ContentStore,
        mailer: Arc<RecordingMailer>,
        webhook: Arc<RecordingWebhook>,
    }

    fn decision(n: usize) -> Record {
        Record::new(
            format!("Acórdão {n}"),
            format!("Recurso extraordinário julgado pelo Supremo Tribunal Federal, caso {n}."),
            "STF - Supremo Tribunal Federal",
            format!("https://portal.stf.jus.br/acordao/{n}"),
            "Jurisprudência",
        )
    }

    fn alerting_config() -> SchedulerConfig {
        let mut config = SchedulerConfig::default();
        config.monitoring.email_notifications = true;
        config.monitoring.webhook_url = Some("http://hooks.test/lexcura".into());
        config.email.sender_email = "robo@lexcura.test".into();
        config.email.recipient_emails = vec!["equipe@lexcura.test".into()];
        config
    }

    async fn harness(
        store: ContentStore,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        config: SchedulerConfig,
        dir: &Path,
    ) -> Harness {
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let orchestrator = Orchestrator::new(adapters, http, store.clone());
        let processor = CurationProcessor::with_builtin_rules(store.clone())
            .unwrap()
            .with_pacing(Pacing::none());
        let mailer = Arc::new(RecordingMailer::default());
        let webhook = Arc::new(RecordingWebhook::default());
        let scheduler = Scheduler::builder(config, store.clone(), orchestrator, processor)
            .mailer(mailer.clone())
            .webhook(webhook.clone())
            .log_dir(dir.join("logs"))
            .backup_dir(dir.join("backups"))
            .build()
            .unwrap();
        Harness {
            scheduler,
            store,
            mailer,
            webhook,
        }
    }

    async fn wait_finished(scheduler: &Scheduler, id: Uuid) -> JobOutcome {
        for _ in 0..400 {
            if let Some(JobState::Finished(outcome)) = scheduler.job_state(id) {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {id} never finished");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_manual_scraping_is_rejected() {
        let dir = tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let adapter = FixedAdapter {
            records: vec![decision(1)],
            errors: 0,
            gate: Some(gate.clone()),
        };
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(adapter)];
        let h = harness(
            ContentStore::in_memory().await.unwrap(),
            adapters,
            SchedulerConfig::default(),
            dir.path(),
        )
        .await;

        let first = h.scheduler.trigger_scraping().unwrap();
        assert!(matches!(
            h.scheduler.job_state(first),
            Some(JobState::Running(JobKind::Scraping))
        ));
        assert!(matches!(
            h.scheduler.trigger_scraping(),
            Err(SchedulerError::JobInProgress(JobKind::Scraping))
        ));
        assert!(matches!(
            h.scheduler.run_scraping_now().await,
            Err(SchedulerError::JobInProgress(JobKind::Scraping))
        ));

        gate.notify_one();
        let JobOutcome::Scraping(report) = wait_finished(&h.scheduler, first).await else {
            panic!("expected a scraping outcome");
        };
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.scrape.as_ref().unwrap().total_saved, 1);
        assert_eq!(report.processing.as_ref().unwrap().processed, 1);

        gate.notify_one();
        let second = h.scheduler.trigger_scraping().unwrap();
        wait_finished(&h.scheduler, second).await;
        assert_eq!(h.store.stats().await.unwrap().total_documents, 1);
    }

    #[tokio::test]
    async fn low_success_and_error_count_raise_alerts() {
        let dir = tempdir().unwrap();
        let adapter = FixedAdapter {
            records: Vec::new(),
            errors: 12,
            gate: None,
        };
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(adapter)];
        let h = harness(
            ContentStore::in_memory().await.unwrap(),
            adapters,
            alerting_config(),
            dir.path(),
        )
        .await;

        let report = h.scheduler.run_scraping_now().await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(
            report.alerts,
            vec!["Low success rate: 0.00%".to_string(), "High error count: 12".to_string()]
        );

        let sent = h.mailer.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("High error count: 12"));
        assert_eq!(sent[0].2, vec!["equipe@lexcura.test".to_string()]);

        let posts = h.webhook.posts.lock().unwrap().clone();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "http://hooks.test/lexcura");
        assert_eq!(posts[0].1["service"], "lexcura");
        assert_eq!(posts[0].1["results"]["alerts"].as_array().unwrap().len(), 2);

        let runs: Vec<RunReport> = JsonLinesLog::new(dir.path().join("logs").join(RUN_LOG_FILE))
            .read_all()
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert!(h.scheduler.last_run().is_some());
    }

    #[tokio::test]
    async fn clean_run_sends_no_email() {
        let dir = tempdir().unwrap();
        let adapter = FixedAdapter {
            records: vec![decision(1), decision(2)],
            errors: 0,
            gate: None,
        };
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(adapter)];
        let h = harness(
            ContentStore::in_memory().await.unwrap(),
            adapters,
            alerting_config(),
            dir.path(),
        )
        .await;

        let report = h.scheduler.run_scraping_now().await.unwrap();
        assert!(report.alerts.is_empty());
        assert!((report.success_rate - 1.0).abs() < 1e-9);
        assert!(h.mailer.sent.lock().unwrap().is_empty());
        assert_eq!(h.webhook.posts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_inside_the_job_is_reported_and_logged() {
        let dir = tempdir().unwrap();
        let store = ContentStore::in_memory().await.unwrap();
        sqlx::query("DROP TABLE records").execute(store.pool()).await.unwrap();
        let h = harness(store, Vec::new(), alerting_config(), dir.path()).await;

        let report = h.scheduler.run_scraping_now().await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        let error = report.error.clone().unwrap();
        assert!(error.starts_with("Scraping job failed: retention purge"));
        assert_eq!(report.alerts, vec![error]);
        assert_eq!(report.scrape.as_ref().unwrap().sources.len(), 0);
        assert_eq!(h.mailer.sent.lock().unwrap().len(), 1);

        let runs: Vec<Value> = JsonLinesLog::new(dir.path().join("logs").join(RUN_LOG_FILE))
            .read_all()
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0]["status"], "failed");
    }

    #[tokio::test]
    async fn purge_failure_keeps_the_finished_scrape() {
        let dir = tempdir().unwrap();
        let store = ContentStore::in_memory().await.unwrap();
        let stale = decision(99).with_scraped_at(Utc::now() - chrono::Duration::days(200));
        store.save(&stale).await.unwrap();
        let adapter = FixedAdapter {
            records: vec![decision(1), decision(2)],
            errors: 0,
            gate: None,
        };
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(adapter)];
        let mut config = alerting_config();
        config.processing.enabled = false;
        let h = harness(store, adapters, config, dir.path()).await;
        sqlx::query(
            "CREATE TRIGGER no_purge BEFORE DELETE ON records \
             BEGIN SELECT RAISE(ABORT, 'purge blocked'); END",
        )
        .execute(h.store.pool())
        .await
        .unwrap();

        let report = h.scheduler.run_scraping_now().await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        let scrape = report.scrape.as_ref().unwrap();
        assert_eq!(scrape.total_saved, 2);
        assert!((report.success_rate - 1.0).abs() < 1e-9);

        let posts = h.webhook.posts.lock().unwrap();
        assert_eq!(posts[0].1["results"]["scrape"]["total_saved"], 2);
        assert_eq!(posts[0].1["results"]["status"], "failed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn retention_past_the_calendar_completes_and_is_logged() {
        let dir = tempdir().unwrap();
        let store = ContentStore::in_memory().await.unwrap();
        store.save(&decision(1)).await.unwrap();
        let mut config = SchedulerConfig::default();
        config.database.days_to_keep = 200_000_000;
        let h = harness(store, Vec::new(), config, dir.path()).await;

        let id = h.scheduler.trigger_scraping().unwrap();
        let JobOutcome::Scraping(report) = wait_finished(&h.scheduler, id).await else {
            panic!("expected a scraping outcome");
        };
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.purged_records, Some(0));
        assert!(h.scheduler.last_run().is_some());
        assert_eq!(h.store.stats().await.unwrap().total_documents, 1);

        let runs: Vec<Value> = JsonLinesLog::new(dir.path().join("logs").join(RUN_LOG_FILE))
            .read_all()
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[test]
    fn job_table_forgets_the_oldest_finished_jobs() {
        let mut table = JobTable::default();
        let ids: Vec<Uuid> = (0..=FINISHED_JOBS_KEPT).map(|_| Uuid::new_v4()).collect();
        let running = Uuid::new_v4();
        table.begin(running, JobKind::Processing);
        for id in &ids {
            table.begin(*id, JobKind::Scraping);
            let summary = ProcessingSummary {
                started_at: Utc::now(),
                finished_at: Utc::now(),
                total_found: 0,
                processed: 0,
                error_count: 0,
                errors: Vec::new(),
            };
            table.finish(*id, JobOutcome::Processing(summary));
        }

        assert!(table.get(ids[0]).is_none());
        assert!(matches!(table.get(ids[1]), Some(JobState::Finished(_))));
        assert!(matches!(table.get(running), Some(JobState::Running(JobKind::Processing))));
        assert_eq!(table.states.len(), FINISHED_JOBS_KEPT + 1);
    }

    #[tokio::test]
    async fn manual_processing_curates_pending_records() {
        let dir = tempdir().unwrap();
        let store = ContentStore::in_memory().await.unwrap();
        for n in 0..3 {
            assert!(store.save(&decision(n)).await.unwrap());
        }
        let h = harness(store, Vec::new(), SchedulerConfig::default(), dir.path()).await;

        let id = h.scheduler.trigger_processing().unwrap();
        let JobOutcome::Processing(summary) = wait_finished(&h.scheduler, id).await else {
            panic!("expected a processing outcome");
        };
        assert_eq!(summary.total_found, 3);
        assert_eq!(summary.processed, 3);
        assert!(h.store.unprocessed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_check_reports_activity_and_snapshots_quality() {
        let dir = tempdir().unwrap();
        let h = harness(
            ContentStore::in_memory().await.unwrap(),
            Vec::new(),
            SchedulerConfig::default(),
            dir.path(),
        )
        .await;

        let empty = h.scheduler.health_check().await.unwrap();
        assert_eq!(empty.database_status, "empty");
        assert_eq!(empty.recent_activity, "inactive");

        h.store.save(&decision(1)).await.unwrap();
        let healthy = h.scheduler.health_check().await.unwrap();
        assert_eq!(healthy.database_status, "healthy");
        assert_eq!(healthy.recent_activity, "active");
        assert_eq!(healthy.sources_active, 1);

        let snapshot = h.store.latest_quality_snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot.total_documents, 1);
        let lines: Vec<HealthReport> = JsonLinesLog::new(dir.path().join("logs").join(HEALTH_LOG_FILE))
            .read_all()
            .await
            .unwrap();
        assert_eq!(lines.len(), 2);
    }

    #[tokio::test]
    async fn maintenance_purges_and_backs_up() {
        let dir = tempdir().unwrap();
        let store = ContentStore::open(dir.path().join("legal_texts.db")).await.unwrap();
        let stale = decision(1).with_scraped_at(Utc::now() - chrono::Duration::days(200));
        store.save(&stale).await.unwrap();
        store.save(&decision(2)).await.unwrap();
        let h = harness(store, Vec::new(), SchedulerConfig::default(), dir.path()).await;

        let report = h.scheduler.maintenance().await.unwrap();
        assert_eq!(report.deleted_records, 1);
        assert!(report.backup_created);
        let backup = report.backup_path.unwrap();
        assert!(backup.exists());
        assert!(backup.starts_with(dir.path().join("backups")));
        assert_eq!(h.store.stats().await.unwrap().total_documents, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_and_stop_are_idempotent() {
        let dir = tempdir().unwrap();
        let h = harness(
            ContentStore::in_memory().await.unwrap(),
            Vec::new(),
            SchedulerConfig::default(),
            dir.path(),
        )
        .await;

        assert!(!h.scheduler.status().await.running);
        h.scheduler.start().await.unwrap();
        h.scheduler.start().await.unwrap();
        let status = h.scheduler.status().await;
        assert!(status.running);
        assert_eq!(status.job_count, 3);
        assert_eq!(status.config, SchedulerConfig::default());

        h.scheduler.stop().await.unwrap();
        h.scheduler.stop().await.unwrap();
        let status = h.scheduler.status().await;
        assert!(!status.running);
        assert_eq!(status.job_count, 0);
    }

    #[tokio::test]
    async fn invalid_schedule_refuses_to_start() {
        let dir = tempdir().unwrap();
        let mut config = SchedulerConfig::default();
        config.schedule.day_of_week = "funday".into();
        let h = harness(ContentStore::in_memory().await.unwrap(), Vec::new(), config, dir.path()).await;

        assert!(matches!(
            h.scheduler.start().await,
            Err(SchedulerError::Config(ConfigError::Invalid(_)))
        ));
        assert!(!h.scheduler.status().await.running);
    }
}
