//! Process settings from the environment and the scheduler's JSON document.

use std::path::{Path, PathBuf};

use chrono::{NaiveTime, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub log_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub rules_path: Option<PathBuf>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("LEXCURA_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("legal_texts.db")),
            config_path: std::env::var("LEXCURA_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("scheduler_config.json")),
            log_dir: std::env::var("LEXCURA_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("logs")),
            backup_dir: std::env::var("LEXCURA_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("backups")),
            user_agent: std::env::var("LEXCURA_USER_AGENT")
                .unwrap_or_else(|_| lexcura_storage::DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: std::env::var("LEXCURA_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            rules_path: std::env::var("LEXCURA_RULES_PATH").ok().map(PathBuf::from),
            gemini_api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            gemini_model: std::env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| lexcura_curation::DEFAULT_GEMINI_MODEL.to_string()),
        }
    }
}

/// Job settings persisted as JSON. Keys this build does not know about are
/// kept in `extra` at every level and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub schedule: ScheduleConfig,
    pub scraping: ScrapingConfig,
    pub database: DatabaseConfig,
    pub monitoring: MonitoringConfig,
    pub email: EmailConfig,
    pub processing: ProcessingConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            scraping: ScrapingConfig::default(),
            database: DatabaseConfig::default(),
            monitoring: MonitoringConfig::default(),
            email: EmailConfig::default(),
            processing: ProcessingConfig::default(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub day_of_week: String,
    /// `HH:MM`, 24h clock.
    pub time: String,
    pub timezone: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            day_of_week: "monday".to_string(),
            time: "02:00".to_string(),
            timezone: "America/Sao_Paulo".to_string(),
            extra: Map::new(),
        }
    }
}

impl ScheduleConfig {
    /// Six-field cron expression (seconds first) for the weekly scraping run.
    pub fn weekly_cron(&self) -> Result<String, ConfigError> {
        let day = match self.day_of_week.trim().to_ascii_lowercase().as_str() {
            "monday" => "MON",
            "tuesday" => "TUE",
            "wednesday" => "WED",
            "thursday" => "THU",
            "friday" => "FRI",
            "saturday" => "SAT",
            "sunday" => "SUN",
            other => return Err(ConfigError::Invalid(format!("unknown day_of_week {other:?}"))),
        };
        let time = NaiveTime::parse_from_str(self.time.trim(), "%H:%M")
            .map_err(|err| ConfigError::Invalid(format!("schedule.time {:?}: {err}", self.time)))?;
        Ok(format!("0 {} {} * * {day}", time.minute(), time.hour()))
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|err| ConfigError::Invalid(format!("timezone {:?}: {err}", self.timezone)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    pub limit_per_scraper: u32,
    /// Per-page fetch retries on transient failures.
    pub max_retries: u32,
    /// Kept for compatibility with existing documents; whole jobs are never retried.
    pub retry_delay_minutes: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            limit_per_scraper: 50,
            max_retries: 3,
            retry_delay_minutes: 30,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub cleanup_enabled: bool,
    pub days_to_keep: u32,
    pub backup_enabled: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            cleanup_enabled: true,
            days_to_keep: 90,
            backup_enabled: true,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub email_notifications: bool,
    pub webhook_url: Option<String>,
    pub alert_thresholds: AlertThresholds,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            email_notifications: false,
            webhook_url: None,
            alert_thresholds: AlertThresholds::default(),
            extra: Map::new(),
        }
    }
}

impl MonitoringConfig {
    pub fn webhook(&self) -> Option<&str> {
        self.webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub min_success_rate: f64,
    pub max_error_count: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: 0.7,
            max_error_count: 10,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub sender_email: String,
    pub sender_password: String,
    pub recipient_emails: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_server: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            sender_email: String::new(),
            sender_password: String::new(),
            recipient_emails: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl EmailConfig {
    pub fn is_complete(&self) -> bool {
        !self.sender_email.trim().is_empty() && !self.recipient_emails.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub max_records: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 10,
            max_records: 1000,
            extra: Map::new(),
        }
    }
}

/// Retention longer than this (about a thousand years) is rejected.
pub const MAX_DAYS_TO_KEEP: u32 = 365_000;

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule.weekly_cron()?;
        self.schedule.tz()?;
        if self.processing.batch_size == 0 {
            return Err(ConfigError::Invalid("processing.batch_size must be > 0".into()));
        }
        if self.database.days_to_keep > MAX_DAYS_TO_KEEP {
            return Err(ConfigError::Invalid(format!(
                "database.days_to_keep {} exceeds {MAX_DAYS_TO_KEEP}",
                self.database.days_to_keep
            )));
        }
        let rate = self.monitoring.alert_thresholds.min_success_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::Invalid(format!(
                "alert_thresholds.min_success_rate {rate} outside [0, 1]"
            )));
        }
        Ok(())
    }

    /// Load the document at `path`, filling absent keys with defaults.
    ///
    /// Never fails: a missing file gets the defaults written out, a valid one is
    /// rewritten with the merged result, and an unreadable or invalid one is
    /// left alone while the defaults are used.
    pub async fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                match config.save(path).await {
                    Ok(()) => info!(path = %path.display(), "wrote default scheduler config"),
                    Err(err) => warn!(path = %path.display(), error = %err, "could not write default config"),
                }
                return config;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "reading scheduler config failed; using defaults");
                return Self::default();
            }
        };

        let config = match serde_json::from_str::<Self>(&raw) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "malformed scheduler config; using defaults");
                return Self::default();
            }
        };
        if let Err(err) = config.validate() {
            warn!(path = %path.display(), error = %err, "invalid scheduler config; using defaults");
            return Self::default();
        }
        if let Err(err) = config.save(path).await {
            warn!(path = %path.display(), error = %err, "could not write merged config");
        }
        config
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_string_pretty(self)?;
        fs::write(path, body).await?;
        Ok(())
    }
}
