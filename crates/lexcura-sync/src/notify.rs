//! Outbound notifications: SMTP alerts and JSON webhooks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::config::EmailConfig;
use crate::scheduler::RunReport;

pub const SERVICE_NAME: &str = "lexcura";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("building message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("webhook request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no recipients configured")]
    NoRecipients,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), NotifyError>;
}

#[async_trait]
pub trait WebhookPoster: Send + Sync {
    async fn post(&self, url: &str, payload: &Value) -> Result<(), NotifyError>;
}

/// Authenticated STARTTLS relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &EmailConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config.sender_email.parse()?;
        let creds = Credentials::new(config.sender_email.clone(), config.sender_password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)?
            .port(config.smtp_port)
            .credentials(creds)
            .build();
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for addr in recipients {
            builder = builder.to(addr.parse::<Mailbox>()?);
        }
        let msg = builder
            .header(header::ContentType::TEXT_PLAIN)
            .body(body.to_string())?;
        self.transport.send(msg).await?;
        info!(recipients = recipients.len(), "email notification sent");
        Ok(())
    }
}

pub struct HttpWebhook {
    client: reqwest::Client,
}

impl HttpWebhook {
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookPoster for HttpWebhook {
    async fn post(&self, url: &str, payload: &Value) -> Result<(), NotifyError> {
        self.client
            .post(url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        info!(url, "webhook notification sent");
        Ok(())
    }
}

pub fn webhook_payload(report: &RunReport) -> Value {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "service": SERVICE_NAME,
        "results": report,
    })
}

/// Subject and plain-text body of the alert mail for one scraping run.
pub fn alert_email(report: &RunReport) -> (String, String) {
    let subject = if report.alerts.is_empty() {
        "[lexcura] Execução concluída".to_string()
    } else {
        "[lexcura] Alerta: problemas detectados".to_string()
    };

    let mut body = format!(
        "Alerta do sistema de coleta de dados jurídicos\n\n\
         Problemas detectados na execução de {}:\n\n\
         ALERTAS:\n",
        report.job_start.format("%d/%m/%Y %H:%M")
    );
    for alert in &report.alerts {
        body.push_str(&format!("• {alert}\n"));
    }

    if let Some(scrape) = &report.scrape {
        body.push_str(&format!(
            "\nRESUMO DA EXECUÇÃO:\n\
             • Total coletado: {}\n\
             • Total salvo: {}\n\
             • Taxa de sucesso: {:.2}%\n\
             • Erros: {}\n\
             \nDETALHES POR FONTE:\n",
            scrape.total_scraped,
            scrape.total_saved,
            report.success_rate * 100.0,
            scrape.errors.len()
        ));
        for source in &scrape.sources {
            body.push_str(&format!(
                "• {}: {} coletados, {} salvos, {} erros\n",
                source.source, source.scraped, source.saved, source.errors
            ));
        }
    }
    if let Some(error) = &report.error {
        body.push_str(&format!("\nERRO: {error}\n"));
    }
    (subject, body)
}
