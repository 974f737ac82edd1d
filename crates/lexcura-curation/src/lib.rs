//! Curation: turns raw scraped records into cleaned, tagged, categorized and
//! scored ones.

pub mod ai;
pub mod rules;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lexcura_core::Record;
use lexcura_storage::{ContentStore, StoreError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use ai::{
    AiInsights, AnalyzerError, DisabledAnalyzer, GeminiAnalyzer, TextAnalyzer, DEFAULT_GEMINI_MODEL,
};
pub use rules::{CurationRules, Entities, RuleSet, RulesError};

pub const CRATE_NAME: &str = "lexcura-curation";

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Rules(#[from] RulesError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_found: u32,
    pub processed: u32,
    pub error_count: u32,
    pub errors: Vec<String>,
}

/// One exportable example built from a curated record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingExample {
    pub input: String,
    pub category: String,
    pub quality_score: f64,
    pub tags: Vec<String>,
    pub source: String,
    pub word_count: u32,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub total_documents: u64,
    pub processed_documents: u64,
    pub unprocessed_documents: u64,
    pub average_quality: f64,
    pub categories_distribution: BTreeMap<String, u64>,
    pub ai_enhancement_available: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    /// Pause between batches, only applied when AI is enabled.
    pub between_batches: Duration,
    /// Random pre-call delay range for each AI request, in milliseconds.
    pub ai_call_ms: (u64, u64),
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            between_batches: Duration::from_secs(2),
            ai_call_ms: (1_000, 2_000),
        }
    }
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            between_batches: Duration::ZERO,
            ai_call_ms: (0, 0),
        }
    }
}

#[derive(Clone)]
pub struct CurationProcessor {
    store: ContentStore,
    rules: Arc<RuleSet>,
    analyzer: Arc<dyn TextAnalyzer>,
    pacing: Pacing,
}

impl CurationProcessor {
    pub fn new(store: ContentStore, rules: Arc<RuleSet>, analyzer: Arc<dyn TextAnalyzer>) -> Self {
        Self {
            store,
            rules,
            analyzer,
            pacing: Pacing::default(),
        }
    }

    /// Builtin rules, AI disabled.
    pub fn with_builtin_rules(store: ContentStore) -> Result<Self, ProcessingError> {
        Ok(Self::new(
            store,
            Arc::new(RuleSet::builtin()?),
            Arc::new(DisabledAnalyzer),
        ))
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn ai_enabled(&self) -> bool {
        self.analyzer.is_enabled()
    }

    /// Heuristic part of the pipeline (everything except AI). Deterministic.
    pub fn curate(&self, mut record: Record) -> Record {
        let content = self.rules.clean(record.content());
        record.set_content(content);
        record.title = self.rules.clean(&record.title);

        let entities = self.rules.extract_entities(record.content());
        record
            .tags
            .extend(entities.as_tags(self.rules.max_entities_per_kind()));

        record.category = self.rules.categorize(&record.title, record.content());
        let score = self.rules.enhanced_score(&record);
        record.set_quality_score(score);
        record
    }

    /// Full pipeline for one record. AI problems never fail the record; they
    /// leave the heuristic result in place.
    pub async fn process_record(&self, record: Record) -> Record {
        let mut record = self.curate(record);
        if self.analyzer.is_enabled() {
            self.enhance_with_ai(&mut record).await;
        }
        record.processed = true;
        info!(
            category = %record.category,
            quality = record.quality_score(),
            "record curated"
        );
        record
    }

    async fn enhance_with_ai(&self, record: &mut Record) {
        let (lo, hi) = self.pacing.ai_call_ms;
        if hi > 0 {
            let wait = Duration::from_millis(rand::rng().random_range(lo..=hi));
            tokio::time::sleep(wait).await;
        }

        let prompt = ai::build_prompt(record.content());
        let raw = match self.analyzer.analyze(&prompt).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, url = %record.url, "AI enhancement failed");
                return;
            }
        };
        let Some(insights) = ai::parse_insights(&raw) else {
            warn!(url = %record.url, "AI response unusable; keeping heuristic result");
            return;
        };
        debug!(resumo = %insights.resumo, "AI summary");
        ai::merge_insights(record, &insights);
    }

    /// Curate up to `max_records` unprocessed records in batches of
    /// `batch_size`. Always returns a summary; failures are collected.
    pub async fn process_unprocessed(&self, max_records: u32, batch_size: usize) -> ProcessingSummary {
        let started_at = Utc::now();
        let mut summary = ProcessingSummary {
            started_at,
            finished_at: started_at,
            total_found: 0,
            processed: 0,
            error_count: 0,
            errors: Vec::new(),
        };

        let pending = match self.store.unprocessed(max_records).await {
            Ok(pending) => pending,
            Err(err) => {
                error!(error = %err, "loading unprocessed records failed");
                summary.errors.push(format!("Batch processing failed: {err}"));
                summary.finished_at = Utc::now();
                return summary;
            }
        };
        summary.total_found = pending.len() as u32;
        info!(found = pending.len(), "unprocessed records loaded");

        let batch_size = batch_size.max(1);
        let batch_count = pending.len().div_ceil(batch_size);
        for (index, batch) in pending.chunks(batch_size).enumerate() {
            for record in batch {
                let id = record.id.unwrap_or_default();
                let curated = self.process_record(record.clone()).await;
                match self.store.update_curated(&curated).await {
                    Ok(()) => summary.processed += 1,
                    Err(err) => {
                        let msg = format!("Error processing record {id}: {err}");
                        error!(record_id = id, error = %err, "storing curated record failed");
                        summary.errors.push(msg);
                        summary.error_count += 1;
                    }
                }
            }
            info!(batch = index + 1, of = batch_count, "batch processed");

            let more = index + 1 < batch_count;
            if more && self.ai_enabled() && !self.pacing.between_batches.is_zero() {
                tokio::time::sleep(self.pacing.between_batches).await;
            }
        }

        summary.finished_at = Utc::now();
        info!(
            processed = summary.processed,
            errors = summary.error_count,
            "batch processing completed"
        );
        summary
    }

    pub async fn training_examples(
        &self,
        limit: u32,
        min_quality: f64,
    ) -> Result<Vec<TrainingExample>, ProcessingError> {
        let records = self.store.processed_above(min_quality, limit).await?;
        let examples: Vec<TrainingExample> = records
            .into_iter()
            .map(|r| TrainingExample {
                input: r.content().to_string(),
                category: r.category.clone(),
                quality_score: r.quality_score(),
                tags: r.tags.to_vec(),
                source: r.source.clone(),
                word_count: r.word_count(),
                scraped_at: r.scraped_at,
            })
            .collect();
        info!(count = examples.len(), "training examples generated");
        Ok(examples)
    }

    pub async fn processing_stats(&self) -> Result<ProcessingStats, ProcessingError> {
        let stats = self.store.stats().await?;
        Ok(ProcessingStats {
            total_documents: stats.total_documents,
            processed_documents: stats.processed_documents,
            unprocessed_documents: stats.total_documents.saturating_sub(stats.processed_documents),
            average_quality: stats.average_quality_score,
            categories_distribution: self.store.category_counts().await?,
            ai_enhancement_available: self.ai_enabled(),
        })
    }
}
