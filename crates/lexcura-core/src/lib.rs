//! Core domain model for lexcura: curated records, audit sessions and quality metrics.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CRATE_NAME: &str = "lexcura-core";

/// Category assigned when nothing more specific is known.
pub const DEFAULT_CATEGORY: &str = "Geral";

/// Stable fingerprint of (cleaned) content, used for deduplication.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whitespace-token count.
pub fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// Clamp a score into `[0, 1]`; NaN collapses to zero.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Deduplicated tag set. Insertion order is irrelevant; iteration is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a trimmed tag; empty tags are ignored. Returns true when newly added.
    pub fn insert(&mut self, tag: impl AsRef<str>) -> bool {
        let tag = tag.as_ref().trim();
        if tag.is_empty() {
            return false;
        }
        self.0.insert(tag.to_string())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn union_with(&mut self, other: &TagSet) {
        for tag in other.iter() {
            self.insert(tag);
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = TagSet::new();
        set.extend(iter);
        set
    }
}

impl<S: AsRef<str>> Extend<S> for TagSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for tag in iter {
            self.insert(tag);
        }
    }
}

/// A curated legal document.
///
/// `content`, `word_count` and `quality_score` are kept private so the
/// derived-field invariants hold on every write path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: Option<i64>,
    pub title: String,
    content: String,
    pub source: String,
    pub url: String,
    pub category: String,
    pub published_on: Option<NaiveDate>,
    pub scraped_at: DateTime<Utc>,
    content_hash: String,
    word_count: u32,
    quality_score: f64,
    pub processed: bool,
    pub tags: TagSet,
}

/// Every persisted column of a record, as read back from storage.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub source: String,
    pub url: String,
    pub category: String,
    pub published_on: Option<NaiveDate>,
    pub scraped_at: DateTime<Utc>,
    pub content_hash: String,
    pub quality_score: f64,
    pub processed: bool,
    pub tags: TagSet,
}

impl Record {
    /// New scrape-time candidate; hash and word count derive from `content`.
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
        url: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let category = category.into();
        Self {
            id: None,
            title: title.into(),
            content_hash: content_hash(&content),
            word_count: word_count(&content),
            content,
            source: source.into(),
            url: url.into(),
            category: if category.trim().is_empty() {
                DEFAULT_CATEGORY.to_string()
            } else {
                category
            },
            published_on: None,
            scraped_at: Utc::now(),
            quality_score: 0.0,
            processed: false,
            tags: TagSet::new(),
        }
    }

    pub fn restore(stored: StoredRecord) -> Self {
        Self {
            id: Some(stored.id),
            title: stored.title,
            word_count: word_count(&stored.content),
            content: stored.content,
            source: stored.source,
            url: stored.url,
            category: stored.category,
            published_on: stored.published_on,
            scraped_at: stored.scraped_at,
            content_hash: stored.content_hash,
            quality_score: clamp_score(stored.quality_score),
            processed: stored.processed,
            tags: stored.tags,
        }
    }

    pub fn with_published_on(mut self, published_on: Option<NaiveDate>) -> Self {
        self.published_on = published_on;
        self
    }

    pub fn with_scraped_at(mut self, scraped_at: DateTime<Utc>) -> Self {
        self.scraped_at = scraped_at;
        self
    }

    pub fn with_tags<S: AsRef<str>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Replace the content and recount words. The content hash is the
    /// scrape-time identity and stays untouched.
    pub fn set_content(&mut self, content: String) {
        self.word_count = word_count(&content);
        self.content = content;
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn word_count(&self) -> u32 {
        self.word_count
    }

    pub fn quality_score(&self) -> f64 {
        self.quality_score
    }

    pub fn set_quality_score(&mut self, score: f64) {
        self.quality_score = clamp_score(score);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

/// Append-only audit entry for one adapter run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeSession {
    pub id: Option<i64>,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub items_scraped: u32,
    pub items_saved: u32,
    pub errors: Vec<String>,
    pub detail: String,
}

/// Periodic data-quality sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub calculated_at: DateTime<Utc>,
    pub total_documents: u64,
    pub avg_word_count: f64,
    pub avg_quality_score: f64,
    pub sources_active: u64,
    pub processed_documents: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_documents: u64,
    pub documents_by_source: BTreeMap<String, u64>,
    pub recent_documents: u64,
    pub average_word_count: f64,
    pub average_quality_score: f64,
    pub processed_documents: u64,
    pub last_updated: DateTime<Utc>,
}

impl StoreStats {
    pub fn to_snapshot(&self) -> QualitySnapshot {
        QualitySnapshot {
            calculated_at: self.last_updated,
            total_documents: self.total_documents,
            avg_word_count: self.average_word_count,
            avg_quality_score: self.average_quality_score,
            sources_active: self.documents_by_source.len() as u64,
            processed_documents: self.processed_documents,
        }
    }
}
