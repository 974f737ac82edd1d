//! SQLite-backed content store.
//!
//! Uniqueness of records (by URL and by content hash) is enforced by the
//! table constraints, so concurrent writers racing on the same content never
//! produce two rows and no application-level locking is needed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use lexcura_core::{
    QualitySnapshot, Record, ScrapeSession, SessionStatus, StoreStats, StoredRecord, TagSet,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

const RECENT_WINDOW_DAYS: i64 = 7;

const RECORD_COLUMNS: &str = "id, title, content, source, url, category, published_on, \
     scraped_at, content_hash, word_count, quality_score, processed, tags";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record has no id; it was never persisted")]
    MissingId,
    #[error("record {0} not found")]
    NotFound(i64),
}

#[derive(Debug, Clone)]
pub struct ContentStore {
    pool: SqlitePool,
    stem: String,
}

/// Saturates outside the representable range (roughly 1677..2262).
fn to_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt()
        .unwrap_or(if ts.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

fn from_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

fn cutoff_days(days: u32) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_signed(chrono::Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    out.push('%');
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn record_from_row(row: &SqliteRow) -> Result<Record, StoreError> {
    let tags_json: String = row.try_get("tags")?;
    let tags: TagSet = serde_json::from_str(&tags_json)?;
    Ok(Record::restore(StoredRecord {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        source: row.try_get("source")?,
        url: row.try_get("url")?,
        category: row.try_get("category")?,
        published_on: row.try_get("published_on")?,
        scraped_at: from_nanos(row.try_get("scraped_at")?),
        content_hash: row.try_get("content_hash")?,
        quality_score: row.try_get("quality_score")?,
        processed: row.try_get("processed")?,
        tags,
    }))
}

fn session_from_row(row: &SqliteRow) -> Result<ScrapeSession, StoreError> {
    let errors_json: String = row.try_get("errors")?;
    let status: String = row.try_get("status")?;
    Ok(ScrapeSession {
        id: Some(row.try_get("id")?),
        source: row.try_get("source")?,
        started_at: from_nanos(row.try_get("started_at")?),
        finished_at: from_nanos(row.try_get("finished_at")?),
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Failed),
        items_scraped: row.try_get::<i64, _>("items_scraped")? as u32,
        items_saved: row.try_get::<i64, _>("items_saved")? as u32,
        errors: serde_json::from_str(&errors_json)?,
        detail: row.try_get("detail")?,
    })
}

impl ContentStore {
    /// Open (creating if missing) a file-backed store and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "lexcura".to_string());
        Self::init(pool, stem).await
    }

    /// Private in-memory store on a single pinned connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::init(pool, "lexcura".to_string()).await
    }

    async fn init(pool: SqlitePool, stem: String) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!(stem, "content store ready");
        Ok(Self { pool, stem })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a record. Returns `false` (not an error) when a row with the same
    /// URL or content hash already exists; the existing row is left untouched.
    pub async fn save(&self, record: &Record) -> Result<bool, StoreError> {
        let tags = serde_json::to_string(&record.tags)?;
        let result = sqlx::query(
            r#"
            INSERT INTO records
                (title, content, source, url, category, published_on, scraped_at,
                 content_hash, word_count, quality_score, processed, tags)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&record.title)
        .bind(record.content())
        .bind(&record.source)
        .bind(&record.url)
        .bind(&record.category)
        .bind(record.published_on)
        .bind(to_nanos(record.scraped_at))
        .bind(record.content_hash())
        .bind(i64::from(record.word_count()))
        .bind(record.quality_score())
        .bind(record.processed)
        .bind(tags)
        .execute(&self.pool)
        .await?;

        let saved = result.rows_affected() > 0;
        if saved {
            debug!(source = %record.source, url = %record.url, "record saved");
        } else {
            debug!(source = %record.source, url = %record.url, "duplicate record skipped");
        }
        Ok(saved)
    }

    pub async fn latest(&self, limit: u32) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records ORDER BY scraped_at DESC, id DESC LIMIT ?1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn by_source_since(&self, source: &str, days: u32) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records \
             WHERE source = ?1 AND scraped_at >= ?2 \
             ORDER BY scraped_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(source)
            .bind(to_nanos(cutoff_days(days)))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Substring search over title or content, most recent first.
    pub async fn search(&self, needle: &str, limit: u32) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records \
             WHERE title LIKE ?1 ESCAPE '\\' OR content LIKE ?1 ESCAPE '\\' \
             ORDER BY scraped_at DESC, id DESC LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(escape_like(needle))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn unprocessed(&self, limit: u32) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE processed = 0 \
             ORDER BY scraped_at DESC, id DESC LIMIT ?1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Processed records scoring strictly above `min_quality`, most recent first.
    pub async fn processed_above(
        &self,
        min_quality: f64,
        limit: u32,
    ) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE processed = 1 AND quality_score > ?1 \
             ORDER BY scraped_at DESC, id DESC LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(min_quality)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Write back the curation result for an existing row.
    pub async fn update_curated(&self, record: &Record) -> Result<(), StoreError> {
        let id = record.id.ok_or(StoreError::MissingId)?;
        let tags = serde_json::to_string(&record.tags)?;
        let result = sqlx::query(
            r#"
            UPDATE records
               SET title = ?1,
                   content = ?2,
                   category = ?3,
                   word_count = ?4,
                   quality_score = ?5,
                   processed = ?6,
                   tags = ?7
             WHERE id = ?8
            "#,
        )
        .bind(&record.title)
        .bind(record.content())
        .bind(&record.category)
        .bind(i64::from(record.word_count()))
        .bind(record.quality_score())
        .bind(record.processed)
        .bind(tags)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;

        let by_source_rows =
            sqlx::query("SELECT source, COUNT(*) AS n FROM records GROUP BY source")
                .fetch_all(&self.pool)
                .await?;
        let mut documents_by_source = BTreeMap::new();
        for row in by_source_rows {
            let source: String = row.try_get("source")?;
            let n: i64 = row.try_get("n")?;
            documents_by_source.insert(source, n as u64);
        }

        let recent: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE scraped_at >= ?1")
            .bind(to_nanos(Utc::now() - chrono::Duration::days(RECENT_WINDOW_DAYS)))
            .fetch_one(&self.pool)
            .await?;

        let avg_words: Option<f64> =
            sqlx::query_scalar("SELECT AVG(word_count) FROM records WHERE word_count > 0")
                .fetch_one(&self.pool)
                .await?;
        let avg_quality: Option<f64> =
            sqlx::query_scalar("SELECT AVG(quality_score) FROM records WHERE quality_score > 0")
                .fetch_one(&self.pool)
                .await?;
        let processed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE processed = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            total_documents: total as u64,
            documents_by_source,
            recent_documents: recent as u64,
            average_word_count: round2(avg_words.unwrap_or(0.0)),
            average_quality_score: round2(avg_quality.unwrap_or(0.0)),
            processed_documents: processed as u64,
            last_updated: Utc::now(),
        })
    }

    pub async fn category_counts(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let rows = sqlx::query("SELECT category, COUNT(*) AS n FROM records GROUP BY category")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let category: String = row.try_get("category")?;
            let n: i64 = row.try_get("n")?;
            counts.insert(category, n as u64);
        }
        Ok(counts)
    }

    /// Delete records scraped more than `days` days ago.
    pub async fn purge(&self, days: u32) -> Result<u64, StoreError> {
        self.purge_older_than(cutoff_days(days)).await
    }

    /// Delete records whose scrape time is strictly before `cutoff`.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM records WHERE scraped_at < ?1")
            .bind(to_nanos(cutoff))
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        info!(deleted, %cutoff, "retention purge");
        Ok(deleted)
    }

    pub async fn record_session(&self, session: &ScrapeSession) -> Result<i64, StoreError> {
        let errors = serde_json::to_string(&session.errors)?;
        let result = sqlx::query(
            r#"
            INSERT INTO scrape_sessions
                (source, started_at, finished_at, status, items_scraped, items_saved, errors, detail)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&session.source)
        .bind(to_nanos(session.started_at))
        .bind(to_nanos(session.finished_at))
        .bind(session.status.as_str())
        .bind(i64::from(session.items_scraped))
        .bind(i64::from(session.items_saved))
        .bind(errors)
        .bind(&session.detail)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn recent_sessions(&self, limit: u32) -> Result<Vec<ScrapeSession>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, source, started_at, finished_at, status, items_scraped, items_saved, errors, detail
              FROM scrape_sessions
             ORDER BY started_at DESC, id DESC
             LIMIT ?1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_from_row).collect()
    }

    pub async fn record_quality_snapshot(&self, snapshot: &QualitySnapshot) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO quality_metrics
                (calculated_at, total_documents, avg_word_count, avg_quality_score,
                 sources_active, processed_documents)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(to_nanos(snapshot.calculated_at))
        .bind(snapshot.total_documents as i64)
        .bind(snapshot.avg_word_count)
        .bind(snapshot.avg_quality_score)
        .bind(snapshot.sources_active as i64)
        .bind(snapshot.processed_documents as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn latest_quality_snapshot(&self) -> Result<Option<QualitySnapshot>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT calculated_at, total_documents, avg_word_count, avg_quality_score,
                   sources_active, processed_documents
              FROM quality_metrics
             ORDER BY calculated_at DESC, id DESC
             LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(QualitySnapshot {
                calculated_at: from_nanos(row.try_get("calculated_at")?),
                total_documents: row.try_get::<i64, _>("total_documents")? as u64,
                avg_word_count: row.try_get("avg_word_count")?,
                avg_quality_score: row.try_get("avg_quality_score")?,
                sources_active: row.try_get::<i64, _>("sources_active")? as u64,
                processed_documents: row.try_get::<i64, _>("processed_documents")? as u64,
            })
        })
        .transpose()
    }

    /// Consistent copy of the whole database as `<stem>_backup_<timestamp>.db`.
    ///
    /// The copy is written under a temp name and renamed into place, so a
    /// half-written backup is never visible under its final name.
    pub async fn backup_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf, StoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let final_path = dir.join(format!("{}_backup_{stamp}.db", self.stem));
        let temp_path = dir.join(format!(".{}.db.tmp", Uuid::new_v4()));

        if let Err(err) = sqlx::query("VACUUM INTO ?1")
            .bind(temp_path.display().to_string())
            .execute(&self.pool)
            .await
        {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err.into());
        }

        if let Err(err) = fs::rename(&temp_path, &final_path).await {
            warn!(error = %err, temp = %temp_path.display(), "backup rename failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(err.into());
        }

        info!(path = %final_path.display(), "store backup created");
        Ok(final_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn record(url: &str, content: &str) -> Record {
        Record::new(
            "Recurso Especial sobre responsabilidade civil",
            content,
            "STJ - Superior Tribunal de Justiça",
            url,
            "Jurisprudência",
        )
    }

    #[tokio::test]
    async fn save_round_trips_every_persisted_field() {
        let store = ContentStore::in_memory().await.unwrap();
        let mut input = record("https://stj.jus.br/a", "O recurso foi provido por unanimidade.")
            .with_published_on(NaiveDate::from_ymd_opt(2024, 3, 15))
            .with_tags(["jurisprudência", "law:Lei nº 8.078/1990"]);
        input.set_quality_score(0.65);

        assert!(store.save(&input).await.unwrap());

        let latest = store.latest(10).await.unwrap();
        assert_eq!(latest.len(), 1);
        let mut stored = latest[0].clone();
        assert!(stored.id.is_some());
        stored.id = None;
        assert_eq!(stored, input);
    }

    #[tokio::test]
    async fn duplicate_hash_or_url_is_a_silent_false() {
        let store = ContentStore::in_memory().await.unwrap();
        let first = record("https://stj.jus.br/1", "conteúdo idêntico");
        assert!(store.save(&first).await.unwrap());

        let mut same_hash = record("https://stj.jus.br/2", "conteúdo idêntico");
        same_hash.title = "outro título".to_string();
        assert!(!store.save(&same_hash).await.unwrap());

        let same_url = record("https://stj.jus.br/1", "conteúdo diferente");
        assert!(!store.save(&same_url).await.unwrap());

        let rows = store.latest(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, first.title);
        assert_eq!(rows[0].url, first.url);
    }

    #[tokio::test]
    async fn concurrent_writers_with_same_hash_store_one_row() {
        let dir = tempdir().unwrap();
        let store = ContentStore::open(dir.path().join("race.db")).await.unwrap();
        let a = record("https://stf.jus.br/x", "mesmo acórdão publicado em dois portais");
        let b = record("https://conjur.com.br/x", "mesmo acórdão publicado em dois portais");

        let (sa, sb) = tokio::join!(store.save(&a), store.save(&b));
        let outcomes = [sa.unwrap(), sb.unwrap()];
        assert_eq!(outcomes.iter().filter(|saved| **saved).count(), 1);
        assert_eq!(store.stats().await.unwrap().total_documents, 1);
    }

    #[tokio::test]
    async fn purge_removes_only_rows_strictly_older_than_cutoff() {
        let store = ContentStore::in_memory().await.unwrap();
        let cutoff = Utc::now() - chrono::Duration::days(30);

        let old = record("https://a/old", "antigo").with_scraped_at(cutoff - chrono::Duration::seconds(1));
        let boundary = record("https://a/edge", "limite").with_scraped_at(cutoff);
        let fresh = record("https://a/new", "novo").with_scraped_at(Utc::now());
        for r in [&old, &boundary, &fresh] {
            assert!(store.save(r).await.unwrap());
        }

        assert_eq!(store.purge_older_than(cutoff).await.unwrap(), 1);
        let urls: Vec<String> = store.latest(10).await.unwrap().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["https://a/new".to_string(), "https://a/edge".to_string()]);
    }

    #[tokio::test]
    async fn purge_by_days_uses_scrape_time() {
        let store = ContentStore::in_memory().await.unwrap();
        let stale = record("https://a/1", "velho").with_scraped_at(Utc::now() - chrono::Duration::days(100));
        let recent = record("https://a/2", "recente");
        store.save(&stale).await.unwrap();
        store.save(&recent).await.unwrap();

        assert_eq!(store.purge(90).await.unwrap(), 1);
        assert_eq!(store.stats().await.unwrap().total_documents, 1);
    }

    #[tokio::test]
    async fn retention_beyond_the_calendar_keeps_everything() {
        let store = ContentStore::in_memory().await.unwrap();
        let ancient = record("https://a/1", "muito antigo")
            .with_scraped_at(Utc::now() - chrono::Duration::days(365 * 200));
        store.save(&ancient).await.unwrap();
        store.save(&record("https://a/2", "recente")).await.unwrap();

        assert_eq!(store.purge(u32::MAX).await.unwrap(), 0);
        assert_eq!(store.purge(200_000_000).await.unwrap(), 0);
        assert_eq!(store.by_source_since("STJ - Superior Tribunal de Justiça", u32::MAX).await.unwrap().len(), 2);
        assert_eq!(store.stats().await.unwrap().total_documents, 2);
    }

    #[tokio::test]
    async fn search_matches_title_or_content_and_escapes_wildcards() {
        let store = ContentStore::in_memory().await.unwrap();
        let mut a = record("https://a/1", "habeas corpus concedido em recurso especial");
        a.title = "Decisão 100% unânime".to_string();
        let b = record("https://a/2", "mandado de segurança")
            .with_scraped_at(Utc::now() + chrono::Duration::seconds(1));
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        let hits = store.search("HABEAS", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://a/1");

        assert_eq!(store.search("100%", 10).await.unwrap().len(), 1);
        assert_eq!(store.search("_", 10).await.unwrap().len(), 0);

        let both = store.search("Recurso Especial", 10).await.unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(both[0].url, "https://a/2");
    }

    #[tokio::test]
    async fn stats_report_counts_and_averages() {
        let store = ContentStore::in_memory().await.unwrap();
        let mut a = record("https://a/1", "um dois três quatro");
        a.set_quality_score(0.5);
        let mut b = Record::new("t", "um dois", "Migalhas", "https://b/1", "Notícias Jurídicas")
            .with_scraped_at(Utc::now() - chrono::Duration::days(10));
        b.set_quality_score(0.25);
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.recent_documents, 1);
        assert_eq!(stats.documents_by_source.get("Migalhas"), Some(&1));
        assert_eq!(stats.average_word_count, 3.0);
        assert_eq!(stats.average_quality_score, 0.38);
        assert_eq!(stats.processed_documents, 0);
    }

    #[tokio::test]
    async fn curated_update_marks_processed_and_keeps_hash() {
        let store = ContentStore::in_memory().await.unwrap();
        store.save(&record("https://a/1", "texto  bruto")).await.unwrap();

        let mut row = store.unprocessed(10).await.unwrap().remove(0);
        let hash = row.content_hash().to_string();
        row.set_content("texto limpo e revisado".to_string());
        row.category = "Civil".to_string();
        row.tags.insert("article:Artigo 5");
        row.processed = true;
        store.update_curated(&row).await.unwrap();

        assert!(store.unprocessed(10).await.unwrap().is_empty());
        assert_eq!(store.category_counts().await.unwrap().get("Civil"), Some(&1));
        assert!(store.processed_above(0.5, 10).await.unwrap().is_empty());
        let stored = store.latest(1).await.unwrap().remove(0);
        assert_eq!(stored.word_count(), 4);
        assert_eq!(stored.content_hash(), hash);
        assert!(stored.tags.contains("article:Artigo 5"));

        let detached = record("https://a/2", "nunca salvo");
        assert!(matches!(store.update_curated(&detached).await, Err(StoreError::MissingId)));
    }

    #[tokio::test]
    async fn sessions_and_snapshots_are_append_only_rows() {
        let store = ContentStore::in_memory().await.unwrap();
        let now = Utc::now();
        let session = ScrapeSession {
            id: None,
            source: "STF - Supremo Tribunal Federal".to_string(),
            started_at: now,
            finished_at: now,
            status: SessionStatus::Failed,
            items_scraped: 3,
            items_saved: 1,
            errors: vec!["Error fetching https://x: timeout".to_string()],
            detail: "listing unavailable".to_string(),
        };
        let id = store.record_session(&session).await.unwrap();
        let sessions = store.recent_sessions(5).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, Some(id));
        assert_eq!(sessions[0].errors, session.errors);
        assert_eq!(sessions[0].status, SessionStatus::Failed);

        assert!(store.latest_quality_snapshot().await.unwrap().is_none());
        let snapshot = store.stats().await.unwrap().to_snapshot();
        store.record_quality_snapshot(&snapshot).await.unwrap();
        assert_eq!(store.latest_quality_snapshot().await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn backup_creates_timestamped_copy() {
        let dir = tempdir().unwrap();
        let store = ContentStore::open(dir.path().join("legal_texts.db")).await.unwrap();
        store.save(&record("https://a/1", "conteúdo")).await.unwrap();

        let backup = store.backup_to(dir.path().join("backups")).await.unwrap();
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("legal_texts_backup_"));
        assert!(name.ends_with(".db"));

        let copy = ContentStore::open(&backup).await.unwrap();
        assert_eq!(copy.stats().await.unwrap().total_documents, 1);
    }
}
