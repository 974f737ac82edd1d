//! Source adapter contract + the HTML source profiles lexcura scrapes.

pub mod heuristics;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use lexcura_core::Record;
use lexcura_storage::HttpFetcher;
use rand::Rng;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use heuristics::{clean_text, extract_date, provisional_quality_score};

pub const CRATE_NAME: &str = "lexcura-adapters";

pub const CATEGORY_JURISPRUDENCE: &str = "Jurisprudência";
pub const CATEGORY_LEGAL_NEWS: &str = "Notícias Jurídicas";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Outcome of one adapter run: the candidates that passed the content gate
/// plus every per-page error the run tolerated.
#[derive(Debug, Default)]
pub struct AdapterRun {
    pub records: Vec<Record>,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Fetch up to `limit` candidates. Page-level failures land in
    /// [`AdapterRun::errors`]; only a misconfigured adapter returns `Err`.
    async fn fetch(&self, http: &HttpFetcher, limit: usize) -> Result<AdapterRun, AdapterError>;

    /// Turn one detail page into a record, or `None` when the page fails the
    /// content gate.
    fn parse(&self, url: &str, html: &str) -> Result<Option<Record>, AdapterError>;

    fn score(&self, record: &Record) -> f64 {
        provisional_quality_score(record)
    }
}

/// Where a source's publication date is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateStrategy {
    /// First date mentioned in the extracted content.
    FromContent,
    /// First element whose class attribute mentions `date` or `time`.
    FromDateElement,
}

#[derive(Debug, Clone)]
pub struct SourceProfile {
    pub name: &'static str,
    pub base_url: &'static str,
    pub listing_url: &'static str,
    pub link_pattern: &'static str,
    pub title_selectors: &'static [&'static str],
    pub default_title: &'static str,
    pub content_selectors: &'static [&'static str],
    pub fallback_selectors: &'static [&'static str],
    /// Content must be strictly longer than this many characters.
    pub min_content_chars: usize,
    pub delay_ms: (u64, u64),
    pub category: &'static str,
    pub default_tags: &'static [&'static str],
    pub date_strategy: DateStrategy,
}

/// Listing-then-detail HTML scraper driven entirely by a [`SourceProfile`].
#[derive(Debug, Clone)]
pub struct HtmlSourceAdapter {
    profile: SourceProfile,
}

impl HtmlSourceAdapter {
    pub fn new(profile: SourceProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    /// Point the adapter at a different host, keeping the listing path.
    pub fn with_base_url(mut self, base_url: &'static str, listing_url: &'static str) -> Self {
        self.profile.base_url = base_url;
        self.profile.listing_url = listing_url;
        self
    }

    pub fn with_delay_range(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.profile.delay_ms = (min_ms.min(max_ms), max_ms.max(min_ms));
        self
    }

    async fn polite_delay(&self) {
        let (lo, hi) = self.profile.delay_ms;
        if hi == 0 {
            return;
        }
        let wait = Duration::from_millis(rand::rng().random_range(lo..=hi));
        tokio::time::sleep(wait).await;
    }

    /// Ordered, de-duplicated detail links from the listing page.
    fn detail_links(&self, listing: &str, limit: usize) -> Result<Vec<String>, AdapterError> {
        let pattern = Regex::new(self.profile.link_pattern)
            .map_err(|e| AdapterError::Message(e.to_string()))?;
        let base = Url::parse(self.profile.base_url)
            .map_err(|e| AdapterError::Message(format!("bad base url {}: {e}", self.profile.base_url)))?;
        let anchors = parse_selector("a[href]")?;

        let document = Html::parse_document(listing);
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for anchor in document.select(&anchors) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            if !pattern.is_match(href) {
                continue;
            }
            let Ok(resolved) = base.join(href) else {
                continue;
            };
            let resolved = resolved.to_string();
            if seen.insert(resolved.clone()) {
                links.push(resolved);
            }
            if links.len() >= limit {
                break;
            }
        }
        Ok(links)
    }

    fn extract_title(&self, document: &Html) -> Result<String, AdapterError> {
        for selector in self.profile.title_selectors {
            if let Some(title) = select_first_text(document, selector)? {
                let title = clean_text(&title);
                if !title.is_empty() {
                    return Ok(title);
                }
            }
        }
        Ok(self.profile.default_title.to_string())
    }

    fn extract_content(&self, document: &Html) -> Result<String, AdapterError> {
        let ordered = self
            .profile
            .content_selectors
            .iter()
            .chain(self.profile.fallback_selectors.iter());
        for selector in ordered {
            if let Some(text) = select_first_text(document, selector)? {
                let content = clean_text(&text);
                if !content.is_empty() {
                    return Ok(content);
                }
            }
        }
        Ok(String::new())
    }

    fn extract_published_on(
        &self,
        document: &Html,
        content: &str,
    ) -> Result<Option<chrono::NaiveDate>, AdapterError> {
        match self.profile.date_strategy {
            DateStrategy::FromContent => Ok(extract_date(content)),
            DateStrategy::FromDateElement => {
                let classed = parse_selector("[class]")?;
                let date_text = document
                    .select(&classed)
                    .find(|el| {
                        el.value()
                            .attr("class")
                            .is_some_and(|c| c.contains("date") || c.contains("time"))
                    })
                    .map(visible_text);
                Ok(date_text.and_then(|t| extract_date(&t)))
            }
        }
    }
}

fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Message(e.to_string()))
}

/// Text of `element` without anything inside script/style blocks.
fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|el| matches!(el.name(), "script" | "style" | "noscript"))
        });
        if hidden {
            continue;
        }
        out.push_str(text);
        out.push(' ');
    }
    out
}

fn select_first_text(document: &Html, selector: &str) -> Result<Option<String>, AdapterError> {
    let sel = parse_selector(selector)?;
    Ok(document.select(&sel).next().and_then(|n| {
        let text = visible_text(n);
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }))
}

#[async_trait]
impl SourceAdapter for HtmlSourceAdapter {
    fn source_name(&self) -> &'static str {
        self.profile.name
    }

    async fn fetch(&self, http: &HttpFetcher, limit: usize) -> Result<AdapterRun, AdapterError> {
        let source = self.profile.name;
        let mut run = AdapterRun::default();

        self.polite_delay().await;
        let listing = match http.fetch_text(source, self.profile.listing_url).await {
            Ok(page) => page,
            Err(err) => {
                let msg = format!("Error fetching {}: {err}", self.profile.listing_url);
                warn!(source, error = %err, "listing fetch failed");
                run.errors.push(msg);
                return Ok(run);
            }
        };

        let links = self.detail_links(&listing.body, limit)?;
        debug!(source, links = links.len(), "detail links found");

        for url in links {
            self.polite_delay().await;
            let page = match http.fetch_text(source, &url).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(source, url = %url, error = %err, "detail fetch failed");
                    run.errors.push(format!("Error fetching {url}: {err}"));
                    continue;
                }
            };
            match self.parse(&url, &page.body) {
                Ok(Some(record)) => {
                    info!(source, title = %truncate(&record.title, 50), "scraped");
                    run.records.push(record);
                }
                Ok(None) => debug!(source, url = %url, "below content gate"),
                Err(err) => {
                    warn!(source, url = %url, error = %err, "parse failed");
                    run.errors.push(format!("Error processing {url}: {err}"));
                }
            }
        }
        Ok(run)
    }

    fn parse(&self, url: &str, html: &str) -> Result<Option<Record>, AdapterError> {
        let document = Html::parse_document(html);
        let content = self.extract_content(&document)?;
        if content.chars().count() <= self.profile.min_content_chars {
            return Ok(None);
        }
        let title = self.extract_title(&document)?;
        let published_on = self.extract_published_on(&document, &content)?;

        let mut record = Record::new(title, content, self.profile.name, url, self.profile.category)
            .with_published_on(published_on)
            .with_tags(self.profile.default_tags.iter().copied());
        let score = self.score(&record);
        record.set_quality_score(score);
        Ok(Some(record))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

pub fn stf_adapter() -> HtmlSourceAdapter {
    HtmlSourceAdapter::new(SourceProfile {
        name: "STF - Supremo Tribunal Federal",
        base_url: "https://portal.stf.jus.br",
        listing_url: "https://portal.stf.jus.br/jurisprudencia/",
        link_pattern: "decision|acordao|sentenca",
        title_selectors: &["h1", "h2", "title"],
        default_title: "Decisão STF",
        content_selectors: &[
            ".decision-content",
            ".acordao-text",
            ".content-text",
            ".main-content",
            "#content",
            "main",
        ],
        fallback_selectors: &["body"],
        min_content_chars: 100,
        delay_ms: (2_000, 4_000),
        category: CATEGORY_JURISPRUDENCE,
        default_tags: &[],
        date_strategy: DateStrategy::FromContent,
    })
}

pub fn stj_adapter() -> HtmlSourceAdapter {
    HtmlSourceAdapter::new(SourceProfile {
        name: "STJ - Superior Tribunal de Justiça",
        base_url: "https://www.stj.jus.br",
        listing_url: "https://www.stj.jus.br/sites/portalp/Jurisprudencia",
        link_pattern: "acordao|decisao|jurisprudencia",
        title_selectors: &["h1", "h2", ".title"],
        default_title: "Decisão STJ",
        content_selectors: &[
            ".jurisprudencia-content",
            ".acordao-text",
            ".decision-text",
            ".content-main",
            "#main-content",
        ],
        fallback_selectors: &["main", "body"],
        min_content_chars: 100,
        delay_ms: (2_000, 4_000),
        category: CATEGORY_JURISPRUDENCE,
        default_tags: &[],
        date_strategy: DateStrategy::FromContent,
    })
}

pub fn conjur_adapter() -> HtmlSourceAdapter {
    HtmlSourceAdapter::new(SourceProfile {
        name: "Consultor Jurídico",
        base_url: "https://www.conjur.com.br",
        listing_url: "https://www.conjur.com.br",
        link_pattern: r"/\d{4}-\w+-\d{2}",
        title_selectors: &["h1", ".title", ".headline", "title"],
        default_title: "Consultor Jurídico",
        content_selectors: &[
            ".article-content",
            ".post-content",
            ".entry-content",
            ".content",
            "article",
        ],
        fallback_selectors: &[],
        min_content_chars: 200,
        delay_ms: (1_000, 2_000),
        category: CATEGORY_LEGAL_NEWS,
        default_tags: &["notícias", "análise jurídica"],
        date_strategy: DateStrategy::FromDateElement,
    })
}

pub fn migalhas_adapter() -> HtmlSourceAdapter {
    HtmlSourceAdapter::new(SourceProfile {
        name: "Migalhas",
        base_url: "https://www.migalhas.com.br",
        listing_url: "https://www.migalhas.com.br",
        link_pattern: "/noticia|/artigo",
        title_selectors: &["h1", ".title", ".headline", "title"],
        default_title: "Migalhas",
        content_selectors: &[
            ".article-body",
            ".content-text",
            ".post-content",
            ".entry-content",
            "article",
        ],
        fallback_selectors: &[],
        min_content_chars: 200,
        delay_ms: (1_000, 2_000),
        category: CATEGORY_LEGAL_NEWS,
        default_tags: &["migalhas", "notícias jurídicas"],
        date_strategy: DateStrategy::FromContent,
    })
}

/// Lookup by short key (`stf`, `stj`, `conjur`, `migalhas`) or full source name.
pub fn adapter_for_source(source: &str) -> Option<Box<dyn SourceAdapter>> {
    let key = source.trim().to_lowercase();
    let adapter = match key.as_str() {
        "stf" => stf_adapter(),
        "stj" => stj_adapter(),
        "conjur" => conjur_adapter(),
        "migalhas" => migalhas_adapter(),
        _ => default_adapters()
            .into_iter()
            .find(|a| a.source_name().to_lowercase() == key)?,
    };
    Some(Box::new(adapter))
}

/// Every source, in scraping order.
pub fn default_adapters() -> Vec<HtmlSourceAdapter> {
    vec![stf_adapter(), stj_adapter(), conjur_adapter(), migalhas_adapter()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, response::Html as AxumHtml, routing::get, Router};
    use lexcura_storage::{BackoffPolicy, HttpClientConfig};

    const LONG_DECISION: &str = "O Tribunal, por unanimidade, negou provimento ao recurso \
        extraordinário, nos termos do voto do Relator. Julgado em 12/08/2024. A decisão \
        reafirma a jurisprudência constitucional sobre a matéria.";

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            backoff: BackoffPolicy::no_retries(),
            ..Default::default()
        })
        .unwrap()
    }

    fn leak(s: String) -> &'static str {
        Box::leak(s.into_boxed_str())
    }

    fn detail_page(title: &str, body: &str) -> String {
        format!(
            "<html><head><title>ignored</title><style>.x{{}}</style></head>\
             <body><h1>{title}</h1><div class=\"decision-content\">{body}\
             <script>var tracking = 1;</script></div></body></html>"
        )
    }

    #[test]
    fn parse_applies_gate_and_profile_metadata() {
        let adapter = stf_adapter();
        let html = detail_page("ADI 1234", LONG_DECISION);
        let record = adapter
            .parse("https://portal.stf.jus.br/acordao/1", &html)
            .unwrap()
            .expect("above gate");

        assert_eq!(record.title, "ADI 1234");
        assert_eq!(record.category, CATEGORY_JURISPRUDENCE);
        assert_eq!(record.source, "STF - Supremo Tribunal Federal");
        assert_eq!(record.published_on, chrono::NaiveDate::from_ymd_opt(2024, 8, 12));
        assert!(!record.content().contains("tracking"));
        assert!(record.quality_score() > 0.0);

        let short = detail_page("ADI 1", "curto demais");
        assert!(adapter.parse("https://portal.stf.jus.br/acordao/2", &short).unwrap().is_none());
    }

    #[test]
    fn news_profile_reads_date_element_and_default_tags() {
        let body = "x ".repeat(150);
        let html = format!(
            "<html><body><h1>Notícia</h1><span class=\"post-date\">3 de abril de 2024</span>\
             <div class=\"article-content\">{body}</div></body></html>"
        );
        let record = conjur_adapter()
            .parse("https://www.conjur.com.br/2024-abr-03/x", &html)
            .unwrap()
            .expect("above gate");
        assert_eq!(record.published_on, chrono::NaiveDate::from_ymd_opt(2024, 4, 3));
        assert!(record.tags.contains("notícias"));
        assert!(record.tags.contains("análise jurídica"));
        assert_eq!(record.category, CATEGORY_LEGAL_NEWS);
    }

    #[test]
    fn missing_selectors_fall_back_to_body_for_courts_only() {
        let html = format!("<html><body><p>{LONG_DECISION}</p></body></html>");
        assert!(stf_adapter().parse("https://x/acordao/1", &html).unwrap().is_some());
        assert!(migalhas_adapter().parse("https://x/noticia/1", &html).unwrap().is_none());
    }

    #[test]
    fn registry_resolves_keys_and_names() {
        assert_eq!(adapter_for_source("STJ").unwrap().source_name(), "STJ - Superior Tribunal de Justiça");
        assert_eq!(adapter_for_source("Migalhas").unwrap().source_name(), "Migalhas");
        assert!(adapter_for_source("tst").is_none());
        assert_eq!(default_adapters().len(), 4);
    }

    #[tokio::test]
    async fn fetch_drops_short_pages_and_records_failures() {
        let app = Router::new()
            .route(
                "/jurisprudencia/",
                get(|| async {
                    AxumHtml(
                        "<a href=\"/acordao/1\">1</a><a href=\"/acordao/2\">2</a>\
                         <a href=\"/acordao/1\">dup</a><a href=\"/sobre\">x</a>\
                         <a href=\"/acordao/3\">3</a><a href=\"/acordao/404\">gone</a>",
                    )
                }),
            )
            .route("/acordao/1", get(|| async { AxumHtml(detail_page("Primeiro", LONG_DECISION)) }))
            .route(
                "/acordao/2",
                get(|| async { AxumHtml(detail_page("Segundo", &format!("{LONG_DECISION} Segundo."))) }),
            )
            .route("/acordao/3", get(|| async { AxumHtml(detail_page("Curto", "poucas palavras")) }))
            .route("/acordao/404", get(|| async { StatusCode::NOT_FOUND }));
        let base = serve(app).await;

        let adapter = stf_adapter()
            .with_base_url(leak(base.clone()), leak(format!("{base}/jurisprudencia/")))
            .with_delay_range(0, 0);
        let run = adapter.fetch(&fetcher(), 10).await.unwrap();

        let titles: Vec<&str> = run.records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Primeiro", "Segundo"]);
        assert_eq!(run.errors.len(), 1);
        assert!(run.errors[0].contains("/acordao/404"));
    }

    #[tokio::test]
    async fn fetch_respects_limit_and_survives_listing_failure() {
        let app = Router::new()
            .route(
                "/jurisprudencia/",
                get(|| async { AxumHtml("<a href=\"/acordao/1\">1</a><a href=\"/acordao/2\">2</a>") }),
            )
            .route("/acordao/1", get(|| async { AxumHtml(detail_page("Primeiro", LONG_DECISION)) }));
        let base = serve(app).await;

        let limited = stf_adapter()
            .with_base_url(leak(base.clone()), leak(format!("{base}/jurisprudencia/")))
            .with_delay_range(0, 0);
        let run = limited.fetch(&fetcher(), 1).await.unwrap();
        assert_eq!(run.records.len(), 1);
        assert!(run.errors.is_empty());

        let broken = stf_adapter()
            .with_base_url(leak(base.clone()), leak(format!("{base}/missing/")))
            .with_delay_range(0, 0);
        let run = broken.fetch(&fetcher(), 5).await.unwrap();
        assert!(run.records.is_empty());
        assert_eq!(run.errors.len(), 1);
    }
}
