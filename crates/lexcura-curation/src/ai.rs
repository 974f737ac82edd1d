//! Optional AI refinement of category, tags and quality.

use std::time::Duration;

use async_trait::async_trait;
use lexcura_core::{clamp_score, Record};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

pub const EXCERPT_CHARS: usize = 2000;
pub const MAX_AI_TAGS: usize = 5;

pub const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("text analysis is disabled")]
    Disabled,
    #[error("analysis request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("analysis service returned status {0}")]
    Status(u16),
    #[error("analysis service returned no text")]
    EmptyResponse,
}

/// External text-analysis collaborator: prompt in, raw model text out.
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn analyze(&self, prompt: &str) -> Result<String, AnalyzerError>;
}

/// Used when no API key is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAnalyzer;

#[async_trait]
impl TextAnalyzer for DisabledAnalyzer {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn analyze(&self, _prompt: &str) -> Result<String, AnalyzerError> {
        Err(AnalyzerError::Disabled)
    }
}

/// Gemini `generateContent` client.
#[derive(Debug, Clone)]
pub struct GeminiAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiAnalyzer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: GEMINI_ENDPOINT.to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl TextAnalyzer for GeminiAnalyzer {
    async fn analyze(&self, prompt: &str) -> Result<String, AnalyzerError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        );
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        let resp = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AnalyzerError::Status(resp.status().as_u16()));
        }
        let parsed: GenerateResponse = resp.json().await?;
        parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text.filter(|t| !t.trim().is_empty()))
            .ok_or(AnalyzerError::EmptyResponse)
    }
}

/// Structured answer expected back from the analyzer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AiInsights {
    pub categoria: String,
    pub tags: Vec<String>,
    pub qualidade: f64,
    pub resumo: String,
}

pub fn build_prompt(content: &str) -> String {
    let excerpt: String = content.chars().take(EXCERPT_CHARS).collect();
    format!(
        "Analise este texto jurídico brasileiro e forneça:\n\
         1. Categoria principal (Constitucional, Civil, Penal, etc.)\n\
         2. Tags relevantes (máximo {MAX_AI_TAGS})\n\
         3. Score de qualidade (0-1) baseado em relevância jurídica\n\
         4. Resumo em uma frase\n\n\
         Texto: {excerpt}...\n\n\
         Responda somente em formato JSON:\n\
         {{\"categoria\": \"categoria_principal\", \"tags\": [\"tag1\", \"tag2\"], \
         \"qualidade\": 0.85, \"resumo\": \"resumo_do_texto\"}}"
    )
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (e.g. `json`) on the opening fence line
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse the analyzer's reply. `None` for anything that is not a complete
/// answer with `qualidade` inside `[0, 1]`.
pub fn parse_insights(raw: &str) -> Option<AiInsights> {
    let body = strip_code_fence(raw);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    let insights: AiInsights = serde_json::from_str(&body[start..=end]).ok()?;
    if !(0.0..=1.0).contains(&insights.qualidade) {
        return None;
    }
    Some(insights)
}

/// Fold AI insights into a heuristically curated record.
pub fn merge_insights(record: &mut Record, insights: &AiInsights) {
    let category = insights.categoria.trim();
    if !category.is_empty() {
        record.category = category.to_string();
    }
    record.tags.extend(
        insights
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .take(MAX_AI_TAGS),
    );
    record.set_quality_score(clamp_score((record.quality_score() + insights.qualidade) / 2.0));
}
