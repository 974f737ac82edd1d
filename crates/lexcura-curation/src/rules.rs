//! Curation rules as data: entity patterns, category keywords, legal terms and
//! boilerplate, loaded from YAML and compiled once.

use std::path::Path;
use std::sync::LazyLock;

use lexcura_core::{clamp_score, Record, DEFAULT_CATEGORY};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

const BUILTIN_RULES: &str = include_str!("../../../rules/curation.yaml");

static MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static ARTICLE_ABBREV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bArt\.?\s*(\d+)").expect("valid regex"));
static PARAGRAPH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"§\s*(\d+)º?").expect("valid regex"));
static LAW_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Lei\s+n[º°]?\s*(\d+)[/\-](\d{4})").expect("valid regex"));
static DOUBLE_QUOTES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[“”„]").expect("valid regex"));
static SINGLE_QUOTES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[‘’‚]").expect("valid regex"));

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("reading rules file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing rules yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurationRules {
    pub version: u32,
    #[serde(default = "default_max_entities_per_kind")]
    pub max_entities_per_kind: usize,
    #[serde(default)]
    pub entities: Vec<EntityRule>,
    #[serde(default)]
    pub categories: Vec<CategoryRule>,
    #[serde(default)]
    pub legal_terms: Vec<String>,
    #[serde(default)]
    pub boilerplate: Vec<String>,
}

fn default_max_entities_per_kind() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityRule {
    pub kind: String,
    pub pattern: String,
    pub template: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub keywords: Vec<String>,
}

impl CurationRules {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RulesError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RulesError> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    pub fn builtin() -> Result<Self, RulesError> {
        Self::from_yaml_str(BUILTIN_RULES)
    }
}

fn compile(pattern: &str) -> Result<Regex, RulesError> {
    Regex::new(pattern).map_err(|source| RulesError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

#[derive(Debug)]
struct CompiledEntity {
    kind: String,
    pattern: Regex,
    template: String,
}

#[derive(Debug)]
struct CompiledCategory {
    name: String,
    keywords: Vec<String>,
}

/// Entities found in one text, grouped by kind in rule order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entities {
    pub by_kind: Vec<(String, Vec<String>)>,
}

impl Entities {
    pub fn get(&self, kind: &str) -> &[String] {
        self.by_kind
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// `kind:value` tags, at most `cap` per kind.
    pub fn as_tags(&self, cap: usize) -> Vec<String> {
        self.by_kind
            .iter()
            .flat_map(|(kind, values)| values.iter().take(cap).map(move |v| format!("{kind}:{v}")))
            .collect()
    }
}

/// Compiled, ready-to-apply form of [`CurationRules`].
#[derive(Debug)]
pub struct RuleSet {
    entities: Vec<CompiledEntity>,
    categories: Vec<CompiledCategory>,
    legal_terms: Vec<String>,
    boilerplate: Vec<Regex>,
    max_entities_per_kind: usize,
}

impl RuleSet {
    pub fn compile(rules: &CurationRules) -> Result<Self, RulesError> {
        let entities = rules
            .entities
            .iter()
            .map(|rule| {
                Ok(CompiledEntity {
                    kind: rule.kind.clone(),
                    pattern: compile(&rule.pattern)?,
                    template: rule.template.clone(),
                })
            })
            .collect::<Result<Vec<_>, RulesError>>()?;
        let boilerplate = rules
            .boilerplate
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, RulesError>>()?;
        let categories = rules
            .categories
            .iter()
            .map(|c| CompiledCategory {
                name: c.name.clone(),
                keywords: c.keywords.iter().map(|k| k.to_lowercase()).collect(),
            })
            .collect();

        Ok(Self {
            entities,
            categories,
            legal_terms: rules.legal_terms.iter().map(|t| t.to_lowercase()).collect(),
            boilerplate,
            max_entities_per_kind: rules.max_entities_per_kind,
        })
    }

    pub fn builtin() -> Result<Self, RulesError> {
        Self::compile(&CurationRules::builtin()?)
    }

    pub fn max_entities_per_kind(&self) -> usize {
        self.max_entities_per_kind
    }

    /// Deep clean: markup, entities, whitespace, boilerplate, then legal
    /// formatting. Applying it twice gives the same text.
    pub fn clean(&self, text: &str) -> String {
        let stripped = MARKUP_RE.replace_all(text, "");
        let decoded = html_escape::decode_html_entities(&stripped);
        let mut out = WHITESPACE_RE.replace_all(&decoded, " ").trim().to_string();

        for pattern in &self.boilerplate {
            out = pattern.replace_all(&out, "").into_owned();
        }

        out = ARTICLE_ABBREV_RE.replace_all(&out, "Artigo ${1}").into_owned();
        out = PARAGRAPH_RE.replace_all(&out, "§${1}º").into_owned();
        out = LAW_NUMBER_RE.replace_all(&out, "Lei nº ${1}/${2}").into_owned();
        out = DOUBLE_QUOTES_RE.replace_all(&out, "\"").into_owned();
        out = SINGLE_QUOTES_RE.replace_all(&out, "'").into_owned();

        out.trim().to_string()
    }

    pub fn extract_entities(&self, text: &str) -> Entities {
        let mut by_kind = Vec::with_capacity(self.entities.len());
        for entity in &self.entities {
            let mut values: Vec<String> = Vec::new();
            for caps in entity.pattern.captures_iter(text) {
                let mut value = String::new();
                caps.expand(&entity.template, &mut value);
                if !value.is_empty() && !values.contains(&value) {
                    values.push(value);
                }
            }
            if !values.is_empty() {
                by_kind.push((entity.kind.clone(), values));
            }
        }
        Entities { by_kind }
    }

    pub fn has_entity_marker(&self, text: &str) -> bool {
        self.entities.iter().any(|e| e.pattern.is_match(text))
    }

    /// Category with the most keyword hits in `title + content`; earlier
    /// table entries win ties, no hits means the default category.
    pub fn categorize(&self, title: &str, content: &str) -> String {
        let haystack = format!("{title} {content}").to_lowercase();
        let mut best: Option<(&str, usize)> = None;
        for category in &self.categories {
            let hits = category
                .keywords
                .iter()
                .filter(|kw| haystack.contains(kw.as_str()))
                .count();
            let better = match best {
                None => hits > 0,
                Some((_, top)) => hits > top,
            };
            if better {
                best = Some((&category.name, hits));
            }
        }
        best.map(|(name, _)| name.to_string())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
    }

    /// Weighted score over length, title, term density, source credibility
    /// and structure.
    pub fn enhanced_score(&self, record: &Record) -> f64 {
        let mut score = 0.0;

        let words = record.word_count();
        score += match words {
            w if w > 1000 => 0.25,
            w if w > 500 => 0.20,
            w if w > 200 => 0.15,
            w if w > 50 => 0.10,
            _ => 0.0,
        };

        let title_len = record.title.chars().count();
        score += match title_len {
            0 => 0.0,
            n if n > 20 => 0.15,
            n if n > 10 => 0.10,
            _ => 0.05,
        };

        let content = record.content().to_lowercase();
        let terms = self
            .legal_terms
            .iter()
            .filter(|t| content.contains(t.as_str()))
            .count() as f64;
        let density = terms / (f64::from(words) / 100.0).max(1.0);
        score += (density * 0.05).min(0.25);

        let source = record.source.to_lowercase();
        score += if ["stf", "stj", "supremo", "superior"].iter().any(|c| source.contains(c)) {
            0.20
        } else if source.contains("tribunal") {
            0.15
        } else if record.url.contains("gov.br") {
            0.12
        } else if ["conjur", "migalhas"].iter().any(|c| source.contains(c)) {
            0.10
        } else {
            0.05
        };

        if record.published_on.is_some() {
            score += 0.05;
        }
        if self.has_entity_marker(record.content()) {
            score += 0.10;
        }

        clamp_score(score)
    }
}
