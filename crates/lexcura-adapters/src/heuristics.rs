//! Scrape-time heuristics shared by every source: text cleanup, date
//! extraction and the provisional quality score.

use std::sync::LazyLock;

use chrono::NaiveDate;
use lexcura_core::{clamp_score, Record};
use regex::Regex;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static ACORDAO_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)ACÓRDÃO.*?RELATÓRIO").expect("valid regex"));
static SIGNATURE_TAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Documento assinado.*$").expect("valid regex"));

static NUMERIC_DMY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})[/\-.](\d{1,2})[/\-.](\d{4})").expect("valid regex"));
static LONG_FORM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{1,2})\s+de\s+(\w+)\s+de\s+(\d{4})").expect("valid regex"));
static NUMERIC_YMD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})[/\-.](\d{1,2})[/\-.](\d{1,2})").expect("valid regex"));

/// Keywords counted by the provisional score (0.05 each, capped).
pub const LEGAL_KEYWORDS: &[&str] = &[
    "acórdão",
    "sentença",
    "despacho",
    "decisão",
    "recurso",
    "apelação",
    "embargos",
    "habeas corpus",
    "mandado",
    "constitucional",
    "civil",
    "penal",
    "trabalhista",
    "administrativo",
    "tributário",
    "comercial",
];

/// Collapse whitespace and drop the acórdão header block and any trailing
/// digital-signature notice.
pub fn clean_text(raw: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(raw, " ");
    let without_header = ACORDAO_HEADER_RE.replace_all(collapsed.trim(), "RELATÓRIO");
    let without_signature = SIGNATURE_TAIL_RE.replace(&without_header, "");
    without_signature.trim().to_string()
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().as_str() {
        "janeiro" => 1,
        "fevereiro" => 2,
        "março" | "marco" => 3,
        "abril" => 4,
        "maio" => 5,
        "junho" => 6,
        "julho" => 7,
        "agosto" => 8,
        "setembro" => 9,
        "outubro" => 10,
        "novembro" => 11,
        "dezembro" => 12,
        _ => return None,
    };
    Some(month)
}

fn ymd(year: &str, month: u32, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day.parse().ok()?)
}

/// First date found in `text`, trying `D/M/YYYY`, then `D de <mês> de YYYY`,
/// then `YYYY/M/D`. A pattern whose first match is not a real calendar date
/// (or names an unknown month) falls through to the next pattern.
pub fn extract_date(text: &str) -> Option<NaiveDate> {
    let day_first = NUMERIC_DMY_RE
        .captures(text)
        .and_then(|c| ymd(&c[3], c[2].parse().ok()?, &c[1]));
    if day_first.is_some() {
        return day_first;
    }

    let long_form = LONG_FORM_RE
        .captures(text)
        .and_then(|c| ymd(&c[3], month_number(&c[2])?, &c[1]));
    if long_form.is_some() {
        return long_form;
    }

    NUMERIC_YMD_RE
        .captures(text)
        .and_then(|c| ymd(&c[1], c[2].parse().ok()?, &c[3]))
}

/// Provisional score assigned at scrape time, before curation.
pub fn provisional_quality_score(record: &Record) -> f64 {
    let mut score = 0.0;

    let words = record.word_count();
    if words > 500 {
        score += 0.3;
    } else if words > 200 {
        score += 0.2;
    } else if words > 50 {
        score += 0.1;
    }

    if record.title.chars().count() > 10 {
        score += 0.2;
    }

    let content = record.content().to_lowercase();
    let hits = LEGAL_KEYWORDS.iter().filter(|kw| content.contains(*kw)).count();
    score += (hits as f64 * 0.05).min(0.3);

    let source = record.source.to_lowercase();
    if source.contains("stf") || source.contains("stj") {
        score += 0.2;
    } else if source.contains("tribunal") {
        score += 0.15;
    } else if record.url.contains("gov.br") {
        score += 0.1;
    }

    clamp_score(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_and_strips_artifacts() {
        let raw = "  ACÓRDÃO \n Vistos...   RELATÓRIO  O ministro votou.\nDocumento assinado digitalmente por X ";
        assert_eq!(clean_text(raw), "RELATÓRIO O ministro votou.");
    }

    #[test]
    fn dates_follow_pattern_priority() {
        assert_eq!(extract_date("Julgado em 15/03/2024."), NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(extract_date("Brasília, 2 de Março de 2023"), NaiveDate::from_ymd_opt(2023, 3, 2));
        assert_eq!(extract_date("em 2 de marco de 2023"), NaiveDate::from_ymd_opt(2023, 3, 2));
        assert_eq!(extract_date("publicado 2022-11-30"), NaiveDate::from_ymd_opt(2022, 11, 30));
        assert_eq!(extract_date("sem data"), None);
    }

    #[test]
    fn impossible_or_unknown_dates_yield_none() {
        assert_eq!(extract_date("31/02/2024"), None);
        assert_eq!(extract_date("5 de brumário de 2020"), None);
    }

    #[test]
    fn provisional_score_adds_up_components() {
        let content = format!("{} acórdão recurso penal", "palavra ".repeat(210));
        let record = Record::new(
            "Habeas corpus no STF",
            content,
            "STF - Supremo Tribunal Federal",
            "https://portal.stf.jus.br/x",
            "Jurisprudência",
        );
        // 0.2 words + 0.2 title + 0.15 keywords + 0.2 source
        assert!((provisional_quality_score(&record) - 0.75).abs() < 1e-9);

        let sparse = Record::new("curto", "nada", "Blog", "https://example.gov.br/p", "");
        assert!((provisional_quality_score(&sparse) - 0.1).abs() < 1e-9);
    }
}
