//! Boilerplate and whitespace cleanup for raw extracted page text.

use crate::error::IngestError;
use regex::Regex;

const LOGO_LINE_MAX_CHARS: usize = 30;

const BOILERPLATE_PATTERNS: [&str; 6] = [
    r"pagina\s+\d+(\s*/\s*\d+)?",
    r"page\s+\d+(\s+of\s+\d+)?",
    r"\d+\s*/\s*\d+",
    r"confiden(t|ț)ial.*",
    r"copyright.*",
    r"\s*all rights reserved.*",
];

/// Collapses every whitespace run (NUL bytes included) into one space and trims.
pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\0', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
pub struct TextNormalizer {
    boilerplate: Regex,
}

impl TextNormalizer {
    /// Builds a normalizer whose boilerplate set is the built-in header and footer
    /// patterns plus `issuer_hints`. Every pattern must match a whole line.
    pub fn new<S: AsRef<str>>(issuer_hints: &[S]) -> Result<Self, IngestError> {
        let alternatives = BOILERPLATE_PATTERNS
            .iter()
            .copied()
            .chain(issuer_hints.iter().map(|hint| hint.as_ref()))
            .map(|pattern| format!("(?:{pattern})"))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Self {
            boilerplate: Regex::new(&format!("(?i)^(?:{alternatives})$"))?,
        })
    }

    pub fn normalize(&self, raw_page_text: &str) -> String {
        let kept = raw_page_text
            .lines()
            .map(str::trim)
            .filter(|line| !is_logo_line(line))
            .filter(|line| !self.boilerplate.is_match(line))
            .collect::<Vec<_>>()
            .join("\n");

        normalize_whitespace(&kept)
    }
}

/// Short all-caps lines are almost always brand marks.
fn is_logo_line(line: &str) -> bool {
    let mut has_cased = false;
    for ch in line.chars() {
        if ch.is_lowercase() {
            return false;
        }
        if ch.is_uppercase() {
            has_cased = true;
        }
    }
    has_cased && line.chars().count() <= LOGO_LINE_MAX_CHARS
}
