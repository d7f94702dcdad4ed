use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Caller-supplied tags merged into every chunk's metadata, e.g. `doc_type`.
pub type DefaultMetadata = BTreeMap<String, Value>;

/// Provenance of one chunk. Serialized flat, one JSON object per `meta.jsonl` line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub source_path: String,
    pub source_name: String,
    /// 1-based page number.
    pub page: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ChunkMetadata {
    pub fn new(source_path: impl Into<String>, source_name: impl Into<String>, page: u32) -> Self {
        Self {
            source_path: source_path.into(),
            source_name: source_name.into(),
            page,
            extra: BTreeMap::new(),
        }
    }

    /// Applies default tags on top of the provenance fields; the defaults win on key overlap.
    /// A reserved key whose value has the wrong type is ignored.
    pub fn with_defaults(mut self, defaults: &DefaultMetadata) -> Self {
        for (key, value) in defaults {
            match key.as_str() {
                "source_path" => {
                    if let Some(path) = value.as_str() {
                        self.source_path = path.to_string();
                    }
                }
                "source_name" => {
                    if let Some(name) = value.as_str() {
                        self.source_name = name.to_string();
                    }
                }
                "page" => {
                    if let Some(page) = value.as_u64().and_then(|page| u32::try_from(page).ok()) {
                        if page >= 1 {
                            self.page = page;
                        }
                    }
                }
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
        self
    }

    /// Deduplication key used when assembling context.
    pub fn page_key(&self) -> (&str, u32) {
        (self.source_name.as_str(), self.page)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// One scored row of the index. `row` is the row's insertion index and stays
/// valid for the lifetime of the index because rows are only ever appended.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetrievalHit {
    pub row: usize,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f64,
    pub lex_score: f64,
}

impl RetrievalHit {
    pub fn hybrid_score(&self, lexical_weight: f64) -> f64 {
        self.score + lexical_weight * self.lex_score
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_chars: usize,
    /// Pages shorter than this after normalization are treated as scanned or logo-only.
    pub min_page_chars: usize,
    /// Case-insensitive patterns for issuer names printed in headers and footers.
    pub issuer_hints: Vec<String>,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 400,
            chunk_overlap: 50,
            min_chunk_chars: 40,
            min_page_chars: 60,
            issuer_hints: ["allianz", "groupama", "generali", "uniqa", "nn"]
                .iter()
                .map(|hint| format!("{hint}.*"))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_extend_and_override_metadata() {
        let mut defaults = DefaultMetadata::new();
        defaults.insert("doc_type".to_string(), json!("Bundled"));
        defaults.insert("source_name".to_string(), json!("renamed.pdf"));
        defaults.insert("page".to_string(), json!("not a number"));

        let metadata = ChunkMetadata::new("/data/a.pdf", "a.pdf", 3).with_defaults(&defaults);

        assert_eq!(metadata.source_name, "renamed.pdf");
        assert_eq!(metadata.page, 3);
        assert_eq!(metadata.extra.get("doc_type"), Some(&json!("Bundled")));
        assert!(!metadata.extra.contains_key("page"));
    }

    #[test]
    fn metadata_serializes_flat() -> Result<(), serde_json::Error> {
        let mut defaults = DefaultMetadata::new();
        defaults.insert("doc_type".to_string(), json!("Bundled"));
        let metadata = ChunkMetadata::new("/data/a.pdf", "a.pdf", 1).with_defaults(&defaults);

        let line = serde_json::to_string(&metadata)?;
        assert_eq!(
            line,
            r#"{"source_path":"/data/a.pdf","source_name":"a.pdf","page":1,"doc_type":"Bundled"}"#
        );

        let parsed: ChunkMetadata = serde_json::from_str(&line)?;
        assert_eq!(parsed, metadata);
        Ok(())
    }
}
