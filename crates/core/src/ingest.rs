use crate::chunking::{window_text, ChunkingConfig, WindowCursor};
use crate::extractor::{LopdfExtractor, PageExtractor};
use crate::normalizer::TextNormalizer;
use crate::traits::VectorIndex;
use crate::{
    ChunkMetadata, ChunkRecord, DefaultMetadata, IngestError, IngestionOptions, SearchError,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Tags applied to every chunk of the bundled sample corpus.
pub fn bundled_metadata() -> DefaultMetadata {
    let mut defaults = DefaultMetadata::new();
    defaults.insert("doc_type".to_string(), Value::String("Bundled".to_string()));
    defaults
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// PDF page text → normalized text → overlapping chunk records.
#[derive(Debug, Clone)]
pub struct IngestionPipeline {
    normalizer: TextNormalizer,
    chunking: ChunkingConfig,
    min_page_chars: usize,
}

impl IngestionPipeline {
    pub fn new(options: &IngestionOptions) -> Result<Self, IngestError> {
        Ok(Self {
            normalizer: TextNormalizer::new(&options.issuer_hints)?,
            chunking: ChunkingConfig::try_from(options)?,
            min_page_chars: options.min_page_chars,
        })
    }

    /// Opens `pdf_path` and streams its chunks. Only opening the document can
    /// fail; a page whose text cannot be extracted is treated as empty.
    pub fn ingest(
        &self,
        pdf_path: &Path,
        defaults: &DefaultMetadata,
    ) -> Result<PageChunks<'_, LopdfExtractor>, IngestError> {
        let source_name = pdf_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(pdf_path.display().to_string()))?
            .to_string();
        let extractor = LopdfExtractor::open(pdf_path)?;

        Ok(self.chunk_pages(
            extractor,
            pdf_path.to_string_lossy().to_string(),
            source_name,
            defaults.clone(),
        ))
    }

    pub fn chunk_pages<E: PageExtractor>(
        &self,
        extractor: E,
        source_path: String,
        source_name: String,
        defaults: DefaultMetadata,
    ) -> PageChunks<'_, E> {
        let page_count = extractor.page_count() as u32;
        PageChunks {
            pipeline: self,
            extractor,
            source_path,
            source_name,
            defaults,
            next_page: 1,
            page_count,
            current: None,
        }
    }

    /// Normalized page text, or `None` when too little survives cleanup.
    fn page_text(&self, raw: &str) -> Option<Vec<char>> {
        let cleaned = self.normalizer.normalize(raw);
        let chars = cleaned.chars().collect::<Vec<_>>();
        if chars.len() < self.min_page_chars {
            None
        } else {
            Some(chars)
        }
    }
}

struct PageState {
    page: u32,
    chars: Vec<char>,
    cursor: WindowCursor,
}

/// Lazy chunk stream over one document. Holds at most one page of text.
pub struct PageChunks<'a, E> {
    pipeline: &'a IngestionPipeline,
    extractor: E,
    source_path: String,
    source_name: String,
    defaults: DefaultMetadata,
    next_page: u32,
    page_count: u32,
    current: Option<PageState>,
}

impl<E: PageExtractor> PageChunks<'_, E> {
    fn load_next_page(&mut self) -> bool {
        while self.next_page <= self.page_count {
            let page = self.next_page;
            self.next_page += 1;

            let raw = match self.extractor.extract_text(page) {
                Ok(text) => text,
                Err(error) => {
                    debug!(source = %self.source_name, page, %error, "page extraction failed");
                    String::new()
                }
            };

            match self.pipeline.page_text(&raw) {
                Some(chars) => {
                    let cursor = WindowCursor::new(chars.len());
                    self.current = Some(PageState {
                        page,
                        chars,
                        cursor,
                    });
                    return true;
                }
                None => debug!(source = %self.source_name, page, "page skipped: too little text"),
            }
        }
        false
    }
}

impl<E: PageExtractor> Iterator for PageChunks<'_, E> {
    type Item = ChunkRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(state) = self.current.as_mut() {
                let chunking = &self.pipeline.chunking;
                while let Some(window) = state.cursor.advance(chunking) {
                    if let Some(text) = window_text(&state.chars, window, chunking.min_chars) {
                        let metadata =
                            ChunkMetadata::new(&self.source_path, &self.source_name, state.page)
                                .with_defaults(&self.defaults);
                        return Some(ChunkRecord { text, metadata });
                    }
                }
                self.current = None;
            }

            if !self.load_next_page() {
                return None;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct IndexingReport {
    pub indexed_files: usize,
    pub total_chunks: usize,
    pub skipped_files: Vec<SkippedPdf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Streams `records` into `store` in batches of `batch_size`; returns the row count added.
pub fn add_in_batches<V, I>(store: &V, records: I, batch_size: usize) -> Result<usize, SearchError>
where
    V: VectorIndex,
    I: IntoIterator<Item = ChunkRecord>,
{
    let batch_size = batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    let mut count = 0;

    for record in records {
        batch.push(record);
        if batch.len() >= batch_size {
            store.add_batch(&batch)?;
            count += batch.len();
            batch.clear();
        }
    }
    if !batch.is_empty() {
        store.add_batch(&batch)?;
        count += batch.len();
    }

    Ok(count)
}

/// Indexes every file, one at a time. A file that cannot be opened is recorded
/// in the report and the run continues; store and embedding failures abort it.
pub fn index_corpus<V: VectorIndex>(
    store: &V,
    pipeline: &IngestionPipeline,
    files: &[PathBuf],
    defaults: &DefaultMetadata,
    batch_size: usize,
) -> Result<IndexingReport, SearchError> {
    let started_at = Utc::now();
    let mut indexed_files = 0;
    let mut total_chunks = 0;
    let mut skipped_files = Vec::new();

    for (position, path) in files.iter().enumerate() {
        info!(file = %path.display(), position = position + 1, of = files.len(), "indexing pdf");
        let started = Instant::now();

        let chunks = match pipeline.ingest(path, defaults) {
            Ok(chunks) => chunks,
            Err(error) => {
                warn!(file = %path.display(), %error, "skipped pdf");
                skipped_files.push(SkippedPdf {
                    path: path.clone(),
                    reason: error.to_string(),
                });
                continue;
            }
        };

        let count = add_in_batches(store, chunks, batch_size)?;
        info!(
            file = %path.display(),
            chunks = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "indexed pdf"
        );
        indexed_files += 1;
        total_chunks += count;
    }

    Ok(IndexingReport {
        indexed_files,
        total_chunks,
        skipped_files,
        started_at,
        finished_at: Utc::now(),
    })
}

/// Appends one PDF to whatever the store already holds.
pub fn index_pdf<V: VectorIndex>(
    store: &V,
    pipeline: &IngestionPipeline,
    path: &Path,
    defaults: &DefaultMetadata,
    batch_size: usize,
) -> Result<IndexingReport, SearchError> {
    index_corpus(store, pipeline, &[path.to_path_buf()], defaults, batch_size)
}

/// Discards the existing index and indexes `files` from scratch.
pub fn rebuild_index<V: VectorIndex>(
    store: &V,
    pipeline: &IngestionPipeline,
    files: &[PathBuf],
    defaults: &DefaultMetadata,
    batch_size: usize,
) -> Result<IndexingReport, SearchError> {
    store.reset()?;
    index_corpus(store, pipeline, files, defaults, batch_size)
}

#[derive(Debug, Clone)]
pub struct ChunkCount {
    pub chunks: usize,
    pub first_preview: Option<String>,
}

/// Dry run of the pipeline over one file.
pub fn count_chunks(
    pipeline: &IngestionPipeline,
    path: &Path,
    defaults: &DefaultMetadata,
) -> Result<ChunkCount, IngestError> {
    let mut chunks = 0;
    let mut first_preview = None;
    for record in pipeline.ingest(path, defaults)? {
        if first_preview.is_none() {
            first_preview = Some(record.text.chars().take(120).collect());
        }
        chunks += 1;
    }
    Ok(ChunkCount {
        chunks,
        first_preview,
    })
}
