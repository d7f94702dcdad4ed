//! On-disk layout of a flat index: three row-aligned artifacts in one directory.
//!
//! - `embeddings.npy`: NPY v1.0, `<f4`, C order, shape `(N, D)`.
//! - `documents.json`: JSON array of N chunk texts.
//! - `meta.jsonl`: N JSON objects, one per line.
//!
//! The two array artifacts are rewritten through a temporary sibling and renamed
//! into place; metadata lines are appended last and act as the commit marker.

use crate::error::SearchError;
use crate::models::ChunkMetadata;
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const EMBEDDINGS_FILE: &str = "embeddings.npy";
pub const DOCUMENTS_FILE: &str = "documents.json";
pub const META_FILE: &str = "meta.jsonl";

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_ALIGNMENT: usize = 64;

/// Dense row-major `f32` matrix.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingMatrix {
    rows: usize,
    dim: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, SearchError> {
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in &rows {
            if row.len() != dim {
                return Err(SearchError::DimensionMismatch {
                    expected: dim,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }

        Ok(Self {
            rows: rows.len(),
            dim,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        (0..self.rows).map(move |index| self.row(index))
    }

    pub fn append(&mut self, other: &EmbeddingMatrix) -> Result<(), SearchError> {
        if other.rows == 0 {
            return Ok(());
        }
        if self.rows == 0 {
            *self = other.clone();
            return Ok(());
        }
        if other.dim != self.dim {
            return Err(SearchError::DimensionMismatch {
                expected: self.dim,
                actual: other.dim,
            });
        }
        self.data.extend_from_slice(&other.data);
        self.rows += other.rows;
        Ok(())
    }

    pub fn write_npy<W: Write>(&self, mut writer: W) -> Result<(), SearchError> {
        let mut header = format!(
            "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
            self.rows, self.dim
        );
        let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
        let padding = (NPY_ALIGNMENT - unpadded % NPY_ALIGNMENT) % NPY_ALIGNMENT;
        header.push_str(&" ".repeat(padding));
        header.push('\n');

        let header_len = u16::try_from(header.len())
            .map_err(|_| SearchError::Npy("header too long".to_string()))?;

        writer.write_all(NPY_MAGIC)?;
        writer.write_all(&[1, 0])?;
        writer.write_all(&header_len.to_le_bytes())?;
        writer.write_all(header.as_bytes())?;
        for value in &self.data {
            writer.write_all(&value.to_le_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_npy<R: Read>(mut reader: R) -> Result<Self, SearchError> {
        let mut magic = [0u8; 6];
        reader.read_exact(&mut magic)?;
        if &magic[..] != NPY_MAGIC {
            return Err(SearchError::Npy("missing NPY magic".to_string()));
        }

        let mut version = [0u8; 2];
        reader.read_exact(&mut version)?;
        let header_len = match version[0] {
            1 => {
                let mut len = [0u8; 2];
                reader.read_exact(&mut len)?;
                u16::from_le_bytes(len) as usize
            }
            2 | 3 => {
                let mut len = [0u8; 4];
                reader.read_exact(&mut len)?;
                u32::from_le_bytes(len) as usize
            }
            other => return Err(SearchError::Npy(format!("unsupported version {other}"))),
        };

        let mut header = vec![0u8; header_len];
        reader.read_exact(&mut header)?;
        let header = String::from_utf8_lossy(&header);
        let (rows, dim) = parse_npy_header(&header)?;

        let expected_bytes = rows
            .checked_mul(dim)
            .and_then(|count| count.checked_mul(4))
            .ok_or_else(|| SearchError::Npy("shape overflows".to_string()))?;
        let mut bytes = Vec::with_capacity(expected_bytes);
        reader.read_to_end(&mut bytes)?;
        if bytes.len() != expected_bytes {
            return Err(SearchError::Npy(format!(
                "expected {expected_bytes} data bytes, found {}",
                bytes.len()
            )));
        }

        let data = bytes
            .chunks_exact(4)
            .map(|word| f32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();

        Ok(Self { rows, dim, data })
    }
}

fn parse_npy_header(header: &str) -> Result<(usize, usize), SearchError> {
    let invalid = |details: &str| SearchError::Npy(format!("{details}: {}", header.trim()));
    let pattern = |regex: &str| {
        Regex::new(regex).map_err(|error| SearchError::Npy(format!("header pattern: {error}")))
    };

    let descr = pattern(r"'descr'\s*:\s*'([^']*)'")?
        .captures(header)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| invalid("missing descr"))?;
    if descr.as_str() != "<f4" {
        return Err(invalid("only little-endian f32 is supported"));
    }

    if !pattern(r"'fortran_order'\s*:\s*False")?.is_match(header) {
        return Err(invalid("fortran order is not supported"));
    }

    let shape = pattern(r"'shape'\s*:\s*\(\s*(\d+)\s*,\s*(\d+)\s*,?\s*\)")?
        .captures(header)
        .ok_or_else(|| invalid("expected a two-dimensional shape"))?;
    let dimension = |index: usize| {
        shape
            .get(index)
            .and_then(|value| value.as_str().parse::<usize>().ok())
            .ok_or_else(|| invalid("bad shape"))
    };

    Ok((dimension(1)?, dimension(2)?))
}

/// Everything persisted in one index directory, row-aligned.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub embeddings: EmbeddingMatrix,
    pub documents: Vec<String>,
    pub metadata: Vec<ChunkMetadata>,
}

impl IndexSnapshot {
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct IndexFiles {
    dir: PathBuf,
}

impl IndexFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn embeddings_path(&self) -> PathBuf {
        self.dir.join(EMBEDDINGS_FILE)
    }

    pub fn documents_path(&self) -> PathBuf {
        self.dir.join(DOCUMENTS_FILE)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    pub fn exists(&self) -> bool {
        self.embeddings_path().is_file()
            && self.documents_path().is_file()
            && self.meta_path().is_file()
    }

    /// Reads all three artifacts and checks that their row counts agree.
    pub fn load(&self) -> Result<IndexSnapshot, SearchError> {
        let embeddings =
            EmbeddingMatrix::read_npy(BufReader::new(File::open(self.embeddings_path())?))?;
        let documents = self.read_documents()?;

        let mut metadata = Vec::new();
        for line in BufReader::new(File::open(self.meta_path())?).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            metadata.push(serde_json::from_str::<ChunkMetadata>(&line)?);
        }

        if embeddings.rows() != documents.len() || documents.len() != metadata.len() {
            return Err(SearchError::IndexCorruption {
                embeddings: embeddings.rows(),
                documents: documents.len(),
                metadata: metadata.len(),
            });
        }

        Ok(IndexSnapshot {
            embeddings,
            documents,
            metadata,
        })
    }

    /// Appends rows to all three artifacts. Not safe against concurrent writers.
    pub fn append(
        &self,
        vectors: &EmbeddingMatrix,
        texts: &[String],
        metadata: &[ChunkMetadata],
    ) -> Result<(), SearchError> {
        if vectors.rows() != texts.len() || texts.len() != metadata.len() {
            return Err(SearchError::Request(format!(
                "batch rows disagree: vectors={} texts={} metadata={}",
                vectors.rows(),
                texts.len(),
                metadata.len()
            )));
        }
        fs::create_dir_all(&self.dir)?;

        let mut all_vectors = if self.embeddings_path().is_file() {
            EmbeddingMatrix::read_npy(BufReader::new(File::open(self.embeddings_path())?))?
        } else {
            EmbeddingMatrix::default()
        };
        all_vectors.append(vectors)?;

        let mut all_texts = if self.documents_path().is_file() {
            self.read_documents()?
        } else {
            Vec::new()
        };
        all_texts.extend(texts.iter().cloned());

        let embeddings_tmp = temp_sibling(&self.embeddings_path());
        let documents_tmp = temp_sibling(&self.documents_path());
        {
            let mut writer = BufWriter::new(File::create(&embeddings_tmp)?);
            all_vectors.write_npy(&mut writer)?;
            writer.into_inner().map_err(|error| error.into_error())?.sync_all()?;
        }
        {
            let mut writer = BufWriter::new(File::create(&documents_tmp)?);
            serde_json::to_writer(&mut writer, &all_texts)?;
            writer.flush()?;
            writer.into_inner().map_err(|error| error.into_error())?.sync_all()?;
        }
        fs::rename(&embeddings_tmp, self.embeddings_path())?;
        fs::rename(&documents_tmp, self.documents_path())?;

        let mut lines = String::new();
        for entry in metadata {
            lines.push_str(&serde_json::to_string(entry)?);
            lines.push('\n');
        }
        let mut meta = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.meta_path())?;
        meta.write_all(lines.as_bytes())?;
        meta.sync_all()?;

        Ok(())
    }

    /// Removes the three artifacts (and stale temporaries). Missing files are fine.
    pub fn remove(&self) -> Result<(), SearchError> {
        for path in [
            self.embeddings_path(),
            self.documents_path(),
            self.meta_path(),
            temp_sibling(&self.embeddings_path()),
            temp_sibling(&self.documents_path()),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }

    fn read_documents(&self) -> Result<Vec<String>, SearchError> {
        let reader = BufReader::new(File::open(self.documents_path())?);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn matrix(rows: Vec<Vec<f32>>) -> EmbeddingMatrix {
        EmbeddingMatrix::from_rows(rows).expect("rows share a dimension")
    }

    #[test]
    fn npy_header_is_aligned_and_readable() -> Result<(), SearchError> {
        let original = matrix(vec![vec![1.0, -2.5, 0.25], vec![0.0, 4.0, 8.0]]);
        let mut bytes = Vec::new();
        original.write_npy(&mut bytes)?;

        assert_eq!(&bytes[..6], NPY_MAGIC);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % NPY_ALIGNMENT, 0);
        assert_eq!(bytes.len(), 10 + header_len + 6 * 4);
        let header = std::str::from_utf8(&bytes[10..10 + header_len]).expect("ascii header");
        assert!(header.contains("'shape': (2, 3)"));
        assert!(header.ends_with('\n'));

        let decoded = EmbeddingMatrix::read_npy(Cursor::new(bytes))?;
        assert_eq!(decoded, original);
        assert_eq!(decoded.row(1), &[0.0, 4.0, 8.0]);
        Ok(())
    }

    #[test]
    fn npy_reader_rejects_other_dtypes() {
        assert!(
            parse_npy_header("{'descr': '<f8', 'fortran_order': False, 'shape': (1, 2), }").is_err()
        );
        assert!(
            parse_npy_header("{'descr': '<f4', 'fortran_order': True, 'shape': (1, 2), }").is_err()
        );
        assert!(
            parse_npy_header("{'descr': '<f4', 'fortran_order': False, 'shape': (3,), }").is_err()
        );
        assert_eq!(
            parse_npy_header("{'descr': '<f4', 'fortran_order': False, 'shape': (3, 384), }").ok(),
            Some((3, 384))
        );
    }

    #[test]
    fn truncated_npy_data_is_rejected() -> Result<(), SearchError> {
        let mut bytes = Vec::new();
        matrix(vec![vec![1.0, 2.0]]).write_npy(&mut bytes)?;
        bytes.pop();
        assert!(matches!(
            EmbeddingMatrix::read_npy(Cursor::new(bytes)),
            Err(SearchError::Npy(_))
        ));
        Ok(())
    }

    #[test]
    fn append_rejects_mixed_dimensions() {
        let mut base = matrix(vec![vec![1.0, 0.0]]);
        assert!(base.append(&matrix(vec![vec![1.0, 0.0, 0.0]])).is_err());
        assert!(EmbeddingMatrix::from_rows(vec![vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn appends_accumulate_rows() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let files = IndexFiles::new(dir.path().join("index"));
        assert!(!files.exists());

        let first_meta = vec![ChunkMetadata::new("/a.pdf", "a.pdf", 1)];
        files.append(&matrix(vec![vec![1.0, 0.0]]), &["first".to_string()], &first_meta)?;
        let second_meta = vec![
            ChunkMetadata::new("/a.pdf", "a.pdf", 2),
            ChunkMetadata::new("/b.pdf", "b.pdf", 1),
        ];
        files.append(
            &matrix(vec![vec![0.0, 1.0], vec![0.6, 0.8]]),
            &["second".to_string(), "third".to_string()],
            &second_meta,
        )?;

        assert!(files.exists());
        let snapshot = files.load()?;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.documents, vec!["first", "second", "third"]);
        assert_eq!(snapshot.metadata[2].source_name, "b.pdf");
        assert_eq!(snapshot.embeddings.row(2), &[0.6, 0.8]);
        assert!(!temp_sibling(&files.embeddings_path()).exists());
        Ok(())
    }

    #[test]
    fn row_count_mismatch_is_reported_as_corruption() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let files = IndexFiles::new(dir.path());
        files.append(
            &matrix(vec![vec![1.0], vec![1.0]]),
            &["a".to_string(), "b".to_string()],
            &[
                ChunkMetadata::new("/a.pdf", "a.pdf", 1),
                ChunkMetadata::new("/a.pdf", "a.pdf", 2),
            ],
        )?;

        let lines = fs::read_to_string(files.meta_path())?;
        let first_line = lines.lines().next().unwrap_or_default();
        fs::write(files.meta_path(), format!("{first_line}\n"))?;

        assert!(matches!(
            files.load(),
            Err(SearchError::IndexCorruption {
                embeddings: 2,
                documents: 2,
                metadata: 1
            })
        ));
        Ok(())
    }

    #[test]
    fn remove_deletes_all_artifacts() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let files = IndexFiles::new(dir.path());
        files.remove()?;
        files.append(
            &matrix(vec![vec![1.0]]),
            &["a".to_string()],
            &[ChunkMetadata::new("/a.pdf", "a.pdf", 1)],
        )?;
        files.remove()?;
        assert!(!files.exists());
        assert!(!files.meta_path().exists());
        Ok(())
    }
}
