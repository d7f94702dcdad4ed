use crate::error::IngestError;
use crate::models::IngestionOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub size: usize,
    pub overlap: usize,
    pub min_chars: usize,
}

impl ChunkingConfig {
    pub fn new(size: usize, overlap: usize, min_chars: usize) -> Result<Self, IngestError> {
        if size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        Ok(Self {
            size,
            overlap,
            min_chars,
        })
    }
}

impl TryFrom<&IngestionOptions> for ChunkingConfig {
    type Error = IngestError;

    fn try_from(value: &IngestionOptions) -> Result<Self, Self::Error> {
        Self::new(value.chunk_size, value.chunk_overlap, value.min_chunk_chars)
    }
}

/// Character offsets `[start, end)` of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

/// Position of the window walk over a text of `len` characters. Holds no text,
/// so callers can own the text separately and advance lazily.
#[derive(Debug, Clone, Copy)]
pub struct WindowCursor {
    next_start: usize,
    len: usize,
}

impl WindowCursor {
    pub fn new(len: usize) -> Self {
        Self { next_start: 0, len }
    }

    pub fn advance(&mut self, config: &ChunkingConfig) -> Option<Window> {
        if self.next_start >= self.len {
            return None;
        }

        let start = self.next_start;
        let end = (start + config.size).min(self.len);
        let mut next = if end > config.overlap {
            end - config.overlap
        } else {
            end
        };
        // A window that cannot move forward ends the walk.
        if next <= start {
            next = end;
        }
        self.next_start = next;

        Some(Window { start, end })
    }
}

/// Lazy, restartable sequence of trimmed chunk strings over one text.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    chars: Vec<char>,
    cursor: WindowCursor,
    config: &'a ChunkingConfig,
}

impl Iterator for Chunks<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(window) = self.cursor.advance(self.config) {
            if let Some(chunk) = window_text(&self.chars, window, self.config.min_chars) {
                return Some(chunk);
            }
        }
        None
    }
}

impl ChunkingConfig {
    /// Raw overlapping windows, before trimming and the minimum-length filter.
    pub fn windows(&self, len: usize) -> impl Iterator<Item = Window> + '_ {
        let mut cursor = WindowCursor::new(len);
        std::iter::from_fn(move || cursor.advance(self))
    }

    pub fn chunks(&self, text: &str) -> Chunks<'_> {
        let chars = text.chars().collect::<Vec<_>>();
        let cursor = WindowCursor::new(chars.len());
        Chunks {
            chars,
            cursor,
            config: self,
        }
    }
}

/// Trimmed text of `window`, or `None` when it is shorter than `min_chars`.
pub(crate) fn window_text(chars: &[char], window: Window, min_chars: usize) -> Option<String> {
    let piece = chars[window.start..window.end].iter().collect::<String>();
    let trimmed = piece.trim();
    if trimmed.chars().count() >= min_chars {
        Some(trimmed.to_string())
    } else {
        None
    }
}
