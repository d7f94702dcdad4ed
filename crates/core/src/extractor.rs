use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;

/// Source of raw page text. Pages are numbered from 1.
pub trait PageExtractor {
    fn page_count(&self) -> usize;

    fn extract_text(&self, page: u32) -> Result<String, IngestError>;
}

/// Page extractor backed by a parsed `lopdf` document.
pub struct LopdfExtractor {
    document: Document,
    page_numbers: Vec<u32>,
}

impl LopdfExtractor {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let document = Document::load(path).map_err(|error| {
            IngestError::PdfParse(format!("{}: {error}", path.display()))
        })?;
        let page_numbers = document.get_pages().into_keys().collect();

        Ok(Self {
            document,
            page_numbers,
        })
    }
}

impl PageExtractor for LopdfExtractor {
    fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    fn extract_text(&self, page: u32) -> Result<String, IngestError> {
        let index = (page as usize)
            .checked_sub(1)
            .and_then(|index| self.page_numbers.get(index))
            .ok_or_else(|| IngestError::InvalidArgument(format!("page {page} out of range")))?;

        self.document
            .extract_text(&[*index])
            .map_err(|error| IngestError::PdfParse(error.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct PdfStats {
    pub pages: usize,
    pub total_chars: usize,
    pub chars_per_page: Vec<usize>,
}

/// Raw extractable character count per page; a page that fails to extract counts as 0.
pub fn inspect_pdf(path: &Path) -> Result<PdfStats, IngestError> {
    let extractor = LopdfExtractor::open(path)?;
    let chars_per_page = (1..=extractor.page_count() as u32)
        .map(|page| {
            extractor
                .extract_text(page)
                .map(|text| text.chars().count())
                .unwrap_or(0)
        })
        .collect::<Vec<_>>();

    Ok(PdfStats {
        pages: chars_per_page.len(),
        total_chars: chars_per_page.iter().sum(),
        chars_per_page,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};

    /// Writes a PDF with one page per entry of `pages`, each page showing its string.
    pub(crate) fn write_text_pdf(
        path: &Path,
        pages: &[&str],
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 10.into()]),
                    Operation::new("Td", vec![50.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path)?;
        Ok(())
    }

    #[test]
    fn extracts_text_per_page() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("policy.pdf");
        write_text_pdf(&path, &["first page deductible", "second page premium"])?;

        let extractor = LopdfExtractor::open(&path)?;
        assert_eq!(extractor.page_count(), 2);
        assert!(extractor.extract_text(1)?.contains("deductible"));
        assert!(extractor.extract_text(2)?.contains("premium"));
        assert!(extractor.extract_text(3).is_err());
        assert!(extractor.extract_text(0).is_err());
        Ok(())
    }

    #[test]
    fn open_rejects_broken_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;

        assert!(matches!(
            LopdfExtractor::open(&path),
            Err(IngestError::PdfParse(_))
        ));
        Ok(())
    }

    #[test]
    fn inspect_counts_characters() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stats.pdf");
        write_text_pdf(&path, &["abcdef", "ghi"])?;

        let stats = inspect_pdf(&path)?;
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.chars_per_page.len(), 2);
        assert!(stats.chars_per_page[0] >= 6);
        assert_eq!(stats.total_chars, stats.chars_per_page.iter().sum::<usize>());
        Ok(())
    }
}
