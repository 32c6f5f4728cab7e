//! PDF extraction using `pdf-extract`.
//!
//! The whole document becomes a single section; page boundaries (form feeds
//! inserted by `pdf-extract`) are recorded as byte-offset hints for the
//! chapter detector's fallback splitter. PDF line breaks inside paragraphs
//! are rejoined since extracted text wraps at visual line width.

use std::path::Path;

use crate::error::{ExtractResult, ExtractionError};
use crate::extract::{
    BookMeta, ExtractHints, Extraction, FileFormat, Section, TextExtractor, keep_section,
    normalize_text, stem_title,
};

pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn format(&self) -> FileFormat {
        FileFormat::Pdf
    }

    fn extract(&self, data: &[u8], origin: &Path) -> ExtractResult<Extraction> {
        let raw = pdf_extract::extract_text_from_mem(data).map_err(|e| {
            let message = e.to_string();
            let lowered = message.to_ascii_lowercase();
            if lowered.contains("encrypt") || lowered.contains("password") {
                ExtractionError::Encrypted {
                    path: origin.to_path_buf(),
                }
            } else {
                ExtractionError::Corrupted {
                    path: origin.to_path_buf(),
                    format: "pdf".into(),
                    message,
                }
            }
        })?;

        // Split on form feeds; fall back to triple newlines for extractors
        // that drop them.
        let pages: Vec<&str> = if raw.contains('\x0C') {
            raw.split('\x0C').collect()
        } else {
            raw.split("\n\n\n").collect()
        };

        let mut text = String::new();
        let mut page_offsets = Vec::with_capacity(pages.len());

        for page in &pages {
            let page = page.trim();
            if page.is_empty() {
                continue;
            }
            page_offsets.push(text.len());
            for paragraph in page.split("\n\n") {
                // Rejoin hard-wrapped lines within a paragraph. Offsets are
                // recorded against the final text, so normalization happens
                // here, not afterwards.
                let joined = paragraph
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                let joined = normalize_text(&joined);
                if joined.is_empty() {
                    continue;
                }
                text.push_str(&joined);
                text.push_str("\n\n");
            }
        }

        let text = text.trim_end().to_string();
        let mut sections = Vec::new();
        if keep_section(&text) {
            sections.push(Section {
                title: stem_title(origin),
                text,
                order: 0,
            });
        }

        Ok(Extraction {
            sections,
            meta: BookMeta::default(),
            hints: ExtractHints {
                toc_titles: Vec::new(),
                page_offsets,
            },
        })
    }
}
