//! EPUB extraction using the `epub` crate.
//!
//! One logical section per spine item. Titles resolve in order: NAV/NCX
//! label for the spine item's resource, first inner heading, filename stem
//! with the spine position appended. Inner XHTML is flattened with `scraper`,
//! headings becoming `#`-marker lines.

use std::io::Cursor;
use std::path::Path;

use scraper::{Html, Selector};

use crate::error::{ExtractResult, ExtractionError};
use crate::extract::{
    BookMeta, ExtractHints, Extraction, FileFormat, Section, TextExtractor, keep_section,
    normalize_text, stem_title,
};

pub struct EpubExtractor;

impl TextExtractor for EpubExtractor {
    fn format(&self) -> FileFormat {
        FileFormat::Epub
    }

    fn extract(&self, data: &[u8], origin: &Path) -> ExtractResult<Extraction> {
        let cursor = Cursor::new(data.to_vec());
        let mut doc = epub::doc::EpubDoc::from_reader(cursor).map_err(|e| {
            let message = e.to_string();
            if message.to_ascii_lowercase().contains("encrypt") {
                ExtractionError::Encrypted {
                    path: origin.to_path_buf(),
                }
            } else {
                ExtractionError::Corrupted {
                    path: origin.to_path_buf(),
                    format: "epub".into(),
                    message,
                }
            }
        })?;

        let meta = BookMeta {
            title: doc.mdata("title").map(|m| m.value.clone()),
            authors: doc.mdata("creator").map(|m| m.value.clone()).into_iter().collect(),
            language: doc.mdata("language").map(|m| m.value.clone()),
        };

        // NAV/NCX labels keyed by resource path, used both for per-section
        // titles and as the toc hint for the chapter detector.
        let nav: Vec<(String, String)> = doc
            .toc
            .iter()
            .map(|point| {
                let target = point.content.to_string_lossy().into_owned();
                // Strip any fragment so spine paths compare cleanly.
                let target = target.split('#').next().unwrap_or(&target).to_string();
                (target, point.label.clone())
            })
            .collect();

        let mut sections = Vec::new();
        let spine_len = doc.get_num_chapters();

        for spine_idx in 0..spine_len {
            doc.set_current_chapter(spine_idx);

            // A single undecodable spine item is skipped, not fatal.
            let Some((content, _mime)) = doc.get_current_str() else {
                tracing::warn!(spine_idx, "spine item failed to decode; skipping");
                continue;
            };
            if content.trim().is_empty() {
                continue;
            }

            let html = Html::parse_document(&content);
            let body = flatten_xhtml(&html);
            let body = normalize_text(&body);
            if !keep_section(&body) {
                continue;
            }

            let resource_path = doc
                .get_current_path()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();

            let title = nav
                .iter()
                .find(|(target, _)| resource_path.ends_with(target.as_str()) || target.ends_with(&resource_path))
                .map(|(_, label)| label.trim().to_string())
                .filter(|label| !label.is_empty())
                .or_else(|| first_heading(&html))
                .unwrap_or_else(|| format!("{} {}", stem_title(origin), spine_idx + 1));

            sections.push(Section {
                title,
                text: body,
                order: sections.len(),
            });
        }

        let hints = ExtractHints {
            toc_titles: nav.into_iter().map(|(_, label)| label).collect(),
            page_offsets: Vec::new(),
        };

        Ok(Extraction {
            sections,
            meta,
            hints,
        })
    }
}

/// Flatten spine-item XHTML: headings become `#` marker lines, block elements
/// become paragraphs.
fn flatten_xhtml(html: &Html) -> String {
    let selector = Selector::parse("h1, h2, h3, h4, h5, h6, p, li, blockquote, pre")
        .expect("static selector");
    let mut out = String::new();
    for el in html.select(&selector) {
        let text: String = el.text().collect();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match el.value().name() {
            "h1" => {
                out.push_str("# ");
                out.push_str(text);
            }
            "h2" | "h3" | "h4" | "h5" | "h6" => {
                out.push_str("## ");
                out.push_str(text);
            }
            _ => out.push_str(text),
        }
        out.push_str("\n\n");
    }
    out
}

fn first_heading(html: &Html) -> Option<String> {
    let selector = Selector::parse("h1, h2, h3").ok()?;
    html.select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}
