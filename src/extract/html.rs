//! HTML extraction using `scraper`.
//!
//! Markup is stripped; `h1`/`h2+` headings survive as `#`/`##` marker lines
//! so the chapter detector can split on them. The document becomes a single
//! section titled from `<title>` or the filename stem.

use std::path::Path;

use scraper::{Html, Selector};

use crate::error::ExtractResult;
use crate::extract::{
    BookMeta, ExtractHints, Extraction, FileFormat, Section, TextExtractor, keep_section,
    normalize_text, stem_title,
};

pub struct HtmlExtractor;

impl TextExtractor for HtmlExtractor {
    fn format(&self) -> FileFormat {
        FileFormat::Html
    }

    fn extract(&self, data: &[u8], origin: &Path) -> ExtractResult<Extraction> {
        let decoded = String::from_utf8_lossy(data);
        let html = Html::parse_document(&decoded);

        let title_selector = Selector::parse("title").expect("static selector");
        let doc_title = html
            .select(&title_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());

        let lang = html
            .select(&Selector::parse("html").expect("static selector"))
            .next()
            .and_then(|el| el.value().attr("lang"))
            .map(str::to_string);

        let selector = Selector::parse("h1, h2, h3, h4, h5, h6, p, li, blockquote, pre, td")
            .expect("static selector");
        let mut body = String::new();
        for el in html.select(&selector) {
            let text: String = el.text().collect();
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match el.value().name() {
                "h1" => {
                    body.push_str("# ");
                    body.push_str(text);
                }
                "h2" | "h3" | "h4" | "h5" | "h6" => {
                    body.push_str("## ");
                    body.push_str(text);
                }
                _ => body.push_str(text),
            }
            body.push_str("\n\n");
        }

        let body = normalize_text(&body);
        let mut sections = Vec::new();
        if keep_section(&body) {
            sections.push(Section {
                title: doc_title.clone().unwrap_or_else(|| stem_title(origin)),
                text: body,
                order: 0,
            });
        }

        Ok(Extraction {
            sections,
            meta: BookMeta {
                title: doc_title,
                authors: Vec::new(),
                language: lang,
            },
            hints: ExtractHints::default(),
        })
    }
}
