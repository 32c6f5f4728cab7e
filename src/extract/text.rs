//! Plain-text and Markdown extraction.
//!
//! Both decode as UTF-8 with replacement fallback and emit a single section
//! titled from the filename stem. Markdown keeps its `#` heading lines (the
//! chapter detector splits on them) but loses emphasis, links, images, and
//! code fences.

use std::borrow::Cow;
use std::path::Path;

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{ExtractResult, ExtractionError};
use crate::extract::{
    BookMeta, ExtractHints, Extraction, FileFormat, Section, TextExtractor, keep_section,
    normalize_text, stem_title,
};

pub struct TxtExtractor;

impl TextExtractor for TxtExtractor {
    fn format(&self) -> FileFormat {
        FileFormat::Txt
    }

    fn extract(&self, data: &[u8], origin: &Path) -> ExtractResult<Extraction> {
        let text = decode(data, origin)?;
        let text = normalize_text(&text);
        Ok(single_section(text, origin))
    }
}

pub struct MarkdownExtractor;

impl TextExtractor for MarkdownExtractor {
    fn format(&self) -> FileFormat {
        FileFormat::Md
    }

    fn extract(&self, data: &[u8], origin: &Path) -> ExtractResult<Extraction> {
        let text = decode(data, origin)?;
        let text = normalize_text(&strip_markdown(&text));
        Ok(single_section(text, origin))
    }
}

fn decode<'a>(data: &'a [u8], origin: &Path) -> ExtractResult<Cow<'a, str>> {
    let text = String::from_utf8_lossy(data);
    // A "text" file that decodes to nothing but replacement characters is
    // binary in disguise.
    if !data.is_empty() && text.chars().all(|c| c == char::REPLACEMENT_CHARACTER || c.is_whitespace())
    {
        return Err(ExtractionError::DecodeFailure {
            path: origin.to_path_buf(),
            message: "no decodable text content".into(),
        });
    }
    Ok(text)
}

fn single_section(text: String, origin: &Path) -> Extraction {
    let mut sections = Vec::new();
    if keep_section(&text) {
        sections.push(Section {
            title: stem_title(origin),
            text,
            order: 0,
        });
    }
    Extraction {
        sections,
        meta: BookMeta::default(),
        hints: ExtractHints::default(),
    }
}

/// Strip Markdown markup while preserving heading lines and link text.
fn strip_markdown(text: &str) -> String {
    static IMAGE: OnceLock<Regex> = OnceLock::new();
    static LINK: OnceLock<Regex> = OnceLock::new();
    static EMPHASIS: OnceLock<Regex> = OnceLock::new();
    static INLINE_CODE: OnceLock<Regex> = OnceLock::new();

    let image = IMAGE.get_or_init(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("static regex"));
    let link = LINK.get_or_init(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("static regex"));
    let emphasis =
        EMPHASIS.get_or_init(|| Regex::new(r"(\*{1,3}|_{1,3})(\S[^*_]*?)\1").expect("static regex"));
    let inline_code = INLINE_CODE.get_or_init(|| Regex::new(r"`([^`]*)`").expect("static regex"));

    let mut out = String::with_capacity(text.len());
    let mut in_fence = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let line = image.replace_all(line, "");
        let line = link.replace_all(&line, "$1");
        let line = emphasis.replace_all(&line, "$2");
        let line = inline_code.replace_all(&line, "$1");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txt_decodes_with_replacement() {
        let data = b"Valid prose with one bad byte \xFF in the middle.";
        let out = TxtExtractor.extract(data, Path::new("notes.txt")).unwrap();
        assert_eq!(out.sections.len(), 1);
        assert!(out.sections[0].text.contains("Valid prose"));
        assert_eq!(out.sections[0].title, "notes");
    }

    #[test]
    fn pure_binary_is_decode_failure() {
        let data = [0xFFu8, 0xFE, 0xFF, 0xFE];
        let err = TxtExtractor.extract(&data, Path::new("fake.txt")).unwrap_err();
        assert!(matches!(err, ExtractionError::DecodeFailure { .. }));
    }

    #[test]
    fn markdown_keeps_headings_drops_markup() {
        let md = b"# Title\n\nSome *emphasis* and a [link](http://x.invalid) plus `code`.\n\n\
                   ```rust\nfn hidden() {}\n```\n\n## Sub\n\nPlain tail.";
        let out = MarkdownExtractor.extract(md, Path::new("doc.md")).unwrap();
        let text = &out.sections[0].text;
        assert!(text.contains("# Title"));
        assert!(text.contains("## Sub"));
        assert!(text.contains("Some emphasis and a link plus code."));
        assert!(!text.contains("hidden"));
        assert!(!text.contains("http://x.invalid"));
    }

    #[test]
    fn whitespace_only_file_has_no_sections() {
        let out = TxtExtractor.extract(b"   \n\t\n", Path::new("blank.txt")).unwrap();
        assert!(out.sections.is_empty());
    }
}
