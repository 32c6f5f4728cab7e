//! Text extraction: decode book files into normalized text plus structural hints.
//!
//! Each supported format (EPUB, PDF, TXT, MD, HTML) implements
//! [`TextExtractor`]. Markup is stripped, but heading structure is preserved
//! as Markdown-style `#`/`##` marker lines so the chapter detector can split
//! on them later. Extractors never emit sections with fewer than 2
//! non-whitespace characters.

pub mod epub;
pub mod html;
pub mod pdf;
pub mod text;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::{ExtractResult, ExtractionError};

/// Supported book file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Epub,
    Pdf,
    Txt,
    Md,
    Html,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epub => "epub",
            Self::Pdf => "pdf",
            Self::Txt => "txt",
            Self::Md => "md",
            Self::Html => "html",
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted section in reading order.
#[derive(Debug, Clone)]
pub struct Section {
    pub title: String,
    pub text: String,
    /// 0-based position in the source's reading order.
    pub order: usize,
}

/// Book-level metadata the file itself declares (catalog metadata wins over
/// this downstream).
#[derive(Debug, Clone, Default)]
pub struct BookMeta {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub language: Option<String>,
}

/// Structural hints for the chapter detector.
#[derive(Debug, Clone, Default)]
pub struct ExtractHints {
    /// NAV/NCX-declared section titles, in spine order (EPUB).
    pub toc_titles: Vec<String>,
    /// Byte offsets of page starts within the concatenated text (PDF).
    pub page_offsets: Vec<usize>,
}

/// Result of extracting one file.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub sections: Vec<Section>,
    pub meta: BookMeta,
    pub hints: ExtractHints,
}

/// Format-specific extractor.
pub trait TextExtractor {
    /// Decode raw bytes into sections + metadata. `origin` is used for
    /// synthesized titles and error context only; it is not re-read.
    fn extract(&self, data: &[u8], origin: &Path) -> ExtractResult<Extraction>;

    fn format(&self) -> FileFormat;
}

/// Detect the format from a file extension.
pub fn detect_format(path: &Path) -> Option<FileFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "epub" => Some(FileFormat::Epub),
        "pdf" => Some(FileFormat::Pdf),
        "txt" | "text" => Some(FileFormat::Txt),
        "md" | "markdown" => Some(FileFormat::Md),
        "html" | "htm" | "xhtml" => Some(FileFormat::Html),
        _ => None,
    }
}

/// Get the extractor for a format.
pub fn extractor_for(format: FileFormat) -> Box<dyn TextExtractor> {
    match format {
        FileFormat::Epub => Box::new(epub::EpubExtractor),
        FileFormat::Pdf => Box::new(pdf::PdfExtractor),
        FileFormat::Html => Box::new(html::HtmlExtractor),
        FileFormat::Txt => Box::new(text::TxtExtractor),
        FileFormat::Md => Box::new(text::MarkdownExtractor),
    }
}

/// Extract a file from disk, detecting the format from the extension unless
/// one is declared.
pub fn extract_path(path: &Path, declared: Option<FileFormat>) -> ExtractResult<Extraction> {
    let format = declared
        .or_else(|| detect_format(path))
        .ok_or_else(|| ExtractionError::Unsupported {
            path: path.to_path_buf(),
        })?;
    let data = read_file(path)?;
    extractor_for(format).extract(&data, path)
}

/// Read a file, routing long paths through the platform's long-path syntax.
///
/// Windows caps plain paths at 248 bytes for directories; the `\\?\` prefix
/// lifts that. Elsewhere this is a plain read.
pub fn read_file(path: &Path) -> ExtractResult<Vec<u8>> {
    let resolved = long_path(path);
    std::fs::read(&resolved).map_err(|source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(windows)]
fn long_path(path: &Path) -> PathBuf {
    let raw = path.as_os_str();
    if raw.len() > 248 && path.is_absolute() && !raw.to_string_lossy().starts_with("\\\\?\\") {
        let mut prefixed = std::ffi::OsString::from("\\\\?\\");
        prefixed.push(raw);
        PathBuf::from(prefixed)
    } else {
        path.to_path_buf()
    }
}

#[cfg(not(windows))]
fn long_path(path: &Path) -> PathBuf {
    path.to_path_buf()
}

/// Normalize extracted text: NFC composition, unified line endings, collapsed
/// space runs, at most one blank line between paragraphs.
pub fn normalize_text(raw: &str) -> String {
    let composed: String = raw.nfc().collect();
    let mut out = String::with_capacity(composed.len());
    let mut blank_run = 0usize;
    for line in composed.replace("\r\n", "\n").replace('\r', "\n").lines() {
        let collapsed = collapse_spaces(line);
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&collapsed);
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_space = false;
    for ch in line.trim().chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

/// Whether a section body is worth keeping (>= 2 non-whitespace characters).
pub fn keep_section(text: &str) -> bool {
    text.chars().filter(|c| !c.is_whitespace()).count() >= 2
}

/// Filename stem used when no better title exists.
pub fn stem_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string())
}
