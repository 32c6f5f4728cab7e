//! Chapter detection: turn an extraction into an ordered list of top-level
//! sections.
//!
//! Strategy ladder, first success wins:
//!
//! 1. **toc** — the extractor already produced titled sections (EPUB NAV/NCX).
//! 2. **headers** — split a single text blob on `# ` marker lines; if that
//!    yields fewer than two chapters, retry on `## `.
//! 3. **fallback** — accumulate whole paragraphs until a token threshold,
//!    synthesizing `Section N` titles. Residuals below the minimum size merge
//!    into their predecessor. PDF page-boundary hints nudge cut points onto
//!    page starts.
//!
//! Deterministic and side-effect-free; the chosen strategy is returned for
//! logging and stamping.

use crate::config::{AlexandriaConfig, ChapterStrategyChoice};
use crate::extract::{Extraction, keep_section};
use crate::sentences::estimate_tokens;

/// One detected top-level section.
#[derive(Debug, Clone)]
pub struct Chapter {
    pub title: String,
    pub text: String,
    /// 0-based, contiguous.
    pub index: usize,
}

/// Which rung of the ladder produced the chapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterStrategy {
    Toc,
    Headers { level: u8 },
    Fallback,
}

impl ChapterStrategy {
    /// Stable identifier for logs and events.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Toc => "toc",
            Self::Headers { level: 1 } => "headers-h1",
            Self::Headers { .. } => "headers-h2",
            Self::Fallback => "fallback",
        }
    }
}

/// Detection output: chapters plus the strategy that produced them.
#[derive(Debug, Clone)]
pub struct DetectedChapters {
    pub chapters: Vec<Chapter>,
    pub strategy: ChapterStrategy,
}

/// Detect chapters from an extraction under the configured strategy.
pub fn detect(extraction: &Extraction, config: &AlexandriaConfig) -> DetectedChapters {
    match config.chapter_detection_strategy {
        ChapterStrategyChoice::Auto => detect_auto(extraction, config),
        ChapterStrategyChoice::Toc => from_sections(extraction)
            .unwrap_or_else(|| fallback_split(extraction, config)),
        ChapterStrategyChoice::Headers => header_split(extraction, 1)
            .or_else(|| header_split(extraction, 2))
            .unwrap_or_else(|| fallback_split(extraction, config)),
        ChapterStrategyChoice::Fallback => fallback_split(extraction, config),
    }
}

fn detect_auto(extraction: &Extraction, config: &AlexandriaConfig) -> DetectedChapters {
    // Multiple extractor sections with NAV titles: trust the table of contents.
    if extraction.sections.len() >= 2 && !extraction.hints.toc_titles.is_empty() {
        if let Some(detected) = from_sections(extraction) {
            return detected;
        }
    }
    if let Some(detected) = header_split(extraction, 1) {
        return detected;
    }
    if let Some(detected) = header_split(extraction, 2) {
        return detected;
    }
    fallback_split(extraction, config)
}

/// Use the extractor's sections directly (EPUB spine / NAV case).
fn from_sections(extraction: &Extraction) -> Option<DetectedChapters> {
    if extraction.sections.len() < 2 {
        return None;
    }
    let chapters = extraction
        .sections
        .iter()
        .enumerate()
        .map(|(index, section)| Chapter {
            title: section.title.clone(),
            text: section.text.clone(),
            index,
        })
        .collect();
    Some(DetectedChapters {
        chapters,
        strategy: ChapterStrategy::Toc,
    })
}

/// Split concatenated text on heading-marker lines of the given level.
/// Returns `None` when fewer than two chapters emerge.
fn header_split(extraction: &Extraction, level: u8) -> Option<DetectedChapters> {
    let marker: &str = if level == 1 { "# " } else { "## " };
    let text = joined_text(extraction);

    let mut chapters: Vec<Chapter> = Vec::new();
    let mut title: Option<String> = None;
    let mut body = String::new();

    let mut flush = |title: &mut Option<String>, body: &mut String, chapters: &mut Vec<Chapter>| {
        if keep_section(body) {
            chapters.push(Chapter {
                title: title
                    .take()
                    .unwrap_or_else(|| default_preamble_title(extraction)),
                text: body.trim().to_string(),
                index: chapters.len(),
            });
        } else {
            title.take();
        }
        body.clear();
    };

    for line in text.lines() {
        if line.starts_with(marker) {
            flush(&mut title, &mut body, &mut chapters);
            title = Some(line[marker.len()..].trim().to_string());
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    flush(&mut title, &mut body, &mut chapters);

    if chapters.len() < 2 {
        return None;
    }
    Some(DetectedChapters {
        chapters,
        strategy: ChapterStrategy::Headers { level },
    })
}

/// Fixed-size fallback: accumulate whole paragraphs to the token threshold.
fn fallback_split(extraction: &Extraction, config: &AlexandriaConfig) -> DetectedChapters {
    let text = joined_text(extraction);
    let target = config.chapter_fallback_token_count;
    let min_tokens = config.chapter_min_size_tokens;

    // Paragraphs with their byte offsets, so PDF page hints can nudge cuts.
    let mut paragraphs: Vec<(usize, &str)> = Vec::new();
    let mut offset = 0usize;
    for paragraph in text.split("\n\n") {
        if !paragraph.trim().is_empty() {
            paragraphs.push((offset, paragraph));
        }
        offset += paragraph.len() + 2;
    }

    let page_starts: &[usize] = &extraction.hints.page_offsets;

    let mut chapters: Vec<Chapter> = Vec::new();
    let mut buffer = String::new();
    let mut buffer_tokens = 0usize;

    for (para_offset, paragraph) in &paragraphs {
        // A nearly-full buffer cuts early at a page boundary, so fallback
        // sections align with pages when the hint is available.
        let at_page_start = page_starts.binary_search(para_offset).is_ok();
        if at_page_start && !buffer.is_empty() && buffer_tokens * 10 >= target * 9 {
            push_numbered(&mut chapters, &buffer);
            buffer.clear();
            buffer_tokens = 0;
        }

        if !buffer.is_empty() {
            buffer.push_str("\n\n");
        }
        buffer.push_str(paragraph);
        buffer_tokens += estimate_tokens(paragraph);

        if buffer_tokens >= target {
            push_numbered(&mut chapters, &buffer);
            buffer.clear();
            buffer_tokens = 0;
        }
    }

    if !buffer.is_empty() {
        // Short residual merges into the preceding chapter.
        if buffer_tokens < min_tokens && !chapters.is_empty() {
            let last = chapters.last_mut().expect("nonempty");
            last.text.push_str("\n\n");
            last.text.push_str(&buffer);
        } else {
            push_numbered(&mut chapters, &buffer);
        }
    }

    DetectedChapters {
        chapters,
        strategy: ChapterStrategy::Fallback,
    }
}

fn push_numbered(chapters: &mut Vec<Chapter>, text: &str) {
    let index = chapters.len();
    chapters.push(Chapter {
        title: format!("Section {}", index + 1),
        text: text.trim().to_string(),
        index,
    });
}

/// Concatenate extractor sections into one blob (single-section formats pass
/// through unchanged).
fn joined_text(extraction: &Extraction) -> String {
    extraction
        .sections
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn default_preamble_title(extraction: &Extraction) -> String {
    extraction
        .sections
        .first()
        .map(|s| s.title.clone())
        .unwrap_or_else(|| "Preamble".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{BookMeta, ExtractHints, Section};

    fn extraction_of(sections: Vec<(&str, &str)>, hints: ExtractHints) -> Extraction {
        Extraction {
            sections: sections
                .into_iter()
                .enumerate()
                .map(|(order, (title, text))| Section {
                    title: title.to_string(),
                    text: text.to_string(),
                    order,
                })
                .collect(),
            meta: BookMeta::default(),
            hints,
        }
    }

    fn config() -> AlexandriaConfig {
        AlexandriaConfig::default()
    }

    fn paragraph(words: usize) -> String {
        vec!["word"; words].join(" ")
    }

    #[test]
    fn toc_sections_pass_through() {
        let hints = ExtractHints {
            toc_titles: vec!["One".into(), "Two".into()],
            page_offsets: vec![],
        };
        let extraction = extraction_of(
            vec![("One", "First chapter text here."), ("Two", "Second chapter text here.")],
            hints,
        );
        let detected = detect(&extraction, &config());
        assert_eq!(detected.strategy, ChapterStrategy::Toc);
        assert_eq!(detected.chapters.len(), 2);
        assert_eq!(detected.chapters[0].title, "One");
        assert_eq!(detected.chapters[1].index, 1);
    }

    #[test]
    fn header_split_on_h1() {
        let text = "# Alpha\n\nBody of alpha chapter.\n\n# Beta\n\nBody of beta chapter.";
        let extraction = extraction_of(vec![("doc", text)], ExtractHints::default());
        let detected = detect(&extraction, &config());
        assert_eq!(detected.strategy, ChapterStrategy::Headers { level: 1 });
        assert_eq!(detected.chapters.len(), 2);
        assert_eq!(detected.chapters[0].title, "Alpha");
        assert!(detected.chapters[1].text.contains("beta chapter"));
    }

    #[test]
    fn header_split_retries_h2() {
        let text = "## Sub One\n\nFirst body here.\n\n## Sub Two\n\nSecond body here.";
        let extraction = extraction_of(vec![("doc", text)], ExtractHints::default());
        let detected = detect(&extraction, &config());
        assert_eq!(detected.strategy, ChapterStrategy::Headers { level: 2 });
        assert_eq!(detected.chapters.len(), 2);
    }

    #[test]
    fn preamble_before_first_header_kept() {
        let text = "Opening words before any heading.\n\n# One\n\nChapter body.\n\n# Two\n\nMore body.";
        let extraction = extraction_of(vec![("mybook", text)], ExtractHints::default());
        let detected = detect(&extraction, &config());
        assert_eq!(detected.chapters.len(), 3);
        assert_eq!(detected.chapters[0].title, "mybook");
        assert!(detected.chapters[0].text.contains("Opening words"));
    }

    #[test]
    fn fallback_splits_by_token_count() {
        // ~6000 words => ~8000 tokens => expect ceil(8000/5000) = 2 sections.
        let paragraphs: Vec<String> = (0..30).map(|_| paragraph(200)).collect();
        let text = paragraphs.join("\n\n");
        let extraction = extraction_of(vec![("flat", &text)], ExtractHints::default());
        let detected = detect(&extraction, &config());
        assert_eq!(detected.strategy, ChapterStrategy::Fallback);
        assert_eq!(detected.chapters.len(), 2);
        assert_eq!(detected.chapters[0].title, "Section 1");
        assert_eq!(detected.chapters[1].title, "Section 2");
    }

    #[test]
    fn fallback_merges_short_residual() {
        // One full section plus a tiny tail: the tail merges back.
        let mut paragraphs: Vec<String> = (0..19).map(|_| paragraph(200)).collect();
        paragraphs.push(paragraph(30));
        let text = paragraphs.join("\n\n");
        let extraction = extraction_of(vec![("flat", &text)], ExtractHints::default());
        let detected = detect(&extraction, &config());
        assert_eq!(detected.chapters.len(), 1);
        assert!(detected.chapters[0].text.len() > 1000);
    }

    #[test]
    fn forced_fallback_ignores_headers() {
        let text = "# Alpha\n\nBody.\n\n# Beta\n\nBody.";
        let extraction = extraction_of(vec![("doc", text)], ExtractHints::default());
        let mut cfg = config();
        cfg.chapter_detection_strategy = ChapterStrategyChoice::Fallback;
        let detected = detect(&extraction, &cfg);
        assert_eq!(detected.strategy, ChapterStrategy::Fallback);
    }

    #[test]
    fn indexes_are_contiguous() {
        let text = "# A\n\nOne body.\n\n# B\n\nTwo body.\n\n# C\n\nThree body.";
        let extraction = extraction_of(vec![("doc", text)], ExtractHints::default());
        let detected = detect(&extraction, &config());
        for (i, ch) in detected.chapters.iter().enumerate() {
            assert_eq!(ch.index, i);
        }
    }

    #[test]
    fn strategy_ids_are_stable() {
        assert_eq!(ChapterStrategy::Toc.id(), "toc");
        assert_eq!(ChapterStrategy::Headers { level: 1 }.id(), "headers-h1");
        assert_eq!(ChapterStrategy::Headers { level: 2 }.id(), "headers-h2");
        assert_eq!(ChapterStrategy::Fallback.id(), "fallback");
    }
}
