//! Deterministic sentence splitting and token estimation.
//!
//! The splitter is a language-agnostic heuristic: cut after `.`, `!` or `?`
//! followed by whitespace. Abbreviations and ellipses produce occasional
//! over-splits; downstream chunking tolerates that.

/// Split a text block into sentence strings.
///
/// Tokens of length <= 2 after trimming are dropped (stray initials,
/// list markers, decimal fragments).
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let at_boundary = chars.peek().is_none_or(|next| next.is_whitespace());
            if at_boundary {
                push_sentence(&mut sentences, &mut current);
            }
        }
    }
    push_sentence(&mut sentences, &mut current);

    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if trimmed.chars().count() > 2 {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

/// Word count used throughout chunking.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Approximate token count for budget arithmetic.
///
/// Subword tokenizers average ~3/4 word per token on English prose, so words
/// * 4 / 3 is a stable, cheap estimate. Consumers that need exact counts
/// re-tokenize on their side.
pub fn estimate_tokens(text: &str) -> usize {
    word_count(text) * 4 / 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminators_before_whitespace() {
        let text = "First sentence here. Second one follows! Third asks a question? Last trails off";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 4);
        assert_eq!(sentences[0], "First sentence here.");
        assert_eq!(sentences[2], "Third asks a question?");
        assert_eq!(sentences[3], "Last trails off");
    }

    #[test]
    fn decimal_points_do_not_split() {
        let sentences = split_sentences("The value is 3.14 exactly. Next sentence.");
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].contains("3.14"));
    }

    #[test]
    fn short_tokens_dropped() {
        let sentences = split_sentences("A. Proper sentence follows. B.");
        assert_eq!(sentences, vec!["Proper sentence follows.".to_string()]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   \n\t ").is_empty());
    }

    #[test]
    fn deterministic_across_calls() {
        let text = "One. Two. Three. Four and five. Six!";
        assert_eq!(split_sentences(text), split_sentences(text));
    }

    #[test]
    fn token_estimate_scales_with_words() {
        assert_eq!(estimate_tokens(""), 0);
        let thirty_words = vec!["word"; 30].join(" ");
        assert_eq!(estimate_tokens(&thirty_words), 40);
    }
}
