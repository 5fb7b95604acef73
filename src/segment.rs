//! Sentence-window segmentation for the vectorizer.
//!
//! Text is split on UAX#29 sentence boundaries and re-grouped into windows
//! bounded by a word count, with a fixed number of sentences shared between
//! consecutive windows so no context is lost at the seams.

use unicode_segmentation::UnicodeSegmentation;

fn word_count(sentence: &str) -> usize {
    sentence.split_whitespace().count()
}

/// Splits `text` into segments of at most `max_words` words (a single
/// sentence longer than the cap still becomes its own segment), where two
/// consecutive segments share the last `overlap_sentences` sentences of the
/// earlier one.
///
/// Every sentence of the input appears in at least one segment; empty input
/// yields no segments; input at or under the cap yields exactly one.
pub fn segment_text(text: &str, max_words: usize, overlap_sentences: usize) -> Vec<String> {
    let sentences: Vec<&str> = text
        .split_sentence_bounds()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let mut segments = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut words = 0usize;

    for sentence in sentences {
        let w = word_count(sentence);

        if words + w > max_words && !current.is_empty() {
            segments.push(current.join(" "));

            let keep = current.len().saturating_sub(overlap_sentences);
            current = current.split_off(keep);
            words = current.iter().map(|s| word_count(s)).sum();
        }

        current.push(sentence);
        words += w;
    }

    if !current.is_empty() {
        segments.push(current.join(" "));
    }

    segments
}
