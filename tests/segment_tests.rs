#[cfg(test)]
mod segment_tests {
    use semcrawl::segment::segment_text;

    /// A sentence of exactly `n_words` words, carrying a unique tag so
    /// containment can be asserted per sentence.
    fn sentence(tag: usize, n_words: usize) -> String {
        let mut words = vec![format!("Phrase{tag}")];
        for w in 1..n_words {
            words.push(format!("mot{tag}x{w}"));
        }
        words.join(" ") + "."
    }

    #[test]
    fn test_empty_text_yields_no_segments() {
        assert!(segment_text("", 150, 2).is_empty());
        assert!(segment_text("   \n\t ", 150, 2).is_empty());
    }

    #[test]
    fn test_short_text_yields_single_segment() {
        let text = "Le chat dort. Le chien aboie.";
        let segments = segment_text(text, 150, 2);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].contains("Le chat dort."));
        assert!(segments[0].contains("Le chien aboie."));
    }

    #[test]
    fn test_single_long_sentence_becomes_own_segment() {
        let long = sentence(0, 200);
        let segments = segment_text(&long, 150, 2);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0], long);
    }

    #[test]
    fn test_ten_sentences_of_thirty_words() {
        let sentences: Vec<String> = (0..10).map(|i| sentence(i, 30)).collect();
        let text = sentences.join(" ");

        let segments = segment_text(&text, 150, 2);
        assert_eq!(segments.len(), 3);

        // Window sizes: 5, 5 and 4 sentences.
        for (segment, expected) in segments.iter().zip([5usize, 5, 4]) {
            let count = (0..10).filter(|i| segment.contains(&sentences[*i])).count();
            assert_eq!(count, expected);
        }

        // Consecutive windows share exactly the two trailing sentences.
        assert!(segments[0].contains(&sentences[3]) && segments[0].contains(&sentences[4]));
        assert!(segments[1].contains(&sentences[3]) && segments[1].contains(&sentences[4]));
        assert!(!segments[0].contains(&sentences[5]));
        assert!(!segments[1].contains(&sentences[2]));

        assert!(segments[1].contains(&sentences[6]) && segments[1].contains(&sentences[7]));
        assert!(segments[2].contains(&sentences[6]) && segments[2].contains(&sentences[7]));
        assert!(!segments[2].contains(&sentences[5]));
    }

    #[test]
    fn test_every_sentence_is_covered() {
        let sentences: Vec<String> = (0..25).map(|i| sentence(i, 7 + (i % 11))).collect();
        let text = sentences.join(" ");

        let segments = segment_text(&text, 40, 2);
        for sent in &sentences {
            assert!(
                segments.iter().any(|segment| segment.contains(sent)),
                "sentence not covered: {sent}"
            );
        }
    }

    #[test]
    fn test_segments_respect_word_cap() {
        let sentences: Vec<String> = (0..12).map(|i| sentence(i, 20)).collect();
        let text = sentences.join(" ");

        for segment in segment_text(&text, 60, 1) {
            assert!(segment.split_whitespace().count() <= 60);
        }
    }

    #[test]
    fn test_no_overlap_when_zero_requested() {
        let sentences: Vec<String> = (0..6).map(|i| sentence(i, 30)).collect();
        let text = sentences.join(" ");

        let segments = segment_text(&text, 90, 0);
        // Each sentence lands in exactly one segment.
        for sent in &sentences {
            let hits = segments.iter().filter(|s| s.contains(sent)).count();
            assert_eq!(hits, 1);
        }
    }
}
