//! Sentence segmentation and greedy sentence packing.

use std::ops::Range;
use unicode_segmentation::UnicodeSegmentation;

use super::recursive::{furthest_fit, split_ranges};
use super::token::TokenCounter;

/// Splits text into sentences. Returned slices must borrow from the input, in order.
pub trait SentenceSegmenter: Send + Sync {
    /// Sentences of `text` in source order.
    fn sentences<'a>(&self, text: &'a str) -> Vec<&'a str>;
}

/// Unicode (UAX #29) sentence boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnicodeSentenceSegmenter;

impl SentenceSegmenter for UnicodeSentenceSegmenter {
    fn sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
        text.split_sentence_bounds().collect()
    }
}

/// Locate the segmenter's sentences in `text` as contiguous ranges covering the whole input.
///
/// Blank sentences and the gaps between sentences are attached to the preceding sentence.
pub(crate) fn sentence_ranges(segmenter: &dyn SentenceSegmenter, text: &str) -> Vec<Range<usize>> {
    let mut found: Vec<Range<usize>> = Vec::new();
    let mut cursor = 0;
    for sentence in segmenter.sentences(text) {
        if sentence.trim().is_empty() {
            continue;
        }
        if let Some(position) = text[cursor..].find(sentence) {
            let start = cursor + position;
            let end = start + sentence.len();
            found.push(start..end);
            cursor = end;
        }
    }

    let count = found.len();
    for index in 0..count {
        if index == 0 {
            found[index].start = 0;
        }
        found[index].end = if index + 1 < count {
            found[index + 1].start
        } else {
            text.len()
        };
    }
    found
}

/// Greedily pack consecutive sentences into chunks of at most `target` units.
///
/// Each following chunk steps back to re-include trailing sentences of its predecessor that
/// total at most `overlap` units. Sentences longer than `target` are split on separators.
pub(crate) fn pack_sentences(
    text: &str,
    sentences: &[Range<usize>],
    target: usize,
    overlap: usize,
    length: &TokenCounter,
) -> Vec<Range<usize>> {
    let mut chunks = Vec::new();
    let count = sentences.len();
    let mut index = 0;

    while index < count {
        let start = sentences[index].start;
        if length(&text[sentences[index].clone()]) > target {
            chunks.extend(split_ranges(
                text,
                sentences[index].clone(),
                target,
                overlap,
                length,
            ));
            index += 1;
            continue;
        }

        let next = furthest_fit(index, count - 1, |last| {
            length(&text[start..sentences[last].end]) <= target
        }) + 1;
        chunks.push(start..sentences[next - 1].end);
        if next >= count {
            break;
        }

        let last = sentences[next - 1].end;
        let mut resume = next;
        while resume - 1 > index && length(&text[sentences[resume - 1].start..last]) <= overlap {
            resume -= 1;
        }
        while resume < next && length(&text[sentences[resume].start..sentences[next].end]) > target
        {
            resume += 1;
        }
        index = resume;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::token::char_counter;

    struct LineSegmenter;

    impl SentenceSegmenter for LineSegmenter {
        fn sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
            text.split_inclusive('\n').collect()
        }
    }

    fn render(text: &str, ranges: &[Range<usize>]) -> Vec<String> {
        ranges.iter().map(|range| text[range.clone()].to_string()).collect()
    }

    #[test]
    fn unicode_segmenter_keeps_trailing_space() {
        let sentences = UnicodeSentenceSegmenter.sentences("One is here. Two is here.");
        assert_eq!(sentences, vec!["One is here. ", "Two is here."]);
    }

    #[test]
    fn ranges_cover_the_input() {
        let text = "  first\n\nsecond\nthird";
        let ranges = sentence_ranges(&LineSegmenter, text);
        assert_eq!(render(text, &ranges).concat(), text);
        assert_eq!(ranges.len(), 3);
    }

    #[test]
    fn packing_steps_back_for_overlap() {
        let text = "One is here. Two is here. Three is here. Four is here.";
        let sentences = sentence_ranges(&UnicodeSentenceSegmenter, text);
        let chunks = render(
            text,
            &pack_sentences(text, &sentences, 30, 15, &char_counter()),
        );
        assert_eq!(
            chunks,
            vec![
                "One is here. Two is here. ",
                "Two is here. Three is here. ",
                "Three is here. Four is here.",
            ]
        );
    }

    #[test]
    fn oversized_sentences_are_split() {
        let text = "Short one. This sentence is definitely far too long to fit.";
        let sentences = sentence_ranges(&UnicodeSentenceSegmenter, text);
        let chunks = pack_sentences(text, &sentences, 20, 0, &char_counter());
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(text[chunk.clone()].chars().count() <= 20);
        }
    }
}
