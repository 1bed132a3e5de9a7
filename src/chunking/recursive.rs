//! Separator-priority splitting shared by the recursive and token strategies.
//!
//! Text is cut on the first separator present in a fragment (`"\n\n"`, `"\n"`, `". "`, `" "`,
//! then individual characters). Separators stay attached to the end of the fragment they close,
//! so emitted ranges are contiguous slices of the source. Fragments are packed greedily into
//! chunks; each chunk after the first starts with a tail of its predecessor of at most
//! `overlap` units.

use std::ops::Range;

use super::token::TokenCounter;

/// Separators in priority order. The empty separator means "split between characters".
pub(crate) const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Split `text[range]` into chunk ranges no longer than `target` units, each chunk after the
/// first overlapping its predecessor by at most `overlap` units.
pub(crate) fn split_ranges(
    text: &str,
    range: Range<usize>,
    target: usize,
    overlap: usize,
    length: &TokenCounter,
) -> Vec<Range<usize>> {
    if text[range.clone()].trim().is_empty() {
        return Vec::new();
    }
    if length(&text[range.clone()]) <= target {
        return vec![range];
    }

    let mut packer = Packer {
        text,
        target,
        overlap: overlap.min(target.saturating_sub(1)),
        length,
        chunks: Vec::new(),
    };
    packer.split(range, &SEPARATORS);
    absorb_whitespace(text, packer.chunks)
}

struct Packer<'a> {
    text: &'a str,
    target: usize,
    overlap: usize,
    length: &'a TokenCounter,
    chunks: Vec<Range<usize>>,
}

impl Packer<'_> {
    fn measure(&self, range: Range<usize>) -> usize {
        (self.length)(&self.text[range])
    }

    fn split(&mut self, range: Range<usize>, separators: &[&str]) {
        let fragment = &self.text[range.clone()];
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || fragment.contains(sep));
        let (separator, rest) = match position {
            Some(index) => (separators[index], &separators[index + 1..]),
            None => ("", &separators[separators.len()..]),
        };
        let budget = self.target - self.overlap;

        let pieces = pieces(self.text, range, separator);
        let fits_alone: Vec<bool> = if rest.is_empty() {
            vec![true; pieces.len()]
        } else {
            pieces
                .iter()
                .map(|piece| self.measure(piece.clone()) <= budget)
                .collect()
        };

        let mut index = 0;
        let mut run_end = 0;
        while index < pieces.len() {
            if !fits_alone[index] {
                self.split(pieces[index].clone(), rest);
                index += 1;
                continue;
            }
            if run_end <= index {
                run_end = fits_alone[index..]
                    .iter()
                    .position(|fits| !fits)
                    .map_or(pieces.len(), |offset| index + offset);
            }
            let start = self.chunk_start(pieces[index].start);
            let last = furthest_fit(index, run_end - 1, |candidate| {
                self.measure(start..pieces[candidate].end) <= self.target
            });
            let next = last + 1;
            let blank = self.text[pieces[index].start..pieces[last].end]
                .trim()
                .is_empty();
            if blank && next < pieces.len() && !fits_alone[next] {
                // Whitespace ahead of an oversized piece is split together with it.
                self.split(pieces[index].start..pieces[next].end, rest);
                index = next + 1;
                continue;
            }
            self.chunks.push(start..pieces[last].end);
            index = next;
        }
    }

    /// Start offset for a chunk whose new content begins at `base`.
    fn chunk_start(&self, base: usize) -> usize {
        match self.chunks.last() {
            Some(previous) if self.overlap > 0 => {
                tail_start(self.text, previous.start..base, self.overlap, self.length)
            }
            _ => base,
        }
    }
}

/// Break `text[range]` after every occurrence of `separator`; the empty separator yields one
/// range per character.
fn pieces(text: &str, range: Range<usize>, separator: &str) -> Vec<Range<usize>> {
    let fragment = &text[range.clone()];
    let offset = range.start;
    if separator.is_empty() {
        return fragment
            .char_indices()
            .map(|(index, ch)| offset + index..offset + index + ch.len_utf8())
            .collect();
    }

    let mut out = Vec::new();
    let mut cursor = 0;
    for (index, matched) in fragment.match_indices(separator) {
        let end = index + matched.len();
        out.push(offset + cursor..offset + end);
        cursor = end;
    }
    if cursor < fragment.len() {
        out.push(offset + cursor..offset + fragment.len());
    }
    out
}

/// Largest `k` in `low..=high` with `fits(k)`. `fits(low)` is taken as given and `fits` must
/// turn false at most once as `k` grows.
pub(crate) fn furthest_fit(low: usize, high: usize, fits: impl Fn(usize) -> bool) -> usize {
    let mut good = low;
    let mut step = 1;
    let mut bad = loop {
        if good >= high {
            return good;
        }
        let candidate = (good + step).min(high);
        if !fits(candidate) {
            break candidate;
        }
        good = candidate;
        step *= 2;
    };
    while bad - good > 1 {
        let middle = good + (bad - good) / 2;
        if fits(middle) {
            good = middle;
        } else {
            bad = middle;
        }
    }
    good
}

/// Earliest offset in `range` whose suffix fits in `limit` units, preferring a suffix that
/// starts a word.
pub(crate) fn tail_start(
    text: &str,
    range: Range<usize>,
    limit: usize,
    length: &TokenCounter,
) -> usize {
    let starts: Vec<usize> = text[range.clone()]
        .char_indices()
        .map(|(index, _)| range.start + index)
        .collect();
    let first_fit = starts.partition_point(|&start| length(&text[start..range.end]) > limit);
    let Some(&earliest) = starts.get(first_fit) else {
        return range.end;
    };

    let mut previous_char = text[range.start..earliest].chars().next_back();
    for (index, ch) in text[earliest..range.end].char_indices() {
        if previous_char.is_none_or(char::is_whitespace) && !ch.is_whitespace() {
            return earliest + index;
        }
        previous_char = Some(ch);
    }
    earliest
}

/// Fold chunks whose new content is whitespace only into the chunk before them.
pub(crate) fn absorb_whitespace(text: &str, chunks: Vec<Range<usize>>) -> Vec<Range<usize>> {
    let mut out: Vec<Range<usize>> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match out.last_mut() {
            Some(previous) if text[previous.end.min(chunk.end)..chunk.end].trim().is_empty() => {
                previous.end = previous.end.max(chunk.end);
            }
            _ => out.push(chunk),
        }
    }
    if out.len() > 1 && text[out[0].clone()].trim().is_empty() {
        let leading = out.remove(0);
        out[0].start = out[0].start.min(leading.start);
    }
    out
}

/// Merge chunks shorter than `min_size` (measured on trimmed content) into a neighbour, forward
/// first, as long as the merged chunk stays within `limit`. Chunks that cannot merge are kept.
pub(crate) fn merge_undersized(
    text: &str,
    mut chunks: Vec<Range<usize>>,
    min_size: usize,
    limit: usize,
    length: &TokenCounter,
) -> Vec<Range<usize>> {
    let mut index = 0;
    while index < chunks.len() {
        if chunks.len() == 1 || length(text[chunks[index].clone()].trim()) >= min_size {
            index += 1;
            continue;
        }
        let start = chunks[index].start;
        if index + 1 < chunks.len() && length(&text[start..chunks[index + 1].end]) <= limit {
            let next = chunks.remove(index + 1);
            chunks[index].end = next.end;
            continue;
        }
        if index > 0 && length(&text[chunks[index - 1].start..chunks[index].end]) <= limit {
            let current = chunks.remove(index);
            chunks[index - 1].end = current.end;
            continue;
        }
        index += 1;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::token::{char_counter, whitespace_token_counter};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn render(text: &str, ranges: &[Range<usize>]) -> Vec<String> {
        ranges.iter().map(|range| text[range.clone()].to_string()).collect()
    }

    #[test]
    fn fits_in_one_chunk() {
        let text = "short text";
        let ranges = split_ranges(text, 0..text.len(), 20, 5, &char_counter());
        assert_eq!(render(text, &ranges), vec!["short text"]);
    }

    #[test]
    fn zero_overlap_reconstructs_input() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit.\n\nSed do eiusmod \
                    tempor incididunt ut labore.\nUt enim ad minim veniam.\n\n\n\nEnd.";
        let ranges = split_ranges(text, 0..text.len(), 30, 0, &char_counter());
        let chunks = render(text, &ranges);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 30, "{chunk:?}");
        }
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let text = "Lorem ipsum dolor sit amet.\n\nConsectetur adipiscing.";
        let chunks = render(text, &split_ranges(text, 0..text.len(), 20, 5, &char_counter()));
        assert_eq!(
            chunks,
            vec![
                "Lorem ipsum dolor ",
                "olor sit amet.\n\n",
                "et.\n\nConsectetur ",
                "etur adipiscing.",
            ]
        );
    }

    #[test]
    fn character_fallback_overlaps() {
        let text = "abcdefghijklmnopqrstuvwxyz".repeat(3);
        let chunks = render(&text, &split_ranges(&text, 0..text.len(), 20, 5, &char_counter()));
        assert_eq!(chunks[0], "abcdefghijklmnopqrst");
        assert_eq!(chunks[1], "pqrstuvwxyzabcdefghi");
        for pair in chunks.windows(2) {
            assert!(pair[1].starts_with(&pair[0][pair[0].len() - 5..]));
        }
    }

    #[test]
    fn token_budget_applies_to_words() {
        let text = "one two three four five";
        let chunks = render(
            text,
            &split_ranges(text, 0..text.len(), 3, 1, &whitespace_token_counter()),
        );
        assert_eq!(chunks, vec!["one two three ", "three four five"]);
    }

    #[test]
    fn whitespace_text_yields_nothing() {
        assert!(split_ranges(" \n\n ", 0..4, 3, 0, &char_counter()).is_empty());
    }

    #[test]
    fn undersized_chunks_merge_forward_then_backward() {
        let text = "aaaa bb cccc";
        let chunks = vec![0..5, 5..8, 8..12];
        let merged = merge_undersized(text, chunks, 4, 8, &char_counter());
        assert_eq!(render(text, &merged), vec!["aaaa ", "bb cccc"]);

        let merged = merge_undersized(text, vec![0..8, 8..12], 5, 20, &char_counter());
        assert_eq!(render(text, &merged), vec!["aaaa bb cccc"]);
    }

    #[test]
    fn whitespace_before_an_oversized_word_counts_against_the_target() {
        let text = "abcd  efghijk";
        let chunks = render(text, &split_ranges(text, 0..text.len(), 5, 0, &char_counter()));
        assert_eq!(chunks, vec!["abcd ", " efgh", "ijk"]);
    }

    #[test]
    fn furthest_fit_finds_the_last_fitting_index() {
        assert_eq!(furthest_fit(0, 100, |k| k <= 37), 37);
        assert_eq!(furthest_fit(5, 5, |_| false), 5);
        assert_eq!(furthest_fit(3, 10, |k| k <= 3), 3);
        assert_eq!(furthest_fit(0, 10, |_| true), 10);
    }

    #[test]
    fn tail_start_prefers_word_starts() {
        let text = "alpha beta gamma";
        let counter = char_counter();
        assert_eq!(tail_start(text, 0..text.len(), 8, &counter), 11);
        assert_eq!(tail_start(text, 0..text.len(), 3, &counter), 13);
        assert_eq!(tail_start(text, 0..text.len(), 0, &counter), text.len());
    }

    #[test]
    fn measurements_stay_proportional_to_chunk_count() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let counter: TokenCounter = Arc::new(move |segment: &str| {
            counted.fetch_add(1, Ordering::Relaxed);
            segment.chars().count()
        });
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(500);

        let ranges = split_ranges(&text, 0..text.len(), 200, 20, &counter);

        assert!(ranges.len() > 100);
        for range in &ranges {
            assert!(text[range.clone()].chars().count() <= 200);
        }
        let measured = calls.load(Ordering::Relaxed);
        assert!(measured < 4_000, "{measured} measurements for {} chunks", ranges.len());
    }
}
