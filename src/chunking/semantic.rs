//! Breakpoint detection over adjacent-sentence embedding distances.
//!
//! Every sentence is embedded together with one neighbour on each side, so a document of `n`
//! sentences costs `n` embedding inputs (sent as one batch) before any chunk is produced.

use std::ops::Range;

use super::config::{BreakpointType, ChunkingConfig};
use super::recursive::{merge_undersized, split_ranges};
use super::token::TokenCounter;
use crate::embedding::{EmbeddingClient, EmbeddingClientError};

/// Chunk ranges and the breakpoint score of the cut that closes each of them.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SemanticSplit {
    pub(crate) ranges: Vec<Range<usize>>,
    pub(crate) scores: Vec<Option<f64>>,
    pub(crate) threshold: Option<f64>,
}

pub(crate) async fn semantic_split(
    text: &str,
    sentences: &[Range<usize>],
    config: &ChunkingConfig,
    embedder: &(dyn EmbeddingClient + Send + Sync),
    length: &TokenCounter,
) -> Result<SemanticSplit, EmbeddingClientError> {
    let count = sentences.len();
    if count < 2 {
        let ranges = sentences
            .iter()
            .flat_map(|sentence| {
                split_ranges(text, sentence.clone(), config.target_size(), 0, length)
            })
            .collect::<Vec<_>>();
        let scores = vec![None; ranges.len()];
        return Ok(SemanticSplit {
            ranges,
            scores,
            threshold: None,
        });
    }

    let windows: Vec<String> = (0..count)
        .map(|index| {
            let first = index.saturating_sub(1);
            let last = (index + 1).min(count - 1);
            text[sentences[first].start..sentences[last].end].to_string()
        })
        .collect();
    let embeddings = embedder.generate_embeddings(windows).await?;
    if embeddings.len() != count {
        return Err(EmbeddingClientError::GenerationFailed(format!(
            "expected {count} sentence embeddings, received {}",
            embeddings.len()
        )));
    }

    let distances: Vec<f64> = embeddings
        .windows(2)
        .map(|pair| 1.0 - cosine_similarity(&pair[0], &pair[1]))
        .collect();
    let (threshold, scores) = breakpoint_threshold(
        &distances,
        config.breakpoint_type(),
        config.breakpoint_amount(),
    );

    let mut cuts: Vec<(usize, f64)> = Vec::new();
    let mut group_start = sentences[0].start;
    let mut groups: Vec<Range<usize>> = Vec::new();
    for (index, score) in scores.iter().enumerate() {
        if *score > threshold {
            let end = sentences[index].end;
            groups.push(group_start..end);
            cuts.push((end, *score));
            group_start = end;
        }
    }
    groups.push(group_start..sentences[count - 1].end);

    let mut ranges = Vec::new();
    for group in groups {
        ranges.extend(split_ranges(text, group, config.target_size(), 0, length));
    }
    let ranges = merge_undersized(
        text,
        ranges,
        config.min_chunk_size(),
        config.target_size(),
        length,
    );
    let scores = ranges
        .iter()
        .map(|range| {
            cuts.iter()
                .find(|(end, _)| *end == range.end)
                .map(|(_, score)| *score)
        })
        .collect();

    Ok(SemanticSplit {
        ranges,
        scores,
        threshold: Some(threshold),
    })
}

/// Threshold for the given breakpoint type plus the series it is compared against.
pub(crate) fn breakpoint_threshold(
    distances: &[f64],
    kind: BreakpointType,
    amount: f64,
) -> (f64, Vec<f64>) {
    match kind {
        BreakpointType::Percentile => (percentile(distances, amount), distances.to_vec()),
        BreakpointType::StandardDeviation => {
            let mean = mean(distances);
            let variance = distances
                .iter()
                .map(|value| (value - mean).powi(2))
                .sum::<f64>()
                / distances.len().max(1) as f64;
            (mean + amount * variance.sqrt(), distances.to_vec())
        }
        BreakpointType::Interquartile => {
            let iqr = percentile(distances, 75.0) - percentile(distances, 25.0);
            (mean(distances) + amount * iqr, distances.to_vec())
        }
        BreakpointType::Gradient => {
            let slope = gradient(distances);
            (percentile(&slope, amount), slope)
        }
    }
}

/// Linear-interpolated percentile, `pct` in `[0, 100]`.
pub(crate) fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Second-order central differences inside, first-order at the edges.
fn gradient(values: &[f64]) -> Vec<f64> {
    let len = values.len();
    if len < 2 {
        return values.to_vec();
    }
    (0..len)
        .map(|index| {
            if index == 0 {
                values[1] - values[0]
            } else if index == len - 1 {
                values[len - 1] - values[len - 2]
            } else {
                (values[index + 1] - values[index - 1]) / 2.0
            }
        })
        .collect()
}

/// Cosine similarity; zero when either vector has no magnitude or the lengths differ.
pub(crate) fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut left_norm = 0.0_f64;
    let mut right_norm = 0.0_f64;
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}
