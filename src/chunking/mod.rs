//! Chunking engine: turns extracted document text into ordered, overlapping chunks.
//!
//! Four strategies share one entry point, [`Chunker::split`]:
//!
//! - `recursive`: prioritized separators, sizes in characters.
//! - `token`: the same control structure, sizes in tokens.
//! - `sentence`: greedy sentence packing with sentence-level overlap.
//! - `semantic`: cuts where adjacent sentence windows drift apart in embedding space. It needs
//!   the embedding gateway; when that call fails the engine falls back to `recursive` and says so
//!   in the result and in every chunk's metadata.
//!
//! Chunk content is an untrimmed slice of the input, so with zero overlap the recursive
//! strategy's chunks concatenate back to the original text.

mod config;
mod recursive;
mod semantic;
mod sentence;
mod token;

pub use config::{
    BreakpointType, ChunkingConfig, ChunkingConfigBuilder, ChunkingSettings, ChunkingStrategy,
    ConfigurationError,
};
pub use sentence::{SentenceSegmenter, UnicodeSentenceSegmenter};
pub use token::{
    TokenCounter, TokenizerError, build_tiktoken_counter, build_token_counter, char_counter,
    cl100k_token_counter, whitespace_token_counter,
};

pub(crate) use semantic::cosine_similarity;

use serde::Serialize;
use serde_json::{Map, Value, json};
use std::ops::Range;
use std::sync::Arc;

use crate::embedding::EmbeddingClient;

/// One chunk of a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextChunk {
    /// Zero-based position within the document.
    pub index: usize,
    /// Chunk text, including any overlap with the previous chunk.
    pub content: String,
    /// Byte offset of the chunk's first character in the source text.
    pub start_offset: usize,
    /// Strategy-specific metadata (`strategy`, `char_count`, `token_count`, `breakpoint_score`,
    /// fallback details).
    pub metadata: Map<String, Value>,
}

/// Why the requested strategy was replaced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkingFallback {
    /// Strategy the caller asked for.
    pub requested: ChunkingStrategy,
    /// Human-readable cause.
    pub reason: String,
}

/// Result of [`Chunker::split`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkedText {
    /// Chunks in source order.
    pub chunks: Vec<TextChunk>,
    /// Strategy that actually produced the chunks.
    pub strategy: ChunkingStrategy,
    /// Present when the requested strategy could not be applied.
    pub fallback: Option<ChunkingFallback>,
}

impl ChunkedText {
    fn empty(strategy: ChunkingStrategy) -> Self {
        Self {
            chunks: Vec::new(),
            strategy,
            fallback: None,
        }
    }

    /// Number of chunks produced.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when the input held no content.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Splits text according to a [`ChunkingConfig`].
#[derive(Clone)]
pub struct Chunker {
    embedder: Arc<dyn EmbeddingClient + Send + Sync>,
    token_counter: TokenCounter,
    segmenter: Arc<dyn SentenceSegmenter>,
}

impl Chunker {
    /// Chunker using `cl100k_base` token counts and Unicode sentence boundaries. The embedder
    /// is only called by the semantic strategy.
    pub fn new(embedder: Arc<dyn EmbeddingClient + Send + Sync>) -> Self {
        Self {
            embedder,
            token_counter: cl100k_token_counter(),
            segmenter: Arc::new(UnicodeSentenceSegmenter),
        }
    }

    /// Replace the token counter used by the token strategy.
    pub fn with_token_counter(mut self, counter: TokenCounter) -> Self {
        self.token_counter = counter;
        self
    }

    /// Replace the sentence segmenter used by the sentence and semantic strategies.
    pub fn with_sentence_segmenter(mut self, segmenter: Arc<dyn SentenceSegmenter>) -> Self {
        self.segmenter = segmenter;
        self
    }

    /// Split `text` into chunks. Never fails: whitespace-only text yields no chunks and a
    /// failing semantic embedding call falls back to the recursive strategy.
    ///
    /// Tokenizing and packing run on the blocking pool; only the semantic strategy's embedding
    /// call is awaited on the caller's task.
    pub async fn split(&self, text: &str, config: &ChunkingConfig) -> ChunkedText {
        let length = self.length_for(config.strategy());
        let semantic = config.strategy() == ChunkingStrategy::Semantic
            && !text.trim().is_empty()
            && length(text.trim()) >= config.min_chunk_size();
        if semantic {
            return self.split_semantic(text, config).await;
        }
        self.split_on_blocking_pool(text, config).await
    }

    async fn split_on_blocking_pool(&self, text: &str, config: &ChunkingConfig) -> ChunkedText {
        let chunker = self.clone();
        let owned = text.to_owned();
        let settings = config.clone();
        match tokio::task::spawn_blocking(move || chunker.split_sync(&owned, &settings)).await {
            Ok(chunked) => chunked,
            Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    "Blocking chunking task cancelled; splitting inline"
                );
                self.split_sync(text, config)
            }
        }
    }

    /// Synchronous split for every strategy but semantic, which needs the embedding gateway.
    fn split_sync(&self, text: &str, config: &ChunkingConfig) -> ChunkedText {
        let strategy = config.strategy();
        if text.trim().is_empty() {
            return ChunkedText::empty(strategy);
        }

        let length = self.length_for(strategy);
        if length(text.trim()) < config.min_chunk_size() {
            let chunks = self.build_chunks(text, vec![0..text.len()], config, None, None);
            return ChunkedText {
                chunks,
                strategy,
                fallback: None,
            };
        }

        let ranges = match strategy {
            ChunkingStrategy::Sentence => {
                let sentences = sentence::sentence_ranges(self.segmenter.as_ref(), text);
                let ranges = sentence::pack_sentences(
                    text,
                    &sentences,
                    config.target_size(),
                    config.overlap(),
                    &length,
                );
                recursive::merge_undersized(
                    text,
                    ranges,
                    config.min_chunk_size(),
                    config.target_size(),
                    &length,
                )
            }
            ChunkingStrategy::Recursive | ChunkingStrategy::Token | ChunkingStrategy::Semantic => {
                self.separator_ranges(text, config, &length)
            }
        };
        let chunks = self.build_chunks(text, ranges, config, None, None);
        ChunkedText {
            chunks,
            strategy,
            fallback: None,
        }
    }

    async fn split_semantic(&self, text: &str, config: &ChunkingConfig) -> ChunkedText {
        let length = self.length_for(ChunkingStrategy::Semantic);
        let sentences = sentence::sentence_ranges(self.segmenter.as_ref(), text);
        match semantic::semantic_split(text, &sentences, config, self.embedder.as_ref(), &length)
            .await
        {
            Ok(split) => {
                let chunks = self.build_chunks(
                    text,
                    split.ranges,
                    config,
                    Some(&split.scores),
                    split.threshold,
                );
                ChunkedText {
                    chunks,
                    strategy: ChunkingStrategy::Semantic,
                    fallback: None,
                }
            }
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    sentences = sentences.len(),
                    "Semantic chunking failed; falling back to recursive strategy"
                );
                let fallback = ChunkingFallback {
                    requested: ChunkingStrategy::Semantic,
                    reason: error.to_string(),
                };
                let recursive_config = config.with_strategy(ChunkingStrategy::Recursive);
                let mut chunks = self
                    .split_on_blocking_pool(text, &recursive_config)
                    .await
                    .chunks;
                for chunk in &mut chunks {
                    chunk
                        .metadata
                        .insert("fallback_from".to_string(), json!("semantic"));
                    chunk
                        .metadata
                        .insert("fallback_reason".to_string(), json!(fallback.reason));
                }
                ChunkedText {
                    chunks,
                    strategy: ChunkingStrategy::Recursive,
                    fallback: Some(fallback),
                }
            }
        }
    }

    fn separator_ranges(
        &self,
        text: &str,
        config: &ChunkingConfig,
        length: &TokenCounter,
    ) -> Vec<Range<usize>> {
        let ranges = recursive::split_ranges(
            text,
            0..text.len(),
            config.target_size(),
            config.overlap(),
            length,
        );
        recursive::merge_undersized(
            text,
            ranges,
            config.min_chunk_size(),
            config.target_size(),
            length,
        )
    }

    fn length_for(&self, strategy: ChunkingStrategy) -> TokenCounter {
        match strategy {
            ChunkingStrategy::Token => Arc::clone(&self.token_counter),
            _ => char_counter(),
        }
    }

    fn build_chunks(
        &self,
        text: &str,
        ranges: Vec<Range<usize>>,
        config: &ChunkingConfig,
        scores: Option<&[Option<f64>]>,
        threshold: Option<f64>,
    ) -> Vec<TextChunk> {
        let strategy = config.strategy();
        ranges
            .into_iter()
            .enumerate()
            .map(|(position, range)| {
                let score = scores
                    .and_then(|scores| scores.get(position))
                    .copied()
                    .flatten();
                (range, score)
            })
            .filter(|(range, _)| !text[range.clone()].trim().is_empty())
            .enumerate()
            .map(|(index, (range, score))| {
                let content = text[range.clone()].to_string();
                let mut metadata = Map::new();
                metadata.insert("strategy".to_string(), json!(strategy.as_str()));
                metadata.insert("char_count".to_string(), json!(content.chars().count()));
                match strategy {
                    ChunkingStrategy::Token => {
                        metadata.insert(
                            "token_count".to_string(),
                            json!((self.token_counter)(&content)),
                        );
                    }
                    ChunkingStrategy::Semantic => {
                        metadata.insert(
                            "breakpoint_type".to_string(),
                            json!(config.breakpoint_type().to_string()),
                        );
                        if let Some(threshold) = threshold {
                            metadata
                                .insert("breakpoint_threshold".to_string(), json!(threshold));
                        }
                        if let Some(score) = score {
                            metadata.insert("breakpoint_score".to_string(), json!(score));
                        }
                    }
                    ChunkingStrategy::Recursive | ChunkingStrategy::Sentence => {}
                }
                TextChunk {
                    index,
                    content,
                    start_offset: range.start,
                    metadata,
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker").finish_non_exhaustive()
    }
}
