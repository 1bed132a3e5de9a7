//! Length functions used to measure chunks.
//!
//! Token counting prefers `tiktoken-rs` for OpenAI models and known encodings, and falls back to
//! a whitespace counter when the model's tokenizer is unavailable (common for Ollama models).

use crate::config::EmbeddingProvider;
use anyhow::Error as EncodingError;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

/// Shared length function: text in, size in the strategy's unit out.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Tokenizer could not be constructed for the requested model.
#[derive(Debug, Error)]
#[error("Failed to load tokenizer for model '{model}'")]
pub struct TokenizerError {
    /// Model or encoding name that was requested.
    pub model: String,
    #[source]
    source: EncodingError,
}

/// Build a token counter for the given embedding provider and model.
///
/// OpenAI models must resolve to a tiktoken encoding. Ollama and hash models try tiktoken first
/// and fall back to whitespace counting with a warning.
pub fn build_token_counter(
    provider: EmbeddingProvider,
    model: &str,
) -> Result<TokenCounter, TokenizerError> {
    match provider {
        EmbeddingProvider::OpenAI => build_tiktoken_counter(model),
        EmbeddingProvider::Ollama | EmbeddingProvider::Hash => {
            match build_tiktoken_counter(model) {
                Ok(counter) => Ok(counter),
                Err(error) => {
                    tracing::warn!(
                        model,
                        error = %error,
                        "Tokenizer unavailable for model; falling back to whitespace counter"
                    );
                    Ok(whitespace_token_counter())
                }
            }
        }
    }
}

/// Build a tiktoken-backed counter, resolving `model` as a model name first and an encoding
/// name second.
pub fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, TokenizerError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    let encoding = resolve_encoding(target).map_err(|source| TokenizerError {
        model: target.to_string(),
        source,
    })?;
    Ok(counter_from_encoding(Arc::new(encoding)))
}

/// Process-wide `cl100k_base` counter used for context budgets and the token strategy default.
pub fn cl100k_token_counter() -> TokenCounter {
    static ENCODING: OnceLock<Option<Arc<CoreBPE>>> = OnceLock::new();
    let encoding = ENCODING.get_or_init(|| match cl100k_base() {
        Ok(encoding) => Some(Arc::new(encoding)),
        Err(error) => {
            tracing::warn!(
                error = %error,
                "cl100k_base unavailable; falling back to whitespace counter"
            );
            None
        }
    });
    match encoding {
        Some(encoding) => counter_from_encoding(Arc::clone(encoding)),
        None => whitespace_token_counter(),
    }
}

/// Count whitespace-separated words, treating any non-empty text as at least one token.
pub fn whitespace_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

/// Count Unicode scalar values.
pub fn char_counter() -> TokenCounter {
    Arc::new(|segment: &str| segment.chars().count())
}

fn counter_from_encoding(encoding: Arc<CoreBPE>) -> TokenCounter {
    Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, EncodingError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            match encoding_from_name(model) {
                Some(candidate) => candidate,
                None => Err(model_err),
            }
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, EncodingError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_counter_counts_words() {
        let counter = whitespace_token_counter();
        assert_eq!(counter("one two  three"), 3);
        assert_eq!(counter("   "), 1);
        assert_eq!(counter(""), 0);
    }

    #[test]
    fn char_counter_counts_scalars() {
        assert_eq!(char_counter()("héllo"), 5);
    }

    #[test]
    fn tiktoken_counter_resolves_encoding_names() {
        let counter = build_tiktoken_counter("cl100k_base").expect("encoding");
        assert!(counter("The quick brown fox") >= 4);
    }

    #[test]
    fn unknown_local_models_fall_back_to_whitespace() {
        let counter =
            build_token_counter(EmbeddingProvider::Ollama, "nomic-embed-text").expect("counter");
        assert_eq!(counter("alpha beta gamma"), 3);
    }

    #[test]
    fn unknown_openai_models_are_rejected() {
        let error = build_token_counter(EmbeddingProvider::OpenAI, "not-a-model").err();
        assert!(error.is_some());
    }
}
