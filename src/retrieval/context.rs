//! Source attribution and token-bounded context assembly.

use serde_json::{Map, Value};

use crate::chunking::TokenCounter;
use crate::store::DOCUMENT_ID_FIELD;

const BLOCK_SEPARATOR: &str = "\n\n";

/// Attribution label for a chunk: `filename`, then `url` without query string or trailing
/// slash, then `title`, then `source`, else `Document <id>`.
pub fn source_label(metadata: &Map<String, Value>, point_id: &str) -> String {
    let text = |key: &str| {
        metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(filename) = text("filename") {
        return filename.to_string();
    }
    if let Some(url) = text("url") {
        let without_query = url.split('?').next().unwrap_or(url);
        return without_query.trim_end_matches('/').to_string();
    }
    if let Some(title) = text("title") {
        return title.to_string();
    }
    if let Some(source) = text("source") {
        return source.to_string();
    }
    let id = text(DOCUMENT_ID_FIELD).unwrap_or(point_id);
    format!("Document {id}")
}

/// Render one attributed context block.
pub(crate) fn render_block(source: &str, content: &str) -> String {
    format!("[Source: {source}]\n{}", content.trim())
}

/// Context text plus how much of the ranked input it used.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AssembledContext {
    pub(crate) text: String,
    pub(crate) included: usize,
    pub(crate) tokens: usize,
}

/// Append blocks in rank order until the next one would push the context past `budget`
/// tokens. Blocks are never cut; everything after the first block that does not fit is dropped.
pub(crate) fn assemble_context<'a, I>(
    blocks: I,
    budget: usize,
    counter: &TokenCounter,
) -> AssembledContext
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut text = String::new();
    let mut included = 0;
    let mut tokens = 0;

    for (source, content) in blocks {
        let block = render_block(source, content);
        let candidate = if text.is_empty() {
            block
        } else {
            format!("{text}{BLOCK_SEPARATOR}{block}")
        };
        let candidate_tokens = counter(&candidate);
        if candidate_tokens > budget {
            break;
        }
        text = candidate;
        tokens = candidate_tokens;
        included += 1;
    }

    AssembledContext {
        text,
        included,
        tokens,
    }
}
