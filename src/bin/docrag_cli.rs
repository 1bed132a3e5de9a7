use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use docrag::chunking::{
    BreakpointType, Chunker, ChunkingConfig, ChunkingStrategy, build_token_counter,
    cl100k_token_counter,
};
use docrag::config::Config;
use docrag::embedding::{EmbeddingClient, HashEmbeddingClient, build_embedding_client};
use docrag::ingest::NewDocument;
use docrag::logging;
use docrag::retrieval::QueryRequest;
use docrag::service::{IngestRequest, RagApi, RagService};
use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

const INDEXABLE_EXTENSIONS: [&str; 3] = ["txt", "md", "markdown"];
const OFFLINE_DIMENSION: usize = 256;

#[derive(Parser)]
#[command(name = "docrag-cli", version, about = "Chunk, index and query documents")]
struct Cli {
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the chunks of a file (or stdin) as JSON without indexing anything.
    Chunk {
        /// File to chunk; reads stdin when omitted.
        file: Option<PathBuf>,
        #[command(flatten)]
        chunking: ChunkingArgs,
    },
    /// Index every .txt, .md and .markdown file below a directory.
    Ingest {
        /// Directory to walk.
        dir: PathBuf,
        #[command(flatten)]
        chunking: ChunkingArgs,
    },
    /// Answer a question from the indexed documents.
    Ask {
        /// Question to answer.
        query: String,
        /// Restrict the answer to these documents (repeatable).
        #[arg(long = "document-id")]
        document_ids: Vec<String>,
        /// Search only these collections (repeatable).
        #[arg(long = "collection")]
        collections: Vec<String>,
        /// Number of chunks to retrieve.
        #[arg(long)]
        top_k: Option<usize>,
        /// Print only retrieved context, skipping the language model.
        #[arg(long)]
        retrieve_only: bool,
    },
}

#[derive(Args)]
struct ChunkingArgs {
    /// Chunking strategy: recursive, semantic, token or sentence.
    #[arg(long)]
    strategy: Option<ChunkingStrategy>,
    /// Target chunk size.
    #[arg(long)]
    size: Option<usize>,
    /// Overlap between adjacent chunks.
    #[arg(long)]
    overlap: Option<usize>,
    /// Minimum chunk size.
    #[arg(long)]
    min_size: Option<usize>,
    /// Semantic breakpoint type: percentile, standard_deviation, interquartile or gradient.
    #[arg(long)]
    breakpoint: Option<BreakpointType>,
    /// Semantic breakpoint amount.
    #[arg(long)]
    breakpoint_amount: Option<f64>,
}

impl ChunkingArgs {
    /// Apply the flags on top of `base`.
    fn resolve(&self, base: &ChunkingConfig) -> Result<ChunkingConfig> {
        let mut builder = ChunkingConfig::builder(self.strategy.unwrap_or(base.strategy()))
            .target_size(self.size.unwrap_or(base.target_size()))
            .overlap(self.overlap.unwrap_or(base.overlap()))
            .min_chunk_size(self.min_size.unwrap_or(base.min_chunk_size()))
            .breakpoint_type(self.breakpoint.unwrap_or(base.breakpoint_type()));
        if let Some(amount) = self.breakpoint_amount {
            builder = builder.breakpoint_amount(amount);
        }
        builder.build().context("Invalid chunking options")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_cli_tracing(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Command::Chunk { file, chunking } => chunk(file.as_deref(), &chunking).await,
        Command::Ingest { dir, chunking } => ingest(&dir, &chunking).await,
        Command::Ask {
            query,
            document_ids,
            collections,
            top_k,
            retrieve_only,
        } => {
            let mut request = QueryRequest::new(query)
                .with_document_ids(document_ids)
                .with_collections(collections);
            request.top_k = top_k;
            ask(request, retrieve_only).await
        }
    }
}

async fn chunk(file: Option<&Path>, args: &ChunkingArgs) -> Result<()> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read stdin")?;
            buffer
        }
    };

    // Configured providers when the environment is complete, offline hashing otherwise.
    let (chunker, base) = match Config::from_env() {
        Ok(config) => {
            let embedder = build_embedding_client(&config)?;
            let counter = build_token_counter(config.embedding_provider, &config.embedding_model)?;
            let chunker = Chunker::new(embedder).with_token_counter(counter);
            (chunker, config.chunking_config()?)
        }
        Err(error) => {
            tracing::debug!(error = %error, "Configuration incomplete; chunking offline");
            let embedder: Arc<dyn EmbeddingClient + Send + Sync> =
                Arc::new(HashEmbeddingClient::new(OFFLINE_DIMENSION));
            let chunker = Chunker::new(embedder).with_token_counter(cl100k_token_counter());
            (chunker, ChunkingConfig::default())
        }
    };
    let config = args.resolve(&base)?;
    let chunked = chunker.split(&text, &config).await;
    println!("{}", serde_json::to_string_pretty(&chunked)?);
    Ok(())
}

async fn ingest(dir: &Path, args: &ChunkingArgs) -> Result<()> {
    let config = Config::from_env().context("Failed to load config from environment")?;
    let chunking = args.resolve(&config.chunking_config()?)?;
    let service = RagService::from_config(&config)
        .await
        .context("Failed to initialize RAG service")?;

    let mut indexed = 0usize;
    let mut failed = 0usize;
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_indexable(path) {
            continue;
        }
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "Skipping unreadable file");
                failed += 1;
                continue;
            }
        };
        let request = IngestRequest {
            document: document_for(dir, path),
            text,
            chunking: Some(chunking.settings()),
        };
        match service.ingest(request).await {
            Ok(response) => {
                indexed += 1;
                println!(
                    "{}",
                    json!({
                        "path": path.display().to_string(),
                        "document_id": response.document.id,
                        "collection": response.outcome.collection,
                        "chunks": response.outcome.chunk_count,
                    })
                );
            }
            Err(error) => {
                failed += 1;
                eprintln!("{}: {error}", path.display());
            }
        }
    }

    eprintln!("Indexed {indexed} file(s), {failed} failed");
    if indexed == 0 && failed > 0 {
        bail!("No files were indexed");
    }
    Ok(())
}

async fn ask(request: QueryRequest, retrieve_only: bool) -> Result<()> {
    let config = Config::from_env().context("Failed to load config from environment")?;
    let service = RagService::from_config(&config)
        .await
        .context("Failed to initialize RAG service")?;

    let output = if retrieve_only {
        serde_json::to_string_pretty(&service.retrieve(request).await?)?
    } else {
        serde_json::to_string_pretty(&service.generate(request).await?)?
    };
    println!("{output}");
    Ok(())
}

fn is_indexable(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            INDEXABLE_EXTENSIONS
                .iter()
                .any(|allowed| extension.eq_ignore_ascii_case(allowed))
        })
}

/// Registration for a file: its path relative to the walk root is the stable document id.
fn document_for(root: &Path, path: &Path) -> NewDocument {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    let title = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mime_type = if path.extension().is_some_and(|extension| extension == "txt") {
        "text/plain"
    } else {
        "text/markdown"
    };
    NewDocument {
        id: Some(relative.to_string_lossy().replace('\\', "/")),
        title,
        filename,
        mime_type: mime_type.to_string(),
        storage_path: Some(path.display().to_string()),
        size_bytes: std::fs::metadata(path).map(|meta| meta.len()).unwrap_or(0),
        ..NewDocument::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_text_and_markdown_files_are_indexed() {
        assert!(is_indexable(Path::new("notes/a.md")));
        assert!(is_indexable(Path::new("notes/b.MARKDOWN")));
        assert!(is_indexable(Path::new("c.txt")));
        assert!(!is_indexable(Path::new("d.pdf")));
        assert!(!is_indexable(Path::new("README")));
    }

    #[test]
    fn relative_path_becomes_document_id() {
        let document = document_for(Path::new("/docs"), Path::new("/docs/team/plan.md"));
        assert_eq!(document.id.as_deref(), Some("team/plan.md"));
        assert_eq!(document.title, "plan");
        assert_eq!(document.filename.as_deref(), Some("plan.md"));
        assert_eq!(document.mime_type, "text/markdown");
    }

    #[test]
    fn flags_override_base_chunking() {
        let args = ChunkingArgs {
            strategy: Some(ChunkingStrategy::Sentence),
            size: Some(300),
            overlap: None,
            min_size: Some(10),
            breakpoint: None,
            breakpoint_amount: None,
        };
        let config = args.resolve(&ChunkingConfig::default()).expect("config");
        assert_eq!(config.strategy(), ChunkingStrategy::Sentence);
        assert_eq!(config.target_size(), 300);
        assert_eq!(config.overlap(), 200);
        assert_eq!(config.min_chunk_size(), 10);
    }
}
