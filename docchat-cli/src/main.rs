//! `docchat` - chat with a PDF from the terminal.
//!
//! # Commands
//!
//! ```bash
//! # Index a document (first run only) and start chatting
//! docchat chat report.pdf
//!
//! # Re-chunk and re-embed, replacing the stored collection
//! docchat chat report.pdf --rebuild
//!
//! # Show the chunks the configured policy produces
//! docchat chunk report.pdf
//! ```
//!
//! Settings come from `DOCCHAT_*` variables; the API key from `GOOGLE_API_KEY`
//! or `GEMINI_API_KEY`. A `.env` file in the working directory is honoured.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docchat_rag::gemini::{
    DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_MODEL, GeminiEmbeddingProvider, GeminiModel,
};
use docchat_rag::document::PAGE_KEY;
use docchat_rag::{
    BuildOptions, ChatSession, Chunker, DocumentChunkSource, DocumentLoader, EmbeddingProvider,
    IndexRegistry, RagConfig, RagPipeline, chunker_for, loader_for_path,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docchat")]
#[command(about = "Ask questions about a PDF document")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a document if needed, then chat about it
    Chat {
        /// PDF (or plain-text) document to chat with
        document: PathBuf,

        /// Discard the stored collection and index the document again
        #[arg(long)]
        rebuild: bool,

        #[command(flatten)]
        models: ModelArgs,
    },

    /// Print the chunks the configured policy produces, without indexing
    Chunk {
        /// Document to chunk
        document: PathBuf,

        #[command(flatten)]
        models: ModelArgs,
    },
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Gemini model used for answers and query expansion
    #[arg(long, default_value = DEFAULT_CHAT_MODEL)]
    chat_model: String,

    /// Gemini model used for embeddings
    #[arg(long, default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Vector size produced by the embedding model
    #[arg(long, default_value = "768")]
    embedding_dimensions: usize,
}

impl ModelArgs {
    fn embedder(&self, api_key: &str) -> Arc<dyn EmbeddingProvider> {
        Arc::new(GeminiEmbeddingProvider::with_model(
            api_key,
            &self.embedding_model,
            self.embedding_dimensions,
        ))
    }
}

fn api_key() -> Result<String> {
    std::env::var("GOOGLE_API_KEY")
        .or_else(|_| std::env::var("GEMINI_API_KEY"))
        .context("set GOOGLE_API_KEY or GEMINI_API_KEY (a .env file works too)")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so streamed answers on stdout stay clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = RagConfig::from_env()?;

    match cli.command {
        Commands::Chat { document, rebuild, models } => {
            chat(config, document, rebuild, models).await
        }
        Commands::Chunk { document, models } => chunk(config, document, models).await,
    }
}

async fn chat(
    config: RagConfig,
    document: PathBuf,
    rebuild: bool,
    models: ModelArgs,
) -> Result<()> {
    if !document.exists() {
        bail!("document not found: {}", document.display());
    }
    let api_key = api_key()?;
    let embedder = models.embedder(&api_key);
    let llm = Arc::new(GeminiModel::with_model(&api_key, &models.chat_model));

    let registry = IndexRegistry::with_options(BuildOptions::from(&config));
    let source = DocumentChunkSource::new(
        loader_for_path(&document),
        chunker_for(&config, Arc::clone(&embedder)),
    );
    let index = if rebuild {
        registry
            .rebuild(&config.storage_dir, &config.collection_name, &source, embedder.as_ref())
            .await?
    } else {
        registry
            .get_or_build(&config.storage_dir, &config.collection_name, &source, embedder.as_ref())
            .await?
    };
    info!(collection = %config.collection_name, chunk_count = index.len(), "index ready");

    let pipeline = RagPipeline::builder()
        .config(config)
        .embedding_provider(embedder)
        .language_model(llm)
        .index(index)
        .build()?;
    let mut session = ChatSession::new(Arc::new(pipeline));

    println!("Chatting with {}. Commands: /clear, /stats, /quit", document.display());
    let mut editor = DefaultEditor::new()?;

    loop {
        let line = match editor.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        editor.add_history_entry(question)?;

        match question {
            "/quit" | "/exit" => break,
            "/clear" => {
                session.clear();
                println!("History cleared.");
            }
            "/stats" => {
                let stats = session.stats();
                println!(
                    "Total messages: {}\nUser messages: {}",
                    stats.total_messages, stats.user_messages
                );
            }
            _ => {
                print!("docchat> ");
                let result = session
                    .ask_streaming(question, |fragment| {
                        print!("{fragment}");
                        let _ = std::io::stdout().flush();
                    })
                    .await;
                println!();
                match result {
                    Ok(answer) if answer.retrieval.is_degraded() => {
                        eprintln!("(query expansion unavailable, searched the question only)");
                    }
                    Ok(_) => {}
                    Err(e) => eprintln!("Error: {e}"),
                }
            }
        }
    }

    Ok(())
}

async fn chunk(config: RagConfig, document: PathBuf, models: ModelArgs) -> Result<()> {
    let loader = loader_for_path(&document);
    let segments = loader.load().await?;

    // Fixed-size chunking never calls the embedder, so the key is only needed
    // for the semantic policy.
    let embedder = match api_key() {
        Ok(key) => models.embedder(&key),
        Err(e) if config.chunking.is_semantic() => return Err(e),
        Err(_) => models.embedder(""),
    };
    let chunker = chunker_for(&config, embedder);
    let chunks = chunker.chunk(&segments).await?;

    println!(
        "Chunked '{}' into {} chunks using the {} policy:\n",
        document.display(),
        chunks.len(),
        chunker.name()
    );
    for chunk in &chunks {
        let page = chunk.metadata.get(PAGE_KEY).map(String::as_str);
        println!(
            "--- Chunk {} ({} chars, page {}) ---",
            chunk.index + 1,
            chunk.text.chars().count(),
            page.unwrap_or("?")
        );
        let preview: String = chunk.text.chars().take(200).collect();
        let ellipsis = if chunk.text.chars().count() > 200 { "..." } else { "" };
        println!("{preview}{ellipsis}\n");
    }

    Ok(())
}
