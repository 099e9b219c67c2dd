//! # notegen CLI
//!
//! The `notegen` binary runs the study-notes service and provides
//! debugging commands for the pipeline stages.
//!
//! ## Usage
//!
//! ```bash
//! notegen --config ./config/notegen.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `notegen serve` | Start the HTTP server (`/upload`, `/chat`, `/health`) |
//! | `notegen extract <path>` | Extract text from a file and print it |
//! | `notegen ask "<question>"` | Stream a grounded answer to stdout |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use notegen::backend::{BackendService, HttpBackend, MemoryBackend};
use notegen::chat::ChatClient;
use notegen::config::{self, Credentials};
use notegen::embedding::Embedder;
use notegen::extract::{extract_text, guess_content_type};
use notegen::models::ChatStreamEvent;
use notegen::notes::NoteGenerator;
use notegen::pipeline::Pipeline;
use notegen::retrieval::{build_context, retrieve, source_names};
use notegen::server::run_server;

/// notegen — turn uploaded documents into study notes and grounded chat.
#[derive(Parser)]
#[command(
    name = "notegen",
    about = "AI study-notes pipeline: extract, chunk, embed, and chat over documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/notegen.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and serves `/upload`, `/chat`, and
    /// `/health`.
    Serve,

    /// Extract text from a local file and print it.
    ///
    /// Runs the same extraction pipeline as `/upload`, including the
    /// PDF strategy fallback chain. Useful for debugging a document
    /// that fails to ingest.
    Extract {
        /// Path to the document.
        path: PathBuf,
    },

    /// Ask a question over previously uploaded content.
    ///
    /// Embeds the question, retrieves matching chunks, and streams the
    /// answer to stdout.
    Ask {
        /// The question to ask.
        question: String,

        /// User id to retrieve chunks for.
        #[arg(long, default_value = "local-user")]
        user: String,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn build_backend(cfg: &config::Config) -> anyhow::Result<Arc<dyn BackendService>> {
    match cfg.backend.mode.as_str() {
        "http" => {
            let service_key = std::env::var("BACKEND_SERVICE_KEY")
                .map_err(|_| anyhow::anyhow!("BACKEND_SERVICE_KEY is required in http mode"))?;
            Ok(Arc::new(HttpBackend::new(&cfg.backend, service_key)?))
        }
        _ => Ok(Arc::new(MemoryBackend::new())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    // Extraction needs no config or credentials.
    if let Commands::Extract { path } = &cli.command {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let content_type = guess_content_type(&file_name);
        let text = extract_text(&bytes, content_type, &file_name)?;
        println!("{text}");
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let credentials = Credentials::from_env();

    let backend = build_backend(&cfg)?;
    let embedder = Arc::new(Embedder::new(
        &cfg.embedding,
        credentials.embedding_api_key.clone(),
    )?);
    let chat = Arc::new(ChatClient::new(
        &cfg.chat,
        credentials.chat_api_key.clone(),
    )?);
    let notes = Arc::new(NoteGenerator::new(
        &cfg.chat,
        credentials.chat_api_key.clone(),
    )?);

    match cli.command {
        Commands::Serve => {
            let pipeline = Arc::new(Pipeline::new(
                cfg.clone(),
                Arc::clone(&backend),
                Arc::clone(&embedder),
                Arc::clone(&notes),
            ));
            run_server(&cfg, backend, embedder, chat, pipeline).await?;
        }
        Commands::Ask { question, user } => {
            use futures_util::StreamExt;
            use std::io::Write;

            let query = embedder.embed(&question).await;
            let chunks = retrieve(&backend, &user, &query, &cfg.retrieval).await;
            let context = build_context(&chunks);
            let sources = source_names(&chunks);

            let mut stream = std::pin::pin!(chat.stream_answer(question, context, sources));
            let mut stdout = std::io::stdout();
            while let Some(event) = stream.next().await {
                match event {
                    ChatStreamEvent::Content { content } => {
                        print!("{content}");
                        stdout.flush()?;
                    }
                    ChatStreamEvent::Error { error } => {
                        eprintln!("\nerror: {error}");
                    }
                    ChatStreamEvent::Sources { sources } => {
                        if !sources.is_empty() {
                            println!("\n\nSources: {}", sources.join(", "));
                        } else {
                            println!();
                        }
                    }
                }
            }
        }
        Commands::Extract { .. } => unreachable!(),
    }

    Ok(())
}
