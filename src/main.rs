//! # docchat CLI
//!
//! The `docchat` binary answers questions over documents stored in a
//! local workspace directory.
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat upload <path>` | Copy a document into the workspace and index it |
//! | `docchat ask "<question>"` | Answer a question (grounded or tool-assisted) |
//! | `docchat search "<query>"` | Show raw retrieval hits with scores |
//! | `docchat stats` | List indexed documents and chunk counts |
//! | `docchat delete <filename>` | Remove a document from workspace and index |
//!
//! The vector index is in-memory; every invocation re-indexes the
//! workspace at startup. Set `RUST_LOG=docchat=debug` for diagnostics.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use docchat::config;
use docchat::embedding;
use docchat::engine::{AskRequest, Engine};
use docchat::llm::OpenAiChatProvider;

/// docchat — ask questions over your documents, with citations.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "A local-first document question-answering engine",
    version,
    long_about = "docchat ingests documents (text, PDF, DOCX, PPTX, XLSX) into an \
    in-memory vector index and answers questions through an agent that cites \
    retrieved excerpts or inspects the workspace with sandboxed tools."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docchat.toml`; built-in defaults apply when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Copy a document into the workspace and index it.
    Upload {
        /// Path to the document to upload.
        path: PathBuf,
    },

    /// Ask a question over the uploaded documents.
    ///
    /// Retrieval hits above the score floor produce a grounded, cited
    /// answer; otherwise the model may use workspace tools or answer
    /// from general knowledge (labelled as such).
    Ask {
        /// The question.
        message: String,

        /// Session id for conversation memory (one process run only).
        #[arg(long, default_value = "cli")]
        session: String,

        /// Restrict retrieval to this document (by filename).
        #[arg(long)]
        document: Option<String>,
    },

    /// Show raw retrieval hits for a query, with scores.
    Search {
        /// The search query string.
        query: String,
    },

    /// List indexed documents and their chunk counts.
    Stats,

    /// Remove a document from the workspace and the index.
    Delete {
        /// Filename of the document to delete.
        filename: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docchat=warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        config::Config::default()
    };

    let embedder = embedding::create_provider(&cfg.embedding)?;
    let chat = Arc::new(OpenAiChatProvider::new(&cfg.llm)?);
    let engine = Engine::new(cfg, embedder, chat)?;

    // The index lives in memory, so each run starts by re-indexing the
    // workspace files left behind by earlier runs.
    engine.sync_workspace().await?;

    match cli.command {
        Commands::Upload { path } => {
            let filename = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("path has no filename: {}", path.display()))?
                .to_string_lossy()
                .to_string();
            let bytes = std::fs::read(&path)?;
            let receipt = engine.upload(&filename, &bytes).await?;
            println!(
                "Uploaded {} ({} chunks, id {})",
                receipt.filename, receipt.chunk_count, receipt.document_id
            );
        }

        Commands::Ask {
            message,
            session,
            document,
        } => {
            let answer = engine
                .ask(&AskRequest {
                    session_id: session,
                    message,
                    active_document: document,
                })
                .await?;

            println!("{}", answer.reply);

            if !answer.sources.is_empty() {
                println!("\nSources:");
                for source in &answer.sources {
                    let mut location = format!("lines {}-{}", source.line_start, source.line_end);
                    if let Some(page) = source.page {
                        location = format!("page {}, {}", page, location);
                    }
                    if let Some(sheet) = &source.sheet {
                        location = format!("sheet {}, {}", sheet, location);
                    }
                    println!(
                        "  {} ({}) score {:.3}",
                        source.filename, location, source.score
                    );
                }
            }
            if answer.used_general_knowledge {
                println!("\n(answered from general knowledge, not your documents)");
            }
            for call in &answer.tool_calls {
                tracing::debug!(tool = %call.name, "tool call used");
            }
        }

        Commands::Search { query } => {
            let hits = engine.search(&query).await?;
            if hits.is_empty() {
                println!("No results.");
            } else {
                for hit in hits {
                    let preview: String = hit.text.chars().take(120).collect();
                    println!(
                        "{:.3}  {} (lines {}-{}): {}",
                        hit.score,
                        hit.filename,
                        hit.line_start,
                        hit.line_end,
                        preview.replace('\n', " ")
                    );
                }
            }
        }

        Commands::Stats => {
            let docs = engine.documents();
            if docs.is_empty() {
                println!("No documents indexed.");
            } else {
                println!("{} document(s):", docs.len());
                for (id, filename, chunks) in docs {
                    println!("  {}  {} chunks  ({})", filename, chunks, id);
                }
            }
        }

        Commands::Delete { filename } => {
            if engine.delete_document(&filename)? {
                println!("Deleted {}", filename);
            } else {
                println!("No such document: {}", filename);
            }
        }
    }

    Ok(())
}
