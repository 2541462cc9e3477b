//! # docvault CLI (`dv`)
//!
//! The `dv` binary manages an encrypted, on-device document vault: ingest
//! text/Markdown/PDF files, search them by similarity, assemble grounded
//! prompts for a local model, and group documents into sessions.
//!
//! ## Usage
//!
//! ```bash
//! dv --config ./config/dv.toml --passphrase <pw> <command>
//! ```
//!
//! The passphrase may also be supplied via the `DV_PASSPHRASE` environment
//! variable. It is never stored; losing it means losing the vault contents.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dv init` | Create the vault file and its schema |
//! | `dv add <file>` | Ingest a text, Markdown, or PDF file |
//! | `dv list` | List stored documents |
//! | `dv remove <id>` | Delete a document and its chunks |
//! | `dv search "<query>"` | Rank chunks by similarity to a query |
//! | `dv ask "<question>"` | Retrieve context and print the grounded prompt |
//! | `dv session <subcommand>` | Manage document sessions |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use docvault::config::{load_config, AppConfig};
use docvault::embedding::{EmbeddingProvider, HashEmbedder, NullProvider};
use docvault::extract::{extract_pdf, is_empty_extraction};
use docvault::models::NewDocument;
use docvault::pipeline::{IngestEvent, IngestPipeline};
use docvault::retrieve::{format_context_for_prompt, Retriever};
use docvault::store::{DocumentStore, StoreConfig};

/// docvault — a private, on-device document knowledge store for
/// retrieval-augmented generation.
#[derive(Parser)]
#[command(
    name = "dv",
    about = "docvault — an encrypted, on-device document store with similarity retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file falls back to
    /// defaults with the vault at ./vault.db.
    #[arg(long, global = true, default_value = "./config/dv.toml")]
    config: PathBuf,

    /// Vault passphrase. Falls back to the DV_PASSPHRASE environment
    /// variable.
    #[arg(long, global = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vault file and its schema. Idempotent.
    Init,

    /// Ingest a file. Text and Markdown are ingested as-is; PDFs go through
    /// text extraction first.
    Add {
        /// File to ingest.
        file: PathBuf,
        /// Source label stored with the document; defaults to the file name.
        #[arg(long)]
        source: Option<String>,
    },

    /// List stored documents.
    List,

    /// Delete a document and everything derived from it.
    Remove {
        /// Document id.
        id: String,
    },

    /// Rank chunks by similarity to a query.
    Search {
        query: String,
        /// Maximum number of hits.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Retrieve context for a question and print the grounded prompt a
    /// local model would receive.
    Ask {
        question: String,
    },

    /// Manage document sessions.
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Create a session.
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List sessions.
    List,
    /// Delete a session. Member documents are kept.
    Delete { id: String },
    /// Add a document to a session.
    Add {
        session_id: String,
        document_id: String,
    },
    /// Remove a document from a session.
    Remove {
        session_id: String,
        document_id: String,
    },
    /// Show a session's documents.
    Show { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        AppConfig::default()
    };

    let passphrase = match cli.passphrase {
        Some(p) => p,
        None => std::env::var("DV_PASSPHRASE")
            .context("No passphrase: pass --passphrase or set DV_PASSPHRASE")?,
    };

    let embedder: Arc<dyn EmbeddingProvider> = if config.embedding.is_enabled() {
        Arc::new(HashEmbedder::new(config.embedding.dims))
    } else {
        Arc::new(NullProvider)
    };

    let store_config = StoreConfig {
        dims: embedder.dims(),
        require_index: config.vault.require_index,
    };
    let store = Arc::new(
        DocumentStore::open(&config.vault.path, &passphrase, &store_config).await?,
    );

    match cli.command {
        Commands::Init => {
            println!("Vault ready at {}", config.vault.path.display());
            if store.is_degraded() {
                println!("Note: similarity index unavailable; search is disabled.");
            }
        }

        Commands::Add { file, source } => {
            let source = source.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string())
            });

            let (content, metadata) = read_input(&file)?;
            let pipeline = IngestPipeline::new(
                Arc::clone(&store),
                Arc::clone(&embedder),
                config.chunking.clone(),
            );

            let mut rx = pipeline.ingest(NewDocument {
                content,
                source,
                metadata,
            });
            while let Some(event) = rx.recv().await {
                match event {
                    IngestEvent::Reading => eprintln!("reading..."),
                    IngestEvent::Chunking => eprintln!("chunking..."),
                    IngestEvent::Embedding { current, total } => {
                        eprintln!("embedding chunk {}/{}", current, total)
                    }
                    IngestEvent::Storing => eprintln!("storing..."),
                    IngestEvent::Complete {
                        document_id,
                        chunk_count,
                        duration_ms,
                    } => {
                        println!(
                            "Stored {} ({} chunks, {} ms)",
                            document_id, chunk_count, duration_ms
                        );
                    }
                    IngestEvent::Error(e) => anyhow::bail!("ingestion failed: {}", e),
                }
            }
        }

        Commands::List => {
            let docs = store.list_documents().await?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for doc in docs {
                println!("{}  {}  ({} chunks)", doc.id, doc.source, doc.chunk_count);
            }
        }

        Commands::Remove { id } => {
            if store.remove_document(&id).await? {
                println!("Removed {}", id);
            } else {
                anyhow::bail!("No document with id {}", id);
            }
        }

        Commands::Search { query, limit } => {
            let query_vec = embedder.embed(&query).await?;
            let hits = store
                .search_similar(&query_vec, limit, config.retrieval.min_score)
                .await?;
            if hits.is_empty() {
                println!("No matches.");
            }
            for hit in hits {
                println!(
                    "{:.0}%  {}#{}  {}",
                    hit.score * 100.0,
                    hit.source,
                    hit.ordinal,
                    first_line(&hit.text)
                );
            }
        }

        Commands::Ask { question } => {
            let retriever = Retriever::new(Arc::clone(&store), Arc::clone(&embedder));
            let context = retriever.retrieve_context(&question, &config.retrieval).await;
            if context.is_empty() {
                println!("No relevant context in the vault.");
            } else {
                println!("{}", format_context_for_prompt(&context));
                eprintln!(
                    "({} chunks from {} candidates, {} ms)",
                    context.chunks.len(),
                    context.total_candidates,
                    context.elapsed_ms
                );
            }
        }

        Commands::Session { command } => match command {
            SessionCommands::Create { name, description } => {
                let session = store
                    .create_session(&name, description.as_deref())
                    .await?;
                println!("Created session {}", session.id);
            }
            SessionCommands::List => {
                let sessions = store.list_sessions().await?;
                if sessions.is_empty() {
                    println!("No sessions.");
                }
                for s in sessions {
                    println!(
                        "{}  {}{}",
                        s.id,
                        s.name,
                        s.description
                            .map(|d| format!("  ({})", d))
                            .unwrap_or_default()
                    );
                }
            }
            SessionCommands::Delete { id } => {
                if store.delete_session(&id).await? {
                    println!("Deleted session {} (documents kept)", id);
                } else {
                    anyhow::bail!("No session with id {}", id);
                }
            }
            SessionCommands::Add {
                session_id,
                document_id,
            } => {
                store
                    .add_document_to_session(&session_id, &document_id)
                    .await?;
                println!("Added {} to {}", document_id, session_id);
            }
            SessionCommands::Remove {
                session_id,
                document_id,
            } => {
                if store
                    .remove_document_from_session(&session_id, &document_id)
                    .await?
                {
                    println!("Removed {} from {}", document_id, session_id);
                } else {
                    anyhow::bail!("Document {} is not in session {}", document_id, session_id);
                }
            }
            SessionCommands::Show { id } => {
                let docs = store.session_documents(&id).await?;
                if docs.is_empty() {
                    println!("Session is empty.");
                }
                for doc in docs {
                    println!("{}  {}", doc.id, doc.source);
                }
            }
        },
    }

    Ok(())
}

/// Read a file for ingestion, extracting text from PDFs.
fn read_input(path: &PathBuf) -> Result<(String, serde_json::Value)> {
    let is_pdf = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    if is_pdf {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let extracted = extract_pdf(&bytes)?;
        if is_empty_extraction(&extracted) {
            anyhow::bail!(
                "{} has no extractable text (scanned PDF without a text layer?)",
                path.display()
            );
        }
        Ok((extracted.text, extracted.metadata))
    } else {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok((content, serde_json::json!({ "format": "text" })))
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
