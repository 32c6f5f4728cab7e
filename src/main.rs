//! alexandria CLI: ingest books and query the hierarchical index.
//!
//! Exit codes: 0 success, 1 partial (some books failed), 2 configuration
//! error, 3 store unreachable, 4 unrecoverable error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use alexandria::catalog::{BookCatalog, CatalogQuery};
use alexandria::chunk::BookIdentity;
use alexandria::config::AlexandriaConfig;
use alexandria::embed::{Embedder, FastembedEmbedder};
use alexandria::error::{
    AlexandriaError, ConfigError, IngestError, ManifestError, RetrievalError, StoreError,
};
use alexandria::events::{EventLog, EventType};
use alexandria::extract::{FileFormat, detect_format};
use alexandria::ingest::{BookDescriptor, Ingestor};
use alexandria::manifest::ManifestRegistry;
use alexandria::retrieval::{ContextMode, RetrievalEngine, RetrievalRequest};
use alexandria::store::{QdrantStore, VectorStore};

#[derive(Parser)]
#[command(name = "alexandria", version, about = "Hierarchical RAG for book libraries")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Target collection.
    #[arg(short = 'c', long, global = true, default_value = "books")]
    collection: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a single book file.
    Ingest {
        file: PathBuf,

        /// Catalog id of the book; looked up in the catalog when omitted.
        #[arg(long)]
        source_id: Option<i64>,

        /// Domain tag stamped on every chunk.
        #[arg(long, default_value = "general")]
        domain: String,

        /// Declared format (epub, pdf, txt, md, html); detected when omitted.
        #[arg(long)]
        format: Option<String>,
    },

    /// Ingest many files, with per-book error isolation.
    Batch {
        /// Files or directories (scanned recursively for supported formats).
        paths: Vec<PathBuf>,

        #[arg(long, default_value = "general")]
        domain: String,

        /// Skip books already in the manifest or progress file.
        #[arg(long)]
        resume: bool,
    },

    /// Semantic query against the collection.
    Query {
        text: String,

        /// precise, contextual, or comprehensive.
        #[arg(long)]
        mode: Option<String>,

        #[arg(long, default_value = "5")]
        limit: usize,

        #[arg(long)]
        domain: Option<String>,

        #[arg(long)]
        language: Option<String>,
    },

    /// Manifest maintenance.
    Manifest {
        #[command(subcommand)]
        action: ManifestAction,
    },

    /// Event log queries.
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },

    /// Read-only catalog queries (requires catalog_db in the configuration).
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Collection point counts and dimension.
    Stats,
}

#[derive(Subcommand)]
enum ManifestAction {
    /// Write the CSV report.
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Rebuild the manifest from store payloads.
    Sync,
    /// Reset the manifest if the collection vanished from the store.
    Verify,
}

#[derive(Subcommand)]
enum EventsAction {
    Recent {
        #[arg(long, default_value = "20")]
        limit: usize,
        /// ingest_start, ingest_complete, or ingest_error.
        #[arg(long)]
        event_type: Option<String>,
    },
    History {
        #[arg(long, default_value = "calibre")]
        source: String,
        source_id: i64,
    },
    Stats,
}

#[derive(Subcommand)]
enum CatalogAction {
    List,
    Search {
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },
    Stats,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("alexandria=info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            let code = exit_code_for(&err);
            eprintln!("{:?}", miette::Report::new(err));
            code
        }
    }
}

/// The store error inside an error tree, if one is there at any level.
fn store_error(err: &AlexandriaError) -> Option<&StoreError> {
    match err {
        AlexandriaError::Store(e)
        | AlexandriaError::Ingest(IngestError::Store(e))
        | AlexandriaError::Ingest(IngestError::Manifest(ManifestError::Store(e)))
        | AlexandriaError::Retrieval(RetrievalError::Store(e))
        | AlexandriaError::Manifest(ManifestError::Store(e)) => Some(e),
        _ => None,
    }
}

/// Map the typed error tree onto the CLI exit-code contract.
fn exit_code_for(err: &AlexandriaError) -> ExitCode {
    if matches!(store_error(err), Some(StoreError::Unreachable { .. })) {
        ExitCode::from(3)
    } else if matches!(err, AlexandriaError::Config(_)) {
        ExitCode::from(2)
    } else {
        ExitCode::from(4)
    }
}

struct Services {
    config: AlexandriaConfig,
    store: Arc<dyn VectorStore>,
    manifests: Arc<ManifestRegistry>,
    events: Arc<EventLog>,
}

impl Services {
    fn build(config_path: Option<&Path>) -> Result<Self, AlexandriaError> {
        let config = AlexandriaConfig::load(config_path)?;
        let mut qdrant = QdrantStore::new(config.qdrant_url());
        if let Some(key) = &config.qdrant_api_key {
            qdrant = qdrant.with_api_key(key.clone());
        }
        let store: Arc<dyn VectorStore> = Arc::new(qdrant);
        let manifests = Arc::new(ManifestRegistry::new(&config.state_dir));
        let events = Arc::new(EventLog::new(store.clone()));
        Ok(Self {
            config,
            store,
            manifests,
            events,
        })
    }

    fn embedder(&self) -> Result<Arc<dyn Embedder>, AlexandriaError> {
        let embedder = FastembedEmbedder::shared(&self.config.embedding_model)
            .map_err(AlexandriaError::Embedding)?;
        Ok(embedder)
    }

    fn ingestor(&self) -> Result<Ingestor, AlexandriaError> {
        Ok(Ingestor::new(
            self.store.clone(),
            self.embedder()?,
            self.config.clone(),
            self.manifests.clone(),
            self.events.clone(),
        ))
    }

    fn catalog(&self) -> Result<BookCatalog, AlexandriaError> {
        let db = self
            .config
            .catalog_db
            .as_ref()
            .ok_or(ConfigError::Invalid {
                message: "catalog_db is not configured".into(),
            })?;
        Ok(BookCatalog::open(db, None)?)
    }

    /// Resolve the book identity for a file: catalog lookup when available,
    /// otherwise a stable identity derived from the path.
    fn identify(
        &self,
        path: &Path,
        source_id: Option<i64>,
        domain: &str,
    ) -> Result<BookIdentity, AlexandriaError> {
        if let Some(db) = &self.config.catalog_db {
            let catalog = BookCatalog::open(db, None)?;
            let record = match source_id {
                Some(id) => Some(catalog.get_by_id(id)?),
                None => catalog.match_file_to_book(path)?,
            };
            if let Some(record) = record {
                return Ok(BookIdentity {
                    source: "calibre".into(),
                    source_id: record.source_id,
                    title: record.title,
                    authors: record.authors,
                    language: record.language,
                    domain: domain.to_string(),
                });
            }
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".into());
        Ok(BookIdentity {
            source: "file".into(),
            source_id: source_id.unwrap_or_else(|| path_id(path)),
            title: stem,
            authors: Vec::new(),
            language: String::new(),
            domain: domain.to_string(),
        })
    }
}

/// Stable id for uncataloged files: FNV-1a of the path, clamped positive.
fn path_id(path: &Path) -> i64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in path.to_string_lossy().bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash & (i64::MAX as u64)) as i64
}

fn parse_format(raw: &str) -> Result<FileFormat, AlexandriaError> {
    match raw.to_ascii_lowercase().as_str() {
        "epub" => Ok(FileFormat::Epub),
        "pdf" => Ok(FileFormat::Pdf),
        "txt" => Ok(FileFormat::Txt),
        "md" => Ok(FileFormat::Md),
        "html" => Ok(FileFormat::Html),
        other => Err(ConfigError::Invalid {
            message: format!("unknown format \"{other}\""),
        }
        .into()),
    }
}

fn parse_mode(raw: &str) -> Result<ContextMode, AlexandriaError> {
    match raw.to_ascii_lowercase().as_str() {
        "precise" => Ok(ContextMode::Precise),
        "contextual" => Ok(ContextMode::Contextual),
        "comprehensive" => Ok(ContextMode::Comprehensive),
        other => Err(ConfigError::Invalid {
            message: format!("unknown context mode \"{other}\""),
        }
        .into()),
    }
}

/// Collect ingestible files under the given paths, recursively.
fn collect_files(paths: &[PathBuf], out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for path in paths {
        if path.is_dir() {
            let children: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .collect();
            collect_files(&children, out)?;
        } else if detect_format(path).is_some() {
            out.push(path.clone());
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<ExitCode, AlexandriaError> {
    let services = Services::build(cli.config.as_deref())?;
    let collection = cli.collection;

    match cli.command {
        Commands::Ingest {
            file,
            source_id,
            domain,
            format,
        } => {
            let book = services.identify(&file, source_id, &domain)?;
            let mut descriptor = BookDescriptor::new(book, file, collection);
            descriptor.format = format.as_deref().map(parse_format).transpose()?;
            let outcome = services.ingestor()?.ingest_book(&descriptor)?;
            println!(
                "ingested \"{}\": {} parents, {} children ({})",
                descriptor.book.title,
                outcome.parent_count,
                outcome.child_count,
                outcome.chapter_strategy.id(),
            );
            Ok(ExitCode::SUCCESS)
        }

        Commands::Batch {
            paths,
            domain,
            resume,
        } => {
            let mut files = Vec::new();
            collect_files(&paths, &mut files).map_err(|e| ConfigError::Invalid {
                message: format!("cannot scan batch paths: {e}"),
            })?;
            if files.is_empty() {
                return Err(ConfigError::Invalid {
                    message: "no ingestible files found".into(),
                }
                .into());
            }

            let mut descriptors = Vec::with_capacity(files.len());
            for file in files {
                let book = services.identify(&file, None, &domain)?;
                descriptors.push(BookDescriptor::new(book, file, collection.clone()));
            }

            let report = services.ingestor()?.ingest_batch(&descriptors, resume);
            println!(
                "batch done: {} processed, {} failed, {} skipped (progress: {})",
                report.processed,
                report.failed,
                report.skipped,
                report.progress_path.display(),
            );
            if report.has_failures() {
                Ok(ExitCode::from(1))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }

        Commands::Query {
            text,
            mode,
            limit,
            domain,
            language,
        } => {
            let engine = RetrievalEngine::new(services.store.clone(), services.embedder()?);
            let mut request = RetrievalRequest::new(text, collection);
            request.limit = limit;
            request.domain_filter = domain;
            request.language_filter = language;
            request.context_mode = match mode {
                Some(raw) => parse_mode(&raw)?,
                None => services.config.hierarchy_default_mode,
            };
            request.sibling_window = services.config.hierarchy_sibling_window;
            request.max_context_tokens = services.config.hierarchy_max_context_tokens;

            let result = engine.retrieve(&request)?;
            println!("{}", result.assembled_context);
            eprintln!(
                "-- {} children, {} parents, {} sibling passages, {} tokens, {} ms{}",
                result.children.len(),
                result.parents.len(),
                result.siblings.values().map(Vec::len).sum::<usize>(),
                result.total_context_tokens,
                result.stats.total_ms,
                if result.stats.fallback_used {
                    " (fallback used)"
                } else {
                    ""
                },
            );
            Ok(ExitCode::SUCCESS)
        }

        Commands::Manifest { action } => {
            let handle = services.manifests.for_collection(&collection)?;
            let mut manifest = handle.lock().map_err(|_| {
                AlexandriaError::Manifest(ManifestError::LockContention {
                    collection: collection.clone(),
                })
            })?;
            match action {
                ManifestAction::Export { out } => {
                    let out = out.unwrap_or_else(|| {
                        services
                            .config
                            .state_dir
                            .join(format!("{collection}_manifest.csv"))
                    });
                    manifest.export_csv(&out)?;
                    println!("wrote {}", out.display());
                }
                ManifestAction::Sync => {
                    manifest.sync_from_store(services.store.as_ref())?;
                    println!(
                        "synced {} books from collection \"{collection}\"",
                        manifest.len()
                    );
                }
                ManifestAction::Verify => {
                    let exists = manifest.verify_collection_exists(services.store.as_ref())?;
                    println!(
                        "collection \"{collection}\": {}",
                        if exists { "present" } else { "missing (manifest reset)" }
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Events { action } => {
            match action {
                EventsAction::Recent { limit, event_type } => {
                    let ty = match event_type.as_deref() {
                        Some("ingest_start") => Some(EventType::IngestStart),
                        Some("ingest_complete") => Some(EventType::IngestComplete),
                        Some("ingest_error") => Some(EventType::IngestError),
                        Some(other) => {
                            return Err(ConfigError::Invalid {
                                message: format!("unknown event type \"{other}\""),
                            }
                            .into());
                        }
                        None => None,
                    };
                    for event in services.events.recent(limit, ty)? {
                        println!(
                            "{} {} {} \"{}\"",
                            event.timestamp.to_rfc3339(),
                            event.event_type.as_str(),
                            event.source_id,
                            event.title,
                        );
                    }
                }
                EventsAction::History { source, source_id } => {
                    for event in services.events.history(&source, source_id)? {
                        println!(
                            "{} {} {}",
                            event.timestamp.to_rfc3339(),
                            event.event_type.as_str(),
                            event.error_message.unwrap_or_default(),
                        );
                    }
                }
                EventsAction::Stats => {
                    let stats = services.events.stats()?;
                    println!(
                        "completed: {}  failed: {}  parents: {}  children: {}",
                        stats.books_completed,
                        stats.books_failed,
                        stats.total_parents,
                        stats.total_children,
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Catalog { action } => {
            let catalog = services.catalog()?;
            match action {
                CatalogAction::List => {
                    for book in catalog.get_all_books()? {
                        println!(
                            "{:>6}  {}  [{}]",
                            book.source_id,
                            book.title,
                            book.authors.join(", "),
                        );
                    }
                }
                CatalogAction::Search {
                    author,
                    title,
                    language,
                    format,
                    tag,
                } => {
                    let query = CatalogQuery {
                        author,
                        title,
                        language,
                        format,
                        tag,
                    };
                    for book in catalog.search(&query)? {
                        println!("{:>6}  {}", book.source_id, book.title);
                    }
                }
                CatalogAction::Stats => {
                    let stats = catalog.get_stats()?;
                    println!(
                        "books: {}  authors: {}  files: {}",
                        stats.books, stats.authors, stats.files,
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Stats => {
            let stats = services.store.stats(&collection)?;
            println!(
                "collection \"{collection}\": {} points, dimension {}",
                stats.points, stats.dimension,
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}
