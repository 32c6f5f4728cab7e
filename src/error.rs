//! Rich diagnostic error types for the alexandria core.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so operators know exactly
//! what went wrong and how to fix it. Expected failures are typed values; panics
//! are reserved for broken invariants.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the alexandria core.
///
/// Each variant wraps a subsystem-specific error, preserving the full
/// diagnostic chain (error codes, help text, sources) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum AlexandriaError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Chunking(#[from] ChunkingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

/// Convenience alias for functions returning alexandria results.
pub type AlexandriaResult<T> = std::result::Result<T, AlexandriaError>;

// ---------------------------------------------------------------------------
// Extraction errors (text extractor)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ExtractionError {
    #[error("corrupted {format} file: {path}")]
    #[diagnostic(
        code(alexandria::extract::corrupted),
        help(
            "The file could not be parsed as {format}. Verify it opens in a \
             regular reader and is not truncated."
        )
    )]
    Corrupted {
        path: PathBuf,
        format: String,
        message: String,
    },

    #[error("encrypted document: {path}")]
    #[diagnostic(
        code(alexandria::extract::encrypted),
        help(
            "The file is password-protected or DRM-encrypted. Remove the \
             protection with the owning application before ingesting; \
             alexandria reports encryption, it does not break it."
        )
    )]
    Encrypted { path: PathBuf },

    #[error("unsupported format for {path}")]
    #[diagnostic(
        code(alexandria::extract::unsupported),
        help(
            "Supported formats are: epub, pdf, txt, md, and html. If the file \
             uses an unusual extension, pass the format explicitly."
        )
    )]
    Unsupported { path: PathBuf },

    #[error("decode failure in {path}: {message}")]
    #[diagnostic(
        code(alexandria::extract::decode),
        help(
            "The file's text could not be decoded. Plain text falls back to \
             UTF-8 with replacement characters; binary formats must decode \
             cleanly."
        )
    )]
    DecodeFailure { path: PathBuf, message: String },

    #[error("I/O error reading {path}: {source}")]
    #[diagnostic(
        code(alexandria::extract::io),
        help("Check that the path exists and is readable.")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ExtractResult<T> = std::result::Result<T, ExtractionError>;

// ---------------------------------------------------------------------------
// Chunking errors (semantic chunker)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ChunkingError {
    #[error("empty input: nothing to chunk")]
    #[diagnostic(
        code(alexandria::chunk::empty_input),
        help("The text contained no sentences after splitting.")
    )]
    EmptyInput,

    #[error("embedding count mismatch: {sentences} sentences, {embeddings} embeddings")]
    #[diagnostic(
        code(alexandria::chunk::embedding_mismatch),
        help(
            "The embedding service returned a different number of vectors than \
             sentences submitted. This indicates a bug in the embedder, not in \
             the input."
        )
    )]
    EmbeddingMismatch {
        sentences: usize,
        embeddings: usize,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Embedding(#[from] EmbeddingError),
}

pub type ChunkResult<T> = std::result::Result<T, ChunkingError>;

// ---------------------------------------------------------------------------
// Embedding errors (embedding service)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EmbeddingError {
    #[error("embedding model \"{model}\" failed to load: {message}")]
    #[diagnostic(
        code(alexandria::embed::model_load),
        help(
            "The ONNX model could not be initialized. Check that the model id \
             is one fastembed supports and that the model cache directory is \
             writable (first use downloads the weights)."
        )
    )]
    ModelLoad { model: String, message: String },

    #[error("embedding inference failed: {message}")]
    #[diagnostic(
        code(alexandria::embed::inference),
        help("Batch inference failed mid-run. Retry the operation; if it persists, reduce batch sizes.")
    )]
    Inference { message: String },

    #[error("unknown embedding model id: \"{model}\"")]
    #[diagnostic(
        code(alexandria::embed::unknown_model),
        help("Use one of the model codes fastembed ships, or keep the default.")
    )]
    UnknownModel { model: String },
}

pub type EmbedResult<T> = std::result::Result<T, EmbeddingError>;

// ---------------------------------------------------------------------------
// Store errors (vector store adapter)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("vector store unreachable at {endpoint}: {message}")]
    #[diagnostic(
        code(alexandria::store::unreachable),
        help(
            "Could not connect to the vector store. Check that Qdrant is \
             running and that qdrant_host/qdrant_port in the configuration \
             point at it."
        )
    )]
    Unreachable { endpoint: String, message: String },

    #[error("vector store timeout during {operation}")]
    #[diagnostic(
        code(alexandria::store::timeout),
        help(
            "The operation exceeded its deadline. The store may be overloaded; \
             transient timeouts are retried automatically up to 3 times."
        )
    )]
    Timeout { operation: String },

    #[error(
        "dimension mismatch for collection \"{collection}\": stored {stored}, requested {requested}"
    )]
    #[diagnostic(
        code(alexandria::store::dim_mismatch),
        help(
            "The collection was created with a different embedding dimension. \
             A collection is bound to one model; re-create it or switch back to \
             the original embedding_model."
        )
    )]
    DimensionMismatch {
        collection: String,
        stored: usize,
        requested: usize,
    },

    #[error("collection not found: \"{collection}\"")]
    #[diagnostic(
        code(alexandria::store::not_found),
        help("Create the collection by ingesting at least one book into it.")
    )]
    NotFound { collection: String },

    #[error("vector store rejected the request: {message}")]
    #[diagnostic(
        code(alexandria::store::bad_request),
        help("The store returned a client error. This usually indicates a malformed filter or payload.")
    )]
    BadRequest { message: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Manifest errors (collection manifest)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    #[error("corrupt manifest at {path}")]
    #[diagnostic(
        code(alexandria::manifest::corrupted),
        help(
            "The manifest file failed to parse. A quarantine backup was written \
             next to it and salvageable entries were kept; valid data is never \
             silently overwritten."
        )
    )]
    Corrupted { path: PathBuf, message: String },

    #[error("manifest I/O error at {path}: {source}")]
    #[diagnostic(
        code(alexandria::manifest::io),
        help("Check directory permissions and free disk space for the state directory.")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest lock contention for collection \"{collection}\"")]
    #[diagnostic(
        code(alexandria::manifest::lock),
        help(
            "The manifest lock was poisoned by a panicked worker. Restart the \
             process; the on-disk manifest is never left half-written."
        )
    )]
    LockContention { collection: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

pub type ManifestResult<T> = std::result::Result<T, ManifestError>;

// ---------------------------------------------------------------------------
// Ingest errors (orchestrator)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Chunking(#[from] ChunkingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Manifest(#[from] ManifestError),

    #[error("book produced no sections: {path}")]
    #[diagnostic(
        code(alexandria::ingest::no_sections),
        help(
            "Extraction succeeded but no usable section survived whitespace \
             normalization. The file may contain only images or markup."
        )
    )]
    NoSections { path: PathBuf },
}

impl IngestError {
    /// Short machine-readable kind, recorded in events and progress files.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Extraction(ExtractionError::Encrypted { .. }) => "encrypted",
            Self::Extraction(ExtractionError::Unsupported { .. }) => "unsupported",
            Self::Extraction(ExtractionError::Corrupted { .. }) => "corrupted",
            Self::Extraction(_) => "extraction",
            Self::Chunking(_) => "chunking",
            Self::Embedding(_) => "embedding",
            Self::Store(StoreError::Timeout { .. }) => "store_timeout",
            Self::Store(StoreError::Unreachable { .. }) => "store_unreachable",
            Self::Store(_) => "store",
            Self::Manifest(_) => "manifest",
            Self::NoSections { .. } => "no_sections",
        }
    }
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;

// ---------------------------------------------------------------------------
// Retrieval errors (retrieval engine)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RetrievalError {
    #[error("unknown collection: \"{collection}\"")]
    #[diagnostic(
        code(alexandria::retrieval::unknown_collection),
        help("The collection does not exist in the vector store. Ingest into it first, or check the name.")
    )]
    UnknownCollection { collection: String },

    #[error("embedding service unavailable: {message}")]
    #[diagnostic(
        code(alexandria::retrieval::embedding_unavailable),
        help("The query could not be embedded because the model failed to load. See the inner message.")
    )]
    EmbeddingUnavailable { message: String },

    #[error("invalid retrieval filter: {message}")]
    #[diagnostic(
        code(alexandria::retrieval::invalid_filter),
        help("Check domain_filter/language_filter values; they must be plain payload strings.")
    )]
    InvalidFilter { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

pub type RetrieveResult<T> = std::result::Result<T, RetrievalError>;

// ---------------------------------------------------------------------------
// Catalog errors (book catalog adapter)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("catalog database not found: {path}")]
    #[diagnostic(
        code(alexandria::catalog::not_found),
        help("Point catalog_db at the library's metadata.db file.")
    )]
    DbNotFound { path: PathBuf },

    #[error("catalog query failed: {message}")]
    #[diagnostic(
        code(alexandria::catalog::query),
        help(
            "The read-only catalog query failed. The owning application may \
             have changed the schema, or the database stayed locked beyond the \
             retry budget."
        )
    )]
    Query { message: String },

    #[error("no catalog entry for source_id {source_id}")]
    #[diagnostic(
        code(alexandria::catalog::unknown_book),
        help("The book id is not present in the catalog. List books with `alexandria catalog list`.")
    )]
    UnknownBook { source_id: i64 },
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    #[diagnostic(
        code(alexandria::config::read),
        help("Check that the path exists and is readable.")
    )]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration parse error in {path}: {message}")]
    #[diagnostic(
        code(alexandria::config::parse),
        help("The file must be valid TOML with recognized option names.")
    )]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(alexandria::config::invalid),
        help("Check the option ranges: thresholds lie in [0.0, 1.0], sizes and windows are >= 1.")
    )]
    Invalid { message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
