//! Per-collection ingest manifest: the idempotency and resumability ledger.
//!
//! One JSON file per collection (`{collection}_manifest.json`) lists every
//! ingested book with its counts and provenance. Writes are atomic
//! (temp file + rename) so readers never observe a half-written manifest, and
//! a corrupt file is salvaged entry-by-entry with the original quarantined
//! next to it; valid data is never silently overwritten.
//!
//! [`ManifestRegistry`] hands out one mutex-guarded manifest per collection,
//! making the single-writer rule a property of the process, not a convention.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::chunk::{keys, source_id_field, str_field};
use crate::error::{ManifestError, ManifestResult};
use crate::store::{Filter, VectorStore};

/// Scroll page size used when rebuilding from the store.
const SYNC_PAGE: usize = 10_000;

/// One ingested book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestBook {
    pub source: String,
    pub source_id: i64,
    pub file_path: String,
    pub title: String,
    pub authors: Vec<String>,
    pub language: String,
    pub format: String,
    pub domain: String,
    pub parent_count: usize,
    pub child_count: usize,
    pub bytes: u64,
    pub ingested_at: DateTime<Utc>,
    pub ingest_version: String,
    pub embedding_model: String,
    pub chunking_strategy: String,
}

/// Aggregate counters over all books.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ManifestTotals {
    pub parents: usize,
    pub children: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestData {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    totals: ManifestTotals,
    books: Vec<ManifestBook>,
}

impl ManifestData {
    fn fresh() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            totals: ManifestTotals::default(),
            books: Vec::new(),
        }
    }

    fn recompute_totals(&mut self) {
        self.totals = self.books.iter().fold(ManifestTotals::default(), |mut t, b| {
            t.parents += b.parent_count;
            t.children += b.child_count;
            t.bytes += b.bytes;
            t
        });
    }
}

/// The manifest for one collection.
#[derive(Debug)]
pub struct CollectionManifest {
    collection: String,
    path: PathBuf,
    data: ManifestData,
}

impl CollectionManifest {
    /// Open or create the manifest for `collection` under `state_dir`.
    ///
    /// A file that fails to parse is quarantined and salvaged: entries that
    /// still deserialize are kept, the unreadable original is renamed to
    /// `*.corrupt-<timestamp>`.
    pub fn open(state_dir: &Path, collection: &str) -> ManifestResult<Self> {
        let path = state_dir.join(format!("{collection}_manifest.json"));

        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
                path: path.clone(),
                source,
            })?;
            match serde_json::from_str::<ManifestData>(&raw) {
                Ok(data) => data,
                Err(parse_err) => salvage(&path, &raw, &parse_err.to_string())?,
            }
        } else {
            ManifestData::fresh()
        };

        Ok(Self {
            collection: collection.to_string(),
            path,
            data,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether a book is already recorded.
    pub fn is_ingested(&self, source: &str, source_id: i64) -> bool {
        self.data
            .books
            .iter()
            .any(|b| b.source == source && b.source_id == source_id)
    }

    pub fn get(&self, source: &str, source_id: i64) -> Option<&ManifestBook> {
        self.data
            .books
            .iter()
            .find(|b| b.source == source && b.source_id == source_id)
    }

    pub fn books(&self) -> &[ManifestBook] {
        &self.data.books
    }

    pub fn totals(&self) -> ManifestTotals {
        self.data.totals
    }

    pub fn len(&self) -> usize {
        self.data.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.books.is_empty()
    }

    /// Record a book, replacing any previous entry with the same
    /// `(source, source_id)` key, and persist atomically.
    pub fn log_book(&mut self, book: ManifestBook) -> ManifestResult<()> {
        self.data
            .books
            .retain(|b| !(b.source == book.source && b.source_id == book.source_id));
        self.data.books.push(book);
        self.write()
    }

    /// Remove a book entry, mirroring deletion in the store. Returns the
    /// removed entry if one existed.
    pub fn remove_book(
        &mut self,
        source: &str,
        source_id: i64,
    ) -> ManifestResult<Option<ManifestBook>> {
        let before = self.data.books.len();
        let removed = self
            .data
            .books
            .iter()
            .position(|b| b.source == source && b.source_id == source_id)
            .map(|pos| self.data.books.remove(pos));
        if self.data.books.len() != before {
            self.write()?;
        }
        Ok(removed)
    }

    /// Export the fixed-schema CSV report.
    pub fn export_csv(&self, path: &Path) -> ManifestResult<()> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| ManifestError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other(e.to_string()),
        })?;
        writer
            .write_record([
                "source",
                "source_id",
                "title",
                "authors",
                "language",
                "format",
                "domain",
                "file_path",
                "parent_count",
                "child_count",
                "bytes",
                "ingested_at",
                "ingest_version",
                "embedding_model",
                "chunking_strategy",
            ])
            .and_then(|()| {
                for book in &self.data.books {
                    writer.write_record([
                        book.source.as_str(),
                        &book.source_id.to_string(),
                        book.title.as_str(),
                        &book.authors.join("; "),
                        book.language.as_str(),
                        book.format.as_str(),
                        book.domain.as_str(),
                        book.file_path.as_str(),
                        &book.parent_count.to_string(),
                        &book.child_count.to_string(),
                        &book.bytes.to_string(),
                        &book.ingested_at.to_rfc3339(),
                        book.ingest_version.as_str(),
                        book.embedding_model.as_str(),
                        book.chunking_strategy.as_str(),
                    ])?;
                }
                writer.flush().map_err(csv::Error::from)
            })
            .map_err(|e| ManifestError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::other(e.to_string()),
            })
    }

    /// Rebuild the ledger from store payloads after the file was lost.
    ///
    /// Recovers per-book counts and provenance, but not file paths or byte
    /// sizes, which exist only on disk at ingest time.
    pub fn sync_from_store(&mut self, store: &dyn VectorStore) -> ManifestResult<()> {
        use std::collections::BTreeMap;

        let mut rebuilt: BTreeMap<(String, i64), ManifestBook> = BTreeMap::new();

        for (level, is_parent) in [
            (crate::chunk::LEVEL_PARENT, true),
            (crate::chunk::LEVEL_CHILD, false),
        ] {
            let page = store.scroll(
                &self.collection,
                &Filter::new().match_str(keys::CHUNK_LEVEL, level),
                SYNC_PAGE,
            )?;
            for point in page {
                let payload = &point.payload;
                let Some(source) = str_field(payload, keys::SOURCE) else {
                    continue;
                };
                let Some(source_id) = source_id_field(payload) else {
                    continue;
                };
                let entry = rebuilt
                    .entry((source.to_string(), source_id))
                    .or_insert_with(|| ManifestBook {
                        source: source.to_string(),
                        source_id,
                        file_path: String::new(),
                        title: str_field(payload, keys::BOOK_TITLE)
                            .unwrap_or_default()
                            .to_string(),
                        authors: payload
                            .get(keys::AUTHORS)
                            .and_then(|v| v.as_array())
                            .map(|a| {
                                a.iter()
                                    .filter_map(|v| v.as_str().map(str::to_string))
                                    .collect()
                            })
                            .unwrap_or_default(),
                        language: str_field(payload, keys::LANGUAGE)
                            .unwrap_or_default()
                            .to_string(),
                        format: String::new(),
                        domain: str_field(payload, keys::DOMAIN)
                            .unwrap_or_default()
                            .to_string(),
                        parent_count: 0,
                        child_count: 0,
                        bytes: 0,
                        ingested_at: str_field(payload, keys::INGESTED_AT)
                            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                            .map(|t| t.with_timezone(&Utc))
                            .unwrap_or_else(Utc::now),
                        ingest_version: str_field(payload, keys::INGEST_VERSION)
                            .unwrap_or_default()
                            .to_string(),
                        embedding_model: str_field(payload, keys::EMBEDDING_MODEL)
                            .unwrap_or_default()
                            .to_string(),
                        chunking_strategy: str_field(payload, keys::CHUNKING_STRATEGY)
                            .unwrap_or_default()
                            .to_string(),
                    });
                if is_parent {
                    entry.parent_count += 1;
                } else {
                    entry.child_count += 1;
                }
            }
        }

        self.data.books = rebuilt.into_values().collect();
        self.write()
    }

    /// Check the collection still exists in the store; if it does not, the
    /// manifest is stale by definition and resets to empty rather than lying.
    pub fn verify_collection_exists(&mut self, store: &dyn VectorStore) -> ManifestResult<bool> {
        if store.collection_exists(&self.collection)? {
            return Ok(true);
        }
        if !self.data.books.is_empty() {
            tracing::warn!(
                collection = %self.collection,
                books = self.data.books.len(),
                "collection missing from store; resetting manifest"
            );
            self.data.books.clear();
            self.write()?;
        }
        Ok(false)
    }

    /// Atomic write: serialize to a temp file in the same directory, then
    /// rename over the target.
    fn write(&mut self) -> ManifestResult<()> {
        self.data.updated_at = Utc::now();
        self.data.recompute_totals();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ManifestError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(&self.data).map_err(|e| ManifestError::Io {
            path: self.path.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|source| ManifestError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| ManifestError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Quarantine an unreadable manifest and keep whatever entries still parse.
fn salvage(path: &Path, raw: &str, parse_err: &str) -> ManifestResult<ManifestData> {
    let quarantine = path.with_extension(format!("json.corrupt-{}", Utc::now().timestamp()));
    std::fs::copy(path, &quarantine).map_err(|source| ManifestError::Io {
        path: quarantine.clone(),
        source,
    })?;
    tracing::warn!(
        path = %path.display(),
        quarantine = %quarantine.display(),
        error = parse_err,
        "manifest corrupt; quarantined and salvaging entries"
    );

    let mut data = ManifestData::fresh();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        if let Some(books) = value.get("books").and_then(|b| b.as_array()) {
            for book in books {
                if let Ok(book) = serde_json::from_value::<ManifestBook>(book.clone()) {
                    data.books.push(book);
                }
            }
        }
        if let Some(created) = value
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            data.created_at = created.with_timezone(&Utc);
        }
    }
    data.recompute_totals();

    if data.books.is_empty() {
        tracing::warn!(path = %path.display(), "no manifest entries salvaged");
    }
    Ok(data)
}

// ---------------------------------------------------------------------------
// Registry: one serialized writer per collection
// ---------------------------------------------------------------------------

/// Process-wide registry of open manifests, one lock per collection.
#[derive(Debug)]
pub struct ManifestRegistry {
    state_dir: PathBuf,
    manifests: DashMap<String, Arc<Mutex<CollectionManifest>>>,
}

impl ManifestRegistry {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            manifests: DashMap::new(),
        }
    }

    /// Manifest handle for a collection, opened on first use.
    pub fn for_collection(
        &self,
        collection: &str,
    ) -> ManifestResult<Arc<Mutex<CollectionManifest>>> {
        if let Some(existing) = self.manifests.get(collection) {
            return Ok(Arc::clone(&existing));
        }
        let manifest = CollectionManifest::open(&self.state_dir, collection)?;
        let handle = Arc::new(Mutex::new(manifest));
        self.manifests
            .insert(collection.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}
