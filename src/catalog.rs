//! Read-only book catalog adapter over a Calibre-style `metadata.db`.
//!
//! The catalog is owned by another application; alexandria opens it
//! `SQLITE_OPEN_READ_ONLY` on a single connection and never writes. The
//! owning application may hold read locks, so every query retries briefly on
//! `database is locked` before surfacing a typed error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::error::{CatalogError, CatalogResult};
use crate::extract::{FileFormat, detect_format};

/// Lock-retry schedule: three short waits, then give up.
const LOCK_RETRIES: u32 = 3;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One physical file of a book.
#[derive(Debug, Clone)]
pub struct BookFile {
    pub path: PathBuf,
    /// Catalog format tag (`EPUB`, `PDF`, ...), mapped where possible.
    pub format: Option<FileFormat>,
}

/// A catalog book record.
#[derive(Debug, Clone)]
pub struct BookRecord {
    pub source_id: i64,
    pub title: String,
    /// Ordered author list.
    pub authors: Vec<String>,
    pub language: String,
    pub tags: Vec<String>,
    pub files: Vec<BookFile>,
}

impl BookRecord {
    /// First file in a format alexandria can ingest.
    pub fn ingestible_file(&self) -> Option<&BookFile> {
        self.files.iter().find(|f| f.format.is_some())
    }
}

/// Optional search constraints; all present fields must match.
#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    pub author: Option<String>,
    pub title: Option<String>,
    pub language: Option<String>,
    pub format: Option<String>,
    pub tag: Option<String>,
}

/// Catalog-wide counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogStats {
    pub books: u64,
    pub authors: u64,
    pub files: u64,
}

/// Read-only catalog connection.
pub struct BookCatalog {
    conn: Connection,
    library_root: PathBuf,
}

impl std::fmt::Debug for BookCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookCatalog")
            .field("library_root", &self.library_root)
            .finish_non_exhaustive()
    }
}

fn is_locked(err: &rusqlite::Error) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("locked") || message.contains("busy")
}

fn with_lock_retry<T>(mut call: impl FnMut() -> rusqlite::Result<T>) -> CatalogResult<T> {
    let mut attempt = 0;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(err) if is_locked(&err) && attempt < LOCK_RETRIES => {
                attempt += 1;
                tracing::debug!(attempt, "catalog locked, retrying");
                std::thread::sleep(LOCK_RETRY_DELAY);
            }
            Err(err) => {
                return Err(CatalogError::Query {
                    message: err.to_string(),
                });
            }
        }
    }
}

impl BookCatalog {
    /// Open `metadata.db`. `library_root` is the directory the catalog's
    /// relative book paths resolve against (usually the db's parent).
    pub fn open(db_path: &Path, library_root: Option<&Path>) -> CatalogResult<Self> {
        if !db_path.exists() {
            return Err(CatalogError::DbNotFound {
                path: db_path.to_path_buf(),
            });
        }
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| CatalogError::Query {
            message: e.to_string(),
        })?;
        conn.busy_timeout(Duration::from_millis(250))
            .map_err(|e| CatalogError::Query {
                message: e.to_string(),
            })?;

        let library_root = library_root
            .map(Path::to_path_buf)
            .or_else(|| db_path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self { conn, library_root })
    }

    /// All books, ordered by id.
    pub fn get_all_books(&self) -> CatalogResult<Vec<BookRecord>> {
        self.query_books(None)
    }

    /// Books matching the query constraints.
    pub fn search(&self, query: &CatalogQuery) -> CatalogResult<Vec<BookRecord>> {
        let all = self.query_books(None)?;
        let matches = |haystack: &str, needle: &Option<String>| {
            needle
                .as_ref()
                .is_none_or(|n| haystack.to_lowercase().contains(&n.to_lowercase()))
        };
        Ok(all
            .into_iter()
            .filter(|book| {
                matches(&book.title, &query.title)
                    && query.author.as_ref().is_none_or(|a| {
                        book.authors
                            .iter()
                            .any(|name| name.to_lowercase().contains(&a.to_lowercase()))
                    })
                    && matches(&book.language, &query.language)
                    && query.tag.as_ref().is_none_or(|t| {
                        book.tags
                            .iter()
                            .any(|tag| tag.eq_ignore_ascii_case(t))
                    })
                    && query.format.as_ref().is_none_or(|f| {
                        book.files.iter().any(|file| {
                            file.format
                                .map(|ff| ff.as_str().eq_ignore_ascii_case(f))
                                .unwrap_or(false)
                        })
                    })
            })
            .collect())
    }

    /// Single book by id.
    pub fn get_by_id(&self, source_id: i64) -> CatalogResult<BookRecord> {
        self.query_books(Some(source_id))?
            .into_iter()
            .next()
            .ok_or(CatalogError::UnknownBook { source_id })
    }

    /// Find the book owning a physical file, by exact path or file name.
    pub fn match_file_to_book(&self, path: &Path) -> CatalogResult<Option<BookRecord>> {
        let needle_name = path.file_name().map(|n| n.to_string_lossy().to_lowercase());
        for book in self.get_all_books()? {
            for file in &book.files {
                if file.path == path {
                    return Ok(Some(book));
                }
                if let (Some(needle), Some(candidate)) = (&needle_name, file.path.file_name()) {
                    if candidate.to_string_lossy().to_lowercase() == *needle {
                        return Ok(Some(book));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Catalog-wide counts.
    pub fn get_stats(&self) -> CatalogResult<CatalogStats> {
        let count = |sql: &str| -> CatalogResult<u64> {
            with_lock_retry(|| {
                self.conn
                    .query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
            })
        };
        Ok(CatalogStats {
            books: count("SELECT COUNT(*) FROM books")?,
            authors: count("SELECT COUNT(*) FROM authors")?,
            files: count("SELECT COUNT(*) FROM data")?,
        })
    }

    fn query_books(&self, only_id: Option<i64>) -> CatalogResult<Vec<BookRecord>> {
        // Files first: one pass over `data`, grouped by book id.
        let mut files_by_book: HashMap<i64, Vec<BookFile>> = HashMap::new();
        with_lock_retry(|| {
            let mut stmt = self
                .conn
                .prepare("SELECT book, format, name FROM data ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            files_by_book.clear();
            for row in rows {
                let (book, format, name) = row?;
                files_by_book.entry(book).or_default().push(BookFile {
                    // Populated after the books query joins in `path`.
                    path: PathBuf::from(format!("{name}.{}", format.to_lowercase())),
                    format: detect_format(Path::new(&format!(
                        "x.{}",
                        format.to_lowercase()
                    ))),
                });
            }
            Ok(())
        })?;

        let sql = format!(
            "SELECT b.id, b.title, b.path, \
             (SELECT group_concat(a.name, '|') \
              FROM books_authors_link l JOIN authors a ON a.id = l.author \
              WHERE l.book = b.id), \
             (SELECT lg.lang_code \
              FROM books_languages_link bl JOIN languages lg ON lg.id = bl.lang_code \
              WHERE bl.book = b.id LIMIT 1), \
             (SELECT group_concat(t.name, '|') \
              FROM books_tags_link tl JOIN tags t ON t.id = tl.tag \
              WHERE tl.book = b.id) \
             FROM books b {} ORDER BY b.id",
            if only_id.is_some() { "WHERE b.id = ?1" } else { "" }
        );

        with_lock_retry(|| {
            let mut stmt = self.conn.prepare(&sql)?;
            let map_row = |row: &rusqlite::Row<'_>| {
                let id: i64 = row.get(0)?;
                let title: String = row.get(1)?;
                let rel_path: String = row.get(2)?;
                let authors: Option<String> = row.get(3)?;
                let language: Option<String> = row.get(4)?;
                let tags: Option<String> = row.get(5)?;

                let files = files_by_book
                    .get(&id)
                    .map(|files| {
                        files
                            .iter()
                            .map(|f| BookFile {
                                path: self.library_root.join(&rel_path).join(&f.path),
                                format: f.format,
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                Ok(BookRecord {
                    source_id: id,
                    title,
                    authors: split_concat(authors),
                    language: language.unwrap_or_default(),
                    tags: split_concat(tags),
                    files,
                })
            };
            let books: rusqlite::Result<Vec<BookRecord>> = match only_id {
                Some(id) => stmt.query_map([id], map_row)?.collect(),
                None => stmt.query_map([], map_row)?.collect(),
            };
            books
        })
    }
}

fn split_concat(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
