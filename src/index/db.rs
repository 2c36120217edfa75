use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::schema::init_schema;
use super::{AnnotationFact, FactDocument, SymbolKind, Visibility};

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Persistence failures surfaced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Symbol row as stored in the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSymbol {
    pub id: i64,
    pub file_path: String,
    pub name: String,
    pub kind: SymbolKind,
    pub parent: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub signature: Option<String>,
    pub visibility: Visibility,
    /// Opaque extractor payload, returned verbatim.
    pub ast: serde_json::Value,
}

/// Candidate match from symbol search, before ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub file_path: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: SymbolKind,
    pub line: u32,
    pub signature: Option<String>,
}

/// A stored reference edge resolved to its originating file/symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceHit {
    pub file_path: String,
    pub line: u32,
    pub context: Option<String>,
    pub from_symbol: String,
}

/// Reference edge recorded on one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredReference {
    pub target: String,
    pub line: u32,
    pub context: Option<String>,
}

/// Candidate for similarity scoring: a stored symbol plus the annotations
/// needed to rebuild its feature tokens.
#[derive(Debug, Clone)]
pub struct SimilarityCandidate {
    pub file_path: String,
    pub symbol: String,
    pub line: u32,
    pub kind: SymbolKind,
    pub parent: Option<String>,
    pub annotations: Vec<AnnotationFact>,
}

/// Aggregate index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub file_count: usize,
    pub symbol_count: usize,
    pub last_update: Option<String>,
    pub size_bytes: u64,
}

/// SQLite-backed index store
#[derive(Clone)]
pub struct IndexDatabase {
    pool: ConnectionPool,
    db_path: PathBuf,
}

impl IndexDatabase {
    /// Create or open a database
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        info!("Opening index database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        // WAL keeps retrieval readable while a reindex batch is writing;
        // foreign_keys makes per-file child rows follow the files delete.
        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
            conn.busy_timeout(Duration::from_secs(5))?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .context("Failed to create connection pool")?;

        {
            let conn = pool.get().context("Failed to get connection")?;
            init_schema(&conn).context("Failed to initialize schema")?;
        }

        Ok(Self { pool, db_path })
    }

    /// Get a connection from the pool
    pub fn get_conn(
        &self,
    ) -> std::result::Result<r2d2::PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }

    /// Replace a file and every fact it owns in one transaction. Readers
    /// never observe a partially updated file.
    pub fn upsert_file(&self, path: &str, doc: &FactDocument) -> std::result::Result<(), StoreError> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        debug!("Upserting file: {} ({} symbols)", path, doc.symbols.len());

        // Cascades take the old symbols, references and annotations with it
        tx.execute("DELETE FROM files WHERE path = ?1", [path])?;
        tx.execute(
            "INSERT INTO files (path, hash, last_indexed, file_type, line_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                path,
                doc.hash,
                chrono::Utc::now().to_rfc3339(),
                doc.file_type,
                doc.line_count as i64,
            ],
        )?;
        let file_id = tx.last_insert_rowid();

        for symbol in &doc.symbols {
            tx.execute(
                "INSERT INTO symbols (
                    file_id, name, kind, parent_symbol,
                    start_line, end_line, signature, visibility, ast_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    file_id,
                    symbol.name,
                    symbol.kind.as_str(),
                    symbol.parent,
                    symbol.start_line as i64,
                    symbol.end_line as i64,
                    symbol.signature,
                    symbol.visibility.as_str(),
                    symbol.ast.to_string(),
                ],
            )?;
            let symbol_id = tx.last_insert_rowid();

            for reference in &symbol.references {
                tx.execute(
                    "INSERT INTO symbol_refs (file_id, symbol_id, target, line, context)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        file_id,
                        symbol_id,
                        reference.to,
                        reference.line as i64,
                        reference.context,
                    ],
                )?;
            }

            for annotation in &symbol.metadata {
                tx.execute(
                    "INSERT INTO annotations (file_id, symbol_id, kind, value)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![file_id, symbol_id, annotation.kind, annotation.value.to_string()],
                )?;
            }
        }

        // Rebuild the denormalized search entries for this path
        tx.execute("DELETE FROM search_index WHERE file_path = ?1", [path])?;
        for symbol in &doc.symbols {
            let content = format!(
                "{} {} {}",
                symbol.name,
                symbol.signature.as_deref().unwrap_or(""),
                symbol.doc.as_deref().unwrap_or(""),
            );
            tx.execute(
                "INSERT INTO search_index (file_path, symbol_name, content)
                 VALUES (?1, ?2, ?3)",
                params![path, symbol.name, content],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Search for symbols matching the given terms. Full-text first; if the
    /// FTS engine fails the call degrades to substring matching, which
    /// trades stemming for plain containment.
    pub fn search_symbols(
        &self,
        terms: &[String],
        limit: usize,
    ) -> std::result::Result<Vec<SearchHit>, StoreError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        match self.search_fulltext(terms, limit) {
            Ok(hits) => Ok(hits),
            Err(err) => {
                warn!("Full-text search failed, falling back to substring match: {}", err);
                self.search_substring(terms, limit)
            }
        }
    }

    fn search_fulltext(
        &self,
        terms: &[String],
        limit: usize,
    ) -> std::result::Result<Vec<SearchHit>, StoreError> {
        let conn = self.get_conn()?;

        let fts_query = terms
            .iter()
            .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR ");

        // DISTINCT requires the ORDER BY term in the select list, so rank
        // rides along as a trailing column.
        let mut stmt = conn.prepare(
            "SELECT DISTINCT f.path, s.name, s.kind, s.start_line, s.signature, si.rank
             FROM search_index si
             JOIN files f ON si.file_path = f.path
             JOIN symbols s ON s.file_id = f.id AND s.name = si.symbol_name
             WHERE si MATCH ?1
             ORDER BY si.rank
             LIMIT ?2",
        )?;

        let hits = stmt
            .query_map(params![fts_query, limit as i64], row_to_search_hit)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(hits)
    }

    /// Substring fallback: case-insensitive containment over symbol names,
    /// OR across terms. Public because its recall semantics differ from
    /// the tokenized path and deserve their own verification.
    pub fn search_substring(
        &self,
        terms: &[String],
        limit: usize,
    ) -> std::result::Result<Vec<SearchHit>, StoreError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;

        let conditions = vec!["s.name LIKE ?"; terms.len()].join(" OR ");
        let sql = format!(
            "SELECT DISTINCT f.path, s.name, s.kind, s.start_line, s.signature
             FROM symbols s
             JOIN files f ON s.file_id = f.id
             WHERE {}
             LIMIT ?",
            conditions
        );

        let mut bindings: Vec<String> = terms.iter().map(|term| format!("%{}%", term)).collect();
        bindings.push(limit.to_string());

        let mut stmt = conn.prepare(&sql)?;
        let hits = stmt
            .query_map(params_from_iter(bindings.iter()), row_to_search_hit)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(hits)
    }

    /// Exact point lookup of one symbol in one file
    pub fn get_symbol(
        &self,
        file_path: &str,
        name: &str,
    ) -> std::result::Result<Option<StoredSymbol>, StoreError> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT s.id, f.path, s.name, s.kind, s.parent_symbol, s.start_line,
                    s.end_line, s.signature, s.visibility, s.ast_json
             FROM symbols s
             JOIN files f ON s.file_id = f.id
             WHERE f.path = ?1 AND s.name = ?2
             LIMIT 1",
        )?;

        let symbol = stmt
            .query_row(params![file_path, name], row_to_symbol)
            .optional()?;

        Ok(symbol)
    }

    /// Find stored reference edges whose target mentions the given name.
    /// Targets are unresolved text, so same-named methods on different
    /// classes will alias; results are best-effort by design.
    pub fn find_references(
        &self,
        target: &str,
    ) -> std::result::Result<Vec<ReferenceHit>, StoreError> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT f.path, r.line, r.context, s.name
             FROM symbol_refs r
             JOIN files f ON r.file_id = f.id
             JOIN symbols s ON r.symbol_id = s.id
             WHERE r.target LIKE ?1",
        )?;

        let pattern = format!("%{}%", target);
        let hits = stmt
            .query_map([pattern], |row| {
                Ok(ReferenceHit {
                    file_path: row.get(0)?,
                    line: row.get::<_, i64>(1)? as u32,
                    context: row.get(2)?,
                    from_symbol: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(hits)
    }

    /// Resolve the implementation of `Class#method` (parent + name match)
    /// or a bare class/module name.
    pub fn find_implementation(
        &self,
        class_name: &str,
        method_name: Option<&str>,
    ) -> std::result::Result<Option<StoredSymbol>, StoreError> {
        let conn = self.get_conn()?;

        let symbol = if let Some(method) = method_name {
            let mut stmt = conn.prepare(
                "SELECT s.id, f.path, s.name, s.kind, s.parent_symbol, s.start_line,
                        s.end_line, s.signature, s.visibility, s.ast_json
                 FROM symbols s
                 JOIN files f ON s.file_id = f.id
                 WHERE s.parent_symbol = ?1 AND s.name = ?2
                 LIMIT 1",
            )?;
            stmt.query_row(params![class_name, method], row_to_symbol)
                .optional()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT s.id, f.path, s.name, s.kind, s.parent_symbol, s.start_line,
                        s.end_line, s.signature, s.visibility, s.ast_json
                 FROM symbols s
                 JOIN files f ON s.file_id = f.id
                 WHERE s.name = ?1 AND s.kind IN ('class', 'module')
                 LIMIT 1",
            )?;
            stmt.query_row([class_name], row_to_symbol).optional()?
        };

        Ok(symbol)
    }

    /// Reference edges recorded on one stored symbol, in line order
    pub fn symbol_references(
        &self,
        symbol_id: i64,
    ) -> std::result::Result<Vec<StoredReference>, StoreError> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT target, line, context FROM symbol_refs
             WHERE symbol_id = ?1
             ORDER BY line",
        )?;

        let references = stmt
            .query_map([symbol_id], |row| {
                Ok(StoredReference {
                    target: row.get(0)?,
                    line: row.get::<_, i64>(1)? as u32,
                    context: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(references)
    }

    /// Symbols of the given kind with their annotations, as similarity
    /// candidates
    pub fn similarity_candidates(
        &self,
        kind: SymbolKind,
        limit: usize,
    ) -> std::result::Result<Vec<SimilarityCandidate>, StoreError> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT s.id, f.path, s.name, s.start_line, s.kind, s.parent_symbol
             FROM symbols s
             JOIN files f ON s.file_id = f.id
             WHERE s.kind = ?1
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![kind.as_str(), limit as i64], |row| {
                let id: i64 = row.get(0)?;
                Ok((
                    id,
                    SimilarityCandidate {
                        file_path: row.get(1)?,
                        symbol: row.get(2)?,
                        line: row.get::<_, i64>(3)? as u32,
                        kind: SymbolKind::parse(&row.get::<_, String>(4)?),
                        parent: row.get(5)?,
                        annotations: Vec::new(),
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut annotation_stmt =
            conn.prepare("SELECT kind, value FROM annotations WHERE symbol_id = ?1")?;

        let mut candidates = Vec::with_capacity(rows.len());
        for (symbol_id, mut candidate) in rows {
            candidate.annotations = annotation_stmt
                .query_map([symbol_id], |row| {
                    let kind: String = row.get(0)?;
                    let value: Option<String> = row.get(1)?;
                    Ok(AnnotationFact {
                        kind,
                        value: value
                            .and_then(|raw| serde_json::from_str(&raw).ok())
                            .unwrap_or(serde_json::Value::Null),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            candidates.push(candidate);
        }

        Ok(candidates)
    }

    /// Count indexed files whose path matches a glob (`*` and `?` only)
    pub fn count_files_by_glob(&self, pattern: &str) -> std::result::Result<i64, StoreError> {
        let conn = self.get_conn()?;

        let like_pattern = pattern.replace('*', "%").replace('?', "_");
        let count = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE path LIKE ?1",
            [like_pattern],
            |row| row.get(0),
        )?;

        Ok(count)
    }

    /// Aggregate statistics over the stored index
    pub fn statistics(&self) -> std::result::Result<StoreStats, StoreError> {
        let conn = self.get_conn()?;

        let file_count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        let symbol_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM symbols", [], |row| row.get(0))?;
        let last_update: Option<String> =
            conn.query_row("SELECT MAX(last_indexed) FROM files", [], |row| row.get(0))?;

        let size_bytes = std::fs::metadata(&self.db_path)
            .map(|meta| meta.len())
            .unwrap_or(0);

        Ok(StoreStats {
            file_count: file_count as usize,
            symbol_count: symbol_count as usize,
            last_update,
            size_bytes,
        })
    }

    /// Remove one file and everything it owns
    pub fn remove_file(&self, path: &str) -> std::result::Result<(), StoreError> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM files WHERE path = ?1", [path])?;
        tx.execute("DELETE FROM search_index WHERE file_path = ?1", [path])?;
        tx.commit()?;
        Ok(())
    }

    /// Delete all indexed data, atomically
    pub fn clear(&self) -> std::result::Result<(), StoreError> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM symbol_refs", [])?;
        tx.execute("DELETE FROM annotations", [])?;
        tx.execute("DELETE FROM symbols", [])?;
        tx.execute("DELETE FROM files", [])?;
        tx.execute("DELETE FROM search_index", [])?;
        tx.commit()?;
        Ok(())
    }
}

/// Convert database row to SearchHit
fn row_to_search_hit(row: &Row) -> rusqlite::Result<SearchHit> {
    Ok(SearchHit {
        file_path: row.get(0)?,
        symbol: row.get(1)?,
        kind: SymbolKind::parse(&row.get::<_, String>(2)?),
        line: row.get::<_, i64>(3)? as u32,
        signature: row.get(4)?,
    })
}

/// Convert database row to StoredSymbol
fn row_to_symbol(row: &Row) -> rusqlite::Result<StoredSymbol> {
    let ast_json: Option<String> = row.get(9)?;

    Ok(StoredSymbol {
        id: row.get(0)?,
        file_path: row.get(1)?,
        name: row.get(2)?,
        kind: SymbolKind::parse(&row.get::<_, String>(3)?),
        parent: row.get(4)?,
        start_line: row.get::<_, i64>(5)? as u32,
        end_line: row.get::<_, i64>(6)? as u32,
        signature: row.get(7)?,
        visibility: Visibility::parse(&row.get::<_, String>(8)?),
        ast: ast_json
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(serde_json::Value::Null),
    })
}
