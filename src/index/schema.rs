use rusqlite::{Connection, Result};
use tracing::{debug, info};

/// SQLite schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    info!("Initializing railgraph schema v{}", SCHEMA_VERSION);

    // Create schema version table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // Check current version
    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    debug!("Current schema version: {}", current_version);

    if current_version < SCHEMA_VERSION {
        info!(
            "Upgrading schema from v{} to v{}",
            current_version, SCHEMA_VERSION
        );
        apply_migrations(conn, current_version)?;
    }

    Ok(())
}

/// Apply migrations from current version to latest
fn apply_migrations(conn: &Connection, from_version: i32) -> Result<()> {
    for version in (from_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration v{}", version);
        match version {
            1 => create_v1_schema(conn)?,
            _ => unreachable!("Unknown schema version: {}", version),
        }

        // Record migration
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    }

    Ok(())
}

/// Create v1 schema (initial schema)
fn create_v1_schema(conn: &Connection) -> Result<()> {
    info!("Creating v1 schema tables");

    // Files table - one row per indexed source file
    conn.execute(
        "CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT UNIQUE NOT NULL,
            hash TEXT,
            last_indexed TEXT,
            file_type TEXT,
            line_count INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    // Symbols table - classes, modules, methods, constants
    conn.execute(
        "CREATE TABLE IF NOT EXISTS symbols (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            parent_symbol TEXT,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            signature TEXT,
            visibility TEXT NOT NULL DEFAULT 'public',
            ast_json TEXT,
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
        )",
        [],
    )?;

    // Unresolved reference edges (for call-graph queries). Targets are
    // plain text, not foreign keys: the extractor does no type resolution.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS symbol_refs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL,
            symbol_id INTEGER NOT NULL,
            target TEXT NOT NULL,
            line INTEGER NOT NULL,
            context TEXT,
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE,
            FOREIGN KEY (symbol_id) REFERENCES symbols(id) ON DELETE CASCADE
        )",
        [],
    )?;

    // Domain annotations (associations, validations, callbacks, ...)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS annotations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL,
            symbol_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            value TEXT,
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE,
            FOREIGN KEY (symbol_id) REFERENCES symbols(id) ON DELETE CASCADE
        )",
        [],
    )?;

    // Full-text search over denormalized per-symbol documents
    conn.execute(
        "CREATE VIRTUAL TABLE IF NOT EXISTS search_index USING fts5(
            file_path,
            symbol_name,
            content,
            tokenize='porter'
        )",
        [],
    )?;

    // Secondary indexes
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_refs_file ON symbol_refs(file_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_refs_target ON symbol_refs(target)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_annotations_file ON annotations(file_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_annotations_symbol ON annotations(symbol_id)",
        [],
    )?;

    info!("v1 schema created successfully");

    Ok(())
}

/// Drop all tables (for testing/rebuilding)
pub fn drop_schema(conn: &Connection) -> Result<()> {
    info!("Dropping all schema tables");

    conn.execute("DROP TABLE IF EXISTS schema_version", [])?;
    conn.execute("DROP TABLE IF EXISTS search_index", [])?;
    conn.execute("DROP TABLE IF EXISTS annotations", [])?;
    conn.execute("DROP TABLE IF EXISTS symbol_refs", [])?;
    conn.execute("DROP TABLE IF EXISTS symbols", [])?;
    conn.execute("DROP TABLE IF EXISTS files", [])?;

    Ok(())
}
