use anyhow::Result;

use crate::cli::build_components;

pub async fn show_stats(project: String, verbose: bool) -> Result<()> {
    let components = build_components(&project)?;

    println!("Railgraph Statistics v{}", env!("CARGO_PKG_VERSION"));
    println!("Project: {}", project);

    let status = components.engine.index_status()?;

    println!("\n📊 Index Statistics:");
    println!("  Indexed files: {}", status.indexed_files);
    println!("  Total symbols: {}", status.total_symbols);
    println!("  Last update: {}", status.last_update);
    println!("  Index size: {:.2} MB", status.index_size_mb);

    if !status.file_types.is_empty() {
        println!("  Files by type:");
        for (file_type, count) in &status.file_types {
            println!("    {}: {}", file_type, count);
        }
    }

    if verbose {
        println!("\n📈 Detailed Statistics:");

        let symbols_by_kind = get_symbols_by_kind(&components.store)?;
        if !symbols_by_kind.is_empty() {
            println!("  Symbols by kind:");
            for (kind, count) in symbols_by_kind {
                println!("    {}: {}", kind, count);
            }
        }

        let reference_count = get_reference_count(&components.store)?;
        println!("  Reference edges: {}", reference_count);

        let annotations_by_kind = get_annotations_by_kind(&components.store)?;
        if !annotations_by_kind.is_empty() {
            println!("  Annotations by kind:");
            for (kind, count) in annotations_by_kind {
                println!("    {}: {}", kind, count);
            }
        }
    }

    Ok(())
}

fn get_symbols_by_kind(store: &crate::index::db::IndexDatabase) -> Result<Vec<(String, usize)>> {
    let conn = store.get_conn()?;

    let mut stmt =
        conn.prepare("SELECT kind, COUNT(*) as count FROM symbols GROUP BY kind ORDER BY count DESC")?;

    let rows = stmt.query_map([], |row| {
        let kind: String = row.get(0)?;
        let count: usize = row.get(1)?;
        Ok((kind, count))
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }

    Ok(results)
}

fn get_reference_count(store: &crate::index::db::IndexDatabase) -> Result<usize> {
    let conn = store.get_conn()?;
    let count: usize = conn.query_row("SELECT COUNT(*) FROM symbol_refs", [], |row| row.get(0))?;
    Ok(count)
}

fn get_annotations_by_kind(
    store: &crate::index::db::IndexDatabase,
) -> Result<Vec<(String, usize)>> {
    let conn = store.get_conn()?;

    let mut stmt = conn
        .prepare("SELECT kind, COUNT(*) as count FROM annotations GROUP BY kind ORDER BY count DESC")?;

    let rows = stmt.query_map([], |row| {
        let kind: String = row.get(0)?;
        let count: usize = row.get(1)?;
        Ok((kind, count))
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }

    Ok(results)
}
