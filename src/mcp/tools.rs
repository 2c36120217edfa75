// MCP tool handlers

use anyhow::Result;
use serde_json::{json, Map, Value};

use crate::indexer::Indexer;
use crate::query::engine::{Direction, QueryEngine};

fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing {}", key))
}

fn optional_usize(args: &Map<String, Value>, key: &str) -> Option<usize> {
    args.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

/// Wrap a serializable result as MCP text content
fn text_content<T: serde::Serialize>(value: &T) -> Result<Value> {
    Ok(json!({
        "content": [{
            "type": "text",
            "text": serde_json::to_string_pretty(value)?
        }]
    }))
}

pub fn search_symbols(engine: &QueryEngine, args: &Map<String, Value>) -> Result<Value> {
    let query = required_str(args, "query")?;
    let k = optional_usize(args, "k").unwrap_or(10);
    let file_types: Option<Vec<String>> = args.get("file_types").and_then(|v| {
        v.as_array().map(|types| {
            types
                .iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
    });

    let results = engine.search(query, k, file_types.as_deref())?;
    text_content(&results)
}

pub fn get_snippet(engine: &QueryEngine, args: &Map<String, Value>) -> Result<Value> {
    let file_path = required_str(args, "file_path")?;
    let start_line = optional_usize(args, "start_line");
    let end_line = optional_usize(args, "end_line");
    let symbol_name = args.get("symbol_name").and_then(|v| v.as_str());

    let snippet = engine.snippet(file_path, start_line, end_line, symbol_name)?;
    Ok(json!({
        "content": [{
            "type": "text",
            "text": snippet
        }]
    }))
}

pub fn call_graph(engine: &QueryEngine, args: &Map<String, Value>) -> Result<Value> {
    let symbol = required_str(args, "symbol")?;
    let direction = args
        .get("direction")
        .and_then(|v| v.as_str())
        .map(Direction::parse)
        .unwrap_or(Direction::Both);
    let depth = optional_usize(args, "depth").unwrap_or(1);

    let graph = engine.call_graph(symbol, direction, depth)?;
    text_content(&graph)
}

pub async fn find_similar(engine: &QueryEngine, args: &Map<String, Value>) -> Result<Value> {
    let code_snippet = required_str(args, "code_snippet")?;
    let k = optional_usize(args, "k").unwrap_or(5);
    let min_similarity = args
        .get("min_similarity")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.7);

    let results = engine.find_similar(code_snippet, k, min_similarity).await?;
    text_content(&results)
}

pub async fn get_file_summary(engine: &QueryEngine, args: &Map<String, Value>) -> Result<Value> {
    let file_path = required_str(args, "file_path")?;
    let summary = engine.file_summary(file_path).await?;
    text_content(&summary)
}

pub fn find_tests(engine: &QueryEngine, args: &Map<String, Value>) -> Result<Value> {
    let file_path = required_str(args, "file_path")?;
    let tests = engine.find_tests(file_path);
    text_content(&tests)
}

pub fn index_status(engine: &QueryEngine) -> Result<Value> {
    let status = engine.index_status()?;
    text_content(&status)
}

pub async fn reindex(indexer: &Indexer, args: &Map<String, Value>) -> Result<Value> {
    let paths: Option<Vec<String>> = args.get("paths").and_then(|v| {
        v.as_array().map(|paths| {
            paths
                .iter()
                .filter_map(|p| p.as_str().map(str::to_string))
                .collect()
        })
    });
    let full = args.get("full").and_then(|v| v.as_bool()).unwrap_or(false);

    let report = indexer.reindex(paths, full).await?;
    text_content(&report)
}
