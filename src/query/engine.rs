// Retrieval engine: ranking, snippets, call graphs, similarity

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::config::FileTypeRules;
use crate::index::db::{IndexDatabase, SearchHit, SimilarityCandidate};
use crate::index::{FactDocument, SymbolKind};
use crate::indexer::extractor::Extractor;

/// Hard cap on any snippet window
pub const MAX_SNIPPET_LINES: usize = 400;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("file not found: {0}")]
    FileNotFound(String),
}

/// Scored search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedMatch {
    pub file_path: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: SymbolKind,
    pub line: u32,
    pub signature: Option<String>,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerSite {
    pub file: String,
    pub line: u32,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalleeSite {
    pub method: String,
    pub line: u32,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallGraph {
    pub symbol: String,
    pub callers: Vec<CallerSite>,
    pub callees: Vec<CalleeSite>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarMatch {
    pub file_path: String,
    pub symbol: String,
    pub line: u32,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    pub indexed_files: usize,
    pub total_symbols: usize,
    pub last_update: String,
    pub index_size_mb: f64,
    pub file_types: BTreeMap<String, i64>,
}

/// Call-graph traversal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Callers,
    Callees,
    Both,
}

impl Direction {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "callers" => Direction::Callers,
            "callees" => Direction::Callees,
            _ => Direction::Both,
        }
    }
}

/// Parsed qualified symbol reference: `Class#method` (instance method),
/// `Class.method` (class-level method), or a bare class/module name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolQuery {
    Instance { class: String, method: String },
    ClassLevel { class: String, method: String },
    Bare { class: String },
}

impl SymbolQuery {
    pub fn parse(raw: &str) -> Self {
        if let Some((class, method)) = raw.split_once('#') {
            SymbolQuery::Instance {
                class: class.to_string(),
                method: method.to_string(),
            }
        } else if let Some((class, method)) = raw.split_once('.') {
            SymbolQuery::ClassLevel {
                class: class.to_string(),
                method: method.to_string(),
            }
        } else {
            SymbolQuery::Bare {
                class: raw.to_string(),
            }
        }
    }

    pub fn class(&self) -> &str {
        match self {
            SymbolQuery::Instance { class, .. }
            | SymbolQuery::ClassLevel { class, .. }
            | SymbolQuery::Bare { class } => class,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            SymbolQuery::Instance { method, .. } | SymbolQuery::ClassLevel { method, .. } => {
                Some(method)
            }
            SymbolQuery::Bare { .. } => None,
        }
    }

    /// The textual target searched in stored reference edges, preserving
    /// the instance/class-level separator.
    pub fn qualified_target(&self) -> String {
        match self {
            SymbolQuery::Instance { class, method } => format!("{}#{}", class, method),
            SymbolQuery::ClassLevel { class, method } => format!("{}.{}", class, method),
            SymbolQuery::Bare { class } => class.clone(),
        }
    }
}

/// Answers retrieval queries against the persisted index
pub struct QueryEngine {
    repo_root: PathBuf,
    store: IndexDatabase,
    extractor: Arc<Extractor>,
    rules: Arc<FileTypeRules>,
}

impl QueryEngine {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        store: IndexDatabase,
        extractor: Arc<Extractor>,
        rules: Arc<FileTypeRules>,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            store,
            extractor,
            rules,
        }
    }

    /// Search for symbols matching a free-text query, optionally filtered
    /// by file-type classification
    pub fn search(
        &self,
        query: &str,
        k: usize,
        file_types: Option<&[String]>,
    ) -> Result<Vec<RankedMatch>> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        // Over-fetch to leave the type filter something to discard
        let mut hits = self.store.search_symbols(&terms, k * 2)?;

        if let Some(types) = file_types {
            hits.retain(|hit| types.iter().any(|tag| self.rules.matches(tag, &hit.file_path)));
        }

        let mut ranked = rank_matches(hits, &terms);
        ranked.truncate(k);
        Ok(ranked)
    }

    /// Resolve a snippet window and return numbered source lines. A symbol
    /// that is not indexed yields a textual not-found result, not an error.
    pub fn snippet(
        &self,
        file_path: &str,
        start_line: Option<usize>,
        end_line: Option<usize>,
        symbol_name: Option<&str>,
    ) -> Result<String> {
        let full_path = self.repo_root.join(file_path);
        if !full_path.exists() {
            return Err(QueryError::FileNotFound(file_path.to_string()).into());
        }

        let (mut start, mut end) = (start_line, end_line);
        if let Some(name) = symbol_name {
            match self.store.get_symbol(file_path, name)? {
                Some(symbol) => {
                    start = Some(symbol.start_line as usize);
                    end = Some(symbol.end_line as usize);
                }
                None => return Ok(format!("Symbol '{}' not found in {}", name, file_path)),
            }
        }

        let content = std::fs::read_to_string(&full_path)
            .with_context(|| format!("reading {}", full_path.display()))?;
        let lines: Vec<&str> = content.lines().collect();

        let start = start.unwrap_or(1);
        let end = end.unwrap_or(lines.len());

        let start_idx = start.saturating_sub(1).min(lines.len());
        let mut end_idx = end.min(lines.len()).max(start_idx);
        if end_idx - start_idx > MAX_SNIPPET_LINES {
            end_idx = start_idx + MAX_SNIPPET_LINES;
        }

        let numbered: Vec<String> = lines[start_idx..end_idx]
            .iter()
            .enumerate()
            .map(|(offset, line)| format!("{:>4}→ {}", start_idx + offset + 1, line.trim_end()))
            .collect();

        Ok(numbered.join("\n"))
    }

    /// Build the one-hop call graph around a qualified symbol. Callers are
    /// name-based matches over unresolved reference text; callees are the
    /// edges recorded on the symbol's own implementation. `depth` is part
    /// of the interface but a deeper walk needs a resolved reference
    /// graph, which this index deliberately does not keep.
    pub fn call_graph(&self, symbol: &str, direction: Direction, _depth: usize) -> Result<CallGraph> {
        let query = SymbolQuery::parse(symbol);

        let mut graph = CallGraph {
            symbol: symbol.to_string(),
            callers: Vec::new(),
            callees: Vec::new(),
        };

        if matches!(direction, Direction::Callers | Direction::Both) {
            graph.callers = self
                .store
                .find_references(&query.qualified_target())?
                .into_iter()
                .map(|hit| CallerSite {
                    file: hit.file_path,
                    line: hit.line,
                    context: hit.context,
                })
                .collect();
        }

        if matches!(direction, Direction::Callees | Direction::Both) {
            if let Some(implementation) =
                self.store.find_implementation(query.class(), query.method())?
            {
                graph.callees = self
                    .store
                    .symbol_references(implementation.id)?
                    .into_iter()
                    .map(|reference| CalleeSite {
                        method: reference.target,
                        line: reference.line,
                        context: reference.context,
                    })
                    .collect();
            }
        }

        Ok(graph)
    }

    /// Find indexed symbols structurally similar to a code fragment
    pub async fn find_similar(
        &self,
        code_snippet: &str,
        k: usize,
        min_similarity: f64,
    ) -> Result<Vec<SimilarMatch>> {
        let doc = self
            .extractor
            .extract_fragment(code_snippet)
            .await
            .context("extracting features from fragment")?;

        let query_tokens = feature_tokens_from_doc(&doc);
        let kind = dominant_kind(&doc);
        let candidates = self.store.similarity_candidates(kind, k * 2)?;

        let mut matches: Vec<SimilarMatch> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let similarity = jaccard(&query_tokens, &candidate_tokens(&candidate));
                (similarity >= min_similarity).then(|| SimilarMatch {
                    file_path: candidate.file_path,
                    symbol: candidate.symbol,
                    line: candidate.line,
                    similarity,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(k);
        Ok(matches)
    }

    /// Summarize a file through an ad hoc extraction. Parse failures yield
    /// a summary with an error field rather than a hard failure.
    pub async fn file_summary(&self, file_path: &str) -> Result<Value> {
        let full_path = self.repo_root.join(file_path);
        if !full_path.exists() {
            return Err(QueryError::FileNotFound(file_path.to_string()).into());
        }

        let fallback_type = self.rules.classify(file_path).unwrap_or("other");

        let doc = match self.extractor.extract(&full_path).await {
            Ok(doc) => doc,
            Err(err) => {
                warn!("Summary extraction failed for {}: {}", file_path, err);
                return Ok(json!({
                    "file": file_path,
                    "type": fallback_type,
                    "error": "Failed to parse file",
                }));
            }
        };

        let names = |kind: SymbolKind| -> Vec<String> {
            doc.symbols
                .iter()
                .filter(|symbol| symbol.kind == kind)
                .map(|symbol| symbol.name.clone())
                .collect()
        };
        let methods: Vec<String> = doc
            .symbols
            .iter()
            .filter(|symbol| {
                matches!(symbol.kind, SymbolKind::Method | SymbolKind::ClassMethod)
            })
            .map(|symbol| symbol.name.clone())
            .collect();
        let annotations = |wanted: &str| -> Vec<Value> {
            doc.symbols
                .iter()
                .flat_map(|symbol| &symbol.metadata)
                .filter(|annotation| annotation.kind == wanted)
                .map(|annotation| annotation.value.clone())
                .collect()
        };

        let mut dependencies = doc.requires.clone();
        dependencies.extend(doc.require_relatives.iter().cloned());

        Ok(json!({
            "file": file_path,
            "type": doc.file_type.as_deref().unwrap_or(fallback_type),
            "classes": names(SymbolKind::Class),
            "modules": names(SymbolKind::Module),
            "methods": methods,
            "associations": annotations("association"),
            "validations": annotations("validation"),
            "callbacks": annotations("callback"),
            "dependencies": dependencies,
            "line_count": doc.line_count,
        }))
    }

    /// Find existing test files associated with an implementation file,
    /// by Rails convention
    pub fn find_tests(&self, file_path: &str) -> Vec<String> {
        let mut test_paths = Vec::new();

        if file_path.contains("app/") {
            test_paths.push(file_path.replace("app/", "spec/").replace(".rb", "_spec.rb"));

            if file_path.contains("/models/") {
                if let Some(stem) = Path::new(file_path).file_stem().and_then(|s| s.to_str()) {
                    test_paths.push(format!("spec/requests/{}s_spec.rb", stem));
                    test_paths.push(format!("spec/integration/{}s_spec.rb", stem));
                }
            }
        }

        test_paths
            .into_iter()
            .filter(|path| self.repo_root.join(path).exists())
            .collect()
    }

    /// Freshness and size report over the stored index
    pub fn index_status(&self) -> Result<IndexStatus> {
        let stats = self.store.statistics()?;

        let mut file_types = BTreeMap::new();
        for rule in self.rules.iter() {
            let mut count = 0;
            for glob in &rule.globs {
                count += self.store.count_files_by_glob(glob)?;
            }
            if count > 0 {
                file_types.insert(rule.tag.clone(), count);
            }
        }

        let size_mb = stats.size_bytes as f64 / (1024.0 * 1024.0);

        Ok(IndexStatus {
            indexed_files: stats.file_count,
            total_symbols: stats.symbol_count,
            last_update: stats.last_update.unwrap_or_else(|| "never".to_string()),
            index_size_mb: (size_mb * 100.0).round() / 100.0,
            file_types,
        })
    }
}

/// Score candidates against the query terms. The sort is stable, so tied
/// scores keep their candidate order.
fn rank_matches(hits: Vec<SearchHit>, terms: &[String]) -> Vec<RankedMatch> {
    let joined = terms.join(" ");

    let mut ranked: Vec<RankedMatch> = hits
        .into_iter()
        .map(|hit| {
            let symbol_lower = hit.symbol.to_lowercase();
            let path_lower = hit.file_path.to_lowercase();

            let mut score = 0i64;
            for term in terms {
                if symbol_lower.contains(term.as_str()) {
                    score += 10;
                }
                if path_lower.contains(term.as_str()) {
                    score += 5;
                }
            }
            if !joined.is_empty() && symbol_lower.contains(&joined) {
                score += 20;
            }
            if path_lower.contains("/models/") {
                score += 3;
            } else if path_lower.contains("/controllers/") {
                score += 2;
            }

            RankedMatch {
                file_path: hit.file_path,
                symbol: hit.symbol,
                kind: hit.kind,
                line: hit.line,
                signature: hit.signature,
                score,
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}

/// Feature tokens for a fact document: one identity token per symbol plus
/// tokens for its association/validation/callback annotations
fn feature_tokens_from_doc(doc: &FactDocument) -> HashSet<String> {
    let mut tokens = HashSet::new();
    for symbol in &doc.symbols {
        tokens.insert(identity_token(
            symbol.kind,
            symbol.parent.as_deref(),
            &symbol.name,
        ));
        for annotation in &symbol.metadata {
            if let Some(token) = annotation_token(&annotation.kind, &annotation.value) {
                tokens.insert(token);
            }
        }
    }
    tokens
}

/// Feature tokens for a stored candidate, mirroring the document side
fn candidate_tokens(candidate: &SimilarityCandidate) -> HashSet<String> {
    let mut tokens = HashSet::new();
    tokens.insert(identity_token(
        candidate.kind,
        candidate.parent.as_deref(),
        &candidate.symbol,
    ));
    for annotation in &candidate.annotations {
        if let Some(token) = annotation_token(&annotation.kind, &annotation.value) {
            tokens.insert(token);
        }
    }
    tokens
}

fn identity_token(kind: SymbolKind, parent: Option<&str>, name: &str) -> String {
    format!("{}:{}::{}", kind.as_str(), parent.unwrap_or(""), name)
}

fn annotation_token(kind: &str, value: &Value) -> Option<String> {
    match kind {
        "association" => Some(format!(
            "assoc:{}:{}",
            json_field(value, "type"),
            json_field(value, "name")
        )),
        "validation" => Some(format!("valid:{}", json_scalar(value))),
        "callback" => Some(format!(
            "cb:{}:{}",
            json_field(value, "type"),
            json_field(value, "method")
        )),
        _ => None,
    }
}

fn json_field(value: &Value, key: &str) -> String {
    value.get(key).map(json_scalar).unwrap_or_default()
}

fn json_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The most frequent symbol kind in a document; first seen wins ties.
/// Empty documents default to methods, the most common fragment shape.
fn dominant_kind(doc: &FactDocument) -> SymbolKind {
    let mut counts: Vec<(SymbolKind, usize)> = Vec::new();
    for symbol in &doc.symbols {
        match counts.iter_mut().find(|(kind, _)| *kind == symbol.kind) {
            Some((_, count)) => *count += 1,
            None => counts.push((symbol.kind, 1)),
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(kind, _)| kind)
        .unwrap_or(SymbolKind::Method)
}

/// Jaccard similarity over feature-token sets; 0.0 when either side is
/// empty
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::index::{AnnotationFact, ReferenceFact, SymbolFact, Visibility};
    use proptest::prelude::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn hit(file_path: &str, symbol: &str) -> SearchHit {
        SearchHit {
            file_path: file_path.to_string(),
            symbol: symbol.to_string(),
            kind: SymbolKind::Method,
            line: 1,
            signature: None,
        }
    }

    fn symbol(name: &str, kind: SymbolKind, parent: Option<&str>, span: (u32, u32)) -> SymbolFact {
        SymbolFact {
            name: name.to_string(),
            kind,
            parent: parent.map(str::to_string),
            start_line: span.0,
            end_line: span.1,
            signature: None,
            visibility: Visibility::Public,
            doc: None,
            ast: Value::Null,
            references: Vec::new(),
            metadata: Vec::new(),
        }
    }

    struct Fixture {
        repo: TempDir,
        engine: QueryEngine,
        store: IndexDatabase,
    }

    /// Engine over a tempdir repo, with a fake extractor whose JSON output
    /// is provided per test
    fn fixture(extractor_json: &str) -> Fixture {
        let repo = tempdir().unwrap();
        let script = repo.path().join("fake_extractor.sh");
        fs::write(&script, format!("echo '{}'\n", extractor_json)).unwrap();

        let store = IndexDatabase::new(repo.path().join("test.db")).unwrap();
        let extractor = Arc::new(Extractor::new("sh", &script, Duration::from_secs(5)));
        let rules = Arc::new(FileTypeRules::from_config(&Config::default()).unwrap());
        let engine = QueryEngine::new(repo.path(), store.clone(), extractor, rules);

        Fixture { repo, engine, store }
    }

    fn seed_user_model(store: &IndexDatabase) {
        let mut class = symbol("User", SymbolKind::Class, None, (1, 10));
        class.metadata.push(AnnotationFact {
            kind: "validation".to_string(),
            value: json!("email"),
        });
        let mut method = symbol("full_name", SymbolKind::Method, Some("User"), (5, 7));
        method.references.push(ReferenceFact {
            to: "first_name".to_string(),
            line: 6,
            context: Some("interpolation".to_string()),
        });

        store
            .upsert_file(
                "app/models/user.rb",
                &FactDocument {
                    hash: None,
                    file_type: Some("model".to_string()),
                    line_count: 10,
                    symbols: vec![class, method],
                    requires: Vec::new(),
                    require_relatives: Vec::new(),
                },
            )
            .unwrap();
    }

    #[test]
    fn test_ranking_full_query_bonus_is_monotonic() {
        let terms = vec!["full".to_string(), "name".to_string()];
        let ranked = rank_matches(
            vec![hit("lib/a.rb", "full_name"), hit("lib/a.rb", "fullest_rename")],
            &terms,
        );

        // Neither name contains the joined phrase "full name", so both
        // score through term hits alone.
        assert_eq!(ranked[0].score, ranked[1].score);

        let ranked = rank_matches(
            vec![hit("lib/a.rb", "the full name helper"), hit("lib/a.rb", "full_name")],
            &terms,
        );
        assert_eq!(ranked[0].symbol, "the full name helper");
        assert!(ranked[0].score >= ranked[1].score + 20);
    }

    #[test]
    fn test_ranking_term_and_path_scores() {
        let terms = vec!["user".to_string()];
        let ranked = rank_matches(vec![hit("app/models/user.rb", "User")], &terms);
        // +10 name, +5 path, +20 joined-query (a single term is its own
        // joined query), +3 models boost
        assert_eq!(ranked[0].score, 38);

        let ranked = rank_matches(vec![hit("app/controllers/users_controller.rb", "index")], &terms);
        // +5 path, +2 controllers boost
        assert_eq!(ranked[0].score, 7);
    }

    #[test]
    fn test_ranking_ties_keep_candidate_order() {
        let terms = vec!["zzz".to_string()];
        let ranked = rank_matches(
            vec![hit("lib/a.rb", "first"), hit("lib/b.rb", "second"), hit("lib/c.rb", "third")],
            &terms,
        );
        let symbols: Vec<&str> = ranked.iter().map(|m| m.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_search_single_class_example() {
        let fx = fixture("{}");
        seed_user_model(&fx.store);

        let results = fx.engine.search("full_name", 10, None).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].symbol, "full_name");
        assert_eq!(results[0].file_path, "app/models/user.rb");
    }

    #[test]
    fn test_search_file_type_filter() {
        let fx = fixture("{}");
        seed_user_model(&fx.store);
        fx.store
            .upsert_file(
                "app/controllers/users_controller.rb",
                &FactDocument {
                    hash: None,
                    file_type: Some("controller".to_string()),
                    line_count: 5,
                    // Underscored name so the tokenizer indexes "user"
                    symbols: vec![symbol("user_session", SymbolKind::Method, None, (1, 5))],
                    requires: Vec::new(),
                    require_relatives: Vec::new(),
                },
            )
            .unwrap();

        let types = vec!["controller".to_string()];
        let results = fx.engine.search("user", 10, Some(&types)).unwrap();
        assert!(!results.is_empty());
        assert!(results
            .iter()
            .all(|m| m.file_path.starts_with("app/controllers/")));
    }

    #[test]
    fn test_snippet_by_symbol_and_not_found() {
        let fx = fixture("{}");
        seed_user_model(&fx.store);

        let source: String = (1..=10).map(|i| format!("line {}\n", i)).collect();
        let file = fx.repo.path().join("app/models/user.rb");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, &source).unwrap();

        let snippet = fx
            .engine
            .snippet("app/models/user.rb", None, None, Some("full_name"))
            .unwrap();
        assert!(snippet.starts_with("   5→ line 5"));
        assert!(snippet.ends_with("   7→ line 7"));

        let missing = fx
            .engine
            .snippet("app/models/user.rb", None, None, Some("ghost"))
            .unwrap();
        assert_eq!(missing, "Symbol 'ghost' not found in app/models/user.rb");
    }

    #[test]
    fn test_snippet_caps_and_clamps() {
        let fx = fixture("{}");
        let source: String = (1..=600).map(|i| format!("line {}\n", i)).collect();
        fs::write(fx.repo.path().join("big.rb"), &source).unwrap();

        // A 1000-line request returns at most 400 lines
        let snippet = fx.engine.snippet("big.rb", Some(1), Some(1000), None).unwrap();
        assert_eq!(snippet.lines().count(), MAX_SNIPPET_LINES);

        // A span beyond end-of-file clamps to the last line
        let snippet = fx.engine.snippet("big.rb", Some(590), Some(9999), None).unwrap();
        assert_eq!(snippet.lines().count(), 11);
        assert!(snippet.ends_with("600→ line 600"));

        // Missing file is a hard error
        let err = fx.engine.snippet("nope.rb", None, None, None).unwrap_err();
        assert!(err.downcast_ref::<QueryError>().is_some());
    }

    #[test]
    fn test_symbol_query_grammar() {
        assert_eq!(
            SymbolQuery::parse("Campaign#update"),
            SymbolQuery::Instance {
                class: "Campaign".to_string(),
                method: "update".to_string()
            }
        );
        assert_eq!(
            SymbolQuery::parse("UserService.call"),
            SymbolQuery::ClassLevel {
                class: "UserService".to_string(),
                method: "call".to_string()
            }
        );
        assert_eq!(
            SymbolQuery::parse("Campaign"),
            SymbolQuery::Bare {
                class: "Campaign".to_string()
            }
        );
        assert_eq!(SymbolQuery::parse("Campaign#update").qualified_target(), "Campaign#update");
        assert_eq!(SymbolQuery::parse("UserService.call").qualified_target(), "UserService.call");
    }

    #[test]
    fn test_call_graph_both_directions() {
        let fx = fixture("{}");
        seed_user_model(&fx.store);

        // A caller referencing User#full_name from another file
        let mut caller = symbol("show", SymbolKind::Method, Some("UsersController"), (3, 6));
        caller.references.push(ReferenceFact {
            to: "User#full_name".to_string(),
            line: 4,
            context: Some("@user.full_name".to_string()),
        });
        fx.store
            .upsert_file(
                "app/controllers/users_controller.rb",
                &FactDocument {
                    hash: None,
                    file_type: Some("controller".to_string()),
                    line_count: 8,
                    symbols: vec![caller],
                    requires: Vec::new(),
                    require_relatives: Vec::new(),
                },
            )
            .unwrap();

        let graph = fx
            .engine
            .call_graph("User#full_name", Direction::Both, 1)
            .unwrap();

        assert_eq!(graph.callers.len(), 1);
        assert_eq!(graph.callers[0].file, "app/controllers/users_controller.rb");
        assert_eq!(graph.callers[0].line, 4);

        assert_eq!(graph.callees.len(), 1);
        assert_eq!(graph.callees[0].method, "first_name");

        let callers_only = fx
            .engine
            .call_graph("User#full_name", Direction::Callers, 1)
            .unwrap();
        assert!(callers_only.callees.is_empty());

        let unknown = fx.engine.call_graph("Ghost#none", Direction::Both, 1).unwrap();
        assert!(unknown.callers.is_empty());
        assert!(unknown.callees.is_empty());
    }

    #[tokio::test]
    async fn test_find_similar_matches_identical_structure() {
        let doc_json = r#"{"file_type":"model","line_count":3,"symbols":[{"name":"User","type":"class","start_line":1,"end_line":3,"metadata":[{"type":"validation","value":"email"}]}]}"#;
        let fx = fixture(doc_json);
        seed_user_model(&fx.store);

        // Add a structurally unrelated class
        fx.store
            .upsert_file(
                "app/models/widget.rb",
                &FactDocument {
                    hash: None,
                    file_type: Some("model".to_string()),
                    line_count: 2,
                    symbols: vec![symbol("Widget", SymbolKind::Class, None, (1, 2))],
                    requires: Vec::new(),
                    require_relatives: Vec::new(),
                },
            )
            .unwrap();

        let matches = fx
            .engine
            .find_similar("class User\nend", 5, 0.7)
            .await
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].symbol, "User");
        assert!((matches[0].similarity - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_file_summary_fields() {
        let doc_json = r#"{"file_type":"model","line_count":12,"requires":["bcrypt"],"symbols":[{"name":"User","type":"class","start_line":1,"end_line":12,"metadata":[{"type":"association","value":{"type":"has_many","name":"posts"}},{"type":"validation","value":"email"}]},{"name":"full_name","type":"method","parent":"User","start_line":5,"end_line":7}]}"#;
        let fx = fixture(doc_json);

        let file = fx.repo.path().join("app/models/user.rb");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "class User\nend\n").unwrap();

        let summary = fx.engine.file_summary("app/models/user.rb").await.unwrap();
        assert_eq!(summary["type"], "model");
        assert_eq!(summary["classes"], json!(["User"]));
        assert_eq!(summary["methods"], json!(["full_name"]));
        assert_eq!(summary["validations"], json!(["email"]));
        assert_eq!(summary["dependencies"], json!(["bcrypt"]));
        assert_eq!(summary["line_count"], 12);
    }

    #[tokio::test]
    async fn test_file_summary_parse_failure() {
        let repo = tempdir().unwrap();
        let script = repo.path().join("fail.sh");
        fs::write(&script, "exit 1\n").unwrap();

        let store = IndexDatabase::new(repo.path().join("test.db")).unwrap();
        let extractor = Arc::new(Extractor::new("sh", &script, Duration::from_secs(5)));
        let rules = Arc::new(FileTypeRules::from_config(&Config::default()).unwrap());
        let engine = QueryEngine::new(repo.path(), store, extractor, rules);

        let file = repo.path().join("app/models/user.rb");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "class User\nend\n").unwrap();

        let summary = engine.file_summary("app/models/user.rb").await.unwrap();
        assert_eq!(summary["type"], "model");
        assert_eq!(summary["error"], "Failed to parse file");
    }

    #[test]
    fn test_find_tests_conventions() {
        let fx = fixture("{}");

        for path in [
            "spec/models/user_spec.rb",
            "spec/requests/users_spec.rb",
            "spec/services/billing_service_spec.rb",
        ] {
            let full = fx.repo.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(&full, "# spec\n").unwrap();
        }

        let tests = fx.engine.find_tests("app/models/user.rb");
        assert_eq!(
            tests,
            vec![
                "spec/models/user_spec.rb".to_string(),
                "spec/requests/users_spec.rb".to_string(),
            ]
        );

        let tests = fx.engine.find_tests("app/services/billing_service.rb");
        assert_eq!(tests, vec!["spec/services/billing_service_spec.rb".to_string()]);

        assert!(fx.engine.find_tests("lib/tasks/cleanup.rb").is_empty());
    }

    #[test]
    fn test_index_status_counts_by_type() {
        let fx = fixture("{}");
        seed_user_model(&fx.store);
        fx.store
            .upsert_file(
                "app/jobs/cleanup_job.rb",
                &FactDocument {
                    hash: None,
                    file_type: Some("job".to_string()),
                    line_count: 4,
                    symbols: vec![symbol("CleanupJob", SymbolKind::Class, None, (1, 4))],
                    requires: Vec::new(),
                    require_relatives: Vec::new(),
                },
            )
            .unwrap();

        let status = fx.engine.index_status().unwrap();
        assert_eq!(status.indexed_files, 2);
        assert_eq!(status.total_symbols, 3);
        assert_ne!(status.last_update, "never");
        assert_eq!(status.file_types.get("model"), Some(&1));
        assert_eq!(status.file_types.get("job"), Some(&1));
        assert!(status.file_types.get("spec").is_none());
    }

    #[test]
    fn test_dominant_kind() {
        let doc = FactDocument {
            symbols: vec![
                symbol("User", SymbolKind::Class, None, (1, 9)),
                symbol("a", SymbolKind::Method, Some("User"), (2, 3)),
                symbol("b", SymbolKind::Method, Some("User"), (4, 5)),
            ],
            ..FactDocument::default()
        };
        assert_eq!(dominant_kind(&doc), SymbolKind::Method);
        assert_eq!(dominant_kind(&FactDocument::default()), SymbolKind::Method);
    }

    #[test]
    fn test_annotation_tokens() {
        assert_eq!(
            annotation_token("association", &json!({"type": "has_many", "name": "posts"})),
            Some("assoc:has_many:posts".to_string())
        );
        assert_eq!(
            annotation_token("validation", &json!("email")),
            Some("valid:email".to_string())
        );
        assert_eq!(
            annotation_token("callback", &json!({"type": "before_save", "method": "set_slug"})),
            Some("cb:before_save:set_slug".to_string())
        );
        assert_eq!(annotation_token("route", &json!("GET /users")), None);
    }

    #[test]
    fn test_jaccard_bounds() {
        let a: HashSet<String> = ["x".to_string(), "y".to_string()].into_iter().collect();
        let b: HashSet<String> = ["y".to_string(), "z".to_string()].into_iter().collect();
        let empty = HashSet::new();

        assert!((jaccard(&a, &a) - 1.0).abs() < f64::EPSILON);
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(jaccard(&a, &empty), 0.0);
        assert_eq!(jaccard(&empty, &empty), 0.0);
    }

    proptest! {
        #[test]
        fn prop_jaccard_symmetric_and_bounded(
            a in proptest::collection::hash_set("[a-c]{1,3}", 0..8),
            b in proptest::collection::hash_set("[a-c]{1,3}", 0..8),
        ) {
            let left = jaccard(&a, &b);
            let right = jaccard(&b, &a);
            prop_assert_eq!(left, right);
            prop_assert!((0.0..=1.0).contains(&left));
            if !a.is_empty() {
                prop_assert!((jaccard(&a, &a) - 1.0).abs() < f64::EPSILON);
            }
        }
    }
}
