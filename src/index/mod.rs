// Fact schema and index storage

pub mod db;
pub mod schema;

use serde::{Deserialize, Serialize};

/// Structured output of the external extractor for one source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactDocument {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub line_count: u32,
    #[serde(default)]
    pub symbols: Vec<SymbolFact>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub require_relatives: Vec<String>,
}

/// One named structural unit (class, module, method, constant) in a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolFact {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SymbolKind,
    #[serde(default)]
    pub parent: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub doc: Option<String>,
    /// Raw per-symbol fact tree, persisted verbatim and never interpreted
    /// by the store.
    #[serde(default)]
    pub ast: serde_json::Value,
    #[serde(default)]
    pub references: Vec<ReferenceFact>,
    #[serde(default)]
    pub metadata: Vec<AnnotationFact>,
}

/// Textual, unresolved edge from a symbol to a target name it mentions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceFact {
    pub to: String,
    pub line: u32,
    #[serde(default)]
    pub context: Option<String>,
}

/// Typed, value-bearing domain fact attached to a symbol (association,
/// validation, callback, route, ...). The kind is an open string so new
/// extractor vocabularies need no schema change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationFact {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: serde_json::Value,
}

/// Symbol kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum SymbolKind {
    Class,
    Module,
    Method,
    ClassMethod,
    Constant,
    Other,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Class => "class",
            SymbolKind::Module => "module",
            SymbolKind::Method => "method",
            SymbolKind::ClassMethod => "class_method",
            SymbolKind::Constant => "constant",
            SymbolKind::Other => "other",
        }
    }

    /// Unknown kinds map to `Other` rather than failing the document.
    pub fn parse(s: &str) -> Self {
        match s {
            "class" => SymbolKind::Class,
            "module" => SymbolKind::Module,
            "method" => SymbolKind::Method,
            "class_method" => SymbolKind::ClassMethod,
            "constant" => SymbolKind::Constant,
            _ => SymbolKind::Other,
        }
    }
}

impl From<String> for SymbolKind {
    fn from(s: String) -> Self {
        SymbolKind::parse(&s)
    }
}

impl From<SymbolKind> for String {
    fn from(kind: SymbolKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Symbol visibility
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum Visibility {
    #[default]
    Public,
    Private,
    Protected,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Protected => "protected",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "private" => Visibility::Private,
            "protected" => Visibility::Protected,
            _ => Visibility::Public,
        }
    }
}

impl From<String> for Visibility {
    fn from(s: String) -> Self {
        Visibility::parse(&s)
    }
}

impl From<Visibility> for String {
    fn from(vis: Visibility) -> Self {
        vis.as_str().to_string()
    }
}
