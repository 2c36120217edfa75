// Configuration management for railgraph

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub storage: StorageConfig,
    pub extractor: ExtractorConfig,
    pub indexing: IndexingConfig,
    /// Ordered path-convention table mapping classification tags to path
    /// patterns. First match wins; consulted by the search filter, the
    /// classification fallback, and status reporting.
    pub file_types: Vec<FileTypeEntry>,
    pub logging: LoggingConfig,
    pub mcp: McpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database location, relative to the project root
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Interpreter running the extractor script
    pub command: String,
    /// Path to the structural extractor script
    pub script: String,
    /// Hard wall-clock deadline per file
    pub timeout_secs: u64,
    /// Cap on captured stderr diagnostics
    pub max_diagnostic_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Directory names pruned from discovery
    pub exclude: Vec<String>,
    /// File extensions considered source files
    pub extensions: Vec<String>,
    /// Width of the extraction worker pool
    pub concurrency: usize,
    /// Watch for changes while serving
    pub watch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTypeEntry {
    pub tag: String,
    /// Regex matched against relative file paths
    pub pattern: String,
    /// LIKE-style globs used for per-tag file counting; a single glob
    /// cannot express regex alternation, hence a list.
    pub globs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    pub transport: String,
}

/// Rails path conventions, in first-match-wins order.
static DEFAULT_FILE_TYPES: Lazy<Vec<FileTypeEntry>> = Lazy::new(|| {
    let entry = |tag: &str, pattern: &str, globs: &[&str]| FileTypeEntry {
        tag: tag.to_string(),
        pattern: pattern.to_string(),
        globs: globs.iter().map(|glob| glob.to_string()).collect(),
    };

    vec![
        entry("model", r"app/models/.*\.rb$", &["app/models/*.rb"]),
        entry(
            "controller",
            r"app/controllers/.*\.rb$",
            &["app/controllers/*.rb"],
        ),
        entry("service", r"app/services/.*\.rb$", &["app/services/*.rb"]),
        entry(
            "job",
            r"(app/jobs/|app/sidekiq/).*\.rb$",
            &["app/jobs/*.rb", "app/sidekiq/*.rb"],
        ),
        entry("policy", r"app/policies/.*\.rb$", &["app/policies/*.rb"]),
        entry("mailer", r"app/mailers/.*\.rb$", &["app/mailers/*.rb"]),
        entry("helper", r"app/helpers/.*\.rb$", &["app/helpers/*.rb"]),
        entry(
            "concern",
            r"app/(controllers|models)/concerns/.*\.rb$",
            &["app/controllers/concerns/*.rb", "app/models/concerns/*.rb"],
        ),
        entry(
            "spec",
            r"(spec|test)/.*_(spec|test)\.rb$",
            &["spec/*_spec.rb", "test/*_test.rb"],
        ),
        entry("migration", r"db/migrate/.*\.rb$", &["db/migrate/*.rb"]),
    ]
});

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            storage: StorageConfig::default(),
            extractor: ExtractorConfig::default(),
            indexing: IndexingConfig::default(),
            file_types: DEFAULT_FILE_TYPES.clone(),
            logging: LoggingConfig::default(),
            mcp: McpConfig::default(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "unnamed-project".to_string(),
            root: ".".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: ".railgraph/index.db".to_string(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            command: "ruby".to_string(),
            script: "script/fact_extractor.rb".to_string(),
            timeout_secs: 20,
            max_diagnostic_bytes: 4096,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            exclude: vec![
                "vendor".to_string(),
                "node_modules".to_string(),
                "tmp".to_string(),
                "log".to_string(),
                ".git".to_string(),
                ".railgraph".to_string(),
            ],
            extensions: vec!["rb".to_string()],
            concurrency: 8,
            watch: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from project directory
    /// Looks for .railgraph.toml in the project root
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> Self {
        let config_path = project_dir.as_ref().join(".railgraph.toml");

        match Self::from_file(&config_path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", config_path.display());
                config
            }
            Err(e) => {
                tracing::debug!("Could not load config from {}: {}", config_path.display(), e);
                tracing::info!("Using default configuration");
                Self::default()
            }
        }
    }

    /// Absolute database path for a project root
    pub fn db_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.storage.db_path)
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.project.name.is_empty() {
            return Err(anyhow::anyhow!("Project name cannot be empty"));
        }

        if self.extractor.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Extractor timeout must be greater than 0"));
        }
        if self.extractor.max_diagnostic_bytes == 0 {
            return Err(anyhow::anyhow!(
                "Extractor diagnostic cap must be greater than 0"
            ));
        }

        if self.indexing.concurrency == 0 {
            return Err(anyhow::anyhow!("Indexing concurrency must be greater than 0"));
        }
        if self.indexing.extensions.is_empty() {
            return Err(anyhow::anyhow!("At least one source extension is required"));
        }

        for entry in &self.file_types {
            Regex::new(&entry.pattern).map_err(|e| {
                anyhow::anyhow!("Invalid pattern for file type '{}': {}", entry.tag, e)
            })?;
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level));
        }
        let valid_formats = ["compact", "pretty", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!("Invalid log format: {}", self.logging.format));
        }

        let valid_transports = ["stdio"];
        if !valid_transports.contains(&self.mcp.transport.as_str()) {
            return Err(anyhow::anyhow!("Invalid MCP transport: {}", self.mcp.transport));
        }

        Ok(())
    }
}

/// Compiled file-type classification table
pub struct FileTypeRules {
    rules: Vec<FileTypeRule>,
}

pub struct FileTypeRule {
    pub tag: String,
    pub pattern: Regex,
    pub globs: Vec<String>,
}

impl FileTypeRules {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let rules = config
            .file_types
            .iter()
            .map(|entry| {
                Ok(FileTypeRule {
                    tag: entry.tag.clone(),
                    pattern: Regex::new(&entry.pattern).map_err(|e| {
                        anyhow::anyhow!("Invalid pattern for file type '{}': {}", entry.tag, e)
                    })?,
                    globs: entry.globs.clone(),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// Classify a relative path; first matching rule wins
    pub fn classify(&self, file_path: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(file_path))
            .map(|rule| rule.tag.as_str())
    }

    /// Whether a path matches a specific tag's convention
    pub fn matches(&self, tag: &str, file_path: &str) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.tag == tag && rule.pattern.is_match(file_path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileTypeRule> {
        self.rules.iter()
    }
}
