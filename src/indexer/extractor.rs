// Subprocess gateway to the external structural extractor

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::config::ExtractorConfig;
use crate::index::FactDocument;

/// Extraction failures, per outcome. The gateway never retries; counting
/// and surfacing failures belongs to the orchestrator.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extractor timed out after {0:?}")]
    Timeout(Duration),
    #[error("extractor exited with status {status}: {diagnostic}")]
    Failed { status: i32, diagnostic: String },
    #[error("extractor produced malformed output: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to run extractor: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Invokes the external extractor as a subprocess under a hard wall-clock
/// deadline.
pub struct Extractor {
    command: String,
    script: PathBuf,
    timeout: Duration,
    max_diagnostic_bytes: usize,
}

impl Extractor {
    pub fn from_config(config: &ExtractorConfig) -> Self {
        // RUBY_BIN overrides the configured interpreter, for environments
        // where the extractor must run under a version manager shim.
        let command = std::env::var("RUBY_BIN").unwrap_or_else(|_| config.command.clone());

        Self {
            command,
            script: PathBuf::from(&config.script),
            timeout: Duration::from_secs(config.timeout_secs),
            max_diagnostic_bytes: config.max_diagnostic_bytes,
        }
    }

    #[cfg(test)]
    pub fn new(command: impl Into<String>, script: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            script: script.into(),
            timeout,
            max_diagnostic_bytes: 4096,
        }
    }

    /// Extract structural facts from one file. The subprocess is killed if
    /// it outlives the deadline.
    pub async fn extract(&self, file_path: &Path) -> Result<FactDocument, ExtractError> {
        debug!("Extracting facts from {}", file_path.display());

        let child = Command::new(&self.command)
            .arg(&self.script)
            .arg(file_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExtractError::Spawn)?;

        // wait_with_output takes ownership; dropping the future on timeout
        // reaps the child via kill_on_drop.
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return Err(ExtractError::Spawn(err)),
            Err(_elapsed) => {
                error!(
                    "Extractor timed out after {:?} on {}",
                    self.timeout,
                    file_path.display()
                );
                return Err(ExtractError::Timeout(self.timeout));
            }
        };

        if !output.status.success() {
            let diagnostic = truncate_diagnostic(
                String::from_utf8_lossy(&output.stderr).into_owned(),
                self.max_diagnostic_bytes,
            );
            return Err(ExtractError::Failed {
                status: output.status.code().unwrap_or(-1),
                diagnostic,
            });
        }

        let mut doc: FactDocument =
            serde_json::from_slice(&output.stdout).map_err(ExtractError::Malformed)?;

        if doc.hash.is_none() {
            doc.hash = tokio::fs::read(file_path)
                .await
                .ok()
                .map(|bytes| blake3::hash(&bytes).to_string());
        }

        Ok(doc)
    }

    /// Extract facts from an ad hoc source fragment by writing it to a
    /// temporary file.
    pub async fn extract_fragment(&self, source: &str) -> Result<FactDocument, ExtractError> {
        let fragment = tempfile::Builder::new()
            .prefix("railgraph-fragment")
            .suffix(".rb")
            .tempfile()
            .map_err(ExtractError::Spawn)?;

        std::fs::write(fragment.path(), source).map_err(ExtractError::Spawn)?;

        self.extract(fragment.path()).await
    }
}

/// Cap captured diagnostics so a misbehaving extractor cannot grow memory
/// without bound. Cuts on a char boundary.
fn truncate_diagnostic(mut diagnostic: String, max_bytes: usize) -> String {
    if diagnostic.len() > max_bytes {
        let mut cut = max_bytes;
        while !diagnostic.is_char_boundary(cut) {
            cut -= 1;
        }
        diagnostic.truncate(cut);
    }
    diagnostic
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fake_extractor.sh");
        fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_successful_extraction() {
        let dir = tempdir().unwrap();
        let script = write_script(
            &dir,
            r#"echo '{"file_type":"model","line_count":3,"symbols":[{"name":"User","type":"class","start_line":1,"end_line":3}]}'"#,
        );
        let source = dir.path().join("user.rb");
        fs::write(&source, "class User\nend\n").unwrap();

        let extractor = Extractor::new("sh", &script, Duration::from_secs(5));
        let doc = extractor.extract(&source).await.unwrap();

        assert_eq!(doc.file_type.as_deref(), Some("model"));
        assert_eq!(doc.symbols.len(), 1);
        // Missing hash is filled from the file bytes
        assert!(doc.hash.is_some());
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_diagnostic() {
        let dir = tempdir().unwrap();
        let script = write_script(&dir, "echo 'syntax error on line 3' >&2\nexit 1\n");
        let source = dir.path().join("broken.rb");
        fs::write(&source, "class").unwrap();

        let extractor = Extractor::new("sh", &script, Duration::from_secs(5));
        let err = extractor.extract(&source).await.unwrap_err();

        match err {
            ExtractError::Failed { status, diagnostic } => {
                assert_eq!(status, 1);
                assert!(diagnostic.contains("syntax error"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_output() {
        let dir = tempdir().unwrap();
        let script = write_script(&dir, "echo 'this is not json'\n");
        let source = dir.path().join("user.rb");
        fs::write(&source, "class User; end").unwrap();

        let extractor = Extractor::new("sh", &script, Duration::from_secs(5));
        let err = extractor.extract(&source).await.unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_timeout_kills_subprocess() {
        let dir = tempdir().unwrap();
        let script = write_script(&dir, "sleep 30\n");
        let source = dir.path().join("user.rb");
        fs::write(&source, "class User; end").unwrap();

        let extractor = Extractor::new("sh", &script, Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = extractor.extract(&source).await.unwrap_err();

        assert!(matches!(err, ExtractError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_fragment_extraction() {
        let dir = tempdir().unwrap();
        let script = write_script(
            &dir,
            r#"echo '{"file_type":"other","line_count":1,"symbols":[]}'"#,
        );

        let extractor = Extractor::new("sh", &script, Duration::from_secs(5));
        let doc = extractor
            .extract_fragment("validates :email, presence: true")
            .await
            .unwrap();
        assert_eq!(doc.file_type.as_deref(), Some("other"));
    }

    #[test]
    fn test_truncate_diagnostic() {
        assert_eq!(truncate_diagnostic("short".to_string(), 100), "short");
        assert_eq!(truncate_diagnostic("abcdef".to_string(), 4), "abcd");
        // Never cuts inside a multi-byte char
        let truncated = truncate_diagnostic("aé".to_string(), 2);
        assert_eq!(truncated, "a");
    }
}
