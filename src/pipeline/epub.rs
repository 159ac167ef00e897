//! EPUB rendering: markdown + title + author in, EPUB bytes out.
//!
//! [`PandocRenderer`] shells out to `pandoc`. The markdown is written into a
//! scratch `TempDir` together with the output file, so nothing is left
//! behind whether pandoc succeeds or not.

use crate::error::Paper2EpubError;
use crate::pipeline::extract::stderr_tail;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

#[async_trait]
pub trait EpubRenderer: Send + Sync {
    async fn render(&self, markdown: &str, title: &str, author: &str) -> Result<Vec<u8>, Paper2EpubError>;
}

/// [`EpubRenderer`] backed by the `pandoc` executable.
#[derive(Debug, Clone)]
pub struct PandocRenderer {
    program: PathBuf,
    resource_paths: Vec<PathBuf>,
    language: String,
}

impl PandocRenderer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            resource_paths: Vec::new(),
            language: "en".to_string(),
        }
    }

    /// Directory pandoc searches for relative image paths.
    pub fn with_resource_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_paths.push(dir.into());
        self
    }

    pub fn with_language(mut self, lang: impl Into<String>) -> Self {
        self.language = lang.into();
        self
    }

    fn args(&self, input: &Path, output: &Path, title: &str, author: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            input.into(),
            "--from".into(),
            "markdown".into(),
            "--to".into(),
            "epub3".into(),
            "--output".into(),
            output.into(),
            "--metadata".into(),
            format!("title={title}").into(),
            "--metadata".into(),
            format!("author={author}").into(),
            "--metadata".into(),
            format!("lang={}", self.language).into(),
        ];
        if !self.resource_paths.is_empty() {
            let joined = std::env::join_paths(&self.resource_paths)
                .unwrap_or_else(|_| self.resource_paths[0].clone().into_os_string());
            args.push("--resource-path".into());
            args.push(joined);
        }
        args
    }
}

#[async_trait]
impl EpubRenderer for PandocRenderer {
    async fn render(&self, markdown: &str, title: &str, author: &str) -> Result<Vec<u8>, Paper2EpubError> {
        let scratch = TempDir::new().map_err(|e| Paper2EpubError::Internal(format!("tempdir: {e}")))?;
        let input = scratch.path().join("book.md");
        let output = scratch.path().join("book.epub");

        tokio::fs::write(&input, markdown)
            .await
            .map_err(|e| Paper2EpubError::Internal(format!("write {}: {e}", input.display())))?;

        info!("Rendering EPUB '{}' with {}", title, self.program.display());
        let result = Command::new(&self.program)
            .args(self.args(&input, &output, title, author))
            .output()
            .await
            .map_err(|e| Paper2EpubError::RendererUnavailable {
                hint: format!("could not run {}: {e}", self.program.display()),
            })?;

        if !result.status.success() {
            return Err(Paper2EpubError::RenderFailed {
                message: stderr_tail(&result.stderr, result.status),
            });
        }

        let bytes = tokio::fs::read(&output)
            .await
            .map_err(|e| Paper2EpubError::RenderFailed {
                message: format!("pandoc produced no output: {e}"),
            })?;
        debug!("EPUB is {} bytes", bytes.len());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn args_carry_metadata() {
        let r = PandocRenderer::new("pandoc");
        let args = strings(&r.args(Path::new("in.md"), Path::new("out.epub"), "Deep Nets", "Academic Paper"));
        assert_eq!(args[0], "in.md");
        assert!(args.contains(&"title=Deep Nets".to_string()));
        assert!(args.contains(&"author=Academic Paper".to_string()));
        assert!(args.contains(&"lang=en".to_string()));
        assert!(!args.contains(&"--resource-path".to_string()));
    }

    #[test]
    fn resource_path_added() {
        let r = PandocRenderer::new("pandoc").with_resource_path("/srv/images");
        let args = strings(&r.args(Path::new("in.md"), Path::new("out.epub"), "T", "A"));
        let i = args.iter().position(|a| a == "--resource-path").unwrap();
        assert_eq!(args[i + 1], "/srv/images");
    }

    #[tokio::test]
    async fn missing_pandoc_is_unavailable() {
        let r = PandocRenderer::new("/nonexistent/pandoc");
        let err = r.render("# T", "T", "A").await.unwrap_err();
        assert!(matches!(err, Paper2EpubError::RendererUnavailable { .. }));
    }
}
