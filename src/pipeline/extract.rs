//! PDF extraction: PDF file in, raw markdown plus figure images out.
//!
//! The extractor is an external collaborator. [`MarkerCli`] drives the
//! `marker_single` command line tool; anything else can be plugged in by
//! implementing [`PdfExtractor`]. Extractor output is untrusted: it goes
//! through [`crate::pipeline::clean`] before anyone sees it.

use crate::error::Paper2EpubError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// What an extractor produced.
///
/// Image paths point into `workdir` when one is held; they stay valid until
/// the `Extraction` is dropped.
#[derive(Debug)]
pub struct Extraction {
    pub markdown: String,
    /// Figure images in document order.
    pub images: Vec<PathBuf>,
    workdir: Option<TempDir>,
}

impl Extraction {
    pub fn new(markdown: impl Into<String>, images: Vec<PathBuf>) -> Self {
        Self {
            markdown: markdown.into(),
            images,
            workdir: None,
        }
    }

    /// Keep `dir` alive for as long as the extraction.
    pub fn with_workdir(mut self, dir: TempDir) -> Self {
        self.workdir = Some(dir);
        self
    }
}

#[async_trait]
pub trait PdfExtractor: Send + Sync {
    async fn extract(&self, pdf: &Path) -> Result<Extraction, Paper2EpubError>;
}

/// [`PdfExtractor`] running `marker_single <pdf> --output_dir <tmp>`.
#[derive(Debug, Clone)]
pub struct MarkerCli {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl MarkerCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    /// Extra flags passed through to `marker_single`, e.g. `--force_ocr`.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl PdfExtractor for MarkerCli {
    async fn extract(&self, pdf: &Path) -> Result<Extraction, Paper2EpubError> {
        let workdir = TempDir::new().map_err(|e| Paper2EpubError::Internal(format!("tempdir: {e}")))?;
        info!("Extracting {} with {}", pdf.display(), self.program.display());

        let output = Command::new(&self.program)
            .arg(pdf)
            .arg("--output_format")
            .arg("markdown")
            .arg("--output_dir")
            .arg(workdir.path())
            .args(&self.extra_args)
            .output()
            .await
            .map_err(|e| Paper2EpubError::ExtractorUnavailable {
                hint: format!("could not run {}: {e}", self.program.display()),
            })?;

        if !output.status.success() {
            return Err(Paper2EpubError::ExtractionFailed {
                path: pdf.to_path_buf(),
                message: stderr_tail(&output.stderr, output.status),
            });
        }

        let (md_path, images) = collect_outputs(workdir.path())
            .map_err(|e| Paper2EpubError::Internal(format!("scan extractor output: {e}")))?;
        let md_path = md_path.ok_or_else(|| Paper2EpubError::ExtractionFailed {
            path: pdf.to_path_buf(),
            message: "extractor produced no markdown file".into(),
        })?;
        let markdown = tokio::fs::read_to_string(&md_path)
            .await
            .map_err(|e| Paper2EpubError::ExtractionFailed {
                path: pdf.to_path_buf(),
                message: format!("read {}: {e}", md_path.display()),
            })?;

        debug!("Extracted {} chars and {} images", markdown.len(), images.len());
        Ok(Extraction::new(markdown, images).with_workdir(workdir))
    }
}

/// Last few lines of a failed command's stderr.
pub(crate) fn stderr_tail(stderr: &[u8], status: std::process::ExitStatus) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines[lines.len().saturating_sub(5)..].join("\n");
    if tail.is_empty() {
        format!("exited with {status}")
    } else {
        format!("exited with {status}: {tail}")
    }
}

/// Find the first markdown file and every image under `dir`.
///
/// Images are ordered by the numbers in their names, so `_page_2_Figure_1`
/// comes before `_page_10_Figure_1`.
fn collect_outputs(dir: &Path) -> std::io::Result<(Option<PathBuf>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    walk(dir, &mut files)?;

    let mut markdown: Vec<&PathBuf> = files.iter().filter(|p| has_extension(p, &["md"])).collect();
    markdown.sort();
    let md = markdown.first().map(|p| (*p).clone());

    let mut images: Vec<PathBuf> = files
        .iter()
        .filter(|p| has_extension(p, IMAGE_EXTENSIONS))
        .cloned()
        .collect();
    images.sort_by_key(|p| natural_key(p));
    Ok((md, images))
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| exts.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

fn natural_key(path: &Path) -> (Vec<u64>, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let numbers = name
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|run| run.parse().ok())
        .collect();
    (numbers, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_in_page_order() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("paper");
        std::fs::create_dir(&sub).unwrap();
        for name in [
            "paper.md",
            "paper_meta.json",
            "_page_10_Figure_1.jpeg",
            "_page_2_Figure_3.png",
            "_page_2_Figure_1.jpeg",
        ] {
            std::fs::write(sub.join(name), b"x").unwrap();
        }

        let (md, images) = collect_outputs(dir.path()).unwrap();
        assert_eq!(md.unwrap().file_name().unwrap(), "paper.md");
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            ["_page_2_Figure_1.jpeg", "_page_2_Figure_3.png", "_page_10_Figure_1.jpeg"]
        );
    }

    #[test]
    fn no_markdown_found() {
        let dir = tempfile::tempdir().unwrap();
        let (md, images) = collect_outputs(dir.path()).unwrap();
        assert!(md.is_none());
        assert!(images.is_empty());
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let marker = MarkerCli::new("/nonexistent/marker_single");
        let err = marker.extract(Path::new("paper.pdf")).await.unwrap_err();
        assert!(matches!(err, Paper2EpubError::ExtractorUnavailable { .. }));
        assert!(!err.is_client_error());
    }

    #[test]
    fn extraction_without_workdir() {
        let e = Extraction::new("# T", vec![PathBuf::from("/tmp/a.png")]);
        assert_eq!(e.markdown, "# T");
        assert!(e.workdir.is_none());
    }
}
