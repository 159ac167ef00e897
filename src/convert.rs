//! Conversion entry points.
//!
//! ```text
//! input ──▶ extract ──▶ stage images ──▶ clean ──▶ [treat] ──▶ polish ──▶ [render]
//! ```
//!
//! Every fatal problem comes back as a [`Paper2EpubError`]; treatment never
//! fails (see [`crate::pipeline::llm`]). No partial output is returned: a
//! file written by [`convert_to_epub`] is either complete or absent.

use crate::config::{ConversionConfig, TreatmentConfig};
use crate::document::{Document, TreatmentRequest, TreatmentResult};
use crate::error::Paper2EpubError;
use crate::output::{ConversionOutput, ConversionStats};
use crate::pipeline::epub::{EpubRenderer, PandocRenderer};
use crate::pipeline::extract::{MarkerCli, PdfExtractor};
use crate::pipeline::{clean, input, llm, postprocess};
use crate::progress::Stage;
use crate::registry::{self, ImageStore, UploadRegistry};
use crate::service::resolve_service;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Clean raw extractor markdown. See [`clean::clean`].
pub fn clean_markdown(raw: &str, source_filename: &str, image_urls: &[String]) -> Document {
    clean::clean(raw, source_filename, image_urls)
}

/// Treat markdown with whichever text service `config` resolves to.
///
/// Never fails. A provider that cannot be constructed is treated like any
/// other AI failure: logged, recorded, answered by the rule engine.
pub async fn treat_markdown(request: &TreatmentRequest, config: &TreatmentConfig) -> TreatmentResult {
    match resolve_service(config) {
        Ok(service) => llm::treat(request, service.as_deref(), config).await,
        Err(e) => {
            warn!("Text service unavailable, using rule-based treatment: {}", e);
            let mut result = llm::treat(request, None, config).await;
            result.fallback_reason = Some(e.to_string());
            result
        }
    }
}

/// Convert a PDF path or URL to markdown.
pub async fn convert_to_markdown(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Paper2EpubError> {
    let input_str = input_str.as_ref();
    info!("Starting conversion: {}", input_str);

    notify_start(config, Stage::Resolve);
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    notify_complete(config, Stage::Resolve, 0);

    let filename = resolved.filename();
    let session = registry::slug(&filename);
    convert_pdf(resolved.path(), &filename, &session, config).await
}

/// Convert a previously registered upload.
///
/// The upload is removed from the registry, and its file deleted, whether or
/// not conversion succeeds.
pub async fn convert_upload(
    uploads: &UploadRegistry,
    id: &str,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Paper2EpubError> {
    let upload = uploads.take(id)?;
    info!("Converting upload '{}' ({})", id, upload.filename);

    let result = match input::resolve_local(&upload.path) {
        Ok(resolved) => convert_pdf(resolved.path(), &upload.filename, id, config).await,
        Err(e) => Err(e),
    };
    registry::discard_file(&upload.path);
    result
}

/// Render markdown to EPUB bytes.
pub async fn generate_epub(
    markdown: &str,
    title: &str,
    config: &ConversionConfig,
) -> Result<Vec<u8>, Paper2EpubError> {
    if markdown.trim().is_empty() {
        return Err(Paper2EpubError::EmptyDocument);
    }
    let renderer = resolve_renderer(config)?;
    let title = if title.trim().is_empty() {
        clean::extract_title(markdown)
    } else {
        title.trim().to_string()
    };

    notify_start(config, Stage::Render);
    let bytes = renderer
        .render(&postprocess::polish(markdown), &title, &config.author)
        .await?;
    notify_complete(config, Stage::Render, bytes.len());
    Ok(bytes)
}

/// Convert a PDF path or URL straight to an EPUB file.
///
/// The EPUB is written to a temporary file in the target directory and
/// renamed into place, so `output_path` never holds a partial book.
pub async fn convert_to_epub(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Paper2EpubError> {
    let output = convert_to_markdown(input_str, config).await?;
    let bytes = generate_epub(&output.markdown, &output.title, config).await?;
    write_atomic(output_path.as_ref(), &bytes)?;
    info!("Wrote {} ({} bytes)", output_path.as_ref().display(), bytes.len());
    Ok(output)
}

/// Write `bytes` via a temp file in the same directory, then rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Paper2EpubError> {
    let fail = |source: std::io::Error| Paper2EpubError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir().map_err(fail)?,
    };
    std::fs::create_dir_all(&dir).map_err(fail)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(fail)?;
    tmp.write_all(bytes).map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    Ok(())
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn convert_pdf(
    pdf: &Path,
    filename: &str,
    session: &str,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Paper2EpubError> {
    let total_start = Instant::now();
    let extractor = resolve_extractor(config)?;

    // ── Extract ──────────────────────────────────────────────────────────
    notify_start(config, Stage::Extract);
    let extract_start = Instant::now();
    let extraction = extractor.extract(pdf).await?;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;
    notify_complete(config, Stage::Extract, extraction.markdown.len());
    info!(
        "Extracted {} chars and {} images in {}ms",
        extraction.markdown.len(),
        extraction.images.len(),
        extract_duration_ms
    );

    // ── Stage images ─────────────────────────────────────────────────────
    let store = ImageStore::new(
        &config.image_root,
        config.image_url_prefix.clone(),
        Duration::from_secs(config.image_retention_secs),
    );
    store.sweep_expired();
    let urls = store.stage(session, &extraction.images).await?;

    // ── Clean ────────────────────────────────────────────────────────────
    notify_start(config, Stage::Clean);
    let document = clean::clean(&extraction.markdown, filename, &urls);
    let cleaned = document.to_markdown();
    notify_complete(config, Stage::Clean, cleaned.len());
    debug!(
        "Cleaned: {} → {} chars, {} images ({} unresolved)",
        extraction.markdown.len(),
        cleaned.len(),
        document.images.len(),
        document.unresolved_images()
    );

    let mut stats = ConversionStats {
        raw_chars: extraction.markdown.chars().count(),
        cleaned_chars: cleaned.chars().count(),
        images_found: document.images.len(),
        images_unresolved: document.unresolved_images(),
        extract_duration_ms,
        ..Default::default()
    };

    // ── Treat ────────────────────────────────────────────────────────────
    let body = if config.treat {
        notify_start(config, Stage::Treat);
        let treat_start = Instant::now();
        let request = TreatmentRequest::new(cleaned, config.instruction.clone().unwrap_or_default());
        let result = treat_markdown(&request, &config.treatment).await;
        stats.treatment_duration_ms = treat_start.elapsed().as_millis() as u64;
        stats.treatment_engine = Some(result.engine);
        if let Some(reason) = &result.fallback_reason {
            if let Some(cb) = &config.progress_callback {
                cb.on_treatment_fallback(reason);
            }
        }
        stats.fallback_reason = result.fallback_reason;
        notify_complete(config, Stage::Treat, result.markdown.len());
        result.markdown
    } else {
        cleaned
    };

    let markdown = postprocess::polish(&body);
    let title = match &config.title {
        Some(t) => t.clone(),
        None => clean::extract_title(&markdown),
    };
    stats.final_chars = markdown.chars().count();
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Conversion complete: '{}', {} chars in {}ms",
        title, stats.final_chars, stats.total_duration_ms
    );

    Ok(ConversionOutput {
        markdown,
        title,
        images: document.images,
        stats,
    })
}

fn resolve_extractor(config: &ConversionConfig) -> Result<Arc<dyn PdfExtractor>, Paper2EpubError> {
    if let Some(ref extractor) = config.extractor {
        return Ok(Arc::clone(extractor));
    }
    match &config.capabilities.extractor {
        Some(program) => Ok(Arc::new(MarkerCli::new(program))),
        None => Err(Paper2EpubError::ExtractorUnavailable {
            hint: format!(
                "install marker-pdf so `marker_single` is on PATH, or set {}",
                crate::config::MARKER_ENV
            ),
        }),
    }
}

fn resolve_renderer(config: &ConversionConfig) -> Result<Arc<dyn EpubRenderer>, Paper2EpubError> {
    if let Some(ref renderer) = config.renderer {
        return Ok(Arc::clone(renderer));
    }
    match &config.capabilities.renderer {
        Some(program) => Ok(Arc::new(
            PandocRenderer::new(program).with_resource_path(&config.image_root),
        )),
        None => Err(Paper2EpubError::RendererUnavailable {
            hint: format!(
                "install pandoc so it is on PATH, or set {}",
                crate::config::PANDOC_ENV
            ),
        }),
    }
}

fn notify_start(config: &ConversionConfig, stage: Stage) {
    if let Some(cb) = &config.progress_callback {
        cb.on_stage_start(stage);
    }
}

fn notify_complete(config: &ConversionConfig, stage: Stage, len: usize) {
    if let Some(cb) = &config.progress_callback {
        cb.on_stage_complete(stage, len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::TreatmentEngine;

    #[test]
    fn atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/book.epub");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn missing_extractor_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("p.pdf");
        std::fs::write(&pdf, b"%PDF-1.4").unwrap();
        let err = convert_to_markdown(pdf.to_string_lossy(), &ConversionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Paper2EpubError::ExtractorUnavailable { .. }));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn empty_markdown_is_not_rendered() {
        let err = generate_epub("  \n", "T", &ConversionConfig::default()).await.unwrap_err();
        assert!(matches!(err, Paper2EpubError::EmptyDocument));
    }

    #[tokio::test]
    async fn missing_renderer_reported() {
        let err = generate_epub("# T", "T", &ConversionConfig::default()).await.unwrap_err();
        assert!(matches!(err, Paper2EpubError::RendererUnavailable { .. }));
    }

    #[tokio::test]
    async fn bad_provider_name_falls_back() {
        let config = TreatmentConfig::builder()
            .provider_name("no-such-provider")
            .build()
            .unwrap();
        let result = treat_markdown(&TreatmentRequest::new("SUMMARY\nText", ""), &config).await;
        assert_eq!(result.engine, TreatmentEngine::RuleBased);
        assert_eq!(result.markdown, "## Summary\nText");
        assert!(result.fallback_reason.unwrap().contains("no-such-provider"));
    }
}
