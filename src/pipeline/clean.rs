//! Markdown cleaning: turn raw extractor output into a render-ready document.
//!
//! PDF extractors leave three kinds of debris behind:
//!
//! - `## Page 7` headings marking page boundaries,
//! - image placeholders whose target file never made it out of the PDF
//!   (`![](_page_3_Picture_1.jpeg)`, `[Image #2]`),
//! - a title heading that is just the upload's filename, sometimes repeated.
//!
//! [`clean`] walks the lines once, dropping page markers, rebinding image
//! placeholders to the supplied URLs in document order and enforcing a single
//! top-level heading. A post-pass synthesises a title when none survived.

use crate::document::{Document, ImageReference, DEFAULT_TITLE};
use crate::pipeline::rules::title_case;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::debug;

/// Replacement text for placeholders beyond the end of the URL list.
pub const MISSING_IMAGE_NOTICE: &str = "*[Figure/Image available in original source]*";

static RE_PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^##\s+page\s+\d+(?:\s+of\s+\d+)?$").unwrap());

static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[\]\(_page_\d+[^)]*\)|(?i:\[image\s*#\s*\d+\])").unwrap()
});

/// `true` for a `## Page N` extraction artefact.
pub fn is_page_marker(line: &str) -> bool {
    RE_PAGE_MARKER.is_match(line.trim())
}

/// `true` for a line carrying either broken placeholder shape.
pub fn is_broken_placeholder(line: &str) -> bool {
    RE_PLACEHOLDER.is_match(line)
}

/// Clean raw extracted markdown.
///
/// `source_filename` is the name of the uploaded PDF; it is used to spot
/// filename-stub titles and to synthesise a title when the document has no
/// heading. `image_urls` are bound to broken placeholders strictly in the
/// order the placeholders appear.
pub fn clean(raw_markdown: &str, source_filename: &str, image_urls: &[String]) -> Document {
    let stubs = filename_stubs(source_filename);
    let mut urls = image_urls.iter();
    let mut lines: Vec<String> = Vec::new();
    let mut images: Vec<ImageReference> = Vec::new();
    let mut title: Option<String> = None;
    let mut dropped_markers = 0usize;

    for raw_line in raw_markdown.lines() {
        if is_page_marker(raw_line) {
            dropped_markers += 1;
            continue;
        }

        let line = if is_broken_placeholder(raw_line) {
            bind_placeholders(raw_line, &mut urls, &mut images)
        } else {
            raw_line.to_string()
        };
        let trimmed = line.trim();

        // An H1 with no text is a stray `#`.
        if trimmed == "#" {
            continue;
        }

        if let Some(text) = h1_text(trimmed) {
            match title {
                None => {
                    title = Some(text.to_string());
                    lines.push(format!("# {text}"));
                }
                Some(_) if is_stub(text, &stubs) => {
                    debug!("Dropping duplicate filename title: {}", text);
                }
                // A second real H1 keeps its content one level down.
                Some(_) => lines.push(format!("## {text}")),
            }
            continue;
        }

        lines.push(line);
    }

    if title.is_none() {
        let promoted = lines
            .iter()
            .position(|l| h2_text(l.trim()).is_some());
        let text = match promoted {
            Some(idx) => {
                let line = lines.remove(idx);
                h2_text(line.trim()).unwrap_or_default().to_string()
            }
            None => title_from_filename(source_filename),
        };
        prepend_title(&mut lines, &text);
        title = Some(text);
    }

    debug!(
        "Cleaned markdown: {} lines, {} page markers dropped, {} placeholders ({} unresolved)",
        lines.len(),
        dropped_markers,
        images.len(),
        images.iter().filter(|r| r.url.is_none()).count()
    );

    Document {
        title,
        lines,
        images,
    }
}

/// First top-level heading text, or [`DEFAULT_TITLE`].
pub fn extract_title(markdown: &str) -> String {
    markdown
        .lines()
        .find_map(|l| h1_text(l.trim()))
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

/// Human title from a filename: extension stripped, separators spaced,
/// title-cased.
pub fn title_from_filename(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let spaced = stem
        .replace(['_', '-', '.'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if spaced.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        title_case(&spaced)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Replace each placeholder token in `line` with the next URL, or the
/// notice once the URLs run out. Text around the tokens is kept.
fn bind_placeholders(
    line: &str,
    urls: &mut std::slice::Iter<'_, String>,
    images: &mut Vec<ImageReference>,
) -> String {
    RE_PLACEHOLDER
        .replace_all(line, |caps: &regex::Captures<'_>| {
            let figure = images.len() + 1;
            let url = urls.next().cloned();
            let replacement = match &url {
                Some(u) => format!("![Figure {figure}]({u})"),
                None => MISSING_IMAGE_NOTICE.to_string(),
            };
            images.push(ImageReference {
                figure,
                placeholder: caps[0].to_string(),
                url,
            });
            replacement
        })
        .into_owned()
}

fn h1_text(line: &str) -> Option<&str> {
    line.strip_prefix("# ").map(str::trim).filter(|t| !t.is_empty())
}

fn h2_text(line: &str) -> Option<&str> {
    line.strip_prefix("## ").map(str::trim).filter(|t| !t.is_empty())
}

fn filename_stubs(filename: &str) -> Vec<String> {
    let path = Path::new(filename);
    let mut stubs = vec![filename.trim().to_lowercase()];
    if let Some(name) = path.file_name() {
        stubs.push(name.to_string_lossy().to_lowercase());
    }
    if let Some(stem) = path.file_stem() {
        stubs.push(stem.to_string_lossy().to_lowercase());
    }
    stubs.retain(|s| !s.is_empty());
    stubs.dedup();
    stubs
}

fn is_stub(text: &str, stubs: &[String]) -> bool {
    let text = text.to_lowercase();
    stubs.iter().any(|s| *s == text)
}

fn prepend_title(lines: &mut Vec<String>, title: &str) {
    let leading_blank = lines.iter().take_while(|l| l.trim().is_empty()).count();
    lines.drain(..leading_blank);
    if lines.is_empty() {
        lines.push(format!("# {title}"));
    } else {
        lines.splice(0..0, [format!("# {title}"), String::new()]);
    }
}
