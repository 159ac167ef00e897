//! Per-request data model shared by the cleaning and treatment stages.
//!
//! Everything here is created for one request and dropped when the response
//! is produced. Nothing is shared across requests.

use serde::{Deserialize, Serialize};

/// Title used when a document carries no usable heading at all.
pub const DEFAULT_TITLE: &str = "Academic Paper";

/// A cleaned markdown document.
///
/// Produced by [`crate::pipeline::clean::clean`]. `lines` always holds the
/// full document, title line included, so [`Document::to_markdown`] is a
/// plain join.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Document {
    /// Authoritative title (text of the single `# ` heading).
    pub title: Option<String>,
    /// Output lines in document order.
    pub lines: Vec<String>,
    /// Placeholder bindings, in the order they were consumed.
    pub images: Vec<ImageReference>,
}

impl Document {
    /// Render the document back into a markdown string.
    pub fn to_markdown(&self) -> String {
        self.lines.join("\n")
    }

    /// Title, or [`DEFAULT_TITLE`] when none was found.
    pub fn title_or_default(&self) -> &str {
        self.title.as_deref().unwrap_or(DEFAULT_TITLE)
    }

    /// Number of placeholders that could not be bound to a URL.
    pub fn unresolved_images(&self) -> usize {
        self.images.iter().filter(|r| r.url.is_none()).count()
    }
}

/// One broken image placeholder and what it was rebound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// 1-based consumption order; also the "Figure k" caption number.
    pub figure: usize,
    /// The placeholder token as found in the extracted markdown.
    pub placeholder: String,
    /// Bound URL, or `None` when the supplied list ran out.
    pub url: Option<String>,
}

/// Input to any treatment step. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentRequest {
    pub markdown: String,
    /// Caller instruction, e.g. "fix OCR errors".
    pub prompt: String,
}

impl TreatmentRequest {
    pub fn new(markdown: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
            prompt: prompt.into(),
        }
    }
}

/// Which engine produced a [`TreatmentResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentEngine {
    /// Remote text-generation service, guard-approved.
    Ai,
    /// Deterministic local rules.
    RuleBased,
}

/// Output of a treatment step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentResult {
    pub markdown: String,
    /// Result length divided by input length, see
    /// [`crate::pipeline::guard::retention_ratio`].
    pub retention_ratio: f64,
    pub engine: TreatmentEngine,
    /// Why the AI output was discarded, when it was.
    pub fallback_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_markdown_joins_lines() {
        let doc = Document {
            title: Some("T".into()),
            lines: vec!["# T".into(), String::new(), "Body".into()],
            images: vec![],
        };
        assert_eq!(doc.to_markdown(), "# T\n\nBody");
    }

    #[test]
    fn title_falls_back_to_default() {
        assert_eq!(Document::default().title_or_default(), DEFAULT_TITLE);
    }

    #[test]
    fn engine_serialises_snake_case() {
        let json = serde_json::to_string(&TreatmentEngine::RuleBased).unwrap();
        assert_eq!(json, "\"rule_based\"");
    }
}
