//! Error types for the paper2epub library.
//!
//! Two error types mirror the two ways a request can go wrong:
//!
//! * [`Paper2EpubError`] is **fatal**: the request cannot be served (missing
//!   file, unknown upload id, extractor or renderer crashed). Returned as
//!   `Err` from the top-level entry points in [`crate::convert`].
//!
//! * [`TreatmentError`] is **recoverable**: the remote text service timed out,
//!   answered with garbage, or its answer failed the preservation guard.
//!   These never reach the caller; the orchestrator logs them, falls back to
//!   the rule-based engine and records the reason in
//!   [`crate::document::TreatmentResult::fallback_reason`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the paper2epub library.
#[derive(Debug, Error)]
pub enum Paper2EpubError {
    // ── Malformed input (client errors) ───────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input string is neither a readable path nor an HTTP/HTTPS URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// The file was read but is not a PDF.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The upload id does not match any registered upload.
    #[error("No upload registered under id '{id}'")]
    UnknownUpload { id: String },

    /// Markdown handed to the renderer was empty after cleaning.
    #[error("Document is empty; nothing to render")]
    EmptyDocument,

    /// HTTP URL was syntactically valid but the download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Collaborator failures (server errors) ─────────────────────────────
    /// No PDF extractor is installed or configured.
    #[error("PDF extractor not available: {hint}")]
    ExtractorUnavailable { hint: String },

    /// The extractor ran but failed.
    #[error("Extraction failed for '{path}': {message}")]
    ExtractionFailed { path: PathBuf, message: String },

    /// No EPUB renderer is installed or configured.
    #[error("EPUB renderer not available: {hint}")]
    RendererUnavailable { hint: String },

    /// The renderer ran but failed.
    #[error("EPUB generation failed: {message}")]
    RenderFailed { message: String },

    /// A named LLM provider could not be constructed.
    #[error("LLM provider '{provider}' is not configured: {hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Paper2EpubError {
    /// `true` when the caller sent something unusable (maps to HTTP 4xx);
    /// `false` for collaborator and internal failures (HTTP 5xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Paper2EpubError::FileNotFound { .. }
                | Paper2EpubError::PermissionDenied { .. }
                | Paper2EpubError::InvalidInput { .. }
                | Paper2EpubError::NotAPdf { .. }
                | Paper2EpubError::UnknownUpload { .. }
                | Paper2EpubError::EmptyDocument
                | Paper2EpubError::InvalidConfig(_)
        )
    }
}

/// A recoverable failure on the AI treatment path.
///
/// Converted into a fallback to the rule-based engine, never propagated.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum TreatmentError {
    /// The remote call did not complete within the configured timeout.
    #[error("text service timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection, TLS or provider-level failure.
    #[error("text service request failed: {detail}")]
    Transport { detail: String },

    /// The service answered with a non-success HTTP status.
    #[error("text service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response could not be parsed or contained no completion text.
    #[error("malformed text service response: {detail}")]
    MalformedPayload { detail: String },

    /// The completion failed the content-preservation guard.
    #[error("completion rejected by preservation guard: {reason}")]
    Rejected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_upload_is_client_error() {
        let e = Paper2EpubError::UnknownUpload { id: "paper".into() };
        assert!(e.is_client_error());
        assert!(e.to_string().contains("paper"));
    }

    #[test]
    fn collaborator_failure_is_server_error() {
        let e = Paper2EpubError::RenderFailed {
            message: "pandoc: unknown option".into(),
        };
        assert!(!e.is_client_error());
        assert!(e.to_string().contains("pandoc: unknown option"));
    }

    #[test]
    fn status_display_carries_code() {
        let e = TreatmentError::Status {
            status: 429,
            body: "quota".into(),
        };
        assert!(e.to_string().contains("429"));
    }

    #[test]
    fn rejected_display_carries_reason() {
        let e = TreatmentError::Rejected {
            reason: "retention 0.30 < 0.80".into(),
        };
        assert!(e.to_string().contains("0.30"));
    }
}
