//! Result types returned by the conversion entry points.

use crate::document::{ImageReference, TreatmentEngine};
use serde::{Deserialize, Serialize};

/// Final markdown of a PDF conversion plus bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Render-ready markdown (cleaned, optionally treated, polished).
    pub markdown: String,
    /// Authoritative document title.
    pub title: String,
    /// Image placeholder bindings in document order.
    pub images: Vec<ImageReference>,
    pub stats: ConversionStats,
}

/// Timing and size statistics for one conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Characters of raw extractor output.
    pub raw_chars: usize,
    /// Characters after cleaning.
    pub cleaned_chars: usize,
    /// Characters of the final markdown.
    pub final_chars: usize,
    /// Images the extractor produced.
    pub images_found: usize,
    /// Placeholders that fell back to the textual notice.
    pub images_unresolved: usize,
    /// Engine used for treatment; `None` when treatment was skipped.
    pub treatment_engine: Option<TreatmentEngine>,
    pub fallback_reason: Option<String>,
    pub extract_duration_ms: u64,
    pub treatment_duration_ms: u64,
    pub total_duration_ms: u64,
}
