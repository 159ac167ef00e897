//! Content-preservation guard.
//!
//! Generative rewriting of a long paper tends to come back shorter: the model
//! quietly summarises a section, or stops half-way through the references.
//! The guard is the single check standing between that and the reader. It
//! compares a candidate against the original on two axes:
//!
//! 1. **Retention ratio**: candidate content length over original content
//!    length must reach [`MIN_RETENTION`] (or the configured minimum).
//! 2. **Section markers**: every required marker found in the original (its
//!    headings up to a configurable depth, plus caller-supplied literals)
//!    must still be present in the candidate.
//!
//! Acceptance is binary; a rejected candidate is discarded whole.
//!
//! Length is counted in non-whitespace characters. Whitespace reflow (trimmed
//! indentation, collapsed blank lines) is not content loss and must not
//! trip the guard.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum acceptable retention ratio.
pub const MIN_RETENTION: f64 = 0.8;

/// Guard policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardPolicy {
    /// Minimum candidate/original ratio. Default: [`MIN_RETENTION`].
    pub min_retention: f64,
    /// Headings of the original up to this level (`#` = 1) must survive.
    /// 0 disables heading markers. Default: 2.
    pub heading_depth: u8,
    /// Literal markers that must survive when present in the original.
    pub required_markers: Vec<String>,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            min_retention: MIN_RETENTION,
            heading_depth: 2,
            required_markers: Vec::new(),
        }
    }
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rejection {
    LowRetention { ratio: f64, min: f64 },
    MissingMarker { marker: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::LowRetention { ratio, min } => {
                write!(f, "retention {ratio:.2} below minimum {min:.2}")
            }
            Rejection::MissingMarker { marker } => {
                write!(f, "section marker '{marker}' missing from candidate")
            }
        }
    }
}

/// Outcome of [`GuardPolicy::evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Verdict {
    Accepted { ratio: f64 },
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }
}

impl GuardPolicy {
    /// Check `candidate` against `original`.
    pub fn evaluate(&self, original: &str, candidate: &str) -> Verdict {
        let ratio = retention_ratio(original, candidate);
        if ratio < self.min_retention {
            return Verdict::Rejected(Rejection::LowRetention {
                ratio,
                min: self.min_retention,
            });
        }

        let haystack = normalise(candidate);
        for marker in self.markers_in(original) {
            if !haystack.contains(&normalise(&marker)) {
                return Verdict::Rejected(Rejection::MissingMarker { marker });
            }
        }

        Verdict::Accepted { ratio }
    }

    /// `true` when `candidate` may replace `original`.
    pub fn accept(&self, original: &str, candidate: &str) -> bool {
        self.evaluate(original, candidate).is_accepted()
    }

    /// Required markers actually present in `original`.
    fn markers_in(&self, original: &str) -> Vec<String> {
        let mut markers: Vec<String> = original
            .lines()
            .filter_map(|l| heading(l.trim()))
            .filter(|(level, _)| *level <= self.heading_depth)
            .map(|(_, text)| text.to_string())
            .collect();

        let norm_original = normalise(original);
        markers.extend(
            self.required_markers
                .iter()
                .filter(|m| !m.trim().is_empty() && norm_original.contains(&normalise(m)))
                .cloned(),
        );
        markers
    }
}

/// Default-policy shorthand for [`GuardPolicy::accept`].
pub fn accept(original: &str, candidate: &str) -> bool {
    GuardPolicy::default().accept(original, candidate)
}

/// Content length of `candidate` divided by content length of `original`.
///
/// Unlike a plain `candidate.len() / original.len()`, both sides count only
/// non-whitespace characters (see [`content_len`]), so reflowing blank lines
/// or indentation moves the ratio neither way. An original with no content
/// yields 1.0: there is nothing to lose.
pub fn retention_ratio(original: &str, candidate: &str) -> f64 {
    let base = content_len(original);
    if base == 0 {
        return 1.0;
    }
    content_len(candidate) as f64 / base as f64
}

/// Number of non-whitespace characters.
pub fn content_len(s: &str) -> usize {
    s.chars().filter(|c| !c.is_whitespace()).count()
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// ATX heading level and text.
fn heading(line: &str) -> Option<(u8, &str)> {
    let level = line.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(' ') {
        return None;
    }
    let text = rest.trim().trim_end_matches('#').trim();
    (!text.is_empty()).then_some((level as u8, text))
}

/// Lower-case with whitespace runs collapsed, so a model re-wrapping a
/// heading or changing its case is not a missing marker.
fn normalise(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
