//! Progress-callback trait for conversion stage events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to hear
//! about each stage as the pipeline runs. The CLI drives its spinner this
//! way; a server could forward the same events to a WebSocket.
//!
//! # Example
//!
//! ```rust
//! use paper2epub::{ConversionConfig, ConversionProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl ConversionProgressCallback for Printer {
//!     fn on_stage_start(&self, stage: Stage) {
//!         eprintln!("{stage}...");
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(Printer) as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Extract,
    Clean,
    Treat,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Resolve => "Resolving input",
            Stage::Extract => "Extracting PDF",
            Stage::Clean => "Cleaning markdown",
            Stage::Treat => "Treating markdown",
            Stage::Render => "Rendering EPUB",
        };
        f.write_str(s)
    }
}

/// Called by the conversion pipeline at stage boundaries.
///
/// All methods default to no-ops so implementors override only what they
/// need.
pub trait ConversionProgressCallback: Send + Sync {
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// `output_len` is the byte length of what the stage produced
    /// (markdown for text stages, EPUB bytes for [`Stage::Render`]).
    fn on_stage_complete(&self, stage: Stage, output_len: usize) {
        let _ = (stage, output_len);
    }

    /// The AI path failed and the rule-based engine answered instead.
    fn on_treatment_fallback(&self, reason: &str) {
        let _ = reason;
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ConversionProgressCallback for Recorder {
        fn on_stage_start(&self, stage: Stage) {
            self.events.lock().unwrap().push(format!("start {stage:?}"));
        }

        fn on_stage_complete(&self, stage: Stage, output_len: usize) {
            self.events.lock().unwrap().push(format!("done {stage:?} {output_len}"));
        }

        fn on_treatment_fallback(&self, reason: &str) {
            self.events.lock().unwrap().push(format!("fallback {reason}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Extract);
        cb.on_stage_complete(Stage::Extract, 10);
        cb.on_treatment_fallback("timeout");
    }

    #[test]
    fn recorder_receives_events_in_order() {
        let rec = Recorder::default();
        rec.on_stage_start(Stage::Treat);
        rec.on_treatment_fallback("retention 0.30 below minimum 0.80");
        rec.on_stage_complete(Stage::Treat, 42);
        assert_eq!(
            *rec.events.lock().unwrap(),
            [
                "start Treat",
                "fallback retention 0.30 below minimum 0.80",
                "done Treat 42"
            ]
        );
    }

    #[test]
    fn stage_labels() {
        assert_eq!(Stage::Render.to_string(), "Rendering EPUB");
        assert_eq!(serde_json::to_string(&Stage::Extract).unwrap(), "\"extract\"");
    }
}
