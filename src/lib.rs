//! # paper2epub
//!
//! Turn academic PDFs into clean, readable EPUBs for e-readers.
//!
//! ## Why this crate?
//!
//! PDF extractors get the words out of a paper but leave debris behind:
//! page-boundary headings, image placeholders that point nowhere, a title that
//! is just the upload's filename. Asking a language model to tidy the result
//! helps, until it quietly summarises half the paper. This crate cleans the
//! extractor output deterministically, optionally lets a model polish it, and
//! refuses any model answer that lost content, falling back to a rule-based
//! treatment that cannot lose any.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Extract  marker_single → raw markdown + figure images
//!  ├─ 3. Clean    drop page markers, bind images, enforce a single title
//!  ├─ 4. Treat    AI (sanitised + guarded) or rule-based, never fails
//!  ├─ 5. Polish   line endings, invisible chars, blank runs
//!  └─ 6. Render   pandoc → EPUB
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paper2epub::{convert_to_epub, Capabilities, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder()
//!         .capabilities(Capabilities::detect())
//!         .treat(true)
//!         .build()?;
//!     let output = convert_to_epub("paper.pdf", "paper.epub", &config).await?;
//!     eprintln!("'{}': {} chars, engine {:?}",
//!         output.title, output.stats.final_chars, output.stats.treatment_engine);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paper2epub` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! paper2epub = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod registry;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Capabilities, ConversionConfig, ConversionConfigBuilder, TreatmentConfig,
    TreatmentConfigBuilder,
};
pub use convert::{
    clean_markdown, convert_to_epub, convert_to_markdown, convert_upload, generate_epub,
    treat_markdown,
};
pub use document::{Document, ImageReference, TreatmentEngine, TreatmentRequest, TreatmentResult};
pub use error::{Paper2EpubError, TreatmentError};
pub use output::{ConversionOutput, ConversionStats};
pub use pipeline::clean::extract_title;
pub use pipeline::epub::{EpubRenderer, PandocRenderer};
pub use pipeline::extract::{Extraction, MarkerCli, PdfExtractor};
pub use pipeline::guard::{accept, GuardPolicy, Verdict, MIN_RETENTION};
pub use pipeline::postprocess::polish;
pub use pipeline::sanitize::sanitize;
pub use progress::{ConversionProgressCallback, ProgressCallback, Stage};
pub use registry::{ImageStore, UploadId, UploadReceipt, UploadRegistry};
pub use service::{GeminiTextService, LlmTextService, TextService};
