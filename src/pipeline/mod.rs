//! Pipeline stages for PDF-to-EPUB conversion.
//!
//! Each submodule implements exactly one transformation step, so each is
//! testable on its own and collaborators can be swapped without touching
//! the rest.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ clean ──▶ llm ─┬─▶ postprocess ──▶ epub
//! (URL/path) (marker)   (debris)  (AI) │   (polish)        (pandoc)
//!                                      │
//!                          sanitize ──▶ guard ──✗──▶ rules
//! ```
//!
//! 1. [`input`]    canonicalise the user-supplied path or URL to a local PDF
//! 2. [`extract`]  run the external extractor; the only stage producing images
//! 3. [`clean`]    remove page markers, bind image placeholders, fix the title
//! 4. [`llm`]      one guarded AI call; [`sanitize`] strips wrappers,
//!    [`guard`] rejects lossy answers, [`rules`] answers when AI does not
//! 5. [`postprocess`] whitespace and invisible-character polish
//! 6. [`epub`]     render the final markdown

pub mod clean;
pub mod epub;
pub mod extract;
pub mod guard;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod rules;
pub mod sanitize;
