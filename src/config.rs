//! Configuration for treatment and conversion.
//!
//! Two builder-based structs cover the two kinds of request:
//!
//! - [`TreatmentConfig`]: how a markdown document is treated (guard policy,
//!   text service, timeout, sampling).
//! - [`ConversionConfig`]: a full PDF → markdown → EPUB run (treatment
//!   config, image staging, collaborators, progress reporting).
//!
//! External tools are looked up once, into [`Capabilities`], and handed to
//! the conversion config rather than probed on every request.

use crate::error::Paper2EpubError;
use crate::pipeline::epub::EpubRenderer;
use crate::pipeline::extract::PdfExtractor;
use crate::pipeline::guard::{GuardPolicy, MIN_RETENTION};
use crate::progress::ProgressCallback;
use crate::service::TextService;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Env var overriding the extractor executable.
pub const MARKER_ENV: &str = "PAPER2EPUB_MARKER";
/// Env var overriding the pandoc executable.
pub const PANDOC_ENV: &str = "PAPER2EPUB_PANDOC";

// ── Treatment ────────────────────────────────────────────────────────────

/// Configuration for AI/rule-based treatment.
///
/// # Example
/// ```rust
/// use paper2epub::TreatmentConfig;
///
/// let config = TreatmentConfig::builder()
///     .min_retention(0.85)
///     .api_timeout_secs(45)
///     .required_marker("References")
///     .build()
///     .unwrap();
/// assert_eq!(config.api_timeout_secs, 45);
/// ```
#[derive(Clone)]
pub struct TreatmentConfig {
    /// Minimum retention ratio for AI output. Default: 0.8.
    pub min_retention: f64,

    /// Original headings up to this level must survive treatment. Default: 2.
    pub marker_heading_depth: u8,

    /// Extra literal markers that must survive when present in the input.
    pub required_markers: Vec<String>,

    /// Bound on the single remote call, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Treatment is a correction task; low temperature keeps the model close
    /// to the source text.
    pub temperature: f32,

    /// Maximum completion tokens. Default: 32768.
    ///
    /// The whole paper comes back in one completion, so this must cover the
    /// longest document expected. Too low a limit truncates the answer, which
    /// the guard then rejects.
    pub max_tokens: usize,

    /// Model id, e.g. "gpt-4.1-mini" or "gemini-2.5-pro".
    pub model: Option<String>,

    /// edgequake-llm provider name ("openai", "anthropic", "ollama", ...).
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed text service. Takes precedence over everything.
    pub service: Option<Arc<dyn TextService>>,

    /// Key for the direct Gemini `generateContent` backend.
    pub gemini_api_key: Option<String>,

    /// System instruction override. Default: [`crate::prompts::PRESERVATION_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Skip all AI backends, even when credentials are present.
    pub rules_only: bool,
}

impl Default for TreatmentConfig {
    fn default() -> Self {
        Self {
            min_retention: MIN_RETENTION,
            marker_heading_depth: 2,
            required_markers: Vec::new(),
            api_timeout_secs: 60,
            temperature: 0.1,
            max_tokens: 32_768,
            model: None,
            provider_name: None,
            provider: None,
            service: None,
            gemini_api_key: None,
            system_prompt: None,
            rules_only: false,
        }
    }
}

impl fmt::Debug for TreatmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreatmentConfig")
            .field("min_retention", &self.min_retention)
            .field("marker_heading_depth", &self.marker_heading_depth)
            .field("required_markers", &self.required_markers)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("service", &self.service.as_ref().map(|s| s.name().to_string()))
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("rules_only", &self.rules_only)
            .finish()
    }
}

impl TreatmentConfig {
    pub fn builder() -> TreatmentConfigBuilder {
        TreatmentConfigBuilder {
            config: Self::default(),
        }
    }

    /// The guard policy this config describes.
    pub fn guard_policy(&self) -> GuardPolicy {
        GuardPolicy {
            min_retention: self.min_retention,
            heading_depth: self.marker_heading_depth,
            required_markers: self.required_markers.clone(),
        }
    }
}

/// Builder for [`TreatmentConfig`].
#[derive(Debug)]
pub struct TreatmentConfigBuilder {
    config: TreatmentConfig,
}

impl TreatmentConfigBuilder {
    pub fn min_retention(mut self, ratio: f64) -> Self {
        self.config.min_retention = ratio;
        self
    }

    pub fn marker_heading_depth(mut self, depth: u8) -> Self {
        self.config.marker_heading_depth = depth.min(6);
        self
    }

    pub fn required_marker(mut self, marker: impl Into<String>) -> Self {
        self.config.required_markers.push(marker.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn service(mut self, service: Arc<dyn TextService>) -> Self {
        self.config.service = Some(service);
        self
    }

    pub fn gemini_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.gemini_api_key = Some(key.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn rules_only(mut self, v: bool) -> Self {
        self.config.rules_only = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TreatmentConfig, Paper2EpubError> {
        let c = &self.config;
        if !(c.min_retention > 0.0 && c.min_retention <= 1.0) {
            return Err(Paper2EpubError::InvalidConfig(format!(
                "min_retention must be in (0, 1], got {}",
                c.min_retention
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(Paper2EpubError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(Paper2EpubError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Capabilities ─────────────────────────────────────────────────────────

/// External collaborators found on this machine, resolved once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// `marker_single` executable.
    pub extractor: Option<PathBuf>,
    /// `pandoc` executable.
    pub renderer: Option<PathBuf>,
    /// Credentials for some AI backend are present in the environment.
    pub ai: bool,
}

impl Capabilities {
    /// Look up collaborators on `PATH` (or via the override env vars) and
    /// check the environment for AI credentials.
    pub fn detect() -> Self {
        Self {
            extractor: locate(MARKER_ENV, "marker_single"),
            renderer: locate(PANDOC_ENV, "pandoc"),
            ai: ai_credentials_present(),
        }
    }
}

fn locate(env_var: &str, program: &str) -> Option<PathBuf> {
    if let Ok(p) = std::env::var(env_var) {
        if !p.is_empty() {
            return which::which(&p).ok();
        }
    }
    which::which(program).ok()
}

fn env_set(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| !v.is_empty())
}

fn ai_credentials_present() -> bool {
    (env_set("EDGEQUAKE_LLM_PROVIDER") && env_set("EDGEQUAKE_MODEL"))
        || env_set("OPENAI_API_KEY")
        || env_set("ANTHROPIC_API_KEY")
        || env_set("GEMINI_API_KEY")
}

// ── Conversion ───────────────────────────────────────────────────────────

/// Configuration for a full conversion run.
#[derive(Clone)]
pub struct ConversionConfig {
    /// Treatment settings.
    pub treatment: TreatmentConfig,

    /// Run the treatment stage after cleaning. Default: false.
    pub treat: bool,

    /// Caller instruction for treatment. Default: [`crate::prompts::DEFAULT_INSTRUCTION`].
    pub instruction: Option<String>,

    /// Author written into EPUB metadata. Default: "Academic Paper".
    pub author: String,

    /// Title override; otherwise the cleaned document's title is used.
    pub title: Option<String>,

    /// Directory under which extracted images are staged per session.
    pub image_root: PathBuf,

    /// URL prefix for staged images, e.g. "/temp_images". When `None` the
    /// absolute path of the staged file is used, which pandoc can read
    /// directly.
    pub image_url_prefix: Option<String>,

    /// How long staged image sessions live, in seconds. Default: 3600.
    pub image_retention_secs: u64,

    /// Download timeout for URL inputs, in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Collaborators found at startup.
    pub capabilities: Capabilities,

    /// Extractor override; otherwise built from `capabilities`.
    pub extractor: Option<Arc<dyn PdfExtractor>>,

    /// Renderer override; otherwise built from `capabilities`.
    pub renderer: Option<Arc<dyn EpubRenderer>>,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            treatment: TreatmentConfig::default(),
            treat: false,
            instruction: None,
            author: crate::document::DEFAULT_TITLE.to_string(),
            title: None,
            image_root: std::env::temp_dir().join("paper2epub_images"),
            image_url_prefix: None,
            image_retention_secs: 3600,
            download_timeout_secs: 120,
            capabilities: Capabilities::default(),
            extractor: None,
            renderer: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("treatment", &self.treatment)
            .field("treat", &self.treat)
            .field("instruction", &self.instruction)
            .field("author", &self.author)
            .field("title", &self.title)
            .field("image_root", &self.image_root)
            .field("image_url_prefix", &self.image_url_prefix)
            .field("image_retention_secs", &self.image_retention_secs)
            .field("capabilities", &self.capabilities)
            .field("extractor", &self.extractor.as_ref().map(|_| "<dyn PdfExtractor>"))
            .field("renderer", &self.renderer.as_ref().map(|_| "<dyn EpubRenderer>"))
            .finish()
    }
}

impl ConversionConfig {
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn treatment(mut self, treatment: TreatmentConfig) -> Self {
        self.config.treatment = treatment;
        self
    }

    pub fn treat(mut self, v: bool) -> Self {
        self.config.treat = v;
        self
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.instruction = Some(instruction.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.config.author = author.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.config.title = Some(title.into());
        self
    }

    pub fn image_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.image_root = dir.into();
        self
    }

    pub fn image_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.image_url_prefix = Some(prefix.into());
        self
    }

    pub fn image_retention_secs(mut self, secs: u64) -> Self {
        self.config.image_retention_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn capabilities(mut self, caps: Capabilities) -> Self {
        self.config.capabilities = caps;
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn PdfExtractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn EpubRenderer>) -> Self {
        self.config.renderer = Some(renderer);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Paper2EpubError> {
        if self.config.author.trim().is_empty() {
            return Err(Paper2EpubError::InvalidConfig("author must not be empty".into()));
        }
        if self.config.image_retention_secs == 0 {
            return Err(Paper2EpubError::InvalidConfig(
                "image_retention_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn treatment_defaults() {
        let c = TreatmentConfig::default();
        assert_eq!(c.min_retention, 0.8);
        assert_eq!(c.api_timeout_secs, 60);
        assert_eq!(c.marker_heading_depth, 2);
        assert!(!c.rules_only);
    }

    #[test]
    fn guard_policy_mirrors_config() {
        let c = TreatmentConfig::builder()
            .min_retention(0.9)
            .marker_heading_depth(3)
            .required_marker("References")
            .build()
            .unwrap();
        let p = c.guard_policy();
        assert_eq!(p.min_retention, 0.9);
        assert_eq!(p.heading_depth, 3);
        assert_eq!(p.required_markers, vec!["References".to_string()]);
    }

    #[test]
    fn invalid_retention_rejected() {
        assert!(TreatmentConfig::builder().min_retention(0.0).build().is_err());
        assert!(TreatmentConfig::builder().min_retention(1.5).build().is_err());
        assert!(TreatmentConfig::builder().min_retention(1.0).build().is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        assert!(TreatmentConfig::builder().api_timeout_secs(0).build().is_err());
    }

    #[test]
    fn debug_redacts_gemini_key() {
        let c = TreatmentConfig::builder().gemini_api_key("secret-key").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn conversion_defaults() {
        let c = ConversionConfig::default();
        assert_eq!(c.author, "Academic Paper");
        assert_eq!(c.image_retention_secs, 3600);
        assert!(!c.treat);
        assert!(c.capabilities.extractor.is_none());
    }

    #[test]
    fn empty_author_rejected() {
        assert!(ConversionConfig::builder().author("  ").build().is_err());
    }
}
