//! Remote text-generation services.
//!
//! The treatment orchestrator only needs "one prompt in, one completion out",
//! so that is all [`TextService`] asks of a backend. Two adapters ship:
//!
//! - [`LlmTextService`] wraps any edgequake-llm [`LLMProvider`] (OpenAI,
//!   Anthropic, Ollama, ...).
//! - [`GeminiTextService`] calls the Gemini `generateContent` REST endpoint
//!   directly with `reqwest`.
//!
//! Neither adapter retries or enforces a timeout; the orchestrator owns both
//! decisions.

use crate::config::TreatmentConfig;
use crate::error::{Paper2EpubError, TreatmentError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Default model for the direct Gemini backend.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-mini";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// One prompt in, one completion out.
#[async_trait]
pub trait TextService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, TreatmentError>;

    /// Short name used in logs and `doctor` output.
    fn name(&self) -> &str;
}

// ── edgequake-llm ────────────────────────────────────────────────────────

/// [`TextService`] backed by an edgequake-llm provider.
pub struct LlmTextService {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    name: String,
}

impl LlmTextService {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &TreatmentConfig) -> Self {
        let name = config
            .provider_name
            .clone()
            .unwrap_or_else(|| "edgequake-llm".to_string());
        Self {
            provider,
            options: build_options(config),
            name,
        }
    }
}

#[async_trait]
impl TextService for LlmTextService {
    async fn complete(&self, prompt: &str) -> Result<String, TreatmentError> {
        let messages = vec![ChatMessage::user(prompt)];
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| TreatmentError::Transport {
                detail: e.to_string(),
            })?;
        debug!(
            "{}: {} input tokens, {} output tokens",
            self.name, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn build_options(config: &TreatmentConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

// ── Gemini REST ──────────────────────────────────────────────────────────

/// [`TextService`] calling Gemini `generateContent` directly.
pub struct GeminiTextService {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiTextService {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    /// Point the service at a different host (proxies, local stubs).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl TextService for GeminiTextService {
    async fn complete(&self, prompt: &str) -> Result<String, TreatmentError> {
        let resp = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&request_body(prompt))
            .send()
            .await
            .map_err(|e| TreatmentError::Transport {
                detail: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TreatmentError::Status {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| TreatmentError::MalformedPayload {
                detail: e.to_string(),
            })?;
        extract_completion(&payload)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Request payload: one user turn, dynamic thinking budget.
pub fn request_body(prompt: &str) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": { "thinkingConfig": { "thinkingBudget": -1 } }
    })
}

/// Concatenate the text parts of the first candidate.
pub fn extract_completion(payload: &Value) -> Result<String, TreatmentError> {
    let parts = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| TreatmentError::MalformedPayload {
            detail: "no candidates[0].content.parts in response".into(),
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        return Err(TreatmentError::MalformedPayload {
            detail: "candidate has no text parts".into(),
        });
    }
    Ok(text)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Pick the text service for `config`, most specific first.
///
/// 1. `config.service`
/// 2. `config.provider`
/// 3. `config.provider_name` (+ `config.model`) through [`ProviderFactory`]
/// 4. `config.gemini_api_key`
/// 5. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`
/// 6. `OPENAI_API_KEY`, then `ANTHROPIC_API_KEY`, then `GEMINI_API_KEY`
///
/// `Ok(None)` means nothing is configured and treatment runs rule-based.
/// An explicitly named provider that cannot be built is an error.
pub fn resolve_service(
    config: &TreatmentConfig,
) -> Result<Option<Arc<dyn TextService>>, Paper2EpubError> {
    if config.rules_only {
        return Ok(None);
    }
    if let Some(ref service) = config.service {
        return Ok(Some(Arc::clone(service)));
    }
    if let Some(ref provider) = config.provider {
        return Ok(Some(wrap(Arc::clone(provider), config)));
    }
    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
        return create(name, model, config).map(Some);
    }
    if let Some(ref key) = config.gemini_api_key {
        let model = config.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
        return Ok(Some(Arc::new(GeminiTextService::new(key.clone(), model))));
    }

    if let (Some(prov), Some(model)) = (env("EDGEQUAKE_LLM_PROVIDER"), env("EDGEQUAKE_MODEL")) {
        return create(&prov, &model, config).map(Some);
    }
    if env("OPENAI_API_KEY").is_some() {
        let model = config.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
        return create("openai", model, config).map(Some);
    }
    if env("ANTHROPIC_API_KEY").is_some() {
        let model = config.model.as_deref().unwrap_or(DEFAULT_ANTHROPIC_MODEL);
        return create("anthropic", model, config).map(Some);
    }
    if let Some(key) = env("GEMINI_API_KEY") {
        let model = config.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
        return Ok(Some(Arc::new(GeminiTextService::new(key, model))));
    }

    debug!("No text service configured");
    Ok(None)
}

fn create(
    provider_name: &str,
    model: &str,
    config: &TreatmentConfig,
) -> Result<Arc<dyn TextService>, Paper2EpubError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Paper2EpubError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(LlmTextService {
        provider,
        options: build_options(config),
        name: format!("{provider_name}/{model}"),
    }))
}

fn wrap(provider: Arc<dyn LLMProvider>, config: &TreatmentConfig) -> Arc<dyn TextService> {
    Arc::new(LlmTextService::new(provider, config))
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl TextService for Echo {
        async fn complete(&self, prompt: &str) -> Result<String, TreatmentError> {
            Ok(prompt.to_string())
        }
        fn name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn explicit_service_wins() {
        let config = TreatmentConfig::builder()
            .service(Arc::new(Echo))
            .gemini_api_key("k")
            .build()
            .unwrap();
        let svc = resolve_service(&config).unwrap().unwrap();
        assert_eq!(svc.name(), "echo");
    }

    #[test]
    fn rules_only_resolves_nothing() {
        let config = TreatmentConfig::builder()
            .service(Arc::new(Echo))
            .rules_only(true)
            .build()
            .unwrap();
        assert!(resolve_service(&config).unwrap().is_none());
    }

    #[test]
    fn gemini_key_selects_gemini() {
        let config = TreatmentConfig::builder()
            .gemini_api_key("k")
            .model("gemini-2.5-flash")
            .build()
            .unwrap();
        let svc = resolve_service(&config).unwrap().unwrap();
        assert_eq!(svc.name(), "gemini");
    }

    #[test]
    fn gemini_endpoint_layout() {
        let svc = GeminiTextService::new("k", "gemini-2.5-pro").with_base_url("http://localhost:9/v1/");
        assert_eq!(svc.endpoint(), "http://localhost:9/v1/gemini-2.5-pro:generateContent");
    }

    #[test]
    fn request_body_shape() {
        let body = request_body("hello");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], -1);
    }

    #[test]
    fn extract_completion_joins_parts() {
        let payload = json!({
            "candidates": [{ "content": { "parts": [{ "text": "# T\n" }, { "text": "Body" }] } }]
        });
        assert_eq!(extract_completion(&payload).unwrap(), "# T\nBody");
    }

    #[test]
    fn extract_completion_rejects_missing_candidates() {
        let err = extract_completion(&json!({ "promptFeedback": {} })).unwrap_err();
        assert!(matches!(err, TreatmentError::MalformedPayload { .. }));
        let err = extract_completion(&json!({
            "candidates": [{ "content": { "parts": [{ "inlineData": {} }] } }]
        }))
        .unwrap_err();
        assert!(matches!(err, TreatmentError::MalformedPayload { .. }));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé…");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
