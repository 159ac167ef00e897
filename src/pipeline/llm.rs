//! AI treatment: one remote call, sanitised and guarded, with a rule-based
//! fallback that always answers.
//!
//! ```text
//! request ──▶ build_prompt ──▶ service.complete ──▶ sanitize ──▶ guard
//!                                 │ (timeout)                      │
//!                                 └──── any failure ───────────────┴──▶ rules::treat
//! ```
//!
//! There are no retries. A failed or rejected attempt is logged with `warn!`,
//! recorded in [`TreatmentResult::fallback_reason`] and answered by the rule
//! engine on the original input. Callers never see a treatment error.

use crate::config::TreatmentConfig;
use crate::document::{TreatmentEngine, TreatmentRequest, TreatmentResult};
use crate::error::TreatmentError;
use crate::pipeline::guard::{retention_ratio, Verdict};
use crate::pipeline::{rules, sanitize};
use crate::prompts::{build_prompt, PRESERVATION_SYSTEM_PROMPT};
use crate::service::TextService;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Treat `request` with `service`, or rule-based when `service` is `None`.
pub async fn treat(
    request: &TreatmentRequest,
    service: Option<&dyn TextService>,
    config: &TreatmentConfig,
) -> TreatmentResult {
    if request.markdown.trim().is_empty() {
        debug!("Empty markdown: skipping the remote call");
        return rule_based(request, None);
    }

    let Some(service) = service else {
        info!("No text service configured: using rule-based treatment");
        return rule_based(request, None);
    };

    match attempt(request, service, config).await {
        Ok(result) => result,
        Err(e) => {
            warn!("AI treatment via {} failed, using rule-based treatment: {}", service.name(), e);
            rule_based(request, Some(e))
        }
    }
}

/// The single AI attempt. Every failure mode comes back as a [`TreatmentError`].
async fn attempt(
    request: &TreatmentRequest,
    service: &dyn TextService,
    config: &TreatmentConfig,
) -> Result<TreatmentResult, TreatmentError> {
    let start = Instant::now();
    let system_prompt = config
        .system_prompt
        .as_deref()
        .unwrap_or(PRESERVATION_SYSTEM_PROMPT);
    let prompt = build_prompt(system_prompt, &request.prompt, &request.markdown);

    info!(
        "Requesting AI treatment from {} ({} chars of markdown)",
        service.name(),
        request.markdown.len()
    );

    let secs = config.api_timeout_secs;
    let raw = timeout(Duration::from_secs(secs), service.complete(&prompt))
        .await
        .map_err(|_| TreatmentError::Timeout { secs })??;

    let candidate = sanitize::sanitize(&raw);
    debug!(
        "{}: {} chars raw, {} chars after sanitising, {:?}",
        service.name(),
        raw.len(),
        candidate.len(),
        start.elapsed()
    );

    match config.guard_policy().evaluate(&request.markdown, &candidate) {
        Verdict::Accepted { ratio } => {
            info!("AI treatment accepted (retention {:.2})", ratio);
            Ok(TreatmentResult {
                markdown: candidate,
                retention_ratio: ratio,
                engine: TreatmentEngine::Ai,
                fallback_reason: None,
            })
        }
        Verdict::Rejected(rejection) => Err(TreatmentError::Rejected {
            reason: rejection.to_string(),
        }),
    }
}

fn rule_based(request: &TreatmentRequest, reason: Option<TreatmentError>) -> TreatmentResult {
    let markdown = rules::treat(&request.markdown, &request.prompt);
    TreatmentResult {
        retention_ratio: retention_ratio(&request.markdown, &markdown),
        markdown,
        engine: TreatmentEngine::RuleBased,
        fallback_reason: reason.map(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a canned answer and counts calls.
    struct Canned {
        answer: Result<String, TreatmentError>,
        calls: AtomicUsize,
    }

    impl Canned {
        fn ok(s: &str) -> Self {
            Self {
                answer: Ok(s.to_string()),
                calls: AtomicUsize::new(0),
            }
        }
        fn err(e: TreatmentError) -> Self {
            Self {
                answer: Err(e),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextService for Canned {
        async fn complete(&self, _prompt: &str) -> Result<String, TreatmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
        fn name(&self) -> &str {
            "canned"
        }
    }

    struct Sleeper;

    #[async_trait]
    impl TextService for Sleeper {
        async fn complete(&self, prompt: &str) -> Result<String, TreatmentError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(prompt.to_string())
        }
        fn name(&self) -> &str {
            "sleeper"
        }
    }

    fn config() -> TreatmentConfig {
        TreatmentConfig::default()
    }

    #[tokio::test]
    async fn accepted_answer_is_sanitised() {
        let svc = Canned::ok("```markdown\n# T\n\nBody text here.\n```");
        let req = TreatmentRequest::new("# T\n\nBody  text here.", "");
        let r = treat(&req, Some(&svc), &config()).await;
        assert_eq!(r.engine, TreatmentEngine::Ai);
        assert_eq!(r.markdown, "# T\n\nBody text here.");
        assert!(r.fallback_reason.is_none());
    }

    #[tokio::test]
    async fn summary_falls_back_to_rules() {
        let original = format!("# Paper\n\n{}", "word ".repeat(2000));
        let svc = Canned::ok(&format!("# Paper\n\n{}", "word ".repeat(600)));
        let req = TreatmentRequest::new(original.clone(), "");
        let r = treat(&req, Some(&svc), &config()).await;
        assert_eq!(r.engine, TreatmentEngine::RuleBased);
        assert_eq!(r.markdown, rules::treat(&original, ""));
        assert!(r.fallback_reason.unwrap().contains("retention"));
        assert_eq!(svc.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn service_errors_fall_back_without_retry() {
        for e in [
            TreatmentError::Transport { detail: "connection reset".into() },
            TreatmentError::Status { status: 503, body: "overloaded".into() },
            TreatmentError::MalformedPayload { detail: "no candidates".into() },
        ] {
            let svc = Canned::err(e);
            let req = TreatmentRequest::new("INTRODUCTION\ntext", "");
            let r = treat(&req, Some(&svc), &config()).await;
            assert_eq!(r.engine, TreatmentEngine::RuleBased);
            assert_eq!(r.markdown, "## Introduction\ntext");
            assert!(r.fallback_reason.is_some());
            assert_eq!(svc.calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn timeout_falls_back() {
        let config = TreatmentConfig::builder().api_timeout_secs(1).build().unwrap();
        let req = TreatmentRequest::new("# T\nBody", "");
        let r = treat(&req, Some(&Sleeper), &config).await;
        assert_eq!(r.engine, TreatmentEngine::RuleBased);
        assert!(r.fallback_reason.unwrap().contains("1s"));
    }

    #[tokio::test]
    async fn dropped_heading_falls_back() {
        let original = "# T\n\n## Methods\nWe did things carefully.\n\n## Results\nIt worked.";
        let svc = Canned::ok("# T\n\nWe did things carefully and well.\n\n## Results\nIt worked.");
        let r = treat(&TreatmentRequest::new(original, ""), Some(&svc), &config()).await;
        assert_eq!(r.engine, TreatmentEngine::RuleBased);
        assert!(r.fallback_reason.unwrap().contains("Methods"));
    }

    #[test]
    fn empty_markdown_skips_service() {
        let svc = Canned::ok("should not be used");
        let req = TreatmentRequest::new("  \n ", "");
        let r = tokio_test::block_on(treat(&req, Some(&svc), &config()));
        assert_eq!(r.engine, TreatmentEngine::RuleBased);
        assert_eq!(svc.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_service_is_not_a_fallback() {
        let req = TreatmentRequest::new("ABSTRACT\nText", "");
        let r = tokio_test::block_on(treat(&req, None, &config()));
        assert_eq!(r.engine, TreatmentEngine::RuleBased);
        assert!(r.fallback_reason.is_none());
        assert_eq!(r.markdown, "## Abstract\nText");
    }
}
