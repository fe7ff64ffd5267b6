//! Risk assessment: send the redacted invoice image and fields to a vision model.
//!
//! The remote call sits behind [`RiskAssessor`] so the orchestrator can be
//! exercised with a scripted assessor in tests. [`LlmRiskAssessor`] is the
//! production implementation over any `edgequake_llm` provider.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient. Exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`) with the default 500 ms base and 3
//! retries waits 500 ms → 1 s → 2 s. Each attempt is bounded by
//! `api_timeout_secs`; a timed-out attempt counts as a failure and is retried.
//! The final attempt decides the reported error.

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// One audit request: instructions, fields and the page image.
#[derive(Debug, Clone)]
pub struct AssessmentRequest {
    pub system_prompt: String,
    pub user_text: String,
    pub image: EncodedImage,
}

/// Raw model answer plus token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssessmentResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A backend that judges an invoice and answers with a narrative.
#[async_trait]
pub trait RiskAssessor: Send + Sync {
    async fn assess(&self, request: &AssessmentRequest) -> Result<AssessmentResponse, AuditError>;
}

/// Retry/timeout policy for [`LlmRiskAssessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub api_timeout_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    /// Delay before retry `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

/// [`RiskAssessor`] over an `edgequake_llm` chat provider.
pub struct LlmRiskAssessor {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    policy: RetryPolicy,
}

impl LlmRiskAssessor {
    pub fn new(provider: Arc<dyn LLMProvider>, options: CompletionOptions, policy: RetryPolicy) -> Self {
        Self {
            provider,
            options,
            policy,
        }
    }

    /// Build from config: temperature, token limit and retry policy.
    pub fn from_config(provider: Arc<dyn LLMProvider>, config: &AuditConfig) -> Self {
        Self::new(provider, build_options(config), RetryPolicy::from_config(config))
    }
}

/// Build `CompletionOptions` from the audit config.
fn build_options(config: &AuditConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[async_trait]
impl RiskAssessor for LlmRiskAssessor {
    /// Request layout:
    /// 1. **System message**: auditor rules with today's date
    /// 2. **User message**: `Audit this data: {json}` plus the JPEG attachment
    async fn assess(&self, request: &AssessmentRequest) -> Result<AssessmentResponse, AuditError> {
        let messages = vec![
            ChatMessage::system(request.system_prompt.as_str()),
            ChatMessage::user_with_images(
                request.user_text.as_str(),
                vec![request.image.to_image_data()],
            ),
        ];

        call_with_retries(&self.policy, || async {
            self.provider
                .chat(&messages, Some(&self.options))
                .await
                .map(|response| AssessmentResponse {
                    text: response.content,
                    input_tokens: response.prompt_tokens as u64,
                    output_tokens: response.completion_tokens as u64,
                })
                .map_err(|e| e.to_string())
        })
        .await
    }
}

/// Run `call` under the policy's per-call timeout, retrying with backoff.
///
/// An empty answer fails at once with [`AuditError::EmptyResponse`]. After
/// the last attempt the outcome of that attempt decides the error: a
/// timeout gives [`AuditError::Timeout`], a provider error gives
/// [`AuditError::Assessment`] carrying its message.
async fn call_with_retries<F, Fut, E>(
    policy: &RetryPolicy,
    mut call: F,
) -> Result<AssessmentResponse, AuditError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<AssessmentResponse, E>>,
    E: Display,
{
    let start = Instant::now();
    let per_call = Duration::from_secs(policy.api_timeout_secs);
    let mut last_err: Option<String> = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            warn!(
                "Audit retry {}/{} after {:?}",
                attempt, policy.max_retries, backoff
            );
            sleep(backoff).await;
        }

        match timeout(per_call, call()).await {
            Ok(Ok(response)) => {
                debug!(
                    "Audit call: {} input tokens, {} output tokens, {:?}",
                    response.input_tokens,
                    response.output_tokens,
                    start.elapsed()
                );
                if response.text.trim().is_empty() {
                    return Err(AuditError::EmptyResponse);
                }
                return Ok(response);
            }
            Ok(Err(e)) => {
                warn!("Audit attempt {} failed: {}", attempt + 1, e);
                last_err = Some(e.to_string());
            }
            Err(_) => {
                warn!(
                    "Audit attempt {} timed out after {}s",
                    attempt + 1,
                    policy.api_timeout_secs
                );
                last_err = None;
            }
        }
    }

    match last_err {
        Some(detail) => Err(AuditError::Assessment {
            retries: policy.max_retries,
            detail,
        }),
        None => Err(AuditError::Timeout {
            secs: policy.api_timeout_secs,
        }),
    }
}
