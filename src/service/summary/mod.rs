//! Summary generator
//!
//! Synthesizes the final cross-stage report. The provider call is raced
//! against a hard timeout; on timeout or any provider failure a local report
//! is built from the stage texts instead, so the run always gets a summary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::model::{ProviderConfig, StageResults, TokenUsage};
use crate::service::provider::{ChatProvider, ChatRequest, ProviderError};

mod prompts;

const SUMMARY_MAX_TOKENS: u32 = 4000;

/// Final report text and the usage it cost
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryReport {
    pub summary_text: String,
    /// Zero for the fallback report
    pub token_usage: TokenUsage,
    pub fallback: bool,
}

#[derive(Debug, thiserror::Error)]
enum SynthesisError {
    #[error("Summary generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Clone)]
pub struct SummaryGenerator {
    provider: Arc<dyn ChatProvider>,
    timeout: Duration,
}

impl SummaryGenerator {
    pub fn new(provider: Arc<dyn ChatProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Produce the report; never fails
    pub async fn generate(&self, results: &StageResults, provider: &ProviderConfig) -> SummaryReport {
        let started = Instant::now();

        match self.synthesize(results, provider).await {
            Ok((summary_text, usage)) => {
                tracing::info!(
                    provider = %provider.kind,
                    summary_len = summary_text.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Generated comprehensive summary"
                );
                SummaryReport {
                    summary_text,
                    token_usage: usage.unwrap_or_default(),
                    fallback: false,
                }
            }
            Err(e) => {
                tracing::warn!(
                    provider = %provider.kind,
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Summary generation failed, using fallback report"
                );
                SummaryReport {
                    summary_text: prompts::fallback_report(results),
                    token_usage: TokenUsage::default(),
                    fallback: true,
                }
            }
        }
    }

    async fn synthesize(
        &self,
        results: &StageResults,
        provider: &ProviderConfig,
    ) -> Result<(String, Option<TokenUsage>), SynthesisError> {
        let now = Utc::now();
        let number = prompts::report_number(now);
        let request = ChatRequest {
            messages: prompts::summary_messages(results, &number, now),
            max_tokens: SUMMARY_MAX_TOKENS,
            provider: provider.clone(),
        };

        let completion = tokio::time::timeout(self.timeout, self.provider.complete(&request))
            .await
            .map_err(|_| SynthesisError::Timeout(self.timeout))??;

        Ok((completion.content, completion.token_usage))
    }
}
