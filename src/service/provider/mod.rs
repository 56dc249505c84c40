//! Chat-completion provider client
//!
//! One trait covers the buffered and streamed call forms. `HttpChatClient`
//! speaks the OpenAI-compatible wire format to the preset or custom
//! endpoints; `RetryingProvider` wraps any provider with the shared
//! attempt/delay/timeout policy.

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::model::{ProviderConfig, ProviderKind, ProviderPresets, TokenUsage};

mod error;
mod http;
mod policy;
pub mod sse;

pub use error::ProviderError;
pub use http::HttpChatClient;
pub use policy::{CallPolicy, RetryingProvider};

/// Role tag of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A logical provider call: messages, output budget and where to send them
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub provider: ProviderConfig,
}

impl ChatRequest {
    pub fn prompt_length(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

/// Final result of a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletion {
    pub content: String,
    /// Present only when the provider reported usage
    pub token_usage: Option<TokenUsage>,
}

/// Incremental output of a streamed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamUpdate<'a> {
    /// Next piece of content
    Delta(&'a str),
    /// The call starts over; deltas forwarded before this are void
    Restart { attempt: u32 },
}

/// Trait for chat-completion backends
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Single buffered response
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError>;

    /// Incremental response; updates are passed to `on_update` as they
    /// arrive, the full content is returned at stream end
    async fn stream(
        &self,
        request: &ChatRequest,
        on_update: &mut (dyn for<'d> FnMut(StreamUpdate<'d>) + Send),
    ) -> Result<ChatCompletion, ProviderError>;
}

/// Endpoint URL and model a request resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub url: Url,
    pub model: String,
}

/// Resolve the endpoint for a provider config.
///
/// Caller-supplied endpoint and model win over the preset. `custom` has no
/// preset, so it needs an endpoint; without a model it borrows the openai
/// preset's default.
pub fn resolve_endpoint(
    config: &ProviderConfig,
    presets: &ProviderPresets,
) -> Result<ResolvedEndpoint, ProviderError> {
    let endpoint = non_blank(config.endpoint_override.as_deref());
    let model = non_blank(config.model_override.as_deref());

    let (url, model) = match (config.kind, presets.preset(config.kind)) {
        (ProviderKind::Custom, _) | (_, None) => {
            let url = endpoint.ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "provider '{}' requires an endpoint URL",
                    config.kind
                ))
            })?;
            (url, model.unwrap_or(presets.fallback_model()))
        }
        (_, Some(preset)) => (
            endpoint.unwrap_or(preset.endpoint.as_str()),
            model.unwrap_or(preset.model.as_str()),
        ),
    };

    let url = Url::parse(url)
        .map_err(|e| ProviderError::Configuration(format!("invalid endpoint URL '{}': {}", url, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProviderError::Configuration(format!(
            "endpoint URL must use http or https: {}",
            url
        )));
    }

    Ok(ResolvedEndpoint {
        url,
        model: model.to_string(),
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
