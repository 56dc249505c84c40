//! OpenAI-compatible chat-completion client over reqwest

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::sse::{WireUsage, read_event_stream};
use super::{
    ChatCompletion, ChatMessage, ChatProvider, ChatRequest, ProviderError, ResolvedEndpoint,
    StreamUpdate, resolve_endpoint,
};
use crate::model::{ProviderPresets, TokenUsage};
use crate::service::text::prefix_chars;

const TEMPERATURE: f32 = 0.3;
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

// Response models - only the fields we need
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Client for the preset and custom chat-completion endpoints
#[derive(Clone)]
pub struct HttpChatClient {
    client: Client,
    presets: ProviderPresets,
}

impl HttpChatClient {
    pub fn new(presets: ProviderPresets) -> Self {
        Self {
            client: Client::new(),
            presets,
        }
    }

    fn body<'a>(
        endpoint: &'a ResolvedEndpoint,
        request: &'a ChatRequest,
        stream: bool,
    ) -> CompletionBody<'a> {
        CompletionBody {
            model: &endpoint.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: TEMPERATURE,
            stream,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
        }
    }

    /// Send the request and check the status; the caller reads the body
    async fn send(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<(ResolvedEndpoint, reqwest::Response), ProviderError> {
        let endpoint = resolve_endpoint(&request.provider, &self.presets)?;

        tracing::debug!(
            provider = %request.provider.kind,
            model = %endpoint.model,
            url = %endpoint.url,
            stream,
            prompt_len = request.prompt_length(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(endpoint.url.clone())
            .bearer_auth(&request.provider.api_key)
            .json(&Self::body(&endpoint, request, stream))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: prefix_chars(&body, MAX_ERROR_BODY_CHARS).to_string(),
            });
        }

        Ok((endpoint, response))
    }
}

fn parse_completion(body: &str) -> Result<ChatCompletion, ProviderError> {
    let response: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::MalformedResponse(format!("Failed to deserialize response: {}", e)))?;

    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or_else(|| ProviderError::MalformedResponse("response has no message content".into()))?;

    Ok(ChatCompletion {
        content,
        token_usage: response.usage.map(TokenUsage::from),
    })
}

#[async_trait]
impl ChatProvider for HttpChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
        let started = Instant::now();
        let (endpoint, response) = self.send(request, false).await?;

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let completion = parse_completion(&body)?;

        tracing::info!(
            model = %endpoint.model,
            response_len = completion.content.len(),
            usage = ?completion.token_usage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chat completion finished"
        );

        Ok(completion)
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        on_update: &mut (dyn for<'d> FnMut(StreamUpdate<'d>) + Send),
    ) -> Result<ChatCompletion, ProviderError> {
        let started = Instant::now();
        let (endpoint, response) = self.send(request, true).await?;

        let completion = read_event_stream(response.bytes_stream(), on_update).await?;

        tracing::info!(
            model = %endpoint.model,
            response_len = completion.content.len(),
            usage = ?completion.token_usage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Streamed chat completion finished"
        );

        Ok(completion)
    }
}
