//! Event-stream decoding for streamed chat completions
//!
//! The provider sends `data: {json}` lines; each JSON chunk carries a content
//! delta and, on the last chunk, optionally the usage record. `data: [DONE]`
//! ends the stream. Network chunks may split lines and multibyte characters
//! anywhere, so bytes are buffered until a full line is available.

use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;

use super::{ChatCompletion, ProviderError, StreamUpdate};
use crate::model::TokenUsage;

/// Splits a byte stream into text lines
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    /// Feed a chunk, returning every line it completed. Line terminators
    /// (`\n` or `\r\n`) are stripped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Unterminated trailing line, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

/// Wire format of one streamed chunk
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Usage record as reported by OpenAI-compatible providers
#[derive(Debug, Deserialize)]
pub(super) struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<WireUsage> for TokenUsage {
    fn from(usage: WireUsage) -> Self {
        TokenUsage::new(usage.prompt_tokens, usage.completion_tokens)
    }
}

/// What a single event-stream line means
#[derive(Debug)]
enum Line {
    Chunk {
        content: Option<String>,
        usage: Option<TokenUsage>,
    },
    Done,
    Ignored,
}

/// Classify one line. Blank lines, comments and non-data fields are
/// ignored; unparseable data lines are logged and ignored.
fn classify_line(line: &str) -> Line {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return Line::Ignored;
    }

    let Some(data) = trimmed.strip_prefix("data:") else {
        return Line::Ignored;
    };
    let data = data.trim_start();

    if data == "[DONE]" {
        return Line::Done;
    }

    match serde_json::from_str::<ChatChunk>(data) {
        Ok(chunk) => Line::Chunk {
            content: chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta)
                .and_then(|d| d.content),
            usage: chunk.usage.map(TokenUsage::from),
        },
        Err(e) => {
            tracing::warn!(error = %e, line_len = data.len(), "Skipping malformed stream line");
            Line::Ignored
        }
    }
}

/// Accumulated state of a streamed completion
#[derive(Debug, Default)]
struct Accumulator {
    content: String,
    usage: Option<TokenUsage>,
    done: bool,
}

impl Accumulator {
    fn apply(&mut self, line: &str, on_update: &mut (dyn for<'d> FnMut(StreamUpdate<'d>) + Send)) {
        match classify_line(line) {
            Line::Chunk { content, usage } => {
                if let Some(delta) = content.filter(|d| !d.is_empty()) {
                    on_update(StreamUpdate::Delta(&delta));
                    self.content.push_str(&delta);
                }
                if usage.is_some() {
                    self.usage = usage;
                }
            }
            Line::Done => self.done = true,
            Line::Ignored => {}
        }
    }
}

/// Drain an event stream, forwarding every non-empty content delta to
/// `on_update` in arrival order. Ends at `[DONE]` or when the body ends.
pub async fn read_event_stream<S, E>(
    stream: S,
    on_update: &mut (dyn for<'d> FnMut(StreamUpdate<'d>) + Send),
) -> Result<ChatCompletion, ProviderError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = LineDecoder::default();
    let mut acc = Accumulator::default();

    while !acc.done {
        match stream.next().await {
            Some(Ok(chunk)) => {
                for line in decoder.push(&chunk) {
                    acc.apply(&line, on_update);
                    if acc.done {
                        break;
                    }
                }
            }
            Some(Err(e)) => {
                return Err(ProviderError::Network(format!("Stream read error: {}", e)));
            }
            None => {
                if let Some(rest) = decoder.finish() {
                    acc.apply(&rest, on_update);
                }
                break;
            }
        }
    }

    Ok(ChatCompletion {
        content: acc.content,
        token_usage: acc.usage,
    })
}
