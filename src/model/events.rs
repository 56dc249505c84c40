//! Progress events pushed to the caller while a session runs

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::stage::{Stage, StageResult, StageResults};
use super::usage::TokenUsage;

/// One frame of the analysis push-stream
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    StageStarted {
        stage: Stage,
        message: String,
    },
    StageProgress {
        stage: Stage,
        chunk: String,
    },
    StageCompleted {
        stage: Stage,
        message: String,
        #[serde(rename = "analysisResult")]
        analysis_result: StageResult,
        #[serde(rename = "tokenUsage", skip_serializing_if = "Option::is_none")]
        token_usage: Option<TokenUsage>,
    },
    Complete {
        stage: &'static str,
        data: StageResults,
        #[serde(rename = "comprehensiveSummary")]
        comprehensive_summary: String,
        #[serde(rename = "totalTokenUsage")]
        total_token_usage: TokenUsage,
    },
    Error {
        stage: &'static str,
        success: bool,
        message: String,
        error: String,
        #[serde(rename = "fileId", skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl StreamEvent {
    pub fn stage_started(stage: Stage) -> Self {
        StreamEvent::StageStarted {
            stage,
            message: format!("Starting {}...", stage.title().to_lowercase()),
        }
    }

    pub fn stage_progress(stage: Stage, chunk: impl Into<String>) -> Self {
        StreamEvent::StageProgress {
            stage,
            chunk: chunk.into(),
        }
    }

    pub fn stage_completed(stage: Stage, result: StageResult) -> Self {
        let token_usage = result.token_usage;
        StreamEvent::StageCompleted {
            stage,
            message: format!("{} complete", stage.title()),
            analysis_result: result,
            token_usage,
        }
    }

    pub fn complete(data: StageResults, summary: String, total: TokenUsage) -> Self {
        StreamEvent::Complete {
            stage: "complete",
            data,
            comprehensive_summary: summary,
            total_token_usage: total,
        }
    }

    pub fn error(message: impl Into<String>, error: impl Into<String>, file_id: Option<String>) -> Self {
        StreamEvent::Error {
            stage: "error",
            success: false,
            message: message.into(),
            error: error.into(),
            file_id,
            timestamp: Utc::now(),
        }
    }

    /// Whether no further events follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }

    /// Text event-stream frame: one `data:` line followed by a blank line
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::stage::StageFindings;

    #[test]
    fn test_started_frame() {
        let frame = StreamEvent::stage_started(Stage::Design).to_frame().unwrap();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("}\n\n"));
        assert_eq!(frame.matches('\n').count(), 2);

        let value: serde_json::Value =
            serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(value["stage"], "design");
        assert!(value["message"].as_str().unwrap().contains("design defect review"));
    }

    #[test]
    fn test_progress_chunk_with_newlines_stays_on_one_line() {
        let frame = StreamEvent::stage_progress(Stage::Logic, "line one\nline two")
            .to_frame()
            .unwrap();
        assert_eq!(frame.matches('\n').count(), 2);
        assert!(frame.contains("\\n"));
    }

    #[test]
    fn test_completed_carries_usage() {
        let result = StageResult {
            analysis: "body".to_string(),
            findings: StageFindings::Structure {
                summary: "body".to_string(),
            },
            token_usage: Some(TokenUsage::new(3, 4)),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(StreamEvent::stage_completed(Stage::Structure, result)).unwrap();
        assert_eq!(value["stage"], "structure");
        assert_eq!(value["analysisResult"]["summary"], "body");
        assert_eq!(value["tokenUsage"]["total"], 7);
    }

    #[test]
    fn test_complete_and_error_are_terminal() {
        let complete = StreamEvent::complete(StageResults::default(), "report".into(), TokenUsage::default());
        let value = serde_json::to_value(&complete).unwrap();
        assert_eq!(value["stage"], "complete");
        assert_eq!(value["comprehensiveSummary"], "report");
        assert!(complete.is_terminal());

        let error = StreamEvent::error("analysis failed", "boom", Some("file_1".into()));
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["fileId"], "file_1");
        assert!(error.is_terminal());
        assert!(!StreamEvent::stage_started(Stage::Risk).is_terminal());
    }
}
