use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use super::stage::{PipelineState, Stage, StageResult, StageResults};

/// Chat-completion backends a session can be analyzed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    DeepSeek,
    Custom,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Custom => "custom",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "deepseek" => Ok(ProviderKind::DeepSeek),
            "custom" => Ok(ProviderKind::Custom),
            other => Err(format!("unsupported provider: {}", other)),
        }
    }
}

/// Provider selection and credentials captured for a session
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub endpoint_override: Option<String>,
    pub model_override: Option<String>,
}

// Keeps the credential out of logs
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &"***")
            .field("endpoint_override", &self.endpoint_override)
            .field("model_override", &self.model_override)
            .finish()
    }
}

/// Per-request replacements for a stored provider config
#[derive(Debug, Clone, Default)]
pub struct ProviderOverrides {
    pub kind: Option<ProviderKind>,
    pub api_key: Option<String>,
    pub endpoint_override: Option<String>,
    pub model_override: Option<String>,
}

impl ProviderOverrides {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.api_key.is_none()
            && self.endpoint_override.is_none()
            && self.model_override.is_none()
    }
}

impl ProviderConfig {
    /// Apply overrides; every supplied value replaces the stored one
    pub fn apply(&mut self, overrides: ProviderOverrides) {
        if let Some(kind) = overrides.kind {
            self.kind = kind;
        }
        if let Some(api_key) = overrides.api_key {
            self.api_key = api_key;
        }
        if let Some(endpoint) = overrides.endpoint_override {
            self.endpoint_override = Some(endpoint);
        }
        if let Some(model) = overrides.model_override {
            self.model_override = Some(model);
        }
    }
}

/// In-memory record of one document moving through the stage pipeline
#[derive(Debug, Clone)]
pub struct AnalysisSession {
    pub id: String,
    document_text: String,
    pub file_name: Option<String>,
    pub provider_config: ProviderConfig,
    stage_results: StageResults,
    completed_stages: Vec<Stage>,
    current_stage: PipelineState,
    pub created_at: DateTime<Utc>,
}

impl AnalysisSession {
    pub fn new(
        id: String,
        document_text: String,
        file_name: Option<String>,
        provider_config: ProviderConfig,
    ) -> Self {
        Self {
            id,
            document_text,
            file_name,
            provider_config,
            stage_results: StageResults::default(),
            completed_stages: Vec::new(),
            current_stage: PipelineState::Structure,
            created_at: Utc::now(),
        }
    }

    pub fn document_text(&self) -> &str {
        &self.document_text
    }

    pub fn stage_results(&self) -> &StageResults {
        &self.stage_results
    }

    pub fn completed_stages(&self) -> &[Stage] {
        &self.completed_stages
    }

    pub fn current_stage(&self) -> PipelineState {
        self.current_stage
    }

    pub fn is_completed(&self, stage: Stage) -> bool {
        self.completed_stages.contains(&stage)
    }

    /// Stages still to run, in pipeline order
    pub fn pending_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| !self.is_completed(*stage))
            .collect()
    }

    pub(crate) fn mark_started(&mut self, stage: Stage) {
        self.current_stage = stage.into();
    }

    /// Record a finished stage. Returns `false` without touching the session
    /// if the stage already has a result.
    pub(crate) fn record(&mut self, stage: Stage, result: StageResult) -> bool {
        if !self.stage_results.insert(stage, result) {
            return false;
        }
        self.completed_stages.push(stage);
        self.current_stage = stage.into();
        true
    }

    pub(crate) fn mark_complete(&mut self) {
        self.current_stage = PipelineState::Complete;
    }
}
