use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use super::usage::TokenUsage;

/// One analysis step of the review pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Structure,
    Design,
    Logic,
    Risk,
}

impl Stage {
    /// Fixed execution order
    pub const ALL: [Stage; 4] = [Stage::Structure, Stage::Design, Stage::Logic, Stage::Risk];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Structure => "structure",
            Stage::Design => "design",
            Stage::Logic => "logic",
            Stage::Risk => "risk",
        }
    }

    /// Human readable title used in progress messages and reports
    pub fn title(&self) -> &'static str {
        match self {
            Stage::Structure => "Document structure analysis",
            Stage::Design => "Design defect review",
            Stage::Logic => "Logic consistency analysis",
            Stage::Risk => "Risk assessment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a session in the stage state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Structure,
    Design,
    Logic,
    Risk,
    Complete,
}

impl From<Stage> for PipelineState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Structure => PipelineState::Structure,
            Stage::Design => PipelineState::Design,
            Stage::Logic => PipelineState::Logic,
            Stage::Risk => PipelineState::Risk,
        }
    }
}

/// Overall risk rating pulled out of the risk stage text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl From<RiskLevel> for u8 {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low => 1,
            RiskLevel::Medium => 2,
            RiskLevel::High => 3,
        }
    }
}

impl TryFrom<u8> for RiskLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RiskLevel::Low),
            2 => Ok(RiskLevel::Medium),
            3 => Ok(RiskLevel::High),
            other => Err(format!("invalid risk level: {}", other)),
        }
    }
}

/// Stage-specific fields derived from the raw stage text
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StageFindings {
    Structure {
        summary: String,
    },
    Design {
        issues: Vec<String>,
        recommendations: Vec<String>,
    },
    Logic {
        inconsistencies: Vec<String>,
        corrections: Vec<String>,
    },
    Risk {
        #[serde(rename = "riskLevel")]
        risk_level: RiskLevel,
        mitigation: Vec<String>,
    },
}

/// Output of one analysis stage
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    /// Full provider text for the stage
    pub analysis: String,
    #[serde(flatten)]
    pub findings: StageFindings,
    #[serde(rename = "tokenUsage", skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// When the stage finished
    pub timestamp: DateTime<Utc>,
}

/// Stage results in completion order, serialized as a JSON object
#[derive(Debug, Clone, Default)]
pub struct StageResults(Vec<(Stage, StageResult)>);

impl StageResults {
    pub fn get(&self, stage: Stage) -> Option<&StageResult> {
        self.0.iter().find(|(s, _)| *s == stage).map(|(_, r)| r)
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.get(stage).is_some()
    }

    /// Append a result; returns `false` and keeps the existing one if the
    /// stage was already recorded
    pub(crate) fn insert(&mut self, stage: Stage, result: StageResult) -> bool {
        if self.contains(stage) {
            return false;
        }
        self.0.push((stage, result));
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, &StageResult)> {
        self.0.iter().map(|(s, r)| (*s, r))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Raw text of a stage, empty when the stage has no result
    pub fn analysis_text(&self, stage: Stage) -> &str {
        self.get(stage).map(|r| r.analysis.as_str()).unwrap_or_default()
    }
}

impl Serialize for StageResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (stage, result) in &self.0 {
            map.serialize_entry(stage.as_str(), result)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str) -> StageResult {
        StageResult {
            analysis: text.to_string(),
            findings: StageFindings::Structure {
                summary: text.to_string(),
            },
            token_usage: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_stage_order() {
        let names: Vec<_> = Stage::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["structure", "design", "logic", "risk"]);
    }

    #[test]
    fn test_results_keep_first_write() {
        let mut results = StageResults::default();
        assert!(results.insert(Stage::Design, result("first")));
        assert!(!results.insert(Stage::Design, result("second")));
        assert_eq!(results.len(), 1);
        assert_eq!(results.analysis_text(Stage::Design), "first");
    }

    #[test]
    fn test_results_serialize_in_completion_order() {
        let mut results = StageResults::default();
        results.insert(Stage::Logic, result("l"));
        results.insert(Stage::Structure, result("s"));

        let json = serde_json::to_string(&results).unwrap();
        let logic_pos = json.find("\"logic\"").unwrap();
        let structure_pos = json.find("\"structure\"").unwrap();
        assert!(logic_pos < structure_pos);
    }

    #[test]
    fn test_risk_findings_shape() {
        let result = StageResult {
            analysis: "text".to_string(),
            findings: StageFindings::Risk {
                risk_level: RiskLevel::High,
                mitigation: vec!["add a rollback plan".to_string()],
            },
            token_usage: Some(TokenUsage::new(10, 5)),
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["riskLevel"], 3);
        assert_eq!(value["mitigation"][0], "add a rollback plan");
        assert_eq!(value["tokenUsage"]["total"], 15);
        assert_eq!(value["analysis"], "text");
    }

    #[test]
    fn test_usage_omitted_when_absent() {
        let value = serde_json::to_value(result("x")).unwrap();
        assert!(value.get("tokenUsage").is_none());
    }
}
