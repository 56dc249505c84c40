//! Line-pattern extraction of stage findings from raw stage text

use regex::Regex;

use crate::model::{RiskLevel, Stage, StageFindings};
use crate::service::text::leading_lines;

const SUMMARY_LINES: usize = 5;
const MAX_LIST_ITEMS: usize = 10;
const MAX_MITIGATION_ITEMS: usize = 5;
/// Shorter cleaned lines are headings or fragments, not findings
const MIN_ITEM_CHARS: usize = 10;

const ISSUE_KEYWORDS: &[&str] = &["issue", "problem", "defect", "flaw", "lack", "missing"];
const RECOMMENDATION_KEYWORDS: &[&str] = &["recommend", "suggest", "improve", "optimi"];
const INCONSISTENCY_KEYWORDS: &[&str] = &["inconsisten", "contradict", "conflict"];
const CORRECTION_KEYWORDS: &[&str] = &["correct", "adjust", "revise", "modify", "fix"];
const MITIGATION_KEYWORDS: &[&str] = &["mitigat", "countermeasure", "prevent", "contingency"];

/// Derives the per-stage fields of a stage result
pub struct FindingsExtractor {
    item_prefix: Regex,
    risk_level: Regex,
}

impl FindingsExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            item_prefix: Regex::new(r"^[\d\-.\s]*")?,
            risk_level: Regex::new(r"(?i)\b(high|medium|low)\b")?,
        })
    }

    pub fn extract(&self, stage: Stage, text: &str) -> StageFindings {
        match stage {
            Stage::Structure => StageFindings::Structure {
                summary: leading_lines(text, SUMMARY_LINES),
            },
            Stage::Design => StageFindings::Design {
                issues: self.list_items(text, ISSUE_KEYWORDS, MAX_LIST_ITEMS),
                recommendations: self.list_items(text, RECOMMENDATION_KEYWORDS, MAX_LIST_ITEMS),
            },
            Stage::Logic => StageFindings::Logic {
                inconsistencies: self.list_items(text, INCONSISTENCY_KEYWORDS, MAX_LIST_ITEMS),
                corrections: self.list_items(text, CORRECTION_KEYWORDS, MAX_LIST_ITEMS),
            },
            Stage::Risk => StageFindings::Risk {
                risk_level: self.risk_level(text),
                mitigation: self.list_items(text, MITIGATION_KEYWORDS, MAX_MITIGATION_ITEMS),
            },
        }
    }

    /// Lines mentioning any keyword, with list numbering stripped
    fn list_items(&self, text: &str, keywords: &[&str], limit: usize) -> Vec<String> {
        text.lines()
            .filter(|line| {
                let lower = line.to_lowercase();
                keywords.iter().any(|k| lower.contains(k))
            })
            .map(|line| self.item_prefix.replace(line, "").trim().to_string())
            .filter(|item| item.chars().count() > MIN_ITEM_CHARS)
            .take(limit)
            .collect()
    }

    /// First line naming a level decides; within that line the highest wins.
    /// Defaults to medium.
    fn risk_level(&self, text: &str) -> RiskLevel {
        text.lines()
            .find_map(|line| {
                self.risk_level
                    .find_iter(line)
                    .map(|m| match m.as_str().to_lowercase().as_str() {
                        "high" => RiskLevel::High,
                        "low" => RiskLevel::Low,
                        _ => RiskLevel::Medium,
                    })
                    .max_by_key(|level| u8::from(*level))
            })
            .unwrap_or(RiskLevel::Medium)
    }
}
