//! Report synthesis prompt and the local fallback report

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::model::{Stage, StageResults};
use crate::service::provider::ChatMessage;
use crate::service::text::{leading_lines, prefix_chars};

const EXCERPT_CHARS: usize = 300;
const FALLBACK_LINES: usize = 5;

const SYSTEM_PROMPT: &str = "You are an expert document analyst. Using the per-dimension \
analysis results, write one complete, professional analysis report suitable for direct PDF \
output. Write only the report body: no greeting, no introduction such as \"Sure, as an expert \
analyst...\", and no closing line such as \"Report complete\". Start directly with the report \
title.";

/// Report number of the form `DOC-ANALYSIS-YYYYMMDD-NNN`
pub fn report_number(now: DateTime<Utc>) -> String {
    let serial: u16 = rand::thread_rng().gen_range(0..1000);
    format!("DOC-ANALYSIS-{}-{:03}", now.format("%Y%m%d"), serial)
}

fn excerpt(results: &StageResults, stage: Stage) -> String {
    format!(
        "{}:\n{}...",
        stage.title(),
        prefix_chars(results.analysis_text(stage), EXCERPT_CHARS)
    )
}

/// Synthesis messages embedding a short excerpt of every stage
pub fn summary_messages(results: &StageResults, report_number: &str, now: DateTime<Utc>) -> Vec<ChatMessage> {
    let excerpts = Stage::ALL
        .iter()
        .map(|stage| excerpt(results, *stage))
        .collect::<Vec<_>>()
        .join("\n\n");

    let user = format!(
        "Write a complete analysis report from the following per-dimension results.\n\n\
         {excerpts}\n\n\
         Requirements:\n\
         1. Start directly with the report title; no opening or closing remarks\n\
         2. Include a title, an executive summary, the main findings and recommendations\n\
         3. Describe each dimension's results precisely in a clear hierarchy\n\
         4. Include an overall evaluation and concrete suggestions\n\
         5. The report header must contain exactly this information:\n\
         \x20  - Report number: {report_number}\n\
         \x20  - Analysis date: {date}\n\
         \x20  - Analyst: AI product document review system\n\
         6. Never use any other date or report number",
        date = now.format("%Y-%m-%d"),
    );

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
}

/// Report assembled from the stage texts alone, used when synthesis fails
pub fn fallback_report(results: &StageResults) -> String {
    let mut report = String::from(
        "# Document analysis report\n\n\
         ## Summary\n\n\
         The comprehensive report could not be generated by the AI service. \
         Key findings of each analysis dimension follow.\n",
    );

    for stage in Stage::ALL {
        report.push_str(&format!(
            "\n## {}\n{}\n",
            stage.title(),
            leading_lines(results.analysis_text(stage), FALLBACK_LINES)
        ));
    }

    report.push_str(
        "\n## Overall evaluation\n\n\
         The analysis of every dimension has finished and its results are shown above. \
         They indicate the overall quality of the document and where it needs work.\n\n\
         ## Recommendations\n\n\
         1. Improve the document based on the findings of each dimension\n\
         2. Check the AI service configuration, API key and network connectivity\n\
         3. Consider a longer timeout or different provider parameters\n\
         4. Analyze the document again to produce the full report\n",
    );

    report
}
