//! Prompt templates for the analysis stages

use crate::model::Stage;
use crate::service::provider::ChatMessage;
use crate::service::text::prefix_chars;

/// Longest document prefix sent to the provider, in characters
pub const MAX_DOCUMENT_CHARS: usize = 50_000;

const NO_PREAMBLE: &str =
    "Output the analysis directly. Do not add any greeting, introduction or closing remarks.";

struct StageTemplate {
    system: &'static str,
    lead_in: &'static str,
}

fn template(stage: Stage) -> StageTemplate {
    match stage {
        Stage::Structure => StageTemplate {
            system: "You are an expert in product document structure. Analyze the structure of the \
                     following product document: its section organization, content hierarchy and \
                     overall architecture.\n\n\
                     Report your analysis in this format:\n\
                     1. Document outline\n\
                     2. Section hierarchy analysis\n\
                     3. Content organization assessment\n\
                     4. Structural improvement suggestions\n\
                     5. Overall score (1-10, higher means better structured)",
            lead_in: "Analyze the structure of the following document:",
        },
        Stage::Design => StageTemplate {
            system: "You are an expert UI/UX designer. Review the following product document for \
                     design defects, including interface design, user experience and interaction \
                     problems.\n\n\
                     Cover these dimensions:\n\
                     1. Interface design consistency\n\
                     2. User experience flow\n\
                     3. Interaction logic soundness\n\
                     4. Concrete issues with improvement recommendations\n\
                     5. Overall score (1-10, higher means better design)",
            lead_in: "Review the following document for design defects:",
        },
        Stage::Logic => StageTemplate {
            system: "You are an expert in logical analysis. Check the following product document \
                     for logical consistency and soundness.\n\n\
                     Focus on:\n\
                     1. Consistency between sections\n\
                     2. Feasibility of the technical approach\n\
                     3. Soundness of business processes\n\
                     4. Inconsistencies and contradictions found, with corrections\n\
                     5. Overall score (1-10, higher means more rigorous)",
            lead_in: "Analyze the logical consistency of the following document:",
        },
        Stage::Risk => StageTemplate {
            system: "You are an expert in risk assessment. Assess the technical implementation \
                     risks and business impact risks of the product described in the following \
                     document.\n\n\
                     Cover these dimensions:\n\
                     1. Technical complexity risk\n\
                     2. Delivery feasibility risk\n\
                     3. Business impact risk\n\
                     4. Overall risk level (high, medium or low) with mitigation measures\n\
                     5. Overall score (1-10, higher means lower risk)",
            lead_in: "Assess the risks in the following document:",
        },
    }
}

/// System and user messages for one stage
pub fn stage_messages(stage: Stage, document: &str) -> Vec<ChatMessage> {
    let template = template(stage);
    vec![
        ChatMessage::system(format!("{}\n\n{}", template.system, NO_PREAMBLE)),
        ChatMessage::user(format!(
            "{}\n\n{}",
            template.lead_in,
            prefix_chars(document, MAX_DOCUMENT_CHARS)
        )),
    ]
}
