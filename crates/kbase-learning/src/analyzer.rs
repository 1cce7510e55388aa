use kbase_core::KbError;
use kbase_triage::llm::{ChatMessage, LlmClient};
use kbase_triage::prompt::parse_json_object;
use serde::{Deserialize, Serialize};

use crate::store::Interaction;

const GAP_SYSTEM_PROMPT: &str = "\
You review conversations between a developer and an AI coding assistant that
relies on a documentation knowledge base. Decide whether the assistant's answer
reveals a gap in that documentation: missing information, outdated content,
an unclear explanation or a wrong example.

Respond with a JSON object:
{
  \"has_gap\": true | false,
  \"concept\": \"Documented concept the gap belongs to\",
  \"gap_type\": \"missing_info\" | \"outdated\" | \"unclear\" | \"incorrect_example\",
  \"proposed_fix\": \"One sentence describing the documentation change\"
}";

/// Whether an interaction exposed missing or wrong documentation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapAnalysis {
    pub has_gap: bool,
    #[serde(default)]
    pub concept: Option<String>,
    #[serde(default)]
    pub gap_type: Option<String>,
    #[serde(default)]
    pub proposed_fix: Option<String>,
}

impl GapAnalysis {
    pub fn none() -> Self {
        Self::default()
    }
}

fn build_prompt(interaction: &Interaction) -> String {
    let mut prompt = format!(
        "Developer:\n{}\n\nAssistant:\n{}\n",
        interaction.user_context, interaction.agent_response
    );
    if let Some(feedback) = &interaction.user_feedback {
        prompt.push_str(&format!("\nDeveloper feedback:\n{feedback}\n"));
    }
    prompt
}

/// Interpret the model's answer. Anything unusable means "no gap".
///
/// A gap without a concept is also treated as no gap, since it cannot be
/// stored.
pub fn parse_gap_response(response: &str) -> GapAnalysis {
    match parse_json_object::<GapAnalysis>(response) {
        Ok(analysis) if !analysis.has_gap => GapAnalysis::none(),
        Ok(analysis) if analysis.concept.as_deref().is_some_and(|c| !c.trim().is_empty()) => {
            analysis
        }
        Ok(_) => {
            tracing::warn!("gap analysis reported a gap without a concept, ignoring");
            GapAnalysis::none()
        }
        Err(e) => {
            tracing::warn!(error = %e, "malformed gap analysis, assuming no gap");
            GapAnalysis::none()
        }
    }
}

/// Ask the model whether an interaction reveals a documentation gap.
///
/// # Errors
///
/// Returns [`KbError::Llm`] only when the model cannot be reached.
pub async fn analyze(llm: &LlmClient, interaction: &Interaction) -> Result<GapAnalysis, KbError> {
    let messages = vec![
        ChatMessage::system(GAP_SYSTEM_PROMPT),
        ChatMessage::user(build_prompt(interaction)),
    ];
    let response = llm.chat(messages).await?;
    let analysis = parse_gap_response(&response);
    tracing::info!(
        interaction = interaction.id,
        has_gap = analysis.has_gap,
        "interaction analyzed"
    );
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gap() {
        let a = parse_gap_response(
            "```json\n{\"has_gap\": true, \"concept\": \"Storage API\", \"gap_type\": \"missing_info\", \
             \"proposed_fix\": \"Document rate limits\"}\n```",
        );
        assert!(a.has_gap);
        assert_eq!(a.concept.as_deref(), Some("Storage API"));
    }

    #[test]
    fn malformed_output_means_no_gap() {
        assert_eq!(parse_gap_response("maybe?"), GapAnalysis::none());
        assert_eq!(parse_gap_response("{\"has_gap\": \"yes\"}"), GapAnalysis::none());
        assert_eq!(parse_gap_response("{\"has_gap\": true, \"concept\": \" \"}"), GapAnalysis::none());
    }

    #[test]
    fn no_gap_drops_details() {
        let a = parse_gap_response("{\"has_gap\": false, \"concept\": \"Jobs\"}");
        assert_eq!(a, GapAnalysis::none());
    }

    #[test]
    fn prompt_includes_feedback() {
        let interaction = Interaction {
            id: 1,
            timestamp: String::new(),
            user_context: "How do I page results?".into(),
            agent_response: "Use offset".into(),
            user_feedback: Some("Rating: 1/5. offset is gone".into()),
            identified_gap: false,
            created_issue_id: None,
            created_at: String::new(),
        };
        let prompt = build_prompt(&interaction);
        assert!(prompt.contains("Developer feedback:\nRating: 1/5. offset is gone"));
    }
}
