use crate::models::chat::Turn;
use std::fmt;

const CONSULTANT_PREAMBLE: &str =
    "You are an expert healthcare AI consultant specializing in evaluating AI/ML project ideas for healthcare organizations. You have deep knowledge of healthcare regulations (HIPAA, FDA guidelines), clinical workflows, health equity considerations, and ROI analysis.

Your role is to guide users through a structured evaluation of their healthcare AI ideas. Follow this conversation flow:";

const CONSULTANT_GUIDANCE: &str =
    "Provide constructive, specific feedback while being encouraging but realistic. Keep responses focused and ask one key question at a time to guide the conversation forward.";

const TRANSCRIPT_HEADER: &str = "Conversation so far:";

/// The interview stages, in the order the consultant walks through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStage {
    ProblemAndSolution,
    ImpactAssessment,
    TechnicalFeasibility,
    ResourcesAndImplementation,
    RiskAndCompliance,
}

impl EvaluationStage {
    pub const ALL: [EvaluationStage; 5] = [
        EvaluationStage::ProblemAndSolution,
        EvaluationStage::ImpactAssessment,
        EvaluationStage::TechnicalFeasibility,
        EvaluationStage::ResourcesAndImplementation,
        EvaluationStage::RiskAndCompliance,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            EvaluationStage::ProblemAndSolution => "Problem & Solution Overview",
            EvaluationStage::ImpactAssessment => "Impact Assessment",
            EvaluationStage::TechnicalFeasibility => "Technical Feasibility",
            EvaluationStage::ResourcesAndImplementation => "Resources & Implementation",
            EvaluationStage::RiskAndCompliance => "Risk & Compliance",
        }
    }

    /// 1-based position in the interview.
    pub fn number(&self) -> usize {
        EvaluationStage::ALL
            .iter()
            .position(|s| s == self)
            .map(|i| i + 1)
            .unwrap_or(0)
    }
}

impl fmt::Display for EvaluationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.number(), self.title())
    }
}

/// Renders the consultant instruction that opens every prompt.
pub fn system_prompt() -> String {
    let stages = EvaluationStage::ALL
        .iter()
        .map(|stage| stage.to_string())
        .collect::<Vec<_>>()
        .join("\n");

    format!("{}\n\n{}\n\n{}", CONSULTANT_PREAMBLE, stages, CONSULTANT_GUIDANCE)
}

/// Flattens the instruction, every prior turn and the new message into one
/// completion prompt ending with the `Assistant:` cue.
///
/// The whole history is concatenated on every call.
pub fn build_prompt(system: &str, history: &[Turn], message: &str) -> String {
    let mut prompt = format!("{}\n\n{}\n", system, TRANSCRIPT_HEADER);

    for turn in history {
        prompt.push_str(&format!("{}: {}\n", turn.role.label(), turn.content));
    }

    prompt.push_str(&format!("User: {}\nAssistant:", message));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_lists_stages_in_order() {
        let prompt = system_prompt();
        let positions: Vec<usize> = EvaluationStage::ALL
            .iter()
            .map(|stage| prompt.find(&stage.to_string()).expect("stage missing"))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(prompt.contains("\n\n1. Problem & Solution Overview\n2. Impact Assessment\n"));
        assert!(prompt.ends_with("guide the conversation forward."));
    }

    #[test]
    fn empty_history_yields_only_the_cue() {
        let prompt = build_prompt("SYS", &[], "We want to predict sepsis risk");
        assert_eq!(
            prompt,
            "SYS\n\nConversation so far:\nUser: We want to predict sepsis risk\nAssistant:"
        );
    }

    #[test]
    fn history_is_rendered_in_input_order() {
        let history = vec![
            Turn::user("first"),
            Turn::assistant("second"),
            Turn::user("first"),
            Turn::assistant("third")
        ];
        let prompt = build_prompt("SYS", &history, "next");
        assert!(
            prompt.ends_with(
                "User: first\nAssistant: second\nUser: first\nAssistant: third\nUser: next\nAssistant:"
            )
        );
    }

    #[test]
    fn prompt_always_ends_with_cue() {
        for message in ["", "multi\nline", "User: spoof"] {
            let prompt = build_prompt(&system_prompt(), &[Turn::assistant("hello")], message);
            assert!(prompt.ends_with(&format!("User: {}\nAssistant:", message)));
        }
    }
}
