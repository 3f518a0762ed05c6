//! Prompt and context-window assembly for a single generation request.

use crate::memory::ConversationMessage;
use crate::personas::Persona;
use crate::preferences::EffectivePolicy;

/// Standing guidelines appended after every persona prompt. These keep the
/// model grounded in chat-style output regardless of persona.
const BASE_GUIDELINES: &str = "\
You are chatting in a Discord server. Reply as a single chat message in plain \
conversational text. Do not prefix your reply with your own name or role. \
Stay in character and respond directly to the most recent message.";

#[derive(Debug)]
pub struct AssembledContext {
    pub system_prompt: String,
    pub history: Vec<ConversationMessage>,
}

#[derive(Clone)]
pub struct ContextAssembler {
    token_budget: usize,
}

impl ContextAssembler {
    pub fn new(token_budget: usize) -> Self {
        Self { token_budget }
    }

    /// Assemble the system prompt and the budget-capped history window.
    ///
    /// `emoji_candidates` are ready-to-send tokens suggested for this message
    /// (custom `<:name:id>` forms and Unicode characters); an empty slice
    /// omits the emoji hint entirely.
    pub fn assemble(
        &self,
        persona: &Persona,
        policy: &EffectivePolicy,
        history: Vec<ConversationMessage>,
        emoji_candidates: &[String],
    ) -> AssembledContext {
        let mut sections = vec![BASE_GUIDELINES.to_string()];
        sections.push(policy.response_length.guidance().to_string());
        sections.push(policy.emoji_density.guidance().to_string());
        sections.push(persona.system_prompt.clone());
        if !emoji_candidates.is_empty() {
            sections.push(format!(
                "This server has emojis you may use, written exactly as shown: {}",
                emoji_candidates.join(" ")
            ));
        }

        AssembledContext {
            system_prompt: sections.join("\n\n"),
            history: self.cap_to_budget(history),
        }
    }

    /// Drop oldest messages first until the window fits the token budget.
    /// The newest message always survives even if it alone exceeds the budget.
    fn cap_to_budget(&self, history: Vec<ConversationMessage>) -> Vec<ConversationMessage> {
        let mut spent = 0usize;
        let mut kept = Vec::with_capacity(history.len());
        for message in history.into_iter().rev() {
            if !kept.is_empty() && spent + message.token_estimate > self.token_budget {
                break;
            }
            spent += message.token_estimate;
            kept.push(message);
        }
        kept.reverse();
        kept
    }
}
