//! Model-gated emoji reactions to inbound messages.
//!
//! Every eligible guild message may earn at most one reaction: candidates
//! come from the emoji index, a cooldown gate keeps the channel from being
//! spammed, and the model makes the final pick with a confidence score.
//! Everything here is best-effort; failures mean no reaction, never an error
//! surfaced to chat.

use super::index::EmojiIndexService;
use crate::db::Database;
use crate::llm::LlmClient;
use crate::rate_limit::RateLimiter;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
};
use poise::serenity_prelude as serenity;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static ONLY_PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\W_\s]+$").unwrap());

static CUSTOM_PARTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<(a?):([A-Za-z0-9_]+):(\d+)>$").unwrap());

/// Messages shorter than this never earn a reaction.
const MIN_CONTENT_LEN: usize = 6;

/// Model confidence below this means no reaction.
const MIN_SCORE: f64 = 0.6;

const CANDIDATE_LIMIT: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionDecision {
    pub emoji: String,
    pub score: f64,
    pub reason: String,
}

pub struct ReactionEngine {
    db: Database,
    emoji_index: EmojiIndexService,
    rate: RateLimiter,
}

impl ReactionEngine {
    pub fn new(db: Database, emoji_index: EmojiIndexService) -> Self {
        Self {
            db,
            emoji_index,
            rate: RateLimiter::default(),
        }
    }

    /// React to a message if the gates pass and the model is confident
    /// enough. Returns whether a reaction was added.
    pub async fn maybe_react(
        &self,
        ctx: &serenity::Context,
        llm: &LlmClient,
        message: &serenity::Message,
    ) -> bool {
        let Some(guild_id) = message.guild_id.map(|id| id.get()) else {
            return false;
        };
        let channel_id = message.channel_id.get();
        let user_id = message.author.id.get();

        let Some(decision) = self
            .decide(llm, guild_id, channel_id, user_id, &message.content)
            .await
        else {
            return false;
        };
        let Some(reaction) = reaction_type_for_token(&decision.emoji) else {
            return false;
        };

        if let Err(e) = message.react(&ctx.http, reaction).await {
            debug!("Failed to add reaction {}: {}", decision.emoji, e);
            return false;
        }
        self.rate.mark(guild_id, channel_id, user_id);
        if let Err(e) = self.db.log_reaction(
            guild_id,
            channel_id,
            message.id.get(),
            &decision.emoji,
            decision.score,
            &decision.reason,
        ) {
            debug!("Failed to log reaction: {}", e);
        }
        debug!(
            "Reacted with {} (score {:.2}) in channel {}",
            decision.emoji, decision.score, channel_id
        );
        true
    }

    /// Run the gates and ask the model to pick one candidate or none.
    async fn decide(
        &self,
        llm: &LlmClient,
        guild_id: u64,
        channel_id: u64,
        user_id: u64,
        content: &str,
    ) -> Option<ReactionDecision> {
        if !should_consider(content) {
            return None;
        }
        if !self.rate.allow(guild_id, channel_id, user_id) {
            return None;
        }

        let candidates = match self
            .emoji_index
            .suggest_for_text(guild_id, channel_id, content, CANDIDATE_LIMIT)
        {
            Ok(candidates) => candidates,
            Err(e) => {
                debug!("Reaction candidates failed: {}", e);
                return None;
            }
        };
        if candidates.is_empty() {
            return None;
        }

        let usage = self
            .db
            .reaction_usage_counts(guild_id, channel_id)
            .unwrap_or_default();

        let decision = self.score_with_model(llm, content, &candidates, &usage).await?;
        (decision.score >= MIN_SCORE).then_some(decision)
    }

    async fn score_with_model(
        &self,
        llm: &LlmClient,
        content: &str,
        candidates: &[String],
        usage: &[(String, u64)],
    ) -> Option<ReactionDecision> {
        let system = "You decide whether a single emoji reaction fits a Discord message. \
                      Choose at most one emoji from the candidates, or none. Prefer the \
                      server's custom emojis when they fit the sentiment. Popularity hints \
                      show what the channel already reacts with. Output STRICT JSON only: \
                      {\"emoji\": string, \"score\": number, \"reason\": string}. The emoji \
                      must be one of the candidates, score is 0.0-1.0 confidence. Be \
                      tasteful and avoid spam.";

        let lines: Vec<String> = candidates
            .iter()
            .map(|token| {
                let kind = if token.starts_with('<') { "custom" } else { "unicode" };
                let pop = usage
                    .iter()
                    .find(|(t, _)| t == token)
                    .map(|(_, n)| *n)
                    .unwrap_or(0);
                format!("- {} ({}, pop {})", token, kind, pop)
            })
            .collect();
        let user = format!(
            "Message:\n{}\n\nCandidates (pick zero or one, output the token exactly):\n{}\n\nReturn JSON only.",
            content,
            lines.join("\n")
        );

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .ok()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .ok()?
                .into(),
        ];

        let raw = match llm.generate(messages, None, None, None).await {
            Ok(text) => text,
            Err(e) => {
                debug!("Reaction scoring failed: {}", e);
                return None;
            }
        };
        parse_reaction_decision(&raw, candidates)
    }
}

/// Cheap pre-gates: very short or punctuation-only messages never react.
fn should_consider(content: &str) -> bool {
    let content = content.trim();
    content.chars().count() >= MIN_CONTENT_LEN && !ONLY_PUNCT_RE.is_match(content)
}

/// Parse the model's JSON verdict, tolerating prose around the object.
/// The emoji must be one of the offered candidates; anything else is a miss.
fn parse_reaction_decision(raw: &str, candidates: &[String]) -> Option<ReactionDecision> {
    let attempt = |s: &str| -> Option<ReactionDecision> {
        let value: serde_json::Value = serde_json::from_str(s).ok()?;
        let object = value.as_object()?;
        let emoji = object.get("emoji")?.as_str()?.trim().to_string();
        if emoji.is_empty() || !candidates.contains(&emoji) {
            return None;
        }
        let score = object.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let reason = object
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();
        Some(ReactionDecision { emoji, score, reason })
    };

    let trimmed = raw.trim();
    if let Some(decision) = attempt(trimmed) {
        return Some(decision);
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return attempt(&trimmed[start..=end]);
        }
    }
    None
}

/// Turn a candidate token into something serenity can react with.
fn reaction_type_for_token(token: &str) -> Option<serenity::ReactionType> {
    if !token.starts_with('<') {
        return Some(serenity::ReactionType::Unicode(token.to_string()));
    }
    let caps = CUSTOM_PARTS_RE.captures(token)?;
    let animated = !caps[1].is_empty();
    let name = caps[2].to_string();
    let id = caps[3].parse::<u64>().ok()?;
    Some(serenity::ReactionType::Custom {
        animated,
        id: serenity::EmojiId::new(id),
        name: Some(name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_should_consider_gates() {
        assert!(should_consider("that was a great game"));
        assert!(!should_consider("ok"));
        assert!(!should_consider("?!... ---"));
        assert!(!should_consider("   "));
    }

    #[test]
    fn test_parse_decision_strict_json() {
        let decision = parse_reaction_decision(
            r#"{"emoji": "🔥", "score": 0.85, "reason": "spicy take"}"#,
            &candidates(&["🔥", "<:blob:100>"]),
        )
        .unwrap();
        assert_eq!(decision.emoji, "🔥");
        assert!((decision.score - 0.85).abs() < f64::EPSILON);
        assert_eq!(decision.reason, "spicy take");
    }

    #[test]
    fn test_parse_decision_tolerates_surrounding_prose() {
        let decision = parse_reaction_decision(
            "Sure!\n{\"emoji\": \"<:blob:100>\", \"score\": 0.9, \"reason\": \"fits\"}\nDone.",
            &candidates(&["<:blob:100>"]),
        )
        .unwrap();
        assert_eq!(decision.emoji, "<:blob:100>");
    }

    #[test]
    fn test_parse_decision_rejects_invented_emoji() {
        let result = parse_reaction_decision(
            r#"{"emoji": "💀", "score": 0.99, "reason": "made up"}"#,
            &candidates(&["🔥"]),
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_parse_decision_missing_score_defaults_to_zero() {
        let decision = parse_reaction_decision(
            r#"{"emoji": "🔥", "reason": "meh"}"#,
            &candidates(&["🔥"]),
        )
        .unwrap();
        assert_eq!(decision.score, 0.0);
    }

    #[test]
    fn test_parse_decision_garbage_is_none() {
        assert!(parse_reaction_decision("no json here", &candidates(&["🔥"])).is_none());
        assert!(parse_reaction_decision("[]", &candidates(&["🔥"])).is_none());
    }

    #[test]
    fn test_reaction_type_for_token() {
        match reaction_type_for_token("🔥").unwrap() {
            serenity::ReactionType::Unicode(s) => assert_eq!(s, "🔥"),
            other => panic!("expected unicode reaction, got {:?}", other),
        }
        match reaction_type_for_token("<a:party:101>").unwrap() {
            serenity::ReactionType::Custom { animated, id, name } => {
                assert!(animated);
                assert_eq!(id.get(), 101);
                assert_eq!(name.as_deref(), Some("party"));
            }
            other => panic!("expected custom reaction, got {:?}", other),
        }
        assert!(reaction_type_for_token("<:broken:abc>").is_none());
    }
}
