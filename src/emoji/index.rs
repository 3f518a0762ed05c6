//! Per-guild custom emoji index with keyword-based suggestion.
//!
//! Custom emojis are scanned from the gateway and upserted into the database.
//! Suggestion scores candidates by keyword overlap with the user's message,
//! biases toward the server's own emojis, and rotates tokens the bot used
//! recently in the channel to the back so replies don't repeat themselves.

use crate::db::Database;
use crate::llm::LlmClient;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::debug;

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+").unwrap());

/// Assistant messages scanned when rotating recently used tokens.
const RECENT_SCAN_LIMIT: usize = 30;

/// Flat score bonus for custom emojis over Unicode candidates.
const CUSTOM_BIAS: f64 = 0.10;

/// Customs with no keyword match still stay in the running at this score.
const CUSTOM_FLOOR: f64 = 0.01;

/// Emojis described per model call, to keep the prompt small.
const DESCRIBE_BATCH: usize = 10;

/// Stored descriptions are capped to avoid bloating later prompts.
const DESCRIPTION_MAX_LEN: usize = 600;

/// Curated Unicode candidates: (character, keywords).
static UNICODE_EMOJIS: &[(&str, &[&str])] = &[
    ("🔥", &["fire", "hot", "lit", "burn", "flame"]),
    ("😂", &["joy", "laugh", "funny", "lol", "haha", "hilarious"]),
    ("❤️", &["heart", "love", "like", "adore"]),
    ("👍", &["thumbs", "up", "good", "yes", "approve", "agree", "ok"]),
    ("🎉", &["party", "celebrate", "congrats", "congratulations", "tada", "woo"]),
    ("⭐", &["star", "favorite", "awesome", "great"]),
    ("🚀", &["rocket", "launch", "ship", "fast", "speed"]),
    ("✨", &["sparkles", "shiny", "magic", "new", "clean"]),
    ("👀", &["eyes", "look", "watch", "see", "suspicious"]),
    ("😭", &["sob", "cry", "sad", "tears"]),
    ("👏", &["clap", "applause", "bravo", "well", "done"]),
    ("👋", &["wave", "hello", "hi", "bye", "goodbye", "greetings"]),
    ("🤔", &["thinking", "think", "hmm", "consider", "wonder"]),
    ("💯", &["hundred", "perfect", "score", "agree", "facts"]),
    ("✅", &["check", "done", "complete", "correct", "yes"]),
    ("⚠️", &["warning", "careful", "caution", "danger"]),
    ("☀️", &["sun", "sunny", "morning", "weather", "bright"]),
    ("🌙", &["moon", "night", "sleep", "evening"]),
    ("🍕", &["pizza", "food", "hungry", "dinner", "lunch"]),
    ("☕", &["coffee", "morning", "tired", "caffeine", "tea"]),
    ("🎶", &["music", "song", "sing", "tune", "melody"]),
    ("🎮", &["game", "gaming", "play", "controller", "video"]),
    ("📚", &["book", "books", "read", "study", "learn"]),
    ("🐛", &["bug", "insect", "error", "glitch"]),
    ("💪", &["muscle", "strong", "strength", "workout", "power"]),
    ("😅", &["sweat", "phew", "awkward", "relief", "oops"]),
    ("🙏", &["pray", "please", "thanks", "thank", "hope"]),
    ("💀", &["skull", "dead", "dying", "lmao"]),
    ("🤖", &["robot", "bot", "machine", "ai"]),
    ("🧠", &["brain", "smart", "think", "idea", "clever"]),
];

#[derive(Debug, Clone)]
struct CustomEmoji {
    emoji_id: u64,
    name: String,
    animated: bool,
    description: Option<String>,
}

impl CustomEmoji {
    fn token(&self) -> String {
        if self.animated {
            format!("<a:{}:{}>", self.name, self.emoji_id)
        } else {
            format!("<:{}:{}>", self.name, self.emoji_id)
        }
    }
}

#[derive(Clone)]
pub struct EmojiIndexService {
    db: Database,
}

impl EmojiIndexService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert the guild's current emoji set and prune rows for emojis that
    /// were removed. `emojis` is (id, name, animated) straight off the
    /// gateway. Returns the number of emojis indexed.
    pub fn index_guild(&self, guild_id: u64, emojis: &[(u64, String, bool)]) -> anyhow::Result<usize> {
        for (id, name, animated) in emojis {
            self.db.upsert_custom_emoji(guild_id, *id, name, *animated)?;
        }
        let keep: Vec<u64> = emojis.iter().map(|(id, _, _)| *id).collect();
        let pruned = self.db.prune_custom_emojis(guild_id, &keep)?;
        if pruned > 0 {
            debug!("Pruned {} stale emojis for guild {}", pruned, guild_id);
        }
        Ok(emojis.len())
    }

    /// Suggest up to `limit` emoji tokens for a message, roughly two thirds
    /// custom when the guild has any. Recently used customs in this channel
    /// rotate to the back of the candidate order.
    pub fn suggest_for_text(
        &self,
        guild_id: u64,
        channel_id: u64,
        text: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<String>> {
        let text_tokens = tokenize(text);

        let customs = self.fetch_customs(guild_id)?;
        let recent = self.recently_used_tokens(guild_id, channel_id)?;

        let mut custom_scored: Vec<(f64, String)> = customs
            .iter()
            .map(|ce| {
                let mut target = vec![ce.name.clone()];
                if let Some(desc) = &ce.description {
                    target.extend(tokenize(desc));
                }
                let mut score = score_keywords(&text_tokens, &target) + CUSTOM_BIAS;
                if score <= CUSTOM_BIAS {
                    score = CUSTOM_FLOOR + CUSTOM_BIAS;
                }
                (score, ce.token())
            })
            .collect();
        custom_scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        // Stable: equal scores keep rank, recently used go last
        custom_scored.sort_by_key(|(_, token)| recent.contains(token));

        let mut unicode_scored: Vec<(f64, String)> = UNICODE_EMOJIS
            .iter()
            .filter_map(|(ch, keywords)| {
                let target: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
                let score = score_keywords(&text_tokens, &target);
                (score > 0.0).then(|| (score, ch.to_string()))
            })
            .collect();
        unicode_scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let mut merged: Vec<String> = Vec::with_capacity(limit);
        let custom_quota = custom_scored.len().min((2 * limit + 2) / 3).max(1);
        for (_, token) in custom_scored.iter().take(custom_quota) {
            if !merged.contains(token) {
                merged.push(token.clone());
            }
        }
        for (_, token) in &unicode_scored {
            if merged.len() >= limit {
                break;
            }
            if !merged.contains(token) {
                merged.push(token.clone());
            }
        }

        // A message explicitly about emojis gets the rest of the customs too
        let asked_about_emojis = text_tokens
            .iter()
            .any(|t| matches!(t.as_str(), "emoji" | "emojis" | "custom" | "customs"));
        if merged.len() < limit && asked_about_emojis {
            for (_, token) in &custom_scored {
                if merged.len() >= limit {
                    break;
                }
                if !merged.contains(token) {
                    merged.push(token.clone());
                }
            }
        }

        merged.truncate(limit);
        Ok(merged)
    }

    /// Best-effort: ask the model for short descriptions of custom emojis
    /// that have none, based on their names, and store what comes back.
    /// Returns the number of descriptions saved.
    pub async fn ensure_descriptions(
        &self,
        llm: &LlmClient,
        guild_id: u64,
    ) -> anyhow::Result<usize> {
        let missing = self
            .db
            .custom_emojis_missing_description(guild_id, DESCRIBE_BATCH)?;
        if missing.is_empty() {
            return Ok(0);
        }
        let names: Vec<String> = missing.iter().map(|(_, name)| name.clone()).collect();

        let system = "You describe custom Discord emojis based on their names only. \
                      Return a STRICT JSON object mapping each name to a short description \
                      of its likely meaning, tone, and typical usage. No extra text.";
        let user = format!("Names: {}", names.join(", "));
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()?
                .into(),
        ];

        let raw = match llm.generate(messages, None, None, None).await {
            Ok(text) => text,
            Err(e) => {
                debug!("Emoji description fetch failed: {}", e);
                return Ok(0);
            }
        };

        let descriptions = parse_description_map(&raw, &names);
        let mut saved = 0;
        for (emoji_id, name) in &missing {
            if let Some(desc) = descriptions.get(name) {
                self.db.set_emoji_description(guild_id, *emoji_id, desc)?;
                saved += 1;
            }
        }
        Ok(saved)
    }

    fn fetch_customs(&self, guild_id: u64) -> anyhow::Result<Vec<CustomEmoji>> {
        let rows = self.db.custom_emojis_for_guild(guild_id)?;
        Ok(rows
            .into_iter()
            .map(|(emoji_id, name, animated, description)| CustomEmoji {
                emoji_id,
                name,
                animated,
                description,
            })
            .collect())
    }

    /// Custom tokens present in the bot's last replies in this channel.
    fn recently_used_tokens(&self, guild_id: u64, channel_id: u64) -> anyhow::Result<HashSet<String>> {
        let contents = self
            .db
            .recent_assistant_contents(guild_id, channel_id, RECENT_SCAN_LIMIT)?;
        let mut tokens = HashSet::new();
        for content in contents {
            for m in super::CUSTOM_TOKEN_RE.find_iter(&content) {
                tokens.insert(m.as_str().to_string());
            }
        }
        Ok(tokens)
    }
}

/// Parse a model reply into name → description, keeping only requested names.
/// Tolerates prose around the JSON object by slicing between the outermost
/// braces before giving up.
fn parse_description_map(raw: &str, names: &[String]) -> HashMap<String, String> {
    let attempt = |s: &str| -> Option<HashMap<String, String>> {
        let value: serde_json::Value = serde_json::from_str(s).ok()?;
        let object = value.as_object()?;
        Some(
            object
                .iter()
                .filter(|(k, _)| names.contains(k))
                .filter_map(|(k, v)| {
                    let desc: String = v.as_str()?.trim().chars().take(DESCRIPTION_MAX_LEN).collect();
                    (!desc.is_empty()).then(|| (k.clone(), desc))
                })
                .collect(),
        )
    };

    let trimmed = raw.trim();
    if let Some(map) = attempt(trimmed) {
        return map;
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            if let Some(map) = attempt(&trimmed[start..=end]) {
                return map;
            }
        }
    }
    HashMap::new()
}

fn tokenize(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Keyword overlap score in [0, 1], with a weak substring fallback when
/// nothing intersects exactly.
fn score_keywords(query: &[String], target: &[String]) -> f64 {
    if query.is_empty() || target.is_empty() {
        return 0.0;
    }
    let qt: HashSet<&str> = query.iter().map(|s| s.as_str()).collect();
    let tt: HashSet<String> = target.iter().map(|s| s.to_lowercase()).collect();
    let inter = qt.iter().filter(|q| tt.contains(**q)).count();
    if inter == 0 {
        let mut score = 0.0;
        for q in &qt {
            for t in &tt {
                if q.len() >= 4 && t.contains(*q) {
                    score += 0.2;
                }
            }
        }
        return score;
    }
    (inter as f64 / (qt.len() as f64).sqrt()).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_config;

    fn test_service() -> EmojiIndexService {
        let db = Database::new(&test_config()).unwrap();
        db.execute_init().unwrap();
        EmojiIndexService::new(db)
    }

    fn guild_emojis(items: &[(u64, &str, bool)]) -> Vec<(u64, String, bool)> {
        items.iter().map(|(id, n, a)| (*id, n.to_string(), *a)).collect()
    }

    #[test]
    fn test_index_guild_upserts_and_prunes() {
        let service = test_service();

        let n = service
            .index_guild(1, &guild_emojis(&[(100, "blob", false), (101, "party", true)]))
            .unwrap();
        assert_eq!(n, 2);

        // One emoji removed from the guild
        service.index_guild(1, &guild_emojis(&[(100, "blob", false)])).unwrap();
        let tokens = service.suggest_for_text(1, 10, "anything", 6).unwrap();
        assert!(tokens.contains(&"<:blob:100>".to_string()));
        assert!(!tokens.iter().any(|t| t.contains("party")));
    }

    #[test]
    fn test_keyword_match_ranks_first() {
        let service = test_service();
        service
            .index_guild(
                1,
                &guild_emojis(&[(100, "blob", false), (101, "pizza_time", false)]),
            )
            .unwrap();

        let tokens = service.suggest_for_text(1, 10, "who wants pizza tonight", 6).unwrap();
        assert_eq!(tokens[0], "<:pizza_time:101>");
    }

    #[test]
    fn test_animated_token_form() {
        let service = test_service();
        service.index_guild(1, &guild_emojis(&[(101, "party", true)])).unwrap();

        let tokens = service.suggest_for_text(1, 10, "party time", 6).unwrap();
        assert!(tokens.contains(&"<a:party:101>".to_string()));
    }

    #[test]
    fn test_unicode_fills_remaining_slots() {
        let service = test_service();
        service.index_guild(1, &guild_emojis(&[(100, "blob", false)])).unwrap();

        let tokens = service.suggest_for_text(1, 10, "that fire pizza party", 6).unwrap();
        assert!(tokens.contains(&"<:blob:100>".to_string()));
        assert!(tokens.iter().any(|t| !t.starts_with('<')));
    }

    #[test]
    fn test_recently_used_customs_rotate_to_back() {
        let service = test_service();
        service
            .index_guild(1, &guild_emojis(&[(100, "blob", false), (101, "wave", false)]))
            .unwrap();

        // Bot recently used <:blob:100> in this channel
        service
            .db
            .append_message(1, 10, None, "assistant", "sure <:blob:100>", 2)
            .unwrap();

        let tokens = service.suggest_for_text(1, 10, "hello there", 6).unwrap();
        let blob = tokens.iter().position(|t| t == "<:blob:100>").unwrap();
        let wave = tokens.iter().position(|t| t == "<:wave:101>").unwrap();
        assert!(wave < blob);
    }

    #[test]
    fn test_parse_description_map_strict_json() {
        let names = vec!["blob".to_string(), "wave".to_string()];
        let map = parse_description_map(
            r#"{"blob": "A round friendly face.", "wave": "A greeting.", "other": "ignored"}"#,
            &names,
        );
        assert_eq!(map.len(), 2);
        assert_eq!(map["blob"], "A round friendly face.");
        assert!(!map.contains_key("other"));
    }

    #[test]
    fn test_parse_description_map_tolerates_surrounding_prose() {
        let names = vec!["blob".to_string()];
        let map = parse_description_map(
            "Here you go:\n{\"blob\": \"A friendly blob.\"}\nHope that helps!",
            &names,
        );
        assert_eq!(map["blob"], "A friendly blob.");
    }

    #[test]
    fn test_parse_description_map_garbage_yields_empty() {
        let names = vec!["blob".to_string()];
        assert!(parse_description_map("not json at all", &names).is_empty());
        assert!(parse_description_map("[1, 2, 3]", &names).is_empty());
    }

    #[test]
    fn test_no_customs_still_suggests_unicode() {
        let service = test_service();
        let tokens = service.suggest_for_text(1, 10, "great game tonight", 6).unwrap();
        assert!(!tokens.is_empty());
        assert!(tokens.iter().all(|t| !t.starts_with('<')));
    }
}
