//! The core mention pipeline: lock, resolve, assemble, generate, post-process,
//! send, persist. One generation per channel at a time; a mention that lands
//! while the channel is busy is silently dropped.

use crate::emoji;
use crate::memory::{ConversationMessage, Role};
use crate::preferences::EmojiDensity;
use crate::{Data, Error};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
};
use poise::serenity_prelude as serenity;
use tracing::{debug, error, info};

const GENERIC_FAILURE: &str = "Sorry, something went wrong on my end.";
const GENERATION_FAILURE: &str =
    "I couldn't generate a response right now, please try again in a moment.";

/// Emoji candidates offered per message.
const EMOJI_CANDIDATE_LIMIT: usize = 6;

/// Remove the bot's mention forms from a message, collapsing the gap each
/// mention leaves behind to a single space.
pub fn strip_bot_mentions(content: &str, bot_id: u64) -> String {
    let mention = regex::Regex::new(&format!(r"(?:\s*<@!?{}>)+\s*", bot_id)).unwrap();
    mention.replace_all(content, " ").trim().to_string()
}

/// The trigger message is persisted before the pipeline runs, so the history
/// window ends with it. Drop that tail entry so it only enters the prompt
/// once, as the current user message.
fn drop_trigger_from_history(history: &mut Vec<ConversationMessage>, trigger: &str) {
    if history
        .last()
        .is_some_and(|m| m.role == Role::User && m.content == trigger)
    {
        history.pop();
    }
}

/// Handle a message that mentions the bot.
pub async fn handle_mention(
    ctx: &serenity::Context,
    new_message: &serenity::Message,
    data: &Data,
) -> Result<(), Error> {
    let Some(guild_id) = new_message.guild_id.map(|id| id.get()) else {
        return Ok(());
    };
    let channel_id = new_message.channel_id.get();
    let author = &new_message.author;

    let mut prompt = strip_bot_mentions(&new_message.content, data.bot_id);
    if prompt.is_empty() {
        // A bare ping still deserves an answer
        prompt = "Hello!".to_string();
    }

    let Some(_guard) = data.channel_locks.try_acquire(channel_id) else {
        debug!(
            "Channel {} busy, dropping mention from {}",
            channel_id, author.name
        );
        return Ok(());
    };

    info!(
        "Handling mention from {} in channel {}: {}",
        author.name, channel_id, prompt
    );

    let policy = match data
        .preferences
        .resolve_policy(guild_id, author.id.get(), &data.settings, &data.personas)
    {
        Ok(policy) => policy,
        Err(e) => {
            error!("Failed to resolve policy for user {}: {}", author.id, e);
            new_message.reply(&ctx.http, GENERIC_FAILURE).await?;
            return Ok(());
        }
    };

    let persona = data
        .personas
        .get(&policy.persona_name)
        .or_else(|| data.personas.get(data.personas.default_name()));
    let Some(persona) = persona else {
        error!(
            "No persona available, wanted '{}' and default '{}'",
            policy.persona_name,
            data.personas.default_name()
        );
        new_message.reply(&ctx.http, GENERIC_FAILURE).await?;
        return Ok(());
    };

    // User asking for no emojis overrides their stored density for this reply
    let lowered = prompt.to_lowercase();
    let mut policy = policy;
    if lowered.contains("no emoji") || lowered.contains("without emoji") {
        policy.emoji_density = EmojiDensity::None;
    }

    let emoji_candidates = if data.config.emoji_talk_enabled
        && policy.emoji_density != EmojiDensity::None
    {
        match data
            .emoji_index
            .suggest_for_text(guild_id, channel_id, &prompt, EMOJI_CANDIDATE_LIMIT)
        {
            Ok(candidates) => candidates,
            Err(e) => {
                debug!("Emoji suggestion failed: {}", e);
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };
    let custom_tokens: Vec<String> = emoji_candidates
        .iter()
        .filter(|t| t.starts_with('<'))
        .cloned()
        .collect();
    let unicode_tokens: Vec<String> = emoji_candidates
        .iter()
        .filter(|t| !t.starts_with('<'))
        .cloned()
        .collect();

    let current_user_content = format!("[{}]: {}", author.name, prompt);
    let mut history = match data.memory.recent_window(guild_id, channel_id) {
        Ok(history) => history,
        Err(e) => {
            error!("Failed to load history for channel {}: {}", channel_id, e);
            new_message.reply(&ctx.http, GENERIC_FAILURE).await?;
            return Ok(());
        }
    };
    drop_trigger_from_history(&mut history, &format!("[{}]: {}", author.name, new_message.content));

    let assembled = data
        .assembler
        .assemble(&persona, &policy, history, &emoji_candidates);

    let mut messages: Vec<ChatCompletionRequestMessage> =
        vec![ChatCompletionRequestSystemMessageArgs::default()
            .content(assembled.system_prompt)
            .build()?
            .into()];
    for msg in &assembled.history {
        let message: ChatCompletionRequestMessage = match msg.role {
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(msg.content.clone())
                .build()?
                .into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.clone())
                .build()?
                .into(),
        };
        messages.push(message);
    }
    messages.push(
        ChatCompletionRequestUserMessageArgs::default()
            .content(current_user_content)
            .build()?
            .into(),
    );

    let typing = new_message.channel_id.start_typing(&ctx.http);

    let result = data
        .llm_client
        .generate(
            messages,
            persona.model.as_deref(),
            persona.temperature,
            policy.response_length.max_tokens(),
        )
        .await;

    drop(typing);

    let reply = match result {
        Ok(text) => text,
        Err(e) => {
            error!("Generation failed in channel {}: {}", channel_id, e);
            new_message.reply(&ctx.http, GENERATION_FAILURE).await?;
            return Ok(());
        }
    };

    let reply = if data.config.emoji_talk_enabled {
        emoji::enforce(&reply, policy.emoji_density, &custom_tokens, &unicode_tokens)
    } else {
        reply
    };

    crate::reply::send_chunks(ctx, new_message, &reply).await?;

    if let Err(e) = data.memory.add_assistant_message(guild_id, channel_id, &reply) {
        error!("Failed to persist assistant reply: {}", e);
    }

    info!("Reply sent to {} in channel {}", author.name, channel_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_bot_mentions() {
        assert_eq!(strip_bot_mentions("<@42> hello", 42), "hello");
        assert_eq!(strip_bot_mentions("<@!42> hello there", 42), "hello there");
        assert_eq!(strip_bot_mentions("hey <@42>", 42), "hey");
        assert_eq!(strip_bot_mentions("<@42>", 42), "");
        // Another user's mention is untouched
        assert_eq!(strip_bot_mentions("<@99> hi", 42), "<@99> hi");
    }

    #[test]
    fn test_strip_bot_mentions_collapses_gaps() {
        assert_eq!(strip_bot_mentions("hey <@42> there", 42), "hey there");
        assert_eq!(strip_bot_mentions("a <@42> <@!42> b", 42), "a b");
    }

    #[test]
    fn test_drop_trigger_from_history() {
        let trigger = "[alice]: <@42> hello".to_string();
        let mut history = vec![
            ConversationMessage {
                role: Role::Assistant,
                content: "earlier reply".to_string(),
                token_estimate: 2,
            },
            ConversationMessage {
                role: Role::User,
                content: trigger.clone(),
                token_estimate: 4,
            },
        ];
        drop_trigger_from_history(&mut history, &trigger);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "earlier reply");

        // Unrelated tail stays put
        drop_trigger_from_history(&mut history, &trigger);
        assert_eq!(history.len(), 1);
    }
}
