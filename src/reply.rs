//! Outgoing reply shaping: clip to the Discord limit and split long replies
//! into multiple messages at natural boundaries.

use crate::config::DISCORD_MESSAGE_LIMIT;
use poise::serenity_prelude as serenity;

/// Clip text to the Discord message limit.
///
/// Over-limit text is cut at the limit, then tidied: a dangling partial
/// custom-emoji token is dropped, an unbalanced trailing code fence is
/// removed, and trailing whitespace stripped. No truncation notice is added.
/// Returns the text and whether it was clipped. Idempotent.
pub fn clip_to_limit(text: &str) -> (String, bool) {
    if text.chars().count() <= DISCORD_MESSAGE_LIMIT {
        return (text.to_string(), false);
    }

    let mut clipped: String = text.chars().take(DISCORD_MESSAGE_LIMIT).collect();
    clipped.truncate(clipped.trim_end().len());

    // A cut mid-token leaves "<:name" or "<a:name:12" at the end
    if let Some(open) = clipped.rfind('<') {
        if !clipped[open..].contains('>') {
            clipped.truncate(open);
            clipped.truncate(clipped.trim_end().len());
        }
    }

    // Drop a trailing unbalanced code fence rather than ship half a block
    while clipped.matches("```").count() % 2 == 1 {
        if let Some(fence) = clipped.rfind("```") {
            clipped.truncate(fence);
            clipped.truncate(clipped.trim_end().len());
        } else {
            break;
        }
    }

    (clipped, true)
}

/// Split text into message-sized chunks: paragraph boundaries first, then
/// sentences, then words. Never cuts mid-word unless a single word exceeds
/// the limit on its own.
pub fn split_message(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n") {
        for piece in split_paragraph(para) {
            let sep = if current.is_empty() { "" } else { "\n\n" };
            if current.chars().count() + sep.len() + piece.chars().count() <= DISCORD_MESSAGE_LIMIT {
                current.push_str(sep);
                current.push_str(&piece);
            } else {
                if !current.trim().is_empty() {
                    chunks.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
                current = piece;
            }
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_paragraph(para: &str) -> Vec<String> {
    if para.chars().count() <= DISCORD_MESSAGE_LIMIT {
        return vec![para.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for sentence in split_sentence_units(para) {
        for unit in split_words(&sentence) {
            let sep = if current.is_empty() { "" } else { " " };
            if current.chars().count() + sep.len() + unit.chars().count() <= DISCORD_MESSAGE_LIMIT {
                current.push_str(sep);
                current.push_str(&unit);
            } else {
                if !current.is_empty() {
                    pieces.push(std::mem::take(&mut current));
                }
                current = unit;
            }
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Sentences including their terminal punctuation, whitespace trimmed.
fn split_sentence_units(text: &str) -> Vec<String> {
    let mut units = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|n| n.is_whitespace()) {
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
            units.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        units.push(current);
    }
    units
}

/// A sentence that fits passes through whole; an oversized one falls back to
/// word units, hard-cutting only words that exceed the limit by themselves.
fn split_words(sentence: &str) -> Vec<String> {
    if sentence.chars().count() <= DISCORD_MESSAGE_LIMIT {
        return vec![sentence.to_string()];
    }
    let mut units = Vec::new();
    for word in sentence.split_whitespace() {
        if word.chars().count() <= DISCORD_MESSAGE_LIMIT {
            units.push(word.to_string());
        } else {
            let chars: Vec<char> = word.chars().collect();
            for block in chars.chunks(DISCORD_MESSAGE_LIMIT) {
                units.push(block.iter().collect());
            }
        }
    }
    units
}

/// Send a reply in order: the first chunk replies to the trigger message,
/// the rest follow as plain messages in the channel.
pub async fn send_chunks(
    ctx: &serenity::Context,
    message: &serenity::Message,
    text: &str,
) -> Result<(), serenity::Error> {
    for (i, chunk) in split_message(text).iter().enumerate() {
        let (chunk, _) = clip_to_limit(chunk);
        if i == 0 {
            message.reply(&ctx.http, chunk).await?;
        } else {
            message.channel_id.say(&ctx.http, chunk).await?;
        }
    }
    Ok(())
}
