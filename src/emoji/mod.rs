//! Emoji enforcement for outgoing replies.
//!
//! Models hallucinate shortcodes, forget the server's custom emojis, or clump
//! five of them at the end of a message. This module cleans that up after
//! generation: strip invalid shortcodes, make sure emoji actually appear at
//! the requested density, then deduplicate and de-clump what's left. Every
//! insertion respects the safe length ceiling so enforcement can never push a
//! reply over the Discord message limit.

pub mod index;
pub mod reactions;

use crate::config::EMOJI_SAFE_LIMIT;
use crate::preferences::EmojiDensity;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// A custom Discord emoji token, `<:name:id>` or `<a:name:id>`.
pub(crate) static CUSTOM_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<a?:[A-Za-z0-9_]+:\d+>").unwrap());

// First alternative swallows valid custom tokens whole so the bare-shortcode
// alternative never fires inside one.
static SHORTCODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(<a?:[A-Za-z0-9_]+:\d+>)|(\s?):([A-Za-z0-9_]+):(\s?)").unwrap());

/// Shortcodes Discord itself renders as Unicode emoji. Anything else in
/// `:name:` form is treated as hallucinated and stripped.
const VALID_SHORTCODES: &[&str] = &[
    "fire", "tada", "heart", "hearts", "red_heart", "joy", "smile", "smiley", "grin", "laughing",
    "sob", "cry", "wave", "eyes", "rocket", "star", "star2", "sparkles", "clap",
    "pray", "skull", "thumbsup", "thumbsdown", "thumbs_up", "thumbs_down", "ok_hand",
    "thinking", "sunglasses", "wink", "heart_eyes", "muscle", "raised_hands", "tup",
    "100", "zap", "boom", "warning", "check", "white_check_mark", "x", "point_up",
];

/// Whether a character falls in the common emoji Unicode ranges.
pub(crate) fn is_emoji_char(c: char) -> bool {
    matches!(u32::from(c),
        0x1F600..=0x1F64F   // Emoticons
        | 0x1F300..=0x1F5FF // Misc symbols and pictographs
        | 0x1F680..=0x1F6FF // Transport and map
        | 0x1F1E0..=0x1F1FF // Flags
        | 0x2600..=0x26FF   // Misc symbols
        | 0x2700..=0x27BF   // Dingbats
        | 0xFE00..=0xFE0F   // Variation selectors
        | 0x1F900..=0x1F9FF // Supplemental symbols
        | 0x1FA00..=0x1FAFF // Symbols extended-A
    )
}

/// True when the text carries any emoji, custom token or Unicode.
pub fn has_emoji(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    if CUSTOM_TOKEN_RE.is_match(text) {
        return true;
    }
    text.chars().any(is_emoji_char)
}

/// Remove hallucinated `:shortcode:` forms, keeping valid custom tokens and
/// shortcodes Discord renders. Surrounding whitespace collapses so removal
/// never leaves a double space.
pub fn strip_invalid_shortcodes(text: &str) -> String {
    if !text.contains(':') {
        return text.to_string();
    }
    let valid: HashSet<&str> = VALID_SHORTCODES.iter().copied().collect();

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in SHORTCODE_RE.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        out.push_str(&text[last..whole.start()]);
        last = whole.end();

        if caps.get(1).is_some() {
            // Valid custom token, keep verbatim
            out.push_str(whole.as_str());
            continue;
        }

        let name = caps.get(3).unwrap().as_str();
        let rest = &text[whole.end()..];
        let looks_like_custom_id = rest
            .find('>')
            .is_some_and(|i| i > 0 && rest[..i].bytes().all(|b| b.is_ascii_digit()));
        if valid.contains(name) || looks_like_custom_id {
            out.push_str(whole.as_str());
            continue;
        }

        let leading = !caps.get(2).unwrap().as_str().is_empty();
        let trailing = !caps.get(4).unwrap().as_str().is_empty();
        if leading && trailing {
            out.push(' ');
        }
    }
    out.push_str(&text[last..]);
    out
}

/// (sentence, trailing whitespace) pairs. A sentence ends at `.`, `!` or `?`
/// followed by whitespace.
fn split_sentences(text: &str) -> Vec<(String, String)> {
    let mut parts = Vec::new();
    let mut sentence = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        sentence.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|n| n.is_whitespace()) {
            let mut delim = String::new();
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                delim.push(chars.next().unwrap());
            }
            parts.push((std::mem::take(&mut sentence), delim));
        }
    }
    if !sentence.is_empty() {
        parts.push((sentence, String::new()));
    }
    parts
}

/// Give every sentence at least one emoji, round-robining through the custom
/// tokens first and the Unicode tokens only when no customs are available.
/// Returns the input untouched when the result would exceed `max_len` chars
/// or the text is a single sentence.
pub fn ensure_emoji_per_sentence(
    text: &str,
    custom_tokens: &[String],
    unicode_tokens: &[String],
    max_len: usize,
) -> String {
    if text.is_empty() || (custom_tokens.is_empty() && unicode_tokens.is_empty()) {
        return text.to_string();
    }
    let parts = split_sentences(text);
    if parts.len() <= 1 {
        return text.to_string();
    }

    let mut idx_custom = 0;
    let mut idx_unicode = 0;
    let mut out = String::with_capacity(text.len());
    for (sentence, delim) in &parts {
        if !sentence.trim().is_empty() && !has_emoji(sentence) {
            let token = if !custom_tokens.is_empty() {
                let t = &custom_tokens[idx_custom % custom_tokens.len()];
                idx_custom += 1;
                t.as_str()
            } else {
                let t = &unicode_tokens[idx_unicode % unicode_tokens.len()];
                idx_unicode += 1;
                t.as_str()
            };
            let had_trailing_space = sentence.ends_with(' ');
            out.push_str(sentence.trim_end());
            out.push(' ');
            out.push_str(token);
            if had_trailing_space {
                out.push(' ');
            }
        } else {
            out.push_str(sentence);
        }
        out.push_str(delim);
    }

    if out.chars().count() <= max_len {
        out
    } else {
        text.to_string()
    }
}

/// Drop repeated custom emoji tokens, keeping the first occurrence of each.
pub fn dedupe_custom_emojis(text: &str) -> String {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in CUSTOM_TOKEN_RE.find_iter(text) {
        out.push_str(&text[last..m.start()]);
        last = m.end();
        if seen.insert(m.as_str()) {
            out.push_str(m.as_str());
        }
    }
    out.push_str(&text[last..]);
    out
}

/// Drop repeated Unicode emoji characters, keeping the first occurrence.
pub fn dedupe_unicode_emojis(text: &str) -> String {
    let mut seen: HashSet<char> = HashSet::new();
    text.chars()
        .filter(|c| !is_emoji_char(*c) || seen.insert(*c))
        .collect()
}

static CUSTOM_CLUSTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(<a?:[A-Za-z0-9_]+:\d+>)(?:\s*<a?:[A-Za-z0-9_]+:\d+>)+").unwrap()
});

/// Collapse runs of adjacent custom tokens down to the first one.
pub fn declump_custom_emojis(text: &str) -> String {
    let mut result = text.to_string();
    loop {
        let next = CUSTOM_CLUSTER_RE.replace_all(&result, "$1").into_owned();
        if next == result {
            return result;
        }
        result = next;
    }
}

/// Drop Unicode emoji that immediately follow another emoji character.
pub fn declump_unicode_emojis(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_was_emoji = false;
    for c in text.chars() {
        if is_emoji_char(c) {
            if !prev_was_emoji {
                out.push(c);
            }
            prev_was_emoji = true;
        } else {
            out.push(c);
            prev_was_emoji = false;
        }
    }
    out
}

/// Insert a token after the first sentence boundary, or append when the text
/// has no boundary. Leaves the text alone when the insertion would push it
/// past the safe limit.
fn insert_after_first_sentence(text: &str, token: &str) -> String {
    let addition = format!(" {}", token);
    if text.chars().count() + addition.chars().count() > EMOJI_SAFE_LIMIT {
        return text.to_string();
    }
    let mut boundary = None;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some((_, n)) = chars.peek() {
                if n.is_whitespace() {
                    boundary = Some(i + c.len_utf8());
                    break;
                }
            }
        }
    }
    match boundary {
        Some(idx) => format!("{}{}{}", &text[..idx], addition, &text[idx..]),
        None => format!("{}{}", text, addition),
    }
}

/// Add one custom emoji when the reply has none at all.
pub fn fallback_add_custom_emoji(text: &str, custom_tokens: &[String]) -> String {
    if text.is_empty() || custom_tokens.is_empty() {
        return text.to_string();
    }
    if text.contains("<:") || text.contains("<a:") {
        return text.to_string();
    }
    insert_after_first_sentence(text, &custom_tokens[0])
}

/// Apply the full enforcement pipeline at the requested density.
///
/// `none` only strips hallucinated shortcodes and never adds anything.
/// `minimal` guarantees a single emoji overall. `normal` and `lots` run the
/// per-sentence pass followed by dedupe and de-clump.
pub fn enforce(
    text: &str,
    density: EmojiDensity,
    custom_tokens: &[String],
    unicode_tokens: &[String],
) -> String {
    if text.is_empty() {
        return text.to_string();
    }
    let stripped = strip_invalid_shortcodes(text);

    match density {
        EmojiDensity::None => stripped,
        EmojiDensity::Minimal => {
            let mut result = dedupe_custom_emojis(&stripped);
            result = dedupe_unicode_emojis(&result);
            result = declump_custom_emojis(&result);
            result = declump_unicode_emojis(&result);
            if !has_emoji(&result) {
                if !custom_tokens.is_empty() {
                    result = insert_after_first_sentence(&result, &custom_tokens[0]);
                } else if !unicode_tokens.is_empty() {
                    result = insert_after_first_sentence(&result, &unicode_tokens[0]);
                }
            }
            result
        }
        EmojiDensity::Normal | EmojiDensity::Lots => {
            let mut result = fallback_add_custom_emoji(&stripped, custom_tokens);
            result = ensure_emoji_per_sentence(&result, custom_tokens, unicode_tokens, EMOJI_SAFE_LIMIT);
            result = dedupe_custom_emojis(&result);
            result = dedupe_unicode_emojis(&result);
            result = declump_custom_emojis(&result);
            result = declump_unicode_emojis(&result);
            result
        }
    }
}
