use crate::preferences::{EmojiDensity, ResponseLength};
use crate::{Context, Error};
use poise::serenity_prelude as serenity;

/// Manage your personal chat preferences
#[poise::command(slash_command, subcommands("view", "set", "reset"))]
pub async fn preferences(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// View your current preferences
#[poise::command(slash_command, ephemeral)]
pub async fn view(ctx: Context<'_>) -> Result<(), Error> {
    let prefs = ctx.data().preferences.get(ctx.author().id.get())?;

    let length = prefs
        .response_length
        .map(|l| l.to_string())
        .unwrap_or_else(|| "balanced (default)".to_string());
    let density = prefs
        .emoji_density
        .map(|d| d.to_string())
        .unwrap_or_else(|| "normal (default)".to_string());
    let persona = prefs
        .preferred_persona
        .unwrap_or_else(|| "server default".to_string());

    let embed = serenity::CreateEmbed::new()
        .title("Your Preferences")
        .field("Response length", format!("`{}`", length), true)
        .field("Emoji density", format!("`{}`", density), true)
        .field("Persona", format!("`{}`", persona), true)
        .color(0x5865F2);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Change one or more preferences
#[poise::command(slash_command, ephemeral)]
pub async fn set(
    ctx: Context<'_>,
    #[description = "Response length: concise, balanced, or detailed"] response_length: Option<
        String,
    >,
    #[description = "Emoji density: none, minimal, normal, or lots"] emoji_density: Option<String>,
    #[description = "Persona to use for your replies"] persona: Option<String>,
) -> Result<(), Error> {
    if response_length.is_none() && emoji_density.is_none() && persona.is_none() {
        ctx.say("Please specify at least one preference to change.").await?;
        return Ok(());
    }

    let user_id = ctx.author().id.get();
    let mut confirmations = Vec::new();

    if let Some(value) = response_length {
        if let Err(e) = ctx.data().preferences.set_response_length(user_id, &value) {
            ctx.say(format!("❌ {}", e)).await?;
            return Ok(());
        }
        confirmations.push(format!("response length to **{}**", value.trim().to_lowercase()));
    }

    if let Some(value) = emoji_density {
        if let Err(e) = ctx.data().preferences.set_emoji_density(user_id, &value) {
            ctx.say(format!("❌ {}", e)).await?;
            return Ok(());
        }
        confirmations.push(format!("emoji density to **{}**", value.trim().to_lowercase()));
    }

    if let Some(name) = persona {
        let Some(found) = ctx.data().personas.get(&name) else {
            let available: Vec<String> =
                ctx.data().personas.list().into_iter().map(|p| p.name).collect();
            ctx.say(format!(
                "❌ Unknown persona '{}'. Available: {}",
                name,
                available.join(", ")
            ))
            .await?;
            return Ok(());
        };
        ctx.data()
            .preferences
            .set_preferred_persona(user_id, Some(found.name.clone()))?;
        confirmations.push(format!("persona to **{}**", found.display_label()));
    }

    ctx.say(format!("✅ Set {}.", confirmations.join(" and "))).await?;
    Ok(())
}

/// Reset all your preferences to the defaults
#[poise::command(slash_command, ephemeral)]
pub async fn reset(ctx: Context<'_>) -> Result<(), Error> {
    ctx.data().preferences.reset(ctx.author().id.get())?;
    ctx.say(format!(
        "✅ Preferences reset: response length **{}**, emoji density **{}**, server's persona.",
        ResponseLength::Balanced,
        EmojiDensity::Normal
    ))
    .await?;
    Ok(())
}
