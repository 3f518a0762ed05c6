use crate::{Context, Error};
use poise::serenity_prelude as serenity;

/// Manage the server's active persona
#[poise::command(slash_command, subcommands("set", "list", "current"), guild_only)]
pub async fn persona(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Set the active persona for this server
#[poise::command(slash_command, required_permissions = "MANAGE_GUILD")]
pub async fn set(
    ctx: Context<'_>,
    #[description = "Persona name"] name: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;

    let Some(persona) = ctx.data().personas.get(&name) else {
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
        .settings
        .set_active_persona(guild_id.get(), &persona.name)?;
    ctx.say(format!("✅ Active persona is now **{}**.", persona.display_label()))
        .await?;
    Ok(())
}

/// List the available personas
#[poise::command(slash_command)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let personas = ctx.data().personas.list();
    if personas.is_empty() {
        ctx.say("No personas are installed.").await?;
        return Ok(());
    }

    let lines: Vec<String> = personas
        .iter()
        .map(|p| {
            if p.description.is_empty() {
                format!("**{}**", p.name)
            } else {
                format!("**{}** — {}", p.name, p.description)
            }
        })
        .collect();

    let embed = serenity::CreateEmbed::new()
        .title("Available Personas")
        .description(lines.join("\n"))
        .color(0x5865F2);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Show the persona currently active in this server
#[poise::command(slash_command)]
pub async fn current(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;

    let name = ctx.data().settings.resolve_persona_name(guild_id.get())?;
    match ctx.data().personas.get(&name) {
        Some(persona) => {
            ctx.say(format!("Current persona: **{}**", persona.display_label())).await?;
        }
        None => {
            ctx.say(format!(
                "Current persona is set to '{}', but no persona file with that name exists.",
                name
            ))
            .await?;
        }
    }
    Ok(())
}
