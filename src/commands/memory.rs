use crate::{Context, Error};

/// Manage the bot's conversation memory
#[poise::command(
    slash_command,
    subcommands("clear"),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn memory(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Forget the conversation history of this channel
#[poise::command(slash_command)]
pub async fn clear(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;

    let cleared = ctx
        .data()
        .memory
        .clear_channel(guild_id.get(), ctx.channel_id().get())?;
    ctx.say(format!("🧹 Forgot {} messages from this channel.", cleared)).await?;
    Ok(())
}
