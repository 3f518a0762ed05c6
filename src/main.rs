use poise::serenity_prelude as serenity;
use prism::{commands, config::Config, mention, Data};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often the retention prune runs.
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

/// Upper bound on how long shard shutdown may take after ctrl-c.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let discord_token = config.discord_token.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    match event {
                        serenity::FullEvent::Message { new_message } => {
                            handle_message(ctx, new_message, data).await?;
                        }
                        serenity::FullEvent::GuildCreate { guild, .. } => {
                            let emojis: Vec<(u64, String, bool)> = guild
                                .emojis
                                .values()
                                .map(|e| (e.id.get(), e.name.clone(), e.animated))
                                .collect();
                            match data.emoji_index.index_guild(guild.id.get(), &emojis) {
                                Ok(n) => debug!("Indexed {} emojis for guild {}", n, guild.id),
                                Err(e) => warn!("Emoji indexing failed for guild {}: {}", guild.id, e),
                            }
                            spawn_description_backfill(
                                data.emoji_index.clone(),
                                data.llm_client.clone(),
                                guild.id.get(),
                            );
                        }
                        serenity::FullEvent::GuildEmojisUpdate {
                            guild_id,
                            current_state,
                        } => {
                            let emojis: Vec<(u64, String, bool)> = current_state
                                .values()
                                .map(|e| (e.id.get(), e.name.clone(), e.animated))
                                .collect();
                            if let Err(e) = data.emoji_index.index_guild(guild_id.get(), &emojis) {
                                warn!("Emoji re-indexing failed for guild {}: {}", guild_id, e);
                            }
                        }
                        _ => {}
                    }
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(|ctx, ready, framework| {
            Box::pin(async move {
                info!("Connected as {}", ready.user.name);
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                ctx.set_activity(Some(serenity::ActivityData::custom(&config.status_message)));

                if let Some(parent) = Path::new(&config.database_url).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let db = prism::db::Database::new(&config)?;
                db.execute_init()?;

                spawn_retention_prune(db.clone(), config.history_retention_days);

                let llm_client = prism::llm::LlmClient::new(&config);
                let personas = prism::personas::PersonaStore::new(
                    &config.personas_dir,
                    &config.default_persona,
                );
                let settings = prism::settings::SettingsService::new(
                    db.clone(),
                    config.default_persona.clone(),
                );
                let preferences = prism::preferences::PreferencesService::new(db.clone());
                let memory =
                    prism::memory::MemoryService::new(db.clone(), config.context_message_limit);
                let assembler = prism::context::ContextAssembler::new(config.context_token_budget);
                let channel_locks = prism::locks::ChannelLockManager::new(config.lock_idle_evict_secs);
                let emoji_index = prism::emoji::index::EmojiIndexService::new(db.clone());
                let reactions = std::sync::Arc::new(prism::emoji::reactions::ReactionEngine::new(
                    db.clone(),
                    emoji_index.clone(),
                ));
                let bot_id = ready.user.id.get();

                Ok(Data {
                    config,
                    llm_client,
                    db,
                    personas,
                    settings,
                    preferences,
                    memory,
                    assembler,
                    channel_locks,
                    emoji_index,
                    reactions,
                    bot_id,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, stopping shards...");
            if tokio::time::timeout(SHUTDOWN_GRACE, shard_manager.shutdown_all())
                .await
                .is_err()
            {
                warn!("Shard shutdown exceeded grace period, exiting anyway");
                std::process::exit(0);
            }
        }
    });

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

/// Persist incoming user messages and route mentions into the pipeline.
async fn handle_message(
    ctx: &serenity::Context,
    new_message: &serenity::Message,
    data: &Data,
) -> Result<(), prism::Error> {
    if new_message.author.bot {
        return Ok(());
    }
    let Some(guild_id) = new_message.guild_id else {
        return Ok(());
    };
    if new_message.content.trim().is_empty() {
        return Ok(());
    }

    let labeled = format!("[{}]: {}", new_message.author.name, new_message.content);
    if let Err(e) = data.memory.add_user_message(
        guild_id.get(),
        new_message.channel_id.get(),
        new_message.author.id.get(),
        &labeled,
    ) {
        debug!("Failed to persist message: {}", e);
    }

    // Reactions run off to the side; they must never delay a mention reply
    if data.config.emoji_reactions_enabled {
        let reactions = data.reactions.clone();
        let llm_client = data.llm_client.clone();
        let ctx = ctx.clone();
        let message = new_message.clone();
        tokio::spawn(async move {
            reactions.maybe_react(&ctx, &llm_client, &message).await;
        });
    }

    let mentioned = new_message.mentions_user_id(serenity::UserId::new(data.bot_id))
        || new_message.content.contains(&format!("<@{}>", data.bot_id))
        || new_message.content.contains(&format!("<@!{}>", data.bot_id));
    if mentioned {
        mention::handle_mention(ctx, new_message, data).await?;
    }
    Ok(())
}

/// Best-effort: fill in model-written descriptions for newly indexed emojis.
fn spawn_description_backfill(
    emoji_index: prism::emoji::index::EmojiIndexService,
    llm_client: prism::llm::LlmClient,
    guild_id: u64,
) {
    tokio::spawn(async move {
        match emoji_index.ensure_descriptions(&llm_client, guild_id).await {
            Ok(0) => {}
            Ok(n) => debug!("Described {} emojis for guild {}", n, guild_id),
            Err(e) => debug!("Emoji description backfill failed for guild {}: {}", guild_id, e),
        }
    });
}

fn spawn_retention_prune(db: prism::db::Database, retention_days: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match db.cleanup_old_messages(retention_days) {
                Ok(0) => {}
                Ok(n) => info!("Retention prune removed {} old messages", n),
                Err(e) => warn!("Retention prune failed: {}", e),
            }
        }
    });
}
