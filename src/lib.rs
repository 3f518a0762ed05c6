pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod emoji;
pub mod llm;
pub mod locks;
pub mod memory;
pub mod mention;
pub mod personas;
pub mod preferences;
pub mod rate_limit;
pub mod reply;
pub mod settings;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub llm_client: llm::LlmClient,
    pub db: db::Database,
    pub personas: personas::PersonaStore,
    pub settings: settings::SettingsService,
    pub preferences: preferences::PreferencesService,
    pub memory: memory::MemoryService,
    pub assembler: context::ContextAssembler,
    pub channel_locks: locks::ChannelLockManager,
    pub emoji_index: emoji::index::EmojiIndexService,
    pub reactions: std::sync::Arc<emoji::reactions::ReactionEngine>,
    /// Bot's own user ID for mention detection and context formatting
    pub bot_id: u64,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
