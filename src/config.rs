use dotenvy::dotenv;
use std::env;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub openrouter_api_key: String,
    pub openrouter_url: String,
    pub default_model: String,
    pub fallback_model: String,
    pub database_url: String,
    pub personas_dir: String,
    pub default_persona: String,
    pub status_message: String,
    pub emoji_talk_enabled: bool,
    pub emoji_reactions_enabled: bool,
    // Context window settings
    pub context_message_limit: usize,
    pub context_token_budget: usize,
    pub history_retention_days: u64,
    // Timeout settings
    pub llm_timeout_secs: u64,
    // Channel lock housekeeping
    pub lock_idle_evict_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            openrouter_api_key: env::var("OPENROUTER_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENROUTER_API_KEY must be set"))?,
            openrouter_url: env::var("OPENROUTER_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
            default_model: env::var("DEFAULT_MODEL")
                .unwrap_or_else(|_| "google/gemini-2.5-flash".to_string()),
            fallback_model: env::var("FALLBACK_MODEL")
                .unwrap_or_else(|_| "google/gemini-2.5-flash-lite".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/prism.db".to_string()),
            personas_dir: env::var("PERSONAS_DIR").unwrap_or_else(|_| "personas".to_string()),
            default_persona: env::var("DEFAULT_PERSONA")
                .unwrap_or_else(|_| "default".to_string()),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Mention me to chat!".to_string()),
            emoji_talk_enabled: env::var("EMOJI_TALK_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            emoji_reactions_enabled: env::var("EMOJI_REACTIONS_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            context_message_limit: env::var("CONTEXT_MESSAGE_LIMIT")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(50),
            context_token_budget: env::var("CONTEXT_TOKEN_BUDGET")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            history_retention_days: env::var("HISTORY_RETENTION_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            lock_idle_evict_secs: env::var("LOCK_IDLE_EVICT_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .unwrap_or(3600),
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("openrouter_api_key", &"[REDACTED]")
            .field("openrouter_url", &self.openrouter_url)
            .field("default_model", &self.default_model)
            .field("fallback_model", &self.fallback_model)
            .field("database_url", &self.database_url)
            .field("personas_dir", &self.personas_dir)
            .field("default_persona", &self.default_persona)
            .field("status_message", &self.status_message)
            .field("emoji_talk_enabled", &self.emoji_talk_enabled)
            .field("emoji_reactions_enabled", &self.emoji_reactions_enabled)
            .field("context_message_limit", &self.context_message_limit)
            .field("context_token_budget", &self.context_token_budget)
            .field("history_retention_days", &self.history_retention_days)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("lock_idle_evict_secs", &self.lock_idle_evict_secs)
            .finish()
    }
}

/// Discord message limit is 2000 characters
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;
/// Headroom used when inserting emoji so enforcement never pushes a reply over the limit
pub const EMOJI_SAFE_LIMIT: usize = 1900;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_logic() {
        // 1. Test missing vars
        env::remove_var("DISCORD_TOKEN");
        env::remove_var("OPENROUTER_API_KEY");
        let result = Config::build();
        assert!(result.is_err(), "Should fail when required vars are missing");

        // 2. Test defaults
        env::set_var("DISCORD_TOKEN", "test_token");
        env::set_var("OPENROUTER_API_KEY", "test_key");
        let config = Config::build().unwrap();
        assert_eq!(config.discord_token, "test_token");
        assert_eq!(config.default_model, "google/gemini-2.5-flash");
        assert_eq!(config.fallback_model, "google/gemini-2.5-flash-lite");
        assert_eq!(config.history_retention_days, 30);
        assert!(config.emoji_talk_enabled);
        assert!(!config.emoji_reactions_enabled);

        // 3. Test debug redaction
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("test_token"));
        assert!(!debug_output.contains("test_key"));
        assert!(debug_output.contains("[REDACTED]"));

        // Cleanup
        env::remove_var("DISCORD_TOKEN");
        env::remove_var("OPENROUTER_API_KEY");
    }
}
