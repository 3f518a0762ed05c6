//! Guild-level settings stored as a typed JSON blob.

use crate::db::Database;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildSettings {
    #[serde(default)]
    pub active_persona: Option<String>,
    /// Deprecated: guild-level response length. Kept in the stored blob for
    /// backward compatibility, never consulted once user preferences exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_length: Option<String>,
}

#[derive(Clone)]
pub struct SettingsService {
    db: Database,
    default_persona: String,
}

impl SettingsService {
    pub fn new(db: Database, default_persona: String) -> Self {
        Self { db, default_persona }
    }

    /// Fetch guild settings, lazily materializing the default row.
    pub fn get(&self, guild_id: u64) -> anyhow::Result<GuildSettings> {
        let default_json = serde_json::to_string(&GuildSettings::default())?;
        let json = self.db.get_guild_settings_json(guild_id, &default_json)?;
        match serde_json::from_str(&json) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Failed to parse settings for guild {}: {}", guild_id, e);
                Ok(GuildSettings::default())
            }
        }
    }

    pub fn set(&self, guild_id: u64, settings: &GuildSettings) -> anyhow::Result<()> {
        let json = serde_json::to_string(settings)?;
        self.db.set_guild_settings_json(guild_id, &json)
    }

    pub fn set_active_persona(&self, guild_id: u64, persona_name: &str) -> anyhow::Result<()> {
        let mut settings = self.get(guild_id)?;
        settings.active_persona = Some(persona_name.to_string());
        self.set(guild_id, &settings)
    }

    /// The guild's active persona name, or the configured default.
    pub fn resolve_persona_name(&self, guild_id: u64) -> anyhow::Result<String> {
        let settings = self.get(guild_id)?;
        Ok(settings
            .active_persona
            .unwrap_or_else(|| self.default_persona.clone()))
    }
}
