//! User-level preferences and per-message policy resolution.
//!
//! Preferences persist across sessions and guilds. Validation happens at the
//! write boundary: an invalid value is rejected with a message naming the
//! allowed values and nothing is persisted.

use crate::db::Database;
use crate::personas::PersonaStore;
use crate::settings::SettingsService;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseLength {
    Concise,
    Balanced,
    Detailed,
}

impl ResponseLength {
    pub const ALLOWED: &'static [&'static str] = &["concise", "balanced", "detailed"];

    /// Max-token ceiling passed to the completion request.
    /// Detailed means no explicit ceiling.
    pub fn max_tokens(self) -> Option<u32> {
        match self {
            ResponseLength::Concise => Some(150),
            ResponseLength::Balanced => Some(500),
            ResponseLength::Detailed => None,
        }
    }

    /// Length-guidance sentence appended to the system prompt.
    pub fn guidance(self) -> &'static str {
        match self {
            ResponseLength::Concise => {
                "Keep your reply brief: one or two short sentences at most."
            }
            ResponseLength::Balanced => {
                "Keep your reply to a moderate length: no more than a short paragraph."
            }
            ResponseLength::Detailed => {
                "Provide a thorough, complete reply when the question calls for it."
            }
        }
    }
}

impl fmt::Display for ResponseLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponseLength::Concise => "concise",
            ResponseLength::Balanced => "balanced",
            ResponseLength::Detailed => "detailed",
        };
        f.write_str(s)
    }
}

impl FromStr for ResponseLength {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "concise" => Ok(ResponseLength::Concise),
            "balanced" => Ok(ResponseLength::Balanced),
            "detailed" => Ok(ResponseLength::Detailed),
            other => Err(anyhow::anyhow!(
                "Invalid response length '{}'. Must be one of: {}",
                other,
                Self::ALLOWED.join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmojiDensity {
    None,
    Minimal,
    Normal,
    Lots,
}

impl EmojiDensity {
    pub const ALLOWED: &'static [&'static str] = &["none", "minimal", "normal", "lots"];

    /// Emoji-guidance sentence appended to the system prompt.
    pub fn guidance(self) -> &'static str {
        match self {
            EmojiDensity::None => "Do not use any emojis in your reply.",
            EmojiDensity::Minimal => {
                "Use emojis sparingly: at most one or two in the whole reply."
            }
            EmojiDensity::Normal => "Use emojis naturally where they fit the tone.",
            EmojiDensity::Lots => {
                "Be generous with emojis: aim for at least one per sentence."
            }
        }
    }
}

impl fmt::Display for EmojiDensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EmojiDensity::None => "none",
            EmojiDensity::Minimal => "minimal",
            EmojiDensity::Normal => "normal",
            EmojiDensity::Lots => "lots",
        };
        f.write_str(s)
    }
}

impl FromStr for EmojiDensity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(EmojiDensity::None),
            "minimal" => Ok(EmojiDensity::Minimal),
            "normal" => Ok(EmojiDensity::Normal),
            "lots" => Ok(EmojiDensity::Lots),
            other => Err(anyhow::anyhow!(
                "Invalid emoji density '{}'. Must be one of: {}",
                other,
                Self::ALLOWED.join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub response_length: Option<ResponseLength>,
    #[serde(default)]
    pub emoji_density: Option<EmojiDensity>,
    #[serde(default)]
    pub preferred_persona: Option<String>,
}

/// The merged, per-message policy every pipeline stage downstream consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectivePolicy {
    pub persona_name: String,
    pub response_length: ResponseLength,
    pub emoji_density: EmojiDensity,
}

#[derive(Clone)]
pub struct PreferencesService {
    db: Database,
}

impl PreferencesService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get user preferences, lazily materializing the default row.
    pub fn get(&self, user_id: u64) -> anyhow::Result<UserPreferences> {
        let default_json = serde_json::to_string(&UserPreferences::default())?;
        let json = self.db.get_user_preferences_json(user_id, &default_json)?;
        match serde_json::from_str(&json) {
            Ok(prefs) => Ok(prefs),
            Err(e) => {
                // A corrupt blob should never take the pipeline down; writes
                // are validated so this only happens after manual edits.
                warn!("Failed to parse preferences for user {}: {}", user_id, e);
                Ok(UserPreferences::default())
            }
        }
    }

    pub fn set(&self, user_id: u64, prefs: &UserPreferences) -> anyhow::Result<()> {
        let json = serde_json::to_string(prefs)?;
        self.db.set_user_preferences_json(user_id, &json)
    }

    pub fn set_response_length(&self, user_id: u64, value: &str) -> anyhow::Result<()> {
        let length: ResponseLength = value.parse()?;
        let mut prefs = self.get(user_id)?;
        prefs.response_length = Some(length);
        self.set(user_id, &prefs)
    }

    pub fn set_emoji_density(&self, user_id: u64, value: &str) -> anyhow::Result<()> {
        let density: EmojiDensity = value.parse()?;
        let mut prefs = self.get(user_id)?;
        prefs.emoji_density = Some(density);
        self.set(user_id, &prefs)
    }

    /// Set or clear (None) the preferred persona. The persona's existence is
    /// checked by the command layer; a stale name degrades at resolve time.
    pub fn set_preferred_persona(&self, user_id: u64, persona: Option<String>) -> anyhow::Result<()> {
        let mut prefs = self.get(user_id)?;
        prefs.preferred_persona = persona;
        self.set(user_id, &prefs)
    }

    pub fn reset(&self, user_id: u64) -> anyhow::Result<()> {
        self.db.delete_user_preferences(user_id)
    }

    pub fn resolve_response_length(&self, user_id: u64) -> anyhow::Result<ResponseLength> {
        Ok(self.get(user_id)?.response_length.unwrap_or(ResponseLength::Balanced))
    }

    pub fn resolve_emoji_density(&self, user_id: u64) -> anyhow::Result<EmojiDensity> {
        Ok(self.get(user_id)?.emoji_density.unwrap_or(EmojiDensity::Normal))
    }

    /// Merge guild settings and user preferences into one effective policy.
    ///
    /// Each field resolves independently: the user preference wins when set,
    /// otherwise the documented default applies. A preferred persona that no
    /// longer exists falls back silently to the guild's active persona.
    /// Guild-level response length is deprecated and never consulted here.
    pub fn resolve_policy(
        &self,
        guild_id: u64,
        user_id: u64,
        settings: &SettingsService,
        personas: &PersonaStore,
    ) -> anyhow::Result<EffectivePolicy> {
        let prefs = self.get(user_id)?;

        let guild_persona = settings.resolve_persona_name(guild_id)?;
        let persona_name = match prefs.preferred_persona {
            Some(name) if personas.get(&name).is_some() => name,
            Some(name) => {
                warn!(
                    "User {} prefers persona '{}' which no longer exists; using guild default",
                    user_id, name
                );
                guild_persona
            }
            None => guild_persona,
        };

        Ok(EffectivePolicy {
            persona_name,
            response_length: prefs.response_length.unwrap_or(ResponseLength::Balanced),
            emoji_density: prefs.emoji_density.unwrap_or(EmojiDensity::Normal),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_config;
    use crate::personas::{Persona, PersonaStore};

    fn test_db() -> Database {
        let db = Database::new(&test_config()).unwrap();
        db.execute_init().unwrap();
        db
    }

    fn store_with(names: &[&str]) -> PersonaStore {
        let store = PersonaStore::empty_for_tests("default");
        for name in names {
            store.insert_for_tests(Persona {
                name: name.to_string(),
                display_name: None,
                description: String::new(),
                system_prompt: "test prompt".to_string(),
                model: None,
                temperature: None,
            });
        }
        store
    }

    #[test]
    fn test_defaults_when_unset() {
        let service = PreferencesService::new(test_db());

        let prefs = service.get(1).unwrap();
        assert!(prefs.response_length.is_none());
        assert!(prefs.emoji_density.is_none());
        assert!(prefs.preferred_persona.is_none());

        assert_eq!(service.resolve_response_length(1).unwrap(), ResponseLength::Balanced);
        assert_eq!(service.resolve_emoji_density(1).unwrap(), EmojiDensity::Normal);
    }

    #[test]
    fn test_set_and_resolve_all_valid_values() {
        let service = PreferencesService::new(test_db());

        for value in ResponseLength::ALLOWED {
            service.set_response_length(1, value).unwrap();
            assert_eq!(service.resolve_response_length(1).unwrap().to_string(), *value);
        }
        for value in EmojiDensity::ALLOWED {
            service.set_emoji_density(1, value).unwrap();
            assert_eq!(service.resolve_emoji_density(1).unwrap().to_string(), *value);
        }
    }

    #[test]
    fn test_invalid_value_rejected_and_prior_kept() {
        let service = PreferencesService::new(test_db());

        service.set_response_length(1, "concise").unwrap();

        let err = service.set_response_length(1, "verbose").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Invalid response length"));
        assert!(msg.contains("concise, balanced, detailed"));

        // Prior value unchanged
        assert_eq!(service.resolve_response_length(1).unwrap(), ResponseLength::Concise);

        let err = service.set_emoji_density(1, "tons").unwrap_err();
        assert!(err.to_string().contains("none, minimal, normal, lots"));
        assert_eq!(service.resolve_emoji_density(1).unwrap(), EmojiDensity::Normal);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let service = PreferencesService::new(test_db());

        service.set_response_length(1, "detailed").unwrap();
        service.set_emoji_density(1, "lots").unwrap();
        service.reset(1).unwrap();

        assert_eq!(service.resolve_response_length(1).unwrap(), ResponseLength::Balanced);
        assert_eq!(service.resolve_emoji_density(1).unwrap(), EmojiDensity::Normal);
    }

    #[test]
    fn test_max_tokens_mapping() {
        assert_eq!(ResponseLength::Concise.max_tokens(), Some(150));
        assert_eq!(ResponseLength::Balanced.max_tokens(), Some(500));
        assert_eq!(ResponseLength::Detailed.max_tokens(), None);
    }

    #[test]
    fn test_guidance_covers_all_tiers() {
        assert!(EmojiDensity::None.guidance().contains("Do not use any emojis"));
        assert!(EmojiDensity::Minimal.guidance().contains("sparingly"));
        assert!(EmojiDensity::Normal.guidance().contains("naturally"));
        assert!(EmojiDensity::Lots.guidance().contains("generous"));
    }

    #[test]
    fn test_policy_defaults_to_guild_persona() {
        let db = test_db();
        let service = PreferencesService::new(db.clone());
        let settings = SettingsService::new(db, "default".to_string());
        let personas = store_with(&["default", "pirate"]);

        let policy = service.resolve_policy(10, 1, &settings, &personas).unwrap();
        assert_eq!(policy.persona_name, "default");
        assert_eq!(policy.response_length, ResponseLength::Balanced);
        assert_eq!(policy.emoji_density, EmojiDensity::Normal);
    }

    #[test]
    fn test_policy_user_persona_wins_when_it_exists() {
        let db = test_db();
        let service = PreferencesService::new(db.clone());
        let settings = SettingsService::new(db, "default".to_string());
        settings.set_active_persona(10, "formal").unwrap();
        let personas = store_with(&["default", "formal", "pirate"]);

        service.set_preferred_persona(1, Some("pirate".to_string())).unwrap();
        let policy = service.resolve_policy(10, 1, &settings, &personas).unwrap();
        assert_eq!(policy.persona_name, "pirate");
    }

    #[test]
    fn test_policy_falls_back_when_preferred_persona_deleted() {
        let db = test_db();
        let service = PreferencesService::new(db.clone());
        let settings = SettingsService::new(db, "default".to_string());
        settings.set_active_persona(10, "formal").unwrap();
        // "pirate" was deleted from the store after the user picked it
        let personas = store_with(&["default", "formal"]);

        service.set_preferred_persona(1, Some("pirate".to_string())).unwrap();
        let policy = service.resolve_policy(10, 1, &settings, &personas).unwrap();
        assert_eq!(policy.persona_name, "formal");
    }
}
