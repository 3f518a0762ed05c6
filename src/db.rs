use crate::config::Config;
use rusqlite::{Connection, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(config: &Config) -> Result<Self> {
        let conn = Connection::open(&config.database_url)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        let sql = "
            CREATE TABLE IF NOT EXISTS settings (
                guild_id TEXT PRIMARY KEY,
                data_json TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS user_preferences (
                user_id TEXT PRIMARY KEY,
                data_json TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                user_id TEXT,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                token_estimate INTEGER NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_messages_scope ON messages (guild_id, channel_id, id);

            CREATE TABLE IF NOT EXISTS emoji_index (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id TEXT NOT NULL,
                emoji_id TEXT NOT NULL,
                name TEXT NOT NULL,
                animated BOOLEAN NOT NULL DEFAULT FALSE,
                description TEXT,
                last_scanned_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (guild_id, emoji_id)
            );
            CREATE INDEX IF NOT EXISTS idx_emoji_guild ON emoji_index (guild_id);

            CREATE TABLE IF NOT EXISTS reaction_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                emoji TEXT NOT NULL,
                score REAL NOT NULL,
                reason TEXT,
                ts DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_reaction_scope ON reaction_log (guild_id, channel_id, ts);
        ";
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    // --- Guild settings (JSON blob keyed by guild) ---

    /// Fetch the raw settings blob for a guild, lazily materializing the
    /// default row. The INSERT OR IGNORE makes concurrent first reads safe.
    pub fn get_guild_settings_json(&self, guild_id: u64, default_json: &str) -> anyhow::Result<String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO settings (guild_id, data_json) VALUES (?1, ?2)",
            (guild_id.to_string(), default_json),
        )?;
        let json: String = conn.query_row(
            "SELECT data_json FROM settings WHERE guild_id = ?1",
            [guild_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(json)
    }

    pub fn set_guild_settings_json(&self, guild_id: u64, json: &str) -> anyhow::Result<()> {
        debug!("Database: Saving settings for guild {}", guild_id);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO settings (guild_id, data_json) VALUES (?1, ?2)
             ON CONFLICT(guild_id) DO UPDATE SET data_json = ?2, updated_at = CURRENT_TIMESTAMP",
            (guild_id.to_string(), json),
        )?;
        Ok(())
    }

    // --- User preferences (JSON blob keyed by user, global scope) ---

    pub fn get_user_preferences_json(&self, user_id: u64, default_json: &str) -> anyhow::Result<String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO user_preferences (user_id, data_json) VALUES (?1, ?2)",
            (user_id.to_string(), default_json),
        )?;
        let json: String = conn.query_row(
            "SELECT data_json FROM user_preferences WHERE user_id = ?1",
            [user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(json)
    }

    pub fn set_user_preferences_json(&self, user_id: u64, json: &str) -> anyhow::Result<()> {
        debug!("Database: Saving preferences for user {}", user_id);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_preferences (user_id, data_json) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET data_json = ?2, updated_at = CURRENT_TIMESTAMP",
            (user_id.to_string(), json),
        )?;
        Ok(())
    }

    /// Reset a user back to defaults by deleting their row.
    pub fn delete_user_preferences(&self, user_id: u64) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM user_preferences WHERE user_id = ?1",
            [user_id.to_string()],
        )?;
        Ok(())
    }

    // --- Conversation history ---

    pub fn append_message(
        &self,
        guild_id: u64,
        channel_id: u64,
        user_id: Option<u64>,
        role: &str,
        content: &str,
        token_estimate: usize,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (guild_id, channel_id, user_id, role, content, token_estimate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                guild_id.to_string(),
                channel_id.to_string(),
                user_id.map(|id| id.to_string()),
                role,
                content,
                token_estimate,
            ),
        )?;
        Ok(())
    }

    /// Most recent `limit` messages for a channel scope, newest-first.
    /// Callers reverse for chronological order.
    pub fn recent_messages(
        &self,
        guild_id: u64,
        channel_id: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<(String, String, usize)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT role, content, token_estimate FROM messages
             WHERE guild_id = ?1 AND channel_id = ?2 ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            (guild_id.to_string(), channel_id.to_string(), limit),
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn clear_channel(&self, guild_id: u64, channel_id: u64) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM messages WHERE guild_id = ?1 AND channel_id = ?2",
            (guild_id.to_string(), channel_id.to_string()),
        )?;
        Ok(count)
    }

    /// Removes messages older than `retention_days` from the database.
    /// Returns the number of messages deleted.
    pub fn cleanup_old_messages(&self, retention_days: u64) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM messages WHERE created_at < datetime('now', ?1)",
            (format!("-{} days", retention_days),),
        )?;
        Ok(count)
    }

    /// Last `limit` assistant replies in a channel, used to rotate
    /// recently used custom emoji tokens to the back of the candidate list.
    pub fn recent_assistant_contents(
        &self,
        guild_id: u64,
        channel_id: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT content FROM messages
             WHERE guild_id = ?1 AND channel_id = ?2 AND role = 'assistant'
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            (guild_id.to_string(), channel_id.to_string(), limit),
            |row| row.get(0),
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    // --- Custom emoji index ---

    pub fn upsert_custom_emoji(
        &self,
        guild_id: u64,
        emoji_id: u64,
        name: &str,
        animated: bool,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO emoji_index (guild_id, emoji_id, name, animated, last_scanned_at)
             VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
             ON CONFLICT(guild_id, emoji_id) DO UPDATE SET
                 name = ?3, animated = ?4, last_scanned_at = CURRENT_TIMESTAMP",
            (guild_id.to_string(), emoji_id.to_string(), name, animated),
        )?;
        Ok(())
    }

    pub fn custom_emojis_for_guild(
        &self,
        guild_id: u64,
    ) -> anyhow::Result<Vec<(u64, String, bool, Option<String>)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT emoji_id, name, animated, description FROM emoji_index WHERE guild_id = ?1",
        )?;
        let rows = stmt.query_map([guild_id.to_string()], |row| {
            let id: String = row.get(0)?;
            Ok((
                id.parse::<u64>().unwrap_or(0),
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Drop index rows for emojis no longer present in the guild.
    pub fn prune_custom_emojis(&self, guild_id: u64, keep_ids: &[u64]) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        if keep_ids.is_empty() {
            let count = conn.execute(
                "DELETE FROM emoji_index WHERE guild_id = ?1",
                [guild_id.to_string()],
            )?;
            return Ok(count);
        }
        let placeholders = vec!["?"; keep_ids.len()].join(", ");
        let sql = format!(
            "DELETE FROM emoji_index WHERE guild_id = ? AND emoji_id NOT IN ({})",
            placeholders
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(guild_id.to_string())];
        for id in keep_ids {
            params.push(Box::new(id.to_string()));
        }
        let params_slice: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count = conn.execute(&sql, &params_slice[..])?;
        Ok(count)
    }

    /// Custom emojis in a guild that have no description yet, newest first.
    pub fn custom_emojis_missing_description(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<(u64, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT emoji_id, name FROM emoji_index
             WHERE guild_id = ?1 AND (description IS NULL OR TRIM(description) = '')
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map((guild_id.to_string(), limit), |row| {
            let id: String = row.get(0)?;
            Ok((id.parse::<u64>().unwrap_or(0), row.get::<_, String>(1)?))
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn set_emoji_description(
        &self,
        guild_id: u64,
        emoji_id: u64,
        description: &str,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE emoji_index SET description = ?3, last_scanned_at = CURRENT_TIMESTAMP
             WHERE guild_id = ?1 AND emoji_id = ?2",
            (guild_id.to_string(), emoji_id.to_string(), description),
        )?;
        Ok(())
    }

    // --- Reaction log ---

    pub fn log_reaction(
        &self,
        guild_id: u64,
        channel_id: u64,
        message_id: u64,
        emoji: &str,
        score: f64,
        reason: &str,
    ) -> anyhow::Result<()> {
        let reason: String = reason.chars().take(400).collect();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO reaction_log (guild_id, channel_id, message_id, emoji, score, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                guild_id.to_string(),
                channel_id.to_string(),
                message_id.to_string(),
                emoji,
                score,
                reason,
            ),
        )?;
        Ok(())
    }

    /// Per-token reaction counts for a channel over the last two weeks,
    /// most popular first.
    pub fn reaction_usage_counts(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> anyhow::Result<Vec<(String, u64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT emoji, COUNT(*) FROM reaction_log
             WHERE guild_id = ?1 AND channel_id = ?2 AND ts >= datetime('now', '-14 days')
             GROUP BY emoji ORDER BY COUNT(*) DESC LIMIT 200",
        )?;
        let rows = stmt.query_map((guild_id.to_string(), channel_id.to_string()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    #[cfg(test)]
    pub(crate) fn raw_user_preferences(&self, user_id: u64) -> Option<String> {
        use rusqlite::OptionalExtension;
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT data_json FROM user_preferences WHERE user_id = ?1",
            [user_id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .unwrap()
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        discord_token: "test".to_string(),
        openrouter_api_key: "test".to_string(),
        openrouter_url: "test".to_string(),
        default_model: "primary-model".to_string(),
        fallback_model: "fallback-model".to_string(),
        database_url: ":memory:".to_string(),
        personas_dir: "personas".to_string(),
        default_persona: "default".to_string(),
        status_message: "test".to_string(),
        emoji_talk_enabled: true,
        emoji_reactions_enabled: true,
        context_message_limit: 50,
        context_token_budget: 3000,
        history_retention_days: 30,
        llm_timeout_secs: 60,
        lock_idle_evict_secs: 3600,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::new(&test_config()).unwrap();
        db.execute_init().unwrap();
        db
    }

    #[test]
    fn test_guild_settings_lazy_default() {
        let db = test_db();

        // First read materializes the default row
        let json = db.get_guild_settings_json(123, r#"{"active_persona":"default"}"#).unwrap();
        assert_eq!(json, r#"{"active_persona":"default"}"#);

        // A later read with a different default must return the stored row, not the new default
        let json = db.get_guild_settings_json(123, r#"{"active_persona":"other"}"#).unwrap();
        assert_eq!(json, r#"{"active_persona":"default"}"#);

        db.set_guild_settings_json(123, r#"{"active_persona":"pirate"}"#).unwrap();
        let json = db.get_guild_settings_json(123, "{}").unwrap();
        assert_eq!(json, r#"{"active_persona":"pirate"}"#);
    }

    #[test]
    fn test_user_preferences_roundtrip_and_reset() {
        let db = test_db();

        let json = db.get_user_preferences_json(9, r#"{"a":1}"#).unwrap();
        assert_eq!(json, r#"{"a":1}"#);

        db.set_user_preferences_json(9, r#"{"a":2}"#).unwrap();
        assert_eq!(db.get_user_preferences_json(9, "{}").unwrap(), r#"{"a":2}"#);

        db.delete_user_preferences(9).unwrap();
        assert!(db.raw_user_preferences(9).is_none());
    }

    #[test]
    fn test_message_history_ordering_and_limit() {
        let db = test_db();

        for i in 1..=5 {
            db.append_message(1, 10, Some(7), "user", &format!("msg {}", i), 2).unwrap();
        }

        let rows = db.recent_messages(1, 10, 3).unwrap();
        assert_eq!(rows.len(), 3);
        // Newest first
        assert_eq!(rows[0].1, "msg 5");
        assert_eq!(rows[2].1, "msg 3");

        // Other channel is isolated
        assert!(db.recent_messages(1, 11, 10).unwrap().is_empty());

        let cleared = db.clear_channel(1, 10).unwrap();
        assert_eq!(cleared, 5);
    }

    #[test]
    fn test_cleanup_old_messages() {
        let db = test_db();

        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (guild_id, channel_id, role, content, token_estimate, created_at)
             VALUES ('1', '10', 'user', 'old msg', 1, datetime('now', '-40 days'))",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO messages (guild_id, channel_id, role, content, token_estimate, created_at)
             VALUES ('1', '10', 'user', 'new msg', 1, datetime('now', '-1 days'))",
            [],
        )
        .unwrap();
        drop(conn);

        let deleted = db.cleanup_old_messages(30).unwrap();
        assert_eq!(deleted, 1);

        let rows = db.recent_messages(1, 10, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, "new msg");
    }

    #[test]
    fn test_emoji_index_upsert_and_prune() {
        let db = test_db();

        db.upsert_custom_emoji(1, 100, "blob", false).unwrap();
        db.upsert_custom_emoji(1, 101, "party", true).unwrap();
        // Upsert with a rename keeps one row
        db.upsert_custom_emoji(1, 100, "blobwave", false).unwrap();

        let emojis = db.custom_emojis_for_guild(1).unwrap();
        assert_eq!(emojis.len(), 2);
        let blob = emojis.iter().find(|e| e.0 == 100).unwrap();
        assert_eq!(blob.1, "blobwave");

        db.set_emoji_description(1, 100, "a waving blob").unwrap();
        let emojis = db.custom_emojis_for_guild(1).unwrap();
        let blob = emojis.iter().find(|e| e.0 == 100).unwrap();
        assert_eq!(blob.3.as_deref(), Some("a waving blob"));

        let pruned = db.prune_custom_emojis(1, &[101]).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(db.custom_emojis_for_guild(1).unwrap().len(), 1);
    }

    #[test]
    fn test_recent_assistant_contents() {
        let db = test_db();

        db.append_message(1, 10, Some(7), "user", "hi <:blob:100>", 2).unwrap();
        db.append_message(1, 10, None, "assistant", "hello <:party:101>", 2).unwrap();
        db.append_message(1, 10, None, "assistant", "again", 1).unwrap();

        let contents = db.recent_assistant_contents(1, 10, 30).unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0], "again");
        assert!(contents[1].contains("<:party:101>"));
    }

    #[test]
    fn test_reaction_log_usage_counts() {
        let db = test_db();

        db.log_reaction(1, 10, 1000, "🔥", 0.9, "spicy take").unwrap();
        db.log_reaction(1, 10, 1001, "🔥", 0.8, "more spice").unwrap();
        db.log_reaction(1, 10, 1002, "<:blob:100>", 0.7, "blob moment").unwrap();
        // Other channel doesn't count
        db.log_reaction(1, 11, 1003, "🔥", 0.9, "elsewhere").unwrap();

        let counts = db.reaction_usage_counts(1, 10).unwrap();
        assert_eq!(counts[0], ("🔥".to_string(), 2));
        assert!(counts.contains(&("<:blob:100>".to_string(), 1)));
    }

    #[test]
    fn test_reaction_log_caps_reason_length() {
        let db = test_db();
        db.log_reaction(1, 10, 1000, "🔥", 0.9, &"x".repeat(1000)).unwrap();

        let conn = db.conn.lock().unwrap();
        let reason: String = conn
            .query_row("SELECT reason FROM reaction_log LIMIT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(reason.len(), 400);
    }
}
