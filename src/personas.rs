//! Persona storage: flat TOML files with a read-through cache.
//!
//! Personas live as `<name>.toml` files under the configured directory. Each
//! file carries top-level metadata plus prompt-section tables whose `content`
//! strings are concatenated into the persona's system prompt. The store is
//! read-only to the message pipeline; edit/delete signals from the management
//! surface invalidate the cache via `reload`.

use lru::LruCache;
use serde::Deserialize;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Prompt-section tables recognized in persona files, in assembly order.
const PROMPT_SECTIONS: &[&str] = &[
    "personality_traits",
    "communication_style",
    "behavior_patterns",
    "core_principles",
    "style",
    "constraints",
    "system_prompt",
];

#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub display_name: Option<String>,
    pub description: String,
    pub system_prompt: String,
    /// Optional per-persona model override for the dispatcher.
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

impl Persona {
    pub fn display_label(&self) -> String {
        match &self.display_name {
            Some(d) if !d.trim().is_empty() => d.clone(),
            _ => title_from_slug(&self.name),
        }
    }
}

#[derive(Deserialize)]
struct PersonaFile {
    name: String,
    display_name: Option<String>,
    #[serde(default)]
    description: String,
    model: Option<String>,
    temperature: Option<f32>,
    #[serde(flatten)]
    rest: toml::Table,
}

pub struct PersonaStore {
    dir: PathBuf,
    default_name: String,
    cache: Mutex<LruCache<String, Persona>>,
}

impl PersonaStore {
    pub fn new(dir: impl Into<PathBuf>, default_name: impl Into<String>) -> Self {
        let cap = NonZeroUsize::new(64).unwrap();
        Self {
            dir: dir.into(),
            default_name: default_name.into(),
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Look up a persona by name, reading through to disk on a cache miss.
    /// Returns None for unknown names and for files that fail to parse.
    pub fn get(&self, name: &str) -> Option<Persona> {
        let key = slug(name);
        if let Some(p) = self.cache.lock().unwrap().get(&key) {
            return Some(p.clone());
        }

        let path = self.dir.join(format!("{}.toml", key));
        let persona = load_persona_file(&path)?;
        self.cache.lock().unwrap().put(key, persona.clone());
        Some(persona)
    }

    /// All personas on disk, sorted by name. Parse failures are skipped.
    pub fn list(&self) -> Vec<Persona> {
        let mut personas = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Personas dir {} not readable: {}", self.dir.display(), e);
                return personas;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            if let Some(persona) = load_persona_file(&path) {
                personas.push(persona);
            }
        }
        personas.sort_by(|a, b| a.name.cmp(&b.name));
        personas
    }

    /// Invalidate the cache after a persona was edited or deleted on disk.
    pub fn reload(&self) {
        self.cache.lock().unwrap().clear();
        debug!("Persona cache cleared");
    }

    #[cfg(test)]
    pub(crate) fn empty_for_tests(default_name: &str) -> Self {
        Self::new(std::env::temp_dir().join("prism-no-such-dir"), default_name)
    }

    #[cfg(test)]
    pub(crate) fn insert_for_tests(&self, persona: Persona) {
        let key = slug(&persona.name);
        self.cache.lock().unwrap().put(key, persona);
    }
}

fn load_persona_file(path: &Path) -> Option<Persona> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return None,
    };
    let file: PersonaFile = match toml::from_str(&raw) {
        Ok(file) => file,
        Err(e) => {
            warn!("Skipping malformed persona file {}: {}", path.display(), e);
            return None;
        }
    };

    let mut sections = Vec::new();
    for key in PROMPT_SECTIONS {
        if let Some(toml::Value::Table(table)) = file.rest.get(*key) {
            if let Some(toml::Value::String(content)) = table.get("content") {
                let content = content.trim();
                if !content.is_empty() {
                    sections.push(content.to_string());
                }
            }
        }
    }
    let system_prompt = sections.join("\n\n");

    let name = slug(&file.name);
    if name.is_empty() || system_prompt.is_empty() {
        warn!("Skipping persona file {} with empty name or prompt", path.display());
        return None;
    }

    Some(Persona {
        name,
        display_name: file.display_name.filter(|d| !d.trim().is_empty()),
        description: file.description.trim().to_string(),
        system_prompt,
        model: file.model,
        temperature: file.temperature,
    })
}

/// Canonical kebab-case persona name.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_dash = false;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash && !out.is_empty() {
            out.push('-');
            prev_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

fn title_from_slug(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_store(label: &str) -> PersonaStore {
        let dir = std::env::temp_dir().join(format!("prism-personas-{}-{}", label, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        PersonaStore::new(dir, "default")
    }

    fn write_persona(store: &PersonaStore, name: &str, body: &str) {
        fs::write(store.dir.join(format!("{}.toml", name)), body).unwrap();
    }

    const PIRATE: &str = r#"
name = "pirate"
display_name = "Pirate"
description = "Talks like a pirate"
model = "google/gemini-2.5-pro"
temperature = 0.9

[personality_traits]
content = "You are a boisterous pirate captain."

[communication_style]
content = "Sprinkle in nautical slang."
"#;

    #[test]
    fn test_load_and_assemble_prompt() {
        let store = temp_store("load");
        write_persona(&store, "pirate", PIRATE);

        let persona = store.get("pirate").unwrap();
        assert_eq!(persona.name, "pirate");
        assert_eq!(persona.display_label(), "Pirate");
        assert_eq!(persona.model.as_deref(), Some("google/gemini-2.5-pro"));
        assert_eq!(persona.temperature, Some(0.9));
        assert_eq!(
            persona.system_prompt,
            "You are a boisterous pirate captain.\n\nSprinkle in nautical slang."
        );
    }

    #[test]
    fn test_unknown_and_malformed_personas_are_none() {
        let store = temp_store("missing");
        assert!(store.get("ghost").is_none());

        write_persona(&store, "broken", "name = \"broken\"\nthis is not toml at all [");
        assert!(store.get("broken").is_none());

        // A file without prompt sections is not a persona
        write_persona(&store, "empty", "name = \"empty\"\ndescription = \"no prompt\"");
        assert!(store.get("empty").is_none());
    }

    #[test]
    fn test_reload_picks_up_deleted_file() {
        let store = temp_store("reload");
        write_persona(&store, "pirate", PIRATE);
        assert!(store.get("pirate").is_some());

        fs::remove_file(store.dir.join("pirate.toml")).unwrap();
        // Still cached until the management surface signals a reload
        assert!(store.get("pirate").is_some());

        store.reload();
        assert!(store.get("pirate").is_none());
    }

    #[test]
    fn test_list_sorted_and_skips_non_toml() {
        let store = temp_store("list");
        write_persona(&store, "pirate", PIRATE);
        write_persona(
            &store,
            "calm",
            "name = \"calm\"\n[system_prompt]\ncontent = \"You are calm and patient.\"\n",
        );
        fs::write(store.dir.join("notes.txt"), "not a persona").unwrap();

        let names: Vec<String> = store.list().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["calm", "pirate"]);
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Pirate Captain"), "pirate-captain");
        assert_eq!(slug("  Fancy!!Name  "), "fancy-name");
        assert_eq!(slug("already-kebab"), "already-kebab");
    }
}
