use crate::error::AppResult;
use crate::session::store::{KeyValueStore, THEME_PREFERENCE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    Light,
    Dark,
    #[default]
    System,
}

impl ThemePreference {
    pub fn as_str(self) -> &'static str {
        match self {
            ThemePreference::Light => "light",
            ThemePreference::Dark => "dark",
            ThemePreference::System => "system",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "light" => ThemePreference::Light,
            "dark" => ThemePreference::Dark,
            _ => ThemePreference::System,
        }
    }

    /// Stored preference; `System` when unset, unreadable or unknown.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        match store.get(THEME_PREFERENCE) {
            Ok(Some(raw)) => Self::parse(&raw),
            Ok(None) => ThemePreference::System,
            Err(e) => {
                log::warn!("Failed to read theme preference: {}", e);
                ThemePreference::System
            }
        }
    }

    pub fn save(self, store: &dyn KeyValueStore) -> AppResult<()> {
        store.set(THEME_PREFERENCE, self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::MemoryStore;

    #[test]
    fn defaults_to_system() {
        let store = MemoryStore::new();
        assert_eq!(ThemePreference::load(&store), ThemePreference::System);
        store.set(THEME_PREFERENCE, "sepia").unwrap();
        assert_eq!(ThemePreference::load(&store), ThemePreference::System);
    }

    #[test]
    fn saved_preference_is_loaded_back() {
        let store = MemoryStore::new();
        ThemePreference::Dark.save(&store).unwrap();
        assert_eq!(store.get(THEME_PREFERENCE).unwrap().as_deref(), Some("dark"));
        assert_eq!(ThemePreference::load(&store), ThemePreference::Dark);
    }
}
