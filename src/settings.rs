use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;
use tracing::info;

use crate::db::{self, KeyValueStore, ANALYSIS_CACHE_KEY, CV_TEXT_KEY, FLOATING_BUTTON_KEY, SETTINGS_KEY};
use crate::error::{MatchaError, Result};

pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Azure,
    OpenAI,
    Backend,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "azure" => Ok(ProviderKind::Azure),
            "openai" => Ok(ProviderKind::OpenAI),
            "backend" => Ok(ProviderKind::Backend),
            _ => Err(format!(
                "Unknown provider '{}'. Available: azure, openai, backend",
                s
            )),
        }
    }
}

/// Remote analysis settings as persisted under `settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub azure_endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub deployment: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub backend_url: String,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            azure_endpoint: String::new(),
            api_key: String::new(),
            access_token: String::new(),
            deployment: String::new(),
            api_version: default_api_version(),
            model: String::new(),
            backend_url: String::new(),
        }
    }
}

impl Settings {
    /// Fill secrets that are unset in storage from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        fill_from_env(&mut self.azure_endpoint, "AZURE_OPENAI_ENDPOINT");
        match self.provider {
            ProviderKind::Azure => fill_from_env(&mut self.api_key, "AZURE_OPENAI_API_KEY"),
            ProviderKind::OpenAI => fill_from_env(&mut self.api_key, "OPENAI_API_KEY"),
            ProviderKind::Backend => fill_from_env(&mut self.access_token, "MATCHA_BACKEND_TOKEN"),
        }
        fill_from_env(&mut self.backend_url, "MATCHA_BACKEND_URL");
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self.provider {
            ProviderKind::Azure => {
                if self.azure_endpoint.is_empty()
                    || (self.api_key.is_empty() && self.access_token.is_empty())
                    || self.deployment.is_empty()
                {
                    return Err(MatchaError::config(
                        "missing Azure OpenAI settings. Set endpoint, deployment and either an API key or an access token \
                         (matcha settings set ...) or export AZURE_OPENAI_ENDPOINT / AZURE_OPENAI_API_KEY",
                    ));
                }
            }
            ProviderKind::OpenAI => {
                if self.api_key.is_empty() {
                    return Err(MatchaError::config(
                        "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY=your-key-here",
                    ));
                }
            }
            ProviderKind::Backend => {
                if self.access_token.is_empty() {
                    return Err(MatchaError::config(
                        "not signed in to the backend. Set MATCHA_BACKEND_TOKEN or store an access token",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn fill_from_env(field: &mut String, var: &str) {
    if field.is_empty() {
        if let Ok(value) = env::var(var) {
            *field = value.trim().to_string();
        }
    }
}

/// CV text, settings and UI flags kept in the key-value store.
pub struct Profile<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> Profile<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    /// Replace the CV. Every cached analysis was made against the old CV, so
    /// the cache is emptied in the same write.
    pub fn save_cv_text(&self, cv_text: &str) -> Result<()> {
        let mut items = Map::new();
        items.insert(CV_TEXT_KEY.to_string(), Value::String(cv_text.to_string()));
        items.insert(ANALYSIS_CACHE_KEY.to_string(), Value::Object(Map::new()));
        self.store.set(items)?;
        info!(chars = cv_text.chars().count(), "CV updated, analysis cache cleared");
        Ok(())
    }

    /// The stored CV; an empty CV counts as none.
    pub fn cv_text(&self) -> Result<Option<String>> {
        let cv: Option<String> = db::load(self.store, CV_TEXT_KEY)?;
        Ok(cv.filter(|t| !t.trim().is_empty()))
    }

    pub fn settings(&self) -> Result<Settings> {
        Ok(db::load(self.store, SETTINGS_KEY)?.unwrap_or_default())
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        db::save(self.store, SETTINGS_KEY, settings)
    }

    pub fn floating_button_enabled(&self) -> Result<bool> {
        Ok(db::load(self.store, FLOATING_BUTTON_KEY)?.unwrap_or(true))
    }

    pub fn set_floating_button_enabled(&self, enabled: bool) -> Result<()> {
        db::save(self.store, FLOATING_BUTTON_KEY, &enabled)
    }

    pub fn clear_all_data(&self) -> Result<()> {
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis_cache::tests::sample_analysis;
    use crate::analysis_cache::AnalysisCache;
    use crate::cache_key::derive_cache_key;
    use crate::db::MemoryStore;

    #[test]
    fn test_new_cv_invalidates_every_cached_analysis() {
        let store = MemoryStore::new();
        let profile = Profile::new(&store);
        let cache = AnalysisCache::new(&store);

        profile.save_cv_text("Old CV").unwrap();
        let keys: Vec<String> = (0..5)
            .map(|i| derive_cache_key("Old CV", &format!("job {i}")))
            .collect();
        for key in &keys {
            cache.store(key, sample_analysis(70), "https://jobs.example").unwrap();
        }
        assert_eq!(cache.len().unwrap(), keys.len());

        profile.save_cv_text("New CV").unwrap();
        for key in &keys {
            assert!(cache.lookup(key).unwrap().is_none());
        }
        assert_eq!(profile.cv_text().unwrap().as_deref(), Some("New CV"));
    }

    #[test]
    fn test_clearing_cv_also_clears_cache() {
        let store = MemoryStore::new();
        let profile = Profile::new(&store);
        let cache = AnalysisCache::new(&store);
        profile.save_cv_text("CV").unwrap();
        cache.store("k", sample_analysis(1), "u").unwrap();

        profile.save_cv_text("").unwrap();
        assert!(profile.cv_text().unwrap().is_none());
        assert_eq!(cache.len().unwrap(), 0);
    }

    #[test]
    fn test_settings_default_and_roundtrip() {
        let store = MemoryStore::new();
        let profile = Profile::new(&store);
        let defaults = profile.settings().unwrap();
        assert_eq!(defaults.api_version, DEFAULT_API_VERSION);
        assert_eq!(defaults.provider, ProviderKind::Azure);

        let settings = Settings {
            azure_endpoint: "https://example.openai.azure.com".into(),
            api_key: "k".into(),
            deployment: "gpt4".into(),
            ..Settings::default()
        };
        profile.save_settings(&settings).unwrap();
        assert_eq!(profile.settings().unwrap(), settings);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_names_missing_pieces() {
        let err = Settings::default().validate().unwrap_err();
        assert!(err.to_string().contains("Azure OpenAI"));

        let backend = Settings {
            provider: ProviderKind::Backend,
            ..Settings::default()
        };
        assert!(backend.validate().is_err());
    }

    #[test]
    fn test_floating_button_defaults_on() {
        let store = MemoryStore::new();
        let profile = Profile::new(&store);
        assert!(profile.floating_button_enabled().unwrap());
        profile.set_floating_button_enabled(false).unwrap();
        assert!(!profile.floating_button_enabled().unwrap());
    }

    #[test]
    fn test_clear_all_data() {
        let store = MemoryStore::new();
        let profile = Profile::new(&store);
        profile.save_cv_text("CV").unwrap();
        profile.clear_all_data().unwrap();
        assert!(profile.cv_text().unwrap().is_none());
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert!("bedrock".parse::<ProviderKind>().is_err());
    }
}
