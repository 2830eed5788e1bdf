use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

const APP_QUALIFIER: &str = "com";
const APP_ORG: &str = "FreightOffers";
const APP_NAME: &str = "FreightOffers";
const SETTINGS_FILE: &str = "settings.json";

pub const ENV_API_URL: &str = "FREIGHT_API_URL";
pub const ENV_USER_ID: &str = "FREIGHT_USER_ID";
pub const ENV_AUTH_TOKEN: &str = "FREIGHT_AUTH_TOKEN";

const DEFAULT_API_URL: &str = "http://localhost:8080/api/";
const DEFAULT_CACHE_TTL_SECS: u64 = 5 * 60;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    /// Signed-in user as decoded by the auth layer.
    pub user_id: String,
    pub auth_token: Option<String>,
    /// Cached partitions older than this are reloaded on access.
    pub cache_ttl_secs: u64,
    /// Reload every partition holding an offer after changing its status.
    pub refetch_after_mutation: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            user_id: String::new(),
            auth_token: None,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            refetch_after_mutation: true,
        }
    }
}

impl Settings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Settings file in the platform config directory, then environment
    /// overrides on top.
    pub fn load() -> Result<Self, SettingsError> {
        let mut settings = match settings_file() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Missing file yields defaults; an unreadable or malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        match fs::read_to_string(path) {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = non_empty(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(user) = non_empty(ENV_USER_ID) {
            self.user_id = user;
        }
        if let Some(token) = non_empty(ENV_AUTH_TOKEN) {
            self.auth_token = Some(token);
        }
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        let path = settings_file().ok_or(SettingsError::StorageUnavailable)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn settings_file() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("storage directory unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}
