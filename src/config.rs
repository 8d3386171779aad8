use crate::error::SyncError;
use crate::integrations::http::HttpSettings;
use crate::integrations::{notion::NOTION_API, todoist::TODOIST_API};
use crate::mapper::JournalZone;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const ENV_CONFIG: &str = "REFLOG_CONFIG";
pub const ENV_TODOIST_TOKEN: &str = "TODOIST_TOKEN";
pub const ENV_NOTION_TOKEN: &str = "NOTION_TOKEN";
const ENV_PROJECT: &str = "REFLOG_PROJECT";
const ENV_PAGE_ID: &str = "REFLOG_PAGE_ID";
const ENV_PAGE_TITLE: &str = "REFLOG_PAGE_TITLE";
const ENV_TIMEZONE: &str = "REFLOG_TIMEZONE";
const ENV_LOOKBACK_DAYS: &str = "REFLOG_LOOKBACK_DAYS";
const ENV_DRY_RUN: &str = "REFLOG_DRY_RUN";
/// The completed-tasks endpoint refuses ranges longer than about three months.
const MAX_LOOKBACK_DAYS: u32 = 90;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "meghendra", "reflog-sync")
}

pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(ENV_CONFIG) {
        return PathBuf::from(path);
    }
    if let Some(dirs) = project_dirs() {
        return dirs.config_dir().join("config.toml");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".reflog-sync.toml")
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub journal: JournalConfig,
    pub sync: SyncConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub project: String,
    pub api_base: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            project: "Reflections".to_string(),
            api_base: TODOIST_API.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct JournalConfig {
    /// Takes precedence over `page_title` when set.
    pub page_id: String,
    pub page_title: String,
    pub api_base: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            page_id: String::new(),
            page_title: "Journal".to_string(),
            api_base: NOTION_API.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub timezone: String,
    pub lookback_days: u32,
    pub dry_run: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timezone: "local".to_string(),
            lookback_days: 7,
            dry_run: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub max_attempts: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_attempts: 3,
        }
    }
}

impl HttpConfig {
    pub fn settings(&self) -> HttpSettings {
        HttpSettings::new(self.timeout_seconds, self.max_attempts)
    }
}

/// Tokens read from the environment only; never serialized.
#[derive(Clone)]
pub struct Credentials {
    pub todoist_token: String,
    pub notion_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("todoist_token", &"<redacted>")
            .field("notion_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let missing: Vec<&str> = [ENV_TODOIST_TOKEN, ENV_NOTION_TOKEN]
            .into_iter()
            .filter(|key| read(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(SyncError::config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }
        Ok(Self {
            todoist_token: read(ENV_TODOIST_TOKEN).unwrap_or_default(),
            notion_token: read(ENV_NOTION_TOKEN).unwrap_or_default(),
        })
    }

    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl Config {
    /// Reads the config file (if any), then applies environment overrides.
    pub fn load() -> Result<Self, SyncError> {
        let path = config_path();
        let mut config = Self::load_from_path(&path)?;
        if !path.exists() {
            // Starter file for the next run; env overrides are not persisted.
            if let Err(err) = config.save_to_path(&path) {
                warn!(path = %path.display(), error = %err, "could not write default config");
            }
        }
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, SyncError> {
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str::<Config>(&content).map_err(|e| {
                SyncError::config(format!("failed to parse {}: {e}", path.display()))
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
            Err(err) => Err(SyncError::config(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    pub fn save_to_path(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, content)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string());

        if let Some(project) = read(ENV_PROJECT).filter(|v| !v.is_empty()) {
            self.source.project = project;
        }
        if let Some(page_id) = read(ENV_PAGE_ID) {
            self.journal.page_id = page_id;
        }
        if let Some(title) = read(ENV_PAGE_TITLE).filter(|v| !v.is_empty()) {
            self.journal.page_title = title;
        }
        if let Some(zone) = read(ENV_TIMEZONE).filter(|v| !v.is_empty()) {
            self.sync.timezone = zone;
        }
        if let Some(days) = read(ENV_LOOKBACK_DAYS).filter(|v| !v.is_empty()) {
            self.sync.lookback_days = days.parse().map_err(|_| {
                SyncError::config(format!("{ENV_LOOKBACK_DAYS} must be a whole number, got `{days}`"))
            })?;
        }
        if let Some(flag) = read(ENV_DRY_RUN) {
            self.sync.dry_run = parse_flag(&flag);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if !(1..=MAX_LOOKBACK_DAYS).contains(&self.sync.lookback_days) {
            return Err(SyncError::config(format!(
                "lookback_days must be between 1 and {MAX_LOOKBACK_DAYS}, got {}",
                self.sync.lookback_days
            )));
        }
        if self.source.project.trim().is_empty() {
            return Err(SyncError::config("source project name is empty"));
        }
        if self.journal.page_id.trim().is_empty() && self.journal.page_title.trim().is_empty() {
            return Err(SyncError::config("set journal page_id or page_title"));
        }
        self.zone()?;
        Ok(())
    }

    pub fn zone(&self) -> Result<JournalZone, SyncError> {
        JournalZone::parse(&self.sync.timezone)
    }

    pub fn page_id(&self) -> Option<&str> {
        let id = self.journal.page_id.trim();
        (!id.is_empty()).then_some(id)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
