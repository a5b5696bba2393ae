// Configuration management for prayerpause
// config.json is shared with the dashboard, settings.toml is ours alone

pub mod settings;

pub use settings::Settings;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const DEFAULT_PLAYLIST_URL: &str =
    "https://youtube.com/playlist?list=PLdngPVXnULzG9yhOaIpMwkAn_35OfEPyM";

/// The record the dashboard edits. Unknown keys are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub playlist_url: String,
    pub city: String,
    pub country: String,
    pub method: u8,
    pub prayer_duration_minutes: u32,
    pub volume: u8,
    pub check_interval_seconds: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            playlist_url: DEFAULT_PLAYLIST_URL.to_string(),
            city: "Kuwait City".to_string(),
            country: "Kuwait".to_string(),
            method: 2,
            prayer_duration_minutes: 15,
            volume: 70,
            check_interval_seconds: 10,
            extra: serde_json::Map::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.playlist_url.trim().is_empty() {
            bail!("playlist_url must not be empty");
        }
        if self.city.trim().is_empty() || self.country.trim().is_empty() {
            bail!("city and country must both be set");
        }
        if !(1..=5).contains(&self.method) {
            bail!("method must be between 1 and 5, got {}", self.method);
        }
        if self.volume > 100 {
            bail!("volume must be between 0 and 100, got {}", self.volume);
        }
        if self.check_interval_seconds == 0 {
            bail!("check_interval_seconds must be greater than zero");
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_atomic(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())
            .with_context(|| format!("writing {}", path.display()))
    }
}

/// Write to a sibling temp file then rename over the target.
/// A crash mid-write leaves the old file intact, never a truncated one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
}

/// Process-wide config handle. Clones share the same value.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    current: Arc<RwLock<Config>>,
}

impl ConfigStore {
    /// Load config from disk - writes the defaults if the file is missing.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let config = if path.exists() {
            Config::from_file(&path)?
        } else {
            warn!("No config at {}, writing defaults", path.display());
            let config = Config::default();
            config.save_atomic(&path)?;
            config
        };

        info!(
            "Loaded config: playlist={} location={}, {} method={}",
            config.playlist_url, config.city, config.country, config.method
        );

        Ok(Self {
            path,
            current: Arc::new(RwLock::new(config)),
        })
    }

    /// In-memory store for tests and dry runs; `update` still persists to `path`.
    pub fn with_config(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            path: path.into(),
            current: Arc::new(RwLock::new(config)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> Config {
        self.current.read().await.clone()
    }

    /// Apply `change`, validate, persist, then publish.
    /// The write lock is held throughout so readers see either the old or the new value.
    pub async fn update<F>(&self, change: F) -> Result<Config>
    where
        F: FnOnce(&mut Config),
    {
        let mut guard = self.current.write().await;
        let mut next = guard.clone();
        change(&mut next);
        next.validate()?;

        let to_save = next.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || to_save.save_atomic(&path))
            .await
            .context("config writer task failed")??;

        *guard = next.clone();
        Ok(next)
    }

    /// Re-read the file, e.g. after the dashboard edited it.
    pub async fn reload(&self) -> Result<Config> {
        let fresh = Config::from_file(&self.path)?;
        let mut guard = self.current.write().await;
        *guard = fresh.clone();
        info!("Reloaded config from {}", self.path.display());
        Ok(fresh)
    }
}
