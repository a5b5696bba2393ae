// Host-local daemon settings - paths, external tools, timing knobs
// Lives next to config.json but the dashboard never touches it

use anyhow::{Context, Result};
use chrono::NaiveTime;
use dirs::{cache_dir, config_dir};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub config_path: PathBuf,
    pub cache_dir: PathBuf,
    pub log_dir: PathBuf,
    pub transition_log: PathBuf,
    pub socket_path: PathBuf,
    pub resolver: ResolverSettings,
    pub player: PlayerSettings,
    pub playback: PlaybackSettings,
    pub schedule: ScheduleSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    pub program: String,
    pub format: String,
    pub playlist_timeout_secs: u64,
    pub stream_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    pub program: String,
    /// `{volume}` and `{url}` are substituted; the url is appended when absent.
    pub args: Vec<String>,
    pub early_exit_grace_ms: u64,
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub shuffle: bool,
    /// How many times one transition may move on to another track before giving up.
    pub max_track_advances: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub api_base: String,
    pub request_timeout_secs: u64,
    /// Local time of the daily recompute, "HH:MM".
    pub refresh_at: String,
    pub retry_minutes: u64,
    pub install_triggers: bool,
    pub crontab_program: String,
    /// Command the cron entries invoke; the running executable when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_program: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let config_dir = config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("prayerpause");
        let cache_dir = cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("prayerpause");

        Self {
            config_path: config_dir.join("config.json"),
            transition_log: cache_dir.join("transitions.log"),
            log_dir: cache_dir.join("logs"),
            socket_path: std::env::temp_dir().join("prayerpause.sock"),
            cache_dir,
            resolver: ResolverSettings::default(),
            player: PlayerSettings::default(),
            playback: PlaybackSettings::default(),
            schedule: ScheduleSettings::default(),
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            format: "bestaudio".to_string(),
            playlist_timeout_secs: 60,
            stream_timeout_secs: 30,
        }
    }
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            program: "ffplay".to_string(),
            args: vec![
                "-nodisp".to_string(),
                "-autoexit".to_string(),
                "-loglevel".to_string(),
                "error".to_string(),
                "-volume".to_string(),
                "{volume}".to_string(),
            ],
            early_exit_grace_ms: 3000,
            stop_timeout_secs: 5,
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            shuffle: true,
            max_track_advances: 1,
        }
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            api_base: "http://api.aladhan.com/v1".to_string(),
            request_timeout_secs: 10,
            refresh_at: "00:05".to_string(),
            retry_minutes: 60,
            install_triggers: true,
            crontab_program: "crontab".to_string(),
            trigger_program: None,
        }
    }
}

impl Settings {
    /// Load settings from `path` (or the default location), creating the file with defaults.
    pub fn load(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let settings_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if settings_path.exists() {
            let content = fs::read_to_string(&settings_path)
                .with_context(|| format!("reading {}", settings_path.display()))?;
            let settings: Settings = toml::from_str(&content)
                .with_context(|| format!("parsing {}", settings_path.display()))?;
            Ok((settings, settings_path))
        } else {
            let settings = Settings::default();
            settings.save(&settings_path)?;
            Ok((settings, settings_path))
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("prayerpause");

        Ok(config_dir.join("settings.toml"))
    }

    pub fn playlist_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("playlists")
    }

    pub fn last_schedule_path(&self) -> PathBuf {
        self.cache_dir.join("schedule.json")
    }

    pub fn early_exit_grace(&self) -> Duration {
        Duration::from_millis(self.player.early_exit_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.player.stop_timeout_secs)
    }
}

impl ScheduleSettings {
    pub fn refresh_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.refresh_at, "%H:%M")
            .with_context(|| format!("refresh_at '{}' is not HH:MM", self.refresh_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let (settings, used) = Settings::load(Some(&path)).unwrap();
        assert_eq!(used, path);
        assert!(path.exists());
        assert_eq!(settings.player.stop_timeout_secs, 5);
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[player]\nprogram = \"mpv\"\n").unwrap();

        let (settings, _) = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.player.program, "mpv");
        assert_eq!(settings.player.early_exit_grace_ms, 3000);
        assert_eq!(settings.resolver.program, "yt-dlp");
    }

    #[test]
    fn test_refresh_time_parses() {
        let schedule = ScheduleSettings::default();
        assert_eq!(
            schedule.refresh_time().unwrap(),
            NaiveTime::from_hms_opt(0, 5, 0).unwrap()
        );
    }
}
