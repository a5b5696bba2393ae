// Append-only audit trail of pause start/end
// Written for humans debugging a missed prayer; the daemon never reads it back

use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::prayer::PrayerName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEvent {
    PauseStart,
    PauseEnd,
}

impl TransitionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionEvent::PauseStart => "pause_start",
            TransitionEvent::PauseEnd => "pause_end",
        }
    }
}

/// Why a pause started or ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "prayer")]
pub enum TransitionReason {
    Prayer(PrayerName),
    Manual,
    Stopped,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionReason::Prayer(name) => write!(f, "prayer:{}", name),
            TransitionReason::Manual => f.write_str("manual"),
            TransitionReason::Stopped => f.write_str("stopped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransitionLog {
    path: PathBuf,
}

impl TransitionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format_line(at: DateTime<Local>, event: TransitionEvent, reason: &TransitionReason) -> String {
        format!(
            "{} {} {}\n",
            at.to_rfc3339_opts(SecondsFormat::Secs, false),
            event.as_str(),
            reason
        )
    }

    /// Append one line. Failures are logged, never propagated - losing an audit
    /// line must not block a pause.
    pub async fn record(&self, event: TransitionEvent, reason: &TransitionReason) {
        if let Err(e) = self.append(event, reason).await {
            warn!("Could not write transition log {}: {}", self.path.display(), e);
        }
    }

    async fn append(&self, event: TransitionEvent, reason: &TransitionReason) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = Self::format_line(Local::now(), event, reason);
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
