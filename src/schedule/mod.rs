// Pause scheduling - turns prayer windows into one-shot pause/resume triggers
// Triggers live in the host's job system so they fire even if we are not running

pub mod crontab;
pub mod service;

pub use crontab::CrontabInstaller;
pub use service::ScheduleService;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::write_atomic;
use crate::prayer::{PrayerName, PrayerWindow};

/// Today's windows as last computed, shared with the coordinator.
pub type SharedSchedule = Arc<RwLock<Vec<PrayerWindow>>>;

pub fn shared_schedule() -> SharedSchedule {
    Arc::new(RwLock::new(Vec::new()))
}

/// True when a scheduled resume must yield to an active window.
pub async fn pause_in_effect(schedule: &SharedSchedule, now: DateTime<Local>) -> Option<PrayerName> {
    schedule
        .read()
        .await
        .iter()
        .find(|w| w.contains(now))
        .map(|w| w.name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAction {
    Pause,
    Resume,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub at: DateTime<Local>,
    pub action: TriggerAction,
    pub prayer: PrayerName,
}

/// Pause at each window start, resume `pause_duration_minutes` later.
///
/// A resume that would land at or after the next window's start is dropped:
/// the later window's own resume ends the pause. A zero duration disables pausing.
pub fn plan_triggers(windows: &[PrayerWindow], pause_duration_minutes: u32) -> Vec<Trigger> {
    if pause_duration_minutes == 0 {
        return Vec::new();
    }

    let mut ordered: Vec<&PrayerWindow> = windows.iter().collect();
    ordered.sort_by_key(|w| w.start_time);

    let pause_for = Duration::minutes(i64::from(pause_duration_minutes));
    let mut triggers = Vec::with_capacity(ordered.len() * 2);

    for (i, window) in ordered.iter().enumerate() {
        triggers.push(Trigger {
            at: window.start_time,
            action: TriggerAction::Pause,
            prayer: window.name,
        });

        let resume_at = window.start_time + pause_for;
        let overlapped = ordered[i + 1..]
            .iter()
            .any(|later| later.start_time <= resume_at);

        if overlapped {
            debug!("Suppressing {} resume at {}: next window already started", window.name, resume_at);
            continue;
        }

        triggers.push(Trigger {
            at: resume_at,
            action: TriggerAction::Resume,
            prayer: window.name,
        });
    }

    triggers.sort_by_key(|t| t.at);
    triggers
}

/// Host job system the triggers are written into.
#[async_trait]
pub trait TriggerInstaller: Send + Sync {
    /// Replace whatever set we installed before with `triggers`.
    async fn install(&self, triggers: &[Trigger]) -> Result<()>;
}

pub struct PauseScheduler<I> {
    installer: I,
}

impl<I: TriggerInstaller> PauseScheduler<I> {
    pub fn new(installer: I) -> Self {
        Self { installer }
    }

    pub async fn install(&self, windows: &[PrayerWindow], pause_duration_minutes: u32) -> Result<Vec<Trigger>> {
        let triggers = plan_triggers(windows, pause_duration_minutes);
        self.installer.install(&triggers).await?;

        info!("Installed {} prayer triggers", triggers.len());
        for trigger in &triggers {
            info!("  {} {:?} at {}", trigger.prayer, trigger.action, trigger.at.format("%Y-%m-%d %H:%M"));
        }
        Ok(triggers)
    }
}

/// Persist the last successfully computed schedule.
pub fn save_last_schedule(path: &Path, windows: &[PrayerWindow]) -> Result<()> {
    let json = serde_json::to_string_pretty(windows)?;
    write_atomic(path, json.as_bytes())?;
    Ok(())
}

pub fn load_last_schedule(path: &Path) -> Option<Vec<PrayerWindow>> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(windows) => Some(windows),
        Err(e) => {
            warn!("Ignoring unreadable schedule file {}: {}", path.display(), e);
            None
        }
    }
}
