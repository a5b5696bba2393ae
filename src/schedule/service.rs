// Daily schedule refresh inside the daemon
// Recompute at startup and once a day; a flaky prayer service never leaves us without triggers

use anyhow::Result;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone};
use std::path::PathBuf;
use tracing::{error, info, warn};

use super::{load_last_schedule, save_last_schedule, PauseScheduler, SharedSchedule, TriggerInstaller};
use crate::config::settings::ScheduleSettings;
use crate::config::ConfigStore;
use crate::coordinator::CoordinatorHandle;
use crate::error::ScheduleUnavailable;
use crate::prayer::{PrayerCalculator, PrayerWindow, TimingsSource};
use crate::translog::TransitionReason;

/// Result of one refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedSchedule {
    pub windows: Vec<PrayerWindow>,
    /// False when the previous schedule was reused.
    pub fresh: bool,
}

pub struct ScheduleService<T, I> {
    calculator: PrayerCalculator<T>,
    scheduler: Option<PauseScheduler<I>>,
    config: ConfigStore,
    schedule: SharedSchedule,
    last_path: PathBuf,
    refresh_at: NaiveTime,
    retry: Duration,
    coordinator: Option<CoordinatorHandle>,
}

impl<T: TimingsSource, I: TriggerInstaller> ScheduleService<T, I> {
    pub fn new(
        calculator: PrayerCalculator<T>,
        config: ConfigStore,
        schedule: SharedSchedule,
        last_path: PathBuf,
        settings: &ScheduleSettings,
    ) -> Result<Self> {
        Ok(Self {
            calculator,
            scheduler: None,
            config,
            schedule,
            last_path,
            refresh_at: settings.refresh_time()?,
            retry: Duration::minutes(settings.retry_minutes.max(1) as i64),
            coordinator: None,
        })
    }

    /// Write triggers into the host job system on every refresh.
    pub fn with_installer(mut self, scheduler: PauseScheduler<I>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Pause the coordinator right away when a refresh lands inside a window.
    pub fn with_coordinator(mut self, handle: CoordinatorHandle) -> Self {
        self.coordinator = Some(handle);
        self
    }

    async fn previous_windows(&self) -> Vec<PrayerWindow> {
        let in_memory = self.schedule.read().await.clone();
        if !in_memory.is_empty() {
            return in_memory;
        }
        load_last_schedule(&self.last_path).unwrap_or_default()
    }

    /// Publish the saved schedule, shifted to today, before anything has been fetched.
    /// Returns how many windows were restored.
    pub async fn restore_saved(&self, now: DateTime<Local>) -> usize {
        let Some(saved) = load_last_schedule(&self.last_path) else {
            return 0;
        };
        let duration = self.config.snapshot().await.prayer_duration_minutes;
        let windows = shift_windows(&saved, now.date_naive(), duration);
        let restored = windows.len();

        let mut schedule = self.schedule.write().await;
        if schedule.is_empty() {
            info!("Restored {} saved prayer windows for {}", restored, now.date_naive());
            *schedule = windows;
        }
        restored
    }

    /// Compute today's windows (or reuse the last good set), install their
    /// triggers and publish them to the coordinator.
    pub async fn refresh_and_apply(&self, now: DateTime<Local>) -> Result<AppliedSchedule, ScheduleUnavailable> {
        let config = self.config.snapshot().await;
        let date = now.date_naive();
        let duration = config.prayer_duration_minutes;

        let computed = self
            .calculator
            .compute_windows(&config.city, &config.country, config.method, date, duration)
            .await;

        let applied = match computed {
            Ok(windows) => {
                if let Err(e) = save_last_schedule(&self.last_path, &windows) {
                    warn!("Could not save schedule to {}: {:#}", self.last_path.display(), e);
                }
                AppliedSchedule { windows, fresh: true }
            }
            Err(e) => {
                warn!("Prayer times unavailable for {}: {}", date, e);
                let windows = shift_windows(&self.previous_windows().await, date, duration);

                if windows.is_empty() {
                    return Err(ScheduleUnavailable::NoFallback);
                }
                warn!("Reusing previous schedule ({} windows) for {}", windows.len(), date);
                AppliedSchedule { windows, fresh: false }
            }
        };

        if let Some(scheduler) = &self.scheduler {
            // windows still guard scheduled resumes even if cron can't be written
            if let Err(e) = scheduler.install(&applied.windows, duration).await {
                error!("Installing prayer triggers failed: {:#}", e);
            }
        }

        *self.schedule.write().await = applied.windows.clone();

        if let Some(handle) = &self.coordinator {
            if let Some(window) = applied.windows.iter().find(|w| w.contains(now)) {
                info!("Inside the {} window right now, pausing", window.name);
                if let Err(e) = handle.pause(TransitionReason::Prayer(window.name)).await {
                    warn!("Catch-up pause failed: {}", e);
                }
            }
        }

        Ok(applied)
    }

    /// Refresh now, then every day at `refresh_at`. Retries sooner after a fallback.
    pub async fn run(self) {
        info!("Schedule service started, daily refresh at {}", self.refresh_at.format("%H:%M"));

        loop {
            let now = Local::now();
            let next_refresh = next_occurrence(now, self.refresh_at);

            let wake = match self.refresh_and_apply(now).await {
                Ok(applied) if applied.fresh => next_refresh,
                Ok(_) => (now + self.retry).min(next_refresh),
                Err(e) => {
                    error!("No usable prayer schedule: {}", e);
                    (now + self.retry).min(next_refresh)
                }
            };

            info!("Next schedule refresh at {}", wake.format("%Y-%m-%d %H:%M"));
            let wait = (wake - Local::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO)
                .max(std::time::Duration::from_secs(1));
            tokio::time::sleep(wait).await;
        }
    }
}

fn shift_windows(windows: &[PrayerWindow], date: NaiveDate, duration: u32) -> Vec<PrayerWindow> {
    windows
        .iter()
        .filter_map(|w| w.shifted_to(date))
        .map(|mut w| {
            w.duration_minutes = duration;
            w
        })
        .collect()
}

/// The next instant strictly after `now` whose local wall-clock time is `at`.
pub fn next_occurrence(now: DateTime<Local>, at: NaiveTime) -> DateTime<Local> {
    let mut date = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = Local.from_local_datetime(&date.and_time(at)).earliest() {
            if candidate > now {
                return candidate;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    now + Duration::days(1)
}
