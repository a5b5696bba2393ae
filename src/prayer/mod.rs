// Prayer schedule calculation
// The astronomy is the time service's job - we validate, order and anchor to local time

pub mod aladhan;

pub use aladhan::AladhanClient;

use crate::error::ScheduleUnavailable;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrayerName {
    Fajr,
    Dhuhr,
    Asr,
    Maghrib,
    Isha,
}

impl PrayerName {
    pub const ALL: [PrayerName; 5] = [
        PrayerName::Fajr,
        PrayerName::Dhuhr,
        PrayerName::Asr,
        PrayerName::Maghrib,
        PrayerName::Isha,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PrayerName::Fajr => "Fajr",
            PrayerName::Dhuhr => "Dhuhr",
            PrayerName::Asr => "Asr",
            PrayerName::Maghrib => "Maghrib",
            PrayerName::Isha => "Isha",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for PrayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One daily pause interval, anchored in host local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrayerWindow {
    pub name: PrayerName,
    pub start_time: DateTime<Local>,
    pub duration_minutes: u32,
}

impl PrayerWindow {
    pub fn end_time(&self) -> DateTime<Local> {
        self.start_time + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Half-open: the resume instant itself is outside the window.
    pub fn contains(&self, instant: DateTime<Local>) -> bool {
        self.start_time <= instant && instant < self.end_time()
    }

    /// Same wall-clock time on another day. Used when today's schedule can't be fetched.
    pub fn shifted_to(&self, date: NaiveDate) -> Option<PrayerWindow> {
        let start_time = local_instant(date, self.start_time.time())?;
        Some(PrayerWindow {
            name: self.name,
            start_time,
            duration_minutes: self.duration_minutes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingsRequest {
    pub date: NaiveDate,
    pub city: String,
    pub country: String,
    pub method: u8,
}

/// External prayer time service. Returns "HH:MM" strings keyed by prayer name.
#[async_trait]
pub trait TimingsSource: Send + Sync {
    async fn fetch_timings(
        &self,
        request: &TimingsRequest,
    ) -> Result<HashMap<String, String>, ScheduleUnavailable>;
}

pub struct PrayerCalculator<S> {
    source: S,
}

impl<S: TimingsSource> PrayerCalculator<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Five windows for `date`, ascending by start time.
    pub async fn compute_windows(
        &self,
        city: &str,
        country: &str,
        method: u8,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<PrayerWindow>, ScheduleUnavailable> {
        let request = TimingsRequest {
            date,
            city: city.to_string(),
            country: country.to_string(),
            method,
        };

        let timings = self.source.fetch_timings(&request).await?;
        let windows = build_windows(&timings, date, duration_minutes)?;

        info!("Prayer times for {} ({}, {}):", date, city, country);
        for window in &windows {
            info!("  {}: {}", window.name, window.start_time.format("%H:%M"));
        }

        Ok(windows)
    }
}

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Aladhan sometimes appends the zone, e.g. "05:12 (+03)"
    PATTERN.get_or_init(|| Regex::new(r"^\s*(\d{1,2}):(\d{2})\b").expect("static regex"))
}

pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let captures = time_pattern().captures(value)?;
    let hour: u32 = captures[1].parse().ok()?;
    let minute: u32 = captures[2].parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn local_instant(date: NaiveDate, time: NaiveTime) -> Option<DateTime<Local>> {
    // DST overlap picks the first occurrence; a DST gap has no answer
    Local.from_local_datetime(&date.and_time(time)).earliest()
}

/// Validate raw timings and turn them into ordered local windows.
pub fn build_windows(
    timings: &HashMap<String, String>,
    date: NaiveDate,
    duration_minutes: u32,
) -> Result<Vec<PrayerWindow>, ScheduleUnavailable> {
    let mut windows = Vec::with_capacity(PrayerName::ALL.len());

    for name in PrayerName::ALL {
        let raw = timings
            .get(name.as_str())
            .ok_or_else(|| ScheduleUnavailable::MissingPrayer(name.to_string()))?;

        let time = parse_hhmm(raw).ok_or_else(|| ScheduleUnavailable::BadTime {
            prayer: name.to_string(),
            value: raw.clone(),
        })?;

        let start_time =
            local_instant(date, time).ok_or_else(|| ScheduleUnavailable::NonexistentLocalTime {
                date: date.to_string(),
                time: time.to_string(),
            })?;

        windows.push(PrayerWindow {
            name,
            start_time,
            duration_minutes,
        });
    }

    windows.sort_by_key(|w| w.start_time);
    Ok(windows)
}
