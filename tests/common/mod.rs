// Shared fakes for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use prayerpause::config::{Config, ConfigStore};
use prayerpause::coordinator::{Coordinator, CoordinatorHandle, CoordinatorOptions};
use prayerpause::error::{DriverError, ResolutionError};
use prayerpause::playback::{PlaybackSession, SessionState, StreamPlayer};
use prayerpause::resolver::{ResolvedStream, TrackRef, TrackSource};
use prayerpause::schedule::{shared_schedule, SharedSchedule};
use prayerpause::translog::TransitionLog;

#[derive(Default)]
pub struct SourceState {
    pub listing_calls: AtomicUsize,
    pub resolve_calls: AtomicUsize,
    pub failing: Mutex<HashSet<String>>,
}

/// Playlist listings keyed by url. Track ids are plain "t1", "t2", ...
#[derive(Clone)]
pub struct FakeSource {
    pub playlists: HashMap<String, Vec<TrackRef>>,
    pub state: Arc<SourceState>,
}

pub fn tracks(n: usize) -> Vec<TrackRef> {
    (0..n)
        .map(|position| TrackRef {
            id: format!("t{}", position + 1),
            position,
        })
        .collect()
}

#[async_trait]
impl TrackSource for FakeSource {
    async fn list_tracks(&self, playlist_url: &str) -> Result<Vec<TrackRef>, ResolutionError> {
        self.state.listing_calls.fetch_add(1, Ordering::SeqCst);
        match self.playlists.get(playlist_url) {
            Some(tracks) if !tracks.is_empty() => Ok(tracks.clone()),
            _ => Err(ResolutionError::EmptyPlaylist(playlist_url.to_string())),
        }
    }

    async fn refresh_tracks(&self, playlist_url: &str) -> Result<Vec<TrackRef>, ResolutionError> {
        self.list_tracks(playlist_url).await
    }

    async fn resolve_stream(&self, track_id: &str) -> Result<ResolvedStream, ResolutionError> {
        let n = self.state.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.failing.lock().unwrap().contains(track_id) {
            return Err(ResolutionError::NoStreamUrl(track_id.to_string()));
        }
        Ok(ResolvedStream::new(
            track_id,
            format!("https://media.example/{}?sig={}", track_id, n),
        ))
    }
}

#[derive(Default)]
pub struct PlayerLog {
    /// (track id, url) for every launch attempt, early exits included.
    pub launched: Vec<(String, String)>,
    pub live: usize,
    pub max_live: usize,
    pub stops: usize,
    pub volume: u8,
    /// Remaining early exits per track id.
    pub early_exits: HashMap<String, usize>,
    pub crashed: bool,
    pub violate_next: bool,
    pub start_delay: Duration,
}

pub struct FakePlayer {
    pub log: Arc<Mutex<PlayerLog>>,
    session: Option<PlaybackSession>,
}

impl FakePlayer {
    pub fn new(log: Arc<Mutex<PlayerLog>>) -> Self {
        Self { log, session: None }
    }
}

#[async_trait]
impl StreamPlayer for FakePlayer {
    fn set_volume(&mut self, volume: u8) {
        self.log.lock().unwrap().volume = volume;
    }

    async fn start(&mut self, stream: ResolvedStream) -> Result<PlaybackSession, DriverError> {
        let delay = self.log.lock().unwrap().start_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut log = self.log.lock().unwrap();
        if self.session.is_some() {
            return Err(DriverError::InvariantViolation("fake player already live".to_string()));
        }
        if log.violate_next {
            log.violate_next = false;
            return Err(DriverError::InvariantViolation("injected".to_string()));
        }

        log.launched.push((stream.track_id.clone(), stream.direct_url.clone()));
        if let Some(left) = log.early_exits.get_mut(&stream.track_id) {
            if *left > 0 {
                *left -= 1;
                return Err(DriverError::EarlyExit {
                    track_id: stream.track_id,
                    status: "exit status: 1".to_string(),
                    elapsed: Duration::from_millis(200),
                });
            }
        }

        log.live += 1;
        log.max_live = log.max_live.max(log.live);
        log.crashed = false;

        let session = PlaybackSession {
            pid: Some(4242),
            track_id: stream.track_id,
            started_at: Utc::now(),
            state: SessionState::Playing,
        };
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn stop(&mut self) -> Result<(), DriverError> {
        let mut log = self.log.lock().unwrap();
        if self.session.take().is_some() {
            log.live -= 1;
            log.stops += 1;
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.session.is_some() && !self.log.lock().unwrap().crashed
    }

    fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }
}

pub const PLAYLIST: &str = "https://example.com/playlist?list=main";
pub const OTHER_PLAYLIST: &str = "https://example.com/playlist?list=other";

pub struct Harness {
    pub handle: CoordinatorHandle,
    pub source: Arc<SourceState>,
    pub player: Arc<Mutex<PlayerLog>>,
    pub config: ConfigStore,
    pub schedule: SharedSchedule,
    pub transitions: PathBuf,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new(track_count: usize) -> Self {
        Self::with_options(
            track_count,
            CoordinatorOptions {
                shuffle: false,
                max_track_advances: 1,
            },
        )
        .await
    }

    pub async fn with_options(track_count: usize, options: CoordinatorOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::with_config(
            dir.path().join("config.json"),
            Config {
                playlist_url: PLAYLIST.to_string(),
                check_interval_seconds: 1,
                ..Config::default()
            },
        );

        let source_state = Arc::new(SourceState::default());
        let source = FakeSource {
            playlists: HashMap::from([
                (PLAYLIST.to_string(), tracks(track_count)),
                (OTHER_PLAYLIST.to_string(), tracks(2)),
            ]),
            state: Arc::clone(&source_state),
        };

        let player_log = Arc::new(Mutex::new(PlayerLog::default()));
        let transitions = dir.path().join("transitions.log");
        let schedule = shared_schedule();

        let coordinator = Coordinator::new(
            source,
            FakePlayer::new(Arc::clone(&player_log)),
            config.clone(),
            TransitionLog::new(&transitions),
            schedule.clone(),
            options,
        )
        .await;
        let (handle, _task) = coordinator.spawn();

        Self {
            handle,
            source: source_state,
            player: player_log,
            config,
            schedule,
            transitions,
            dir,
        }
    }

    pub fn fail_track(&self, id: &str) {
        self.source.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn crash_player(&self) {
        self.player.lock().unwrap().crashed = true;
    }

    pub fn launched(&self) -> Vec<(String, String)> {
        self.player.lock().unwrap().launched.clone()
    }

    pub fn transition_lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.transitions)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn current_id(&self) -> Option<String> {
        self.handle.status().current_track.map(|t| t.id)
    }
}
