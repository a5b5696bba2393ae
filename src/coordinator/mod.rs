// Playback coordinator - the one place that decides what the player does
// Every caller (monitor, cron triggers, dashboard) goes through the same FIFO queue

mod machine;
pub mod monitor;
pub mod order;

pub use machine::{Coordinator, CoordinatorOptions};
pub use monitor::spawn_liveness_monitor;
pub use order::PlayOrder;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::CoordinatorError;
use crate::resolver::TrackRef;
use crate::translog::TransitionReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    Playing,
    Paused,
    Transitioning,
}

/// Snapshot published after every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub state: CoordinatorState,
    pub playing: bool,
    pub paused: bool,
    /// Retries ran out. Distinct from `paused` so nobody mistakes broken for praying.
    pub unavailable: bool,
    pub current_track: Option<TrackRef>,
    pub playlist_url: String,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Local>,
}

impl PlayerStatus {
    pub fn initial(playlist_url: impl Into<String>) -> Self {
        Self {
            state: CoordinatorState::Idle,
            playing: false,
            paused: false,
            unavailable: false,
            current_track: None,
            playlist_url: playlist_url.into(),
            last_error: None,
            updated_at: Local::now(),
        }
    }
}

/// Who is asking for a resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeOrigin {
    /// Dashboard or CLI. From idle this starts playback.
    Manual,
    /// A cron trigger. Yields to any active prayer window and never starts from idle.
    Scheduled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Start,
    Pause { reason: TransitionReason },
    Resume { origin: ResumeOrigin },
    Stop,
    ChangePlaylist { url: String },
    RefreshPlaylist,
    ReloadConfig,
    CheckLiveness,
    Shutdown,
}

pub(crate) struct Envelope {
    request: Request,
    reply: oneshot::Sender<Result<PlayerStatus, CoordinatorError>>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope").field("request", &self.request).finish()
    }
}

/// Cheap, cloneable front door to the coordinator task.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Envelope>,
    status: watch::Receiver<PlayerStatus>,
}

impl CoordinatorHandle {
    /// Queue `request` and wait for its transition to finish.
    pub async fn request(&self, request: Request) -> Result<PlayerStatus, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| CoordinatorError::Closed)?;
        rx.await.map_err(|_| CoordinatorError::Closed)?
    }

    pub async fn start(&self) -> Result<PlayerStatus, CoordinatorError> {
        self.request(Request::Start).await
    }

    pub async fn pause(&self, reason: TransitionReason) -> Result<PlayerStatus, CoordinatorError> {
        self.request(Request::Pause { reason }).await
    }

    pub async fn resume(&self, origin: ResumeOrigin) -> Result<PlayerStatus, CoordinatorError> {
        self.request(Request::Resume { origin }).await
    }

    pub async fn stop(&self) -> Result<PlayerStatus, CoordinatorError> {
        self.request(Request::Stop).await
    }

    pub async fn change_playlist(&self, url: impl Into<String>) -> Result<PlayerStatus, CoordinatorError> {
        self.request(Request::ChangePlaylist { url: url.into() }).await
    }

    pub async fn refresh_playlist(&self) -> Result<PlayerStatus, CoordinatorError> {
        self.request(Request::RefreshPlaylist).await
    }

    pub async fn reload_config(&self) -> Result<PlayerStatus, CoordinatorError> {
        self.request(Request::ReloadConfig).await
    }

    pub async fn check_liveness(&self) -> Result<PlayerStatus, CoordinatorError> {
        self.request(Request::CheckLiveness).await
    }

    pub async fn shutdown(&self) -> Result<PlayerStatus, CoordinatorError> {
        self.request(Request::Shutdown).await
    }

    /// Latest published status. Doesn't queue, so it can report `Transitioning`.
    pub fn status(&self) -> PlayerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerStatus> {
        self.status.clone()
    }
}
