// Local control channel - one JSON request line in, one JSON response line out
// Cron triggers, the CLI and the dashboard all come through here

pub mod server;

pub use server::ControlServer;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::coordinator::{CoordinatorHandle, PlayerStatus, ResumeOrigin};
use crate::error::ControlError;
use crate::prayer::PrayerName;
use crate::translog::TransitionReason;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    Start,
    Pause {
        /// Set by prayer triggers; absent means a manual pause.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prayer: Option<PrayerName>,
    },
    Resume {
        #[serde(default)]
        scheduled: bool,
    },
    Stop,
    ChangePlaylist {
        url: String,
    },
    RefreshPlaylist,
    ReloadConfig,
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PlayerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn success(status: PlayerStatus) -> Self {
        Self {
            ok: true,
            status: Some(status),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>, status: Option<PlayerStatus>) -> Self {
        Self {
            ok: false,
            status,
            error: Some(error.into()),
        }
    }
}

/// Run one request against the coordinator. Replies after the transition settles.
pub async fn dispatch(handle: &CoordinatorHandle, request: ControlRequest) -> ControlResponse {
    let result = match request {
        ControlRequest::Status => return ControlResponse::success(handle.status()),
        ControlRequest::Start => handle.start().await,
        ControlRequest::Pause { prayer } => {
            let reason = prayer.map_or(TransitionReason::Manual, TransitionReason::Prayer);
            handle.pause(reason).await
        }
        ControlRequest::Resume { scheduled } => {
            let origin = if scheduled {
                ResumeOrigin::Scheduled
            } else {
                ResumeOrigin::Manual
            };
            handle.resume(origin).await
        }
        ControlRequest::Stop => handle.stop().await,
        ControlRequest::ChangePlaylist { url } => handle.change_playlist(url).await,
        ControlRequest::RefreshPlaylist => handle.refresh_playlist().await,
        ControlRequest::ReloadConfig => handle.reload_config().await,
    };

    match result {
        Ok(status) => ControlResponse::success(status),
        Err(e) => ControlResponse::failure(e.to_string(), Some(handle.status())),
    }
}

/// Talks to a running daemon.
#[derive(Debug, Clone)]
pub struct ControlClient {
    path: PathBuf,
}

impl ControlClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn send(&self, request: &ControlRequest) -> Result<PlayerStatus, ControlError> {
        let stream = UnixStream::connect(&self.path).await?;
        let (read, mut write) = stream.into_split();

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        write.write_all(line.as_bytes()).await?;

        let mut lines = BufReader::new(read).lines();
        let reply = lines.next_line().await?.ok_or(ControlError::NoResponse)?;
        let response: ControlResponse = serde_json::from_str(&reply)?;

        match response {
            ControlResponse { ok: true, status: Some(status), .. } => Ok(status),
            ControlResponse { ok: true, status: None, .. } => Err(ControlError::NoResponse),
            ControlResponse { error, .. } => Err(ControlError::Rejected(
                error.unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }
}
