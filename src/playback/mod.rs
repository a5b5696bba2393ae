// Playback driver - exactly one streaming subprocess at a time
// The coordinator is the only caller; nobody else ever sees the child handle

pub mod driver;

pub use driver::ProcessDriver;

use crate::error::DriverError;
use crate::resolver::ResolvedStream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Stopped,
    Starting,
    Playing,
    Stopping,
}

/// The live subprocess as seen from outside the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSession {
    pub pid: Option<u32>,
    pub track_id: String,
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
}

impl PlaybackSession {
    pub fn is_live(&self) -> bool {
        matches!(self.state, SessionState::Starting | SessionState::Playing)
    }
}

#[async_trait]
pub trait StreamPlayer: Send {
    /// Volume (0-100) for the next launch.
    fn set_volume(&mut self, volume: u8);

    /// Launch a player bound to `stream`. Consumes the stream so its url is used once.
    async fn start(&mut self, stream: ResolvedStream) -> Result<PlaybackSession, DriverError>;

    /// Terminate the current player, if any. Always returns within the stop timeout.
    async fn stop(&mut self) -> Result<(), DriverError>;

    /// Non-blocking liveness probe.
    fn is_alive(&mut self) -> bool;

    fn session(&self) -> Option<&PlaybackSession>;
}
