// Error taxonomy for the playback core
// Transient failures get absorbed by the coordinator's advance policy, the rest surface in status

use std::time::Duration;
use thiserror::Error;

/// Playlist listing or stream lookup failed.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("playlist '{0}' has no playable entries")]
    EmptyPlaylist(String),

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} did not answer within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("no stream url returned for track '{0}'")]
    NoStreamUrl(String),

    #[error("playlist cache error: {0}")]
    Cache(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised by the playback driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The player died inside the grace period - almost always an expired url.
    #[error("player exited {elapsed:?} after launch for track '{track_id}' ({status})")]
    EarlyExit {
        track_id: String,
        status: String,
        elapsed: Duration,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while supervising player: {0}")]
    Io(#[from] std::io::Error),
}

/// The prayer time service could not give us a usable schedule.
#[derive(Debug, Error)]
pub enum ScheduleUnavailable {
    #[error("prayer service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("prayer service answered with code {code}: {message}")]
    Api { code: i64, message: String },

    #[error("prayer service response is missing {0}")]
    MissingPrayer(String),

    #[error("unparseable time '{value}' for {prayer}")]
    BadTime { prayer: String, value: String },

    #[error("{time} does not exist in local time on {date}")]
    NonexistentLocalTime { date: String, time: String },

    #[error("no previous schedule to fall back on")]
    NoFallback,
}

/// Errors surfaced by coordinator transitions.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Retries are exhausted; the dashboard shows this instead of "paused".
    #[error("playback unavailable after {attempts} attempt(s): {last}")]
    PlaybackUnavailable { attempts: usize, last: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("config update failed: {0}")]
    Config(String),

    #[error("player control failed: {0}")]
    Player(#[from] DriverError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("coordinator is not running")]
    Closed,
}

/// Errors on the unix socket control channel.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed control message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("daemon closed the connection without answering")]
    NoResponse,

    #[error("daemon rejected the request: {0}")]
    Rejected(String),

    #[error("another daemon is already running on {}", .0.display())]
    AlreadyRunning(std::path::PathBuf),
}

impl DriverError {
    /// Early exits are worth one immediate retry with a fresh url.
    pub fn is_early_exit(&self) -> bool {
        matches!(self, Self::EarlyExit { .. })
    }
}
