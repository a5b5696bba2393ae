use crate::config::settings::PlayerSettings;
use crate::error::DriverError;
use crate::resolver::ResolvedStream;
use async_trait::async_trait;
use chrono::Utc;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{PlaybackSession, SessionState, StreamPlayer};

const VOLUME_PLACEHOLDER: &str = "{volume}";
const URL_PLACEHOLDER: &str = "{url}";

/// Runs the external player (ffplay by default) as a child process.
pub struct ProcessDriver {
    program: String,
    args: Vec<String>,
    grace: Duration,
    stop_timeout: Duration,
    volume: u8,
    child: Option<Child>,
    session: Option<PlaybackSession>,
}

impl ProcessDriver {
    pub fn new(settings: &PlayerSettings, grace: Duration, stop_timeout: Duration) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            grace,
            stop_timeout,
            volume: 100,
            child: None,
            session: None,
        }
    }

    fn build_args(&self, url: &str) -> Vec<String> {
        build_args(&self.args, url, self.volume)
    }

    fn send_terminate(child: &mut Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet
                let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                if rc == 0 {
                    return;
                }
                warn!("SIGTERM to player {} failed, falling back to kill", pid);
            }
        }
        let _ = child.start_kill();
    }
}

/// Substitute `{volume}` and `{url}`; the url goes last when there is no placeholder.
pub fn build_args(template: &[String], url: &str, volume: u8) -> Vec<String> {
    let mut has_url = false;
    let mut args: Vec<String> = template
        .iter()
        .map(|arg| {
            if arg.contains(URL_PLACEHOLDER) {
                has_url = true;
            }
            arg.replace(VOLUME_PLACEHOLDER, &volume.to_string())
                .replace(URL_PLACEHOLDER, url)
        })
        .collect();

    if !has_url {
        args.push(url.to_string());
    }
    args
}

#[async_trait]
impl StreamPlayer for ProcessDriver {
    fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
    }

    async fn start(&mut self, stream: ResolvedStream) -> Result<PlaybackSession, DriverError> {
        if self.child.is_some() || self.session.as_ref().is_some_and(|s| s.state != SessionState::Stopped) {
            let current = self
                .session
                .as_ref()
                .map(|s| format!("{} ({:?})", s.track_id, s.state))
                .unwrap_or_else(|| "unknown".to_string());
            return Err(DriverError::InvariantViolation(format!(
                "start requested for '{}' while '{}' is still live",
                stream.track_id, current
            )));
        }

        debug!("Launching player {}s after resolution", stream.age().as_secs_f32());

        let mut command = Command::new(&self.program);
        command
            .args(self.build_args(&stream.direct_url))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true);

        let launched_at = Instant::now();
        let mut child = command.spawn().map_err(|source| DriverError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let mut session = PlaybackSession {
            pid: child.id(),
            track_id: stream.track_id,
            started_at: Utc::now(),
            state: SessionState::Starting,
        };
        self.session = Some(session.clone());

        // An expired url makes the player bail out almost immediately
        match timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => {
                self.session = None;
                Err(DriverError::EarlyExit {
                    track_id: session.track_id,
                    status: status.to_string(),
                    elapsed: launched_at.elapsed(),
                })
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                self.session = None;
                Err(DriverError::Io(e))
            }
            Err(_) => {
                session.state = SessionState::Playing;
                info!("▶ Playing {} (pid {:?})", session.track_id, session.pid);
                self.child = Some(child);
                self.session = Some(session.clone());
                Ok(session)
            }
        }
    }

    async fn stop(&mut self) -> Result<(), DriverError> {
        let Some(mut child) = self.child.take() else {
            self.session = None;
            return Ok(());
        };

        if let Some(session) = self.session.as_mut() {
            session.state = SessionState::Stopping;
        }

        let mut killed = Ok(());
        if let Ok(None) = child.try_wait() {
            Self::send_terminate(&mut child);

            match timeout(self.stop_timeout, child.wait()).await {
                Ok(Ok(status)) => debug!("Player exited with {}", status),
                Ok(Err(e)) => warn!("Waiting for player failed: {}", e),
                Err(_) => {
                    warn!(
                        "Player ignored SIGTERM for {:?}, killing it",
                        self.stop_timeout
                    );
                    killed = child.kill().await;
                }
            }
        }

        // the handle is gone either way, so the session must not outlive it
        if let Some(session) = self.session.take() {
            info!("■ Stopped {}", session.track_id);
        }
        Ok(killed?)
    }

    fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh_driver(script: &str, grace_ms: u64, stop_ms: u64) -> ProcessDriver {
        let settings = PlayerSettings {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "player".to_string()],
            early_exit_grace_ms: grace_ms,
            stop_timeout_secs: 1,
        };
        ProcessDriver::new(
            &settings,
            Duration::from_millis(grace_ms),
            Duration::from_millis(stop_ms),
        )
    }

    #[test]
    fn test_build_args_placeholders() {
        let template: Vec<String> = ["-nodisp", "-volume", "{volume}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            build_args(&template, "https://x", 40),
            vec!["-nodisp", "-volume", "40", "https://x"]
        );

        let template = vec!["--input={url}".to_string()];
        assert_eq!(build_args(&template, "https://x", 40), vec!["--input=https://x"]);
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let mut driver = sh_driver("sleep 30", 200, 2000);

        let session = driver.start(ResolvedStream::new("t1", "https://x")).await.unwrap();
        assert_eq!(session.state, SessionState::Playing);
        assert!(session.is_live());
        assert!(driver.is_alive());

        driver.stop().await.unwrap();
        assert!(!driver.is_alive());
        assert!(driver.session().is_none());

        // second stop is a no-op
        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_early_exit_is_reported() {
        let mut driver = sh_driver("exit 1", 500, 2000);

        let err = driver.start(ResolvedStream::new("t1", "https://x")).await.unwrap_err();
        assert!(err.is_early_exit());
        assert!(driver.session().is_none());
        assert!(!driver.is_alive());
    }

    #[tokio::test]
    async fn test_second_start_is_an_invariant_violation() {
        let mut driver = sh_driver("sleep 30", 100, 2000);
        driver.start(ResolvedStream::new("t1", "https://x")).await.unwrap();

        let err = driver.start(ResolvedStream::new("t2", "https://y")).await.unwrap_err();
        assert!(matches!(err, DriverError::InvariantViolation(_)));
        assert!(driver.is_alive());
        assert_eq!(driver.session().unwrap().track_id, "t1");

        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let mut driver = sh_driver("trap '' TERM; exec sleep 30", 100, 200);
        driver.start(ResolvedStream::new("t1", "https://x")).await.unwrap();

        let began = Instant::now();
        driver.stop().await.unwrap();
        assert!(began.elapsed() < Duration::from_secs(5));
        assert!(!driver.is_alive());
        assert!(driver.session().is_none());
    }

    #[tokio::test]
    async fn test_start_after_forced_stop_is_clean() {
        let mut driver = sh_driver("trap '' TERM; exec sleep 30", 100, 200);
        driver.start(ResolvedStream::new("t1", "https://x")).await.unwrap();
        driver.stop().await.unwrap();

        let session = driver.start(ResolvedStream::new("t2", "https://y")).await.unwrap();
        assert_eq!(session.track_id, "t2");
        assert_eq!(driver.session().unwrap().state, SessionState::Playing);

        driver.stop().await.unwrap();
        assert!(driver.session().is_none());
    }
}
