// yt-dlp backed resolution
// Listing uses --flat-playlist so it never touches the (expiring) media urls

use crate::config::settings::ResolverSettings;
use crate::error::ResolutionError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::ResolveBackend;

#[derive(Debug, Clone)]
pub struct YtDlpBackend {
    program: String,
    format: String,
    playlist_timeout: Duration,
    stream_timeout: Duration,
}

impl YtDlpBackend {
    pub fn new(settings: &ResolverSettings) -> Self {
        Self {
            program: settings.program.clone(),
            format: settings.format.clone(),
            playlist_timeout: Duration::from_secs(settings.playlist_timeout_secs),
            stream_timeout: Duration::from_secs(settings.stream_timeout_secs),
        }
    }

    async fn run(&self, args: &[&str], limit: Duration) -> Result<String, ResolutionError> {
        debug!("Running {} {}", self.program, args.join(" "));

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match timeout(limit, command.output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ResolutionError::Timeout {
                    program: self.program.clone(),
                    timeout: limit,
                })
            }
        };

        if !output.status.success() {
            return Err(ResolutionError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Non-empty trimmed lines, in order.
pub fn parse_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ResolveBackend for YtDlpBackend {
    async fn fetch_playlist(&self, playlist_url: &str) -> Result<Vec<String>, ResolutionError> {
        let stdout = self
            .run(
                &["--flat-playlist", "--get-url", "--no-warnings", playlist_url],
                self.playlist_timeout,
            )
            .await?;
        Ok(parse_lines(&stdout))
    }

    async fn fetch_stream_url(&self, track_id: &str) -> Result<String, ResolutionError> {
        let stdout = self
            .run(
                &["--get-url", "--no-warnings", "--format", &self.format, track_id],
                self.stream_timeout,
            )
            .await?;

        // a format with separate audio/video yields two lines; the first is what we asked for
        parse_lines(&stdout)
            .into_iter()
            .next()
            .ok_or_else(|| ResolutionError::NoStreamUrl(track_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lines_skips_blanks() {
        let out = "https://youtube.com/watch?v=a\n\n  https://youtube.com/watch?v=b  \n";
        assert_eq!(
            parse_lines(out),
            vec!["https://youtube.com/watch?v=a", "https://youtube.com/watch?v=b"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_reports_stderr() {
        let backend = YtDlpBackend {
            program: "sh".to_string(),
            format: "bestaudio".to_string(),
            playlist_timeout: Duration::from_secs(5),
            stream_timeout: Duration::from_secs(5),
        };

        let err = backend
            .run(&["-c", "echo 'Video unavailable' >&2; exit 1"], Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            ResolutionError::CommandFailed { stderr, .. } => assert_eq!(stderr, "Video unavailable"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_command_times_out() {
        let backend = YtDlpBackend {
            program: "sh".to_string(),
            format: "bestaudio".to_string(),
            playlist_timeout: Duration::from_millis(100),
            stream_timeout: Duration::from_millis(100),
        };

        let err = backend
            .run(&["-c", "sleep 5"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Timeout { .. }));
    }
}
