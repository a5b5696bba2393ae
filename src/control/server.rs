use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use super::{dispatch, ControlRequest, ControlResponse};
use crate::coordinator::CoordinatorHandle;
use crate::error::ControlError;

/// Unix socket listener; removes its socket file when dropped.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlServer {
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, ControlError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // only a socket nobody answers on is ours to reclaim
        match std::os::unix::net::UnixStream::connect(&path) {
            Ok(_) => return Err(ControlError::AlreadyRunning(path)),
            Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound) => {
                if fs::remove_file(&path).is_ok() {
                    debug!("Removed stale control socket {}", path.display());
                }
            }
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(&path)?;
        info!("Control socket listening on {}", path.display());

        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the task is dropped.
    pub async fn serve(self, handle: CoordinatorHandle) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handle).await {
                            warn!("Control client error: {}", e);
                        }
                    });
                }
                Err(e) => warn!("Control socket accept error: {}", e),
            }
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

async fn handle_client(stream: UnixStream, handle: CoordinatorHandle) -> Result<(), ControlError> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        debug!("control request: {}", line);

        let response = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => dispatch(&handle, request).await,
            Err(e) => ControlResponse::failure(format!("bad request: {}", e), None),
        };

        let mut reply = serde_json::to_string(&response)?;
        reply.push('\n');
        write.write_all(reply.as_bytes()).await?;
    }
    Ok(())
}
