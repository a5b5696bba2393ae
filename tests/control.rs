mod common;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use common::{Harness, OTHER_PLAYLIST};
use prayerpause::control::{ControlClient, ControlRequest, ControlResponse, ControlServer};
use prayerpause::coordinator::CoordinatorState;
use prayerpause::error::ControlError;
use prayerpause::prayer::PrayerName;

async fn serve(h: &Harness) -> ControlClient {
    let path = h.dir.path().join("ctl.sock");
    let server = ControlServer::bind(&path).unwrap();
    tokio::spawn(server.serve(h.handle.clone()));
    ControlClient::new(path)
}

#[tokio::test]
async fn test_trigger_round_trip() {
    let h = Harness::new(3).await;
    let client = serve(&h).await;

    let status = client.send(&ControlRequest::Start).await.unwrap();
    assert_eq!(status.state, CoordinatorState::Playing);

    let status = client
        .send(&ControlRequest::Pause { prayer: Some(PrayerName::Fajr) })
        .await
        .unwrap();
    assert!(status.paused);
    assert!(h.transition_lines()[0].ends_with(" pause_start prayer:Fajr"));

    let status = client.send(&ControlRequest::Resume { scheduled: true }).await.unwrap();
    assert!(status.playing);

    let status = client.send(&ControlRequest::Status).await.unwrap();
    assert_eq!(status.current_track.unwrap().id, "t1");
}

#[tokio::test]
async fn test_change_playlist_over_socket() {
    let h = Harness::new(3).await;
    let client = serve(&h).await;

    let status = client
        .send(&ControlRequest::ChangePlaylist { url: OTHER_PLAYLIST.to_string() })
        .await
        .unwrap();
    assert_eq!(status.playlist_url, OTHER_PLAYLIST);
}

#[tokio::test]
async fn test_failed_transition_is_reported() {
    let h = Harness::new(3).await;
    h.fail_track("t1");
    h.fail_track("t2");
    let client = serve(&h).await;

    let err = client.send(&ControlRequest::Start).await.unwrap_err();
    assert!(matches!(err, ControlError::Rejected(msg) if msg.contains("unavailable")));
}

#[tokio::test]
async fn test_garbage_line_gets_an_error_and_connection_survives() {
    let h = Harness::new(3).await;
    let path = h.dir.path().join("ctl.sock");
    let server = ControlServer::bind(&path).unwrap();
    tokio::spawn(server.serve(h.handle.clone()));

    let stream = UnixStream::connect(&path).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    write.write_all(b"not json\n{\"op\":\"status\"}\n").await.unwrap();

    let first: ControlResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert!(!first.ok);
    assert!(first.error.unwrap().starts_with("bad request"));

    let second: ControlResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert!(second.ok);
    assert_eq!(second.status.unwrap().state, CoordinatorState::Idle);
}

#[tokio::test]
async fn test_missing_daemon_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let client = ControlClient::new(dir.path().join("nobody.sock"));

    assert!(matches!(client.send(&ControlRequest::Status).await, Err(ControlError::Io(_))));
}

#[tokio::test]
async fn test_second_daemon_cannot_take_over_a_live_socket() {
    let h = Harness::new(3).await;
    let client = serve(&h).await;
    let path = h.dir.path().join("ctl.sock");

    let err = ControlServer::bind(&path).err().unwrap();
    assert!(matches!(err, ControlError::AlreadyRunning(p) if p == path));

    // the first daemon still owns the socket and still answers
    assert!(path.exists());
    let status = client.send(&ControlRequest::Status).await.unwrap();
    assert_eq!(status.state, CoordinatorState::Idle);
}

#[tokio::test]
async fn test_stale_socket_from_a_dead_daemon_is_reclaimed() {
    let h = Harness::new(3).await;
    let path = h.dir.path().join("ctl.sock");

    // a crashed daemon leaves its socket file behind with nobody listening
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
    assert!(path.exists());

    let client = serve(&h).await;
    let status = client.send(&ControlRequest::Status).await.unwrap();
    assert_eq!(status.state, CoordinatorState::Idle);
}
