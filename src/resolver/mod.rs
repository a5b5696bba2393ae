// Track resolution - playlist listing (cheap, cached) and stream urls (expensive, single use)
// Stream urls expire within seconds so nothing here ever holds on to one

pub mod cache;
pub mod ytdlp;

pub use cache::{CachedPlaylist, PlaylistCache};
pub use ytdlp::YtDlpBackend;

use crate::error::ResolutionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One playlist entry. Stable, safe to cache forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    pub id: String,
    pub position: usize,
}

/// A direct media url, good for one launch only.
///
/// Deliberately neither `Clone` nor `Serialize`: the driver consumes it by value,
/// so the same url can never back two launches.
#[derive(Debug)]
pub struct ResolvedStream {
    pub track_id: String,
    pub direct_url: String,
    pub resolved_at: Instant,
}

impl ResolvedStream {
    pub fn new(track_id: impl Into<String>, direct_url: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            direct_url: direct_url.into(),
            resolved_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.resolved_at.elapsed()
    }
}

/// What the coordinator needs from a resolver.
#[async_trait]
pub trait TrackSource: Send + Sync {
    /// Ordered track list, served from cache while the playlist url is unchanged.
    async fn list_tracks(&self, playlist_url: &str) -> Result<Vec<TrackRef>, ResolutionError>;

    /// Force a re-fetch, falling back to the last good cache on failure.
    async fn refresh_tracks(&self, playlist_url: &str) -> Result<Vec<TrackRef>, ResolutionError>;

    /// Fresh lookup every call. Never cached.
    async fn resolve_stream(&self, track_id: &str) -> Result<ResolvedStream, ResolutionError>;
}

/// The raw network side of resolution (yt-dlp in production).
#[async_trait]
pub trait ResolveBackend: Send + Sync {
    async fn fetch_playlist(&self, playlist_url: &str) -> Result<Vec<String>, ResolutionError>;
    async fn fetch_stream_url(&self, track_id: &str) -> Result<String, ResolutionError>;
}

/// Disk-cached track listing on top of a backend.
pub struct TrackResolver<B> {
    backend: B,
    cache: PlaylistCache,
    // last listing served, keyed by playlist url
    memo: Mutex<Option<(String, Vec<TrackRef>)>>,
}

impl<B: ResolveBackend> TrackResolver<B> {
    pub fn new(backend: B, cache: PlaylistCache) -> Self {
        Self {
            backend,
            cache,
            memo: Mutex::new(None),
        }
    }

    async fn fetch_and_store(&self, playlist_url: &str) -> Result<Vec<TrackRef>, ResolutionError> {
        info!("Fetching playlist listing for {}", playlist_url);
        let ids = self.backend.fetch_playlist(playlist_url).await?;
        if ids.is_empty() {
            return Err(ResolutionError::EmptyPlaylist(playlist_url.to_string()));
        }

        let tracks: Vec<TrackRef> = ids
            .into_iter()
            .enumerate()
            .map(|(position, id)| TrackRef { id, position })
            .collect();
        info!("Found {} tracks in playlist", tracks.len());

        // A cache write failure only costs us a re-fetch after restart
        if let Err(e) = self.cache.store(playlist_url, &tracks) {
            warn!("Could not persist playlist cache: {}", e);
        }

        Ok(tracks)
    }

    async fn remember(&self, playlist_url: &str, tracks: &[TrackRef]) {
        *self.memo.lock().await = Some((playlist_url.to_string(), tracks.to_vec()));
    }
}

#[async_trait]
impl<B: ResolveBackend> TrackSource for TrackResolver<B> {
    async fn list_tracks(&self, playlist_url: &str) -> Result<Vec<TrackRef>, ResolutionError> {
        if let Some((url, tracks)) = self.memo.lock().await.as_ref() {
            if url == playlist_url {
                return Ok(tracks.clone());
            }
        }

        match self.cache.load(playlist_url) {
            Ok(Some(cached)) if !cached.tracks.is_empty() => {
                debug!(
                    "Using cached listing for {} ({} tracks, fetched {})",
                    playlist_url,
                    cached.tracks.len(),
                    cached.fetched_at
                );
                self.remember(playlist_url, &cached.tracks).await;
                return Ok(cached.tracks);
            }
            Ok(_) => {}
            Err(e) => warn!("Ignoring unreadable playlist cache: {}", e),
        }

        let tracks = self.fetch_and_store(playlist_url).await?;
        self.remember(playlist_url, &tracks).await;
        Ok(tracks)
    }

    async fn refresh_tracks(&self, playlist_url: &str) -> Result<Vec<TrackRef>, ResolutionError> {
        match self.fetch_and_store(playlist_url).await {
            Ok(tracks) => {
                self.remember(playlist_url, &tracks).await;
                Ok(tracks)
            }
            Err(e) => match self.cache.load(playlist_url) {
                Ok(Some(cached)) if !cached.tracks.is_empty() => {
                    warn!("Playlist refresh failed ({}), keeping last good listing", e);
                    self.remember(playlist_url, &cached.tracks).await;
                    Ok(cached.tracks)
                }
                _ => Err(e),
            },
        }
    }

    async fn resolve_stream(&self, track_id: &str) -> Result<ResolvedStream, ResolutionError> {
        let direct_url = self.backend.fetch_stream_url(track_id).await?;
        debug!("Resolved stream for {}", track_id);
        Ok(ResolvedStream::new(track_id, direct_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        playlist_fetches: AtomicUsize,
        stream_fetches: AtomicUsize,
        offline: AtomicBool,
    }

    struct FakeBackend {
        ids: Vec<String>,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl ResolveBackend for FakeBackend {
        async fn fetch_playlist(&self, playlist_url: &str) -> Result<Vec<String>, ResolutionError> {
            self.counters.playlist_fetches.fetch_add(1, Ordering::SeqCst);
            if self.counters.offline.load(Ordering::SeqCst) {
                return Err(ResolutionError::Timeout {
                    program: "fake".to_string(),
                    timeout: Duration::from_secs(1),
                });
            }
            Ok(self.ids.iter().map(|id| format!("{}#{}", playlist_url, id)).collect())
        }

        async fn fetch_stream_url(&self, track_id: &str) -> Result<String, ResolutionError> {
            let n = self.counters.stream_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://media.example/{}?sig={}", track_id, n))
        }
    }

    fn resolver(dir: &std::path::Path, ids: &[&str], counters: &Arc<Counters>) -> TrackResolver<FakeBackend> {
        TrackResolver::new(
            FakeBackend {
                ids: ids.iter().map(|s| s.to_string()).collect(),
                counters: Arc::clone(counters),
            },
            PlaylistCache::new(dir.to_path_buf()),
        )
    }

    #[tokio::test]
    async fn test_listing_fetched_once_and_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let counters = Arc::new(Counters::default());

        let first = resolver(dir.path(), &["a", "b", "c"], &counters);
        let tracks = first.list_tracks("list-1").await.unwrap();
        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[2], TrackRef { id: "list-1#c".to_string(), position: 2 });
        first.list_tracks("list-1").await.unwrap();
        assert_eq!(counters.playlist_fetches.load(Ordering::SeqCst), 1);

        // fresh resolver over the same cache dir simulates a process restart
        let restarted = resolver(dir.path(), &["a", "b", "c"], &counters);
        assert_eq!(restarted.list_tracks("list-1").await.unwrap(), tracks);
        assert_eq!(counters.playlist_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_playlist_url_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let counters = Arc::new(Counters::default());
        let resolver = resolver(dir.path(), &["a"], &counters);

        resolver.list_tracks("list-1").await.unwrap();
        let other = resolver.list_tracks("list-2").await.unwrap();
        assert_eq!(other[0].id, "list-2#a");
        assert_eq!(counters.playlist_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_playlist_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let counters = Arc::new(Counters::default());
        let resolver = resolver(dir.path(), &[], &counters);

        let err = resolver.list_tracks("list-1").await.unwrap_err();
        assert!(matches!(err, ResolutionError::EmptyPlaylist(_)));
    }

    #[tokio::test]
    async fn test_refresh_falls_back_to_last_good_cache() {
        let dir = tempfile::tempdir().unwrap();
        let counters = Arc::new(Counters::default());
        let resolver = resolver(dir.path(), &["a", "b"], &counters);

        let good = resolver.list_tracks("list-1").await.unwrap();
        counters.offline.store(true, Ordering::SeqCst);

        assert_eq!(resolver.refresh_tracks("list-1").await.unwrap(), good);
        assert!(resolver.refresh_tracks("never-seen").await.is_err());
    }

    #[tokio::test]
    async fn test_stream_urls_are_never_cached() {
        let dir = tempfile::tempdir().unwrap();
        let counters = Arc::new(Counters::default());
        let resolver = resolver(dir.path(), &["a"], &counters);

        let first = resolver.resolve_stream("a").await.unwrap();
        let second = resolver.resolve_stream("a").await.unwrap();
        assert_ne!(first.direct_url, second.direct_url);
        assert_eq!(counters.stream_fetches.load(Ordering::SeqCst), 2);
    }
}
