use crate::config::write_atomic;
use crate::error::ResolutionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use xxhash_rust::xxh64::xxh64;

use super::TrackRef;

/// On-disk form of a playlist listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPlaylist {
    pub playlist_url: String,
    pub fetched_at: DateTime<Utc>,
    pub tracks: Vec<TrackRef>,
}

/// One JSON file per playlist url, rewritten wholesale on refresh.
#[derive(Debug, Clone)]
pub struct PlaylistCache {
    dir: PathBuf,
}

impl PlaylistCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, playlist_url: &str) -> PathBuf {
        self.dir
            .join(format!("{:016x}.json", xxh64(playlist_url.as_bytes(), 0)))
    }

    /// `None` when nothing is cached for this url.
    pub fn load(&self, playlist_url: &str) -> Result<Option<CachedPlaylist>, ResolutionError> {
        let path = self.path_for(playlist_url);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let cached: CachedPlaylist = serde_json::from_str(&content)
            .map_err(|e| ResolutionError::Cache(format!("{}: {}", path.display(), e)))?;

        // hash collision or hand-edited file
        if cached.playlist_url != playlist_url {
            return Ok(None);
        }

        Ok(Some(cached))
    }

    pub fn store(&self, playlist_url: &str, tracks: &[TrackRef]) -> Result<(), ResolutionError> {
        let cached = CachedPlaylist {
            playlist_url: playlist_url.to_string(),
            fetched_at: Utc::now(),
            tracks: tracks.to_vec(),
        };
        let json = serde_json::to_string_pretty(&cached)
            .map_err(|e| ResolutionError::Cache(e.to_string()))?;

        let path = self.path_for(playlist_url);
        write_atomic(&path, json.as_bytes())?;
        info!("Cached {} tracks to {}", tracks.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_is_keyed_by_url() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PlaylistCache::new(dir.path().join("playlists"));
        let tracks = vec![TrackRef { id: "v1".to_string(), position: 0 }];

        cache.store("https://example.com/a", &tracks).unwrap();

        let hit = cache.load("https://example.com/a").unwrap().unwrap();
        assert_eq!(hit.tracks, tracks);
        assert!(cache.load("https://example.com/b").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_cache_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PlaylistCache::new(dir.path().to_path_buf());
        fs::write(cache.path_for("u"), "{not json").unwrap();

        assert!(matches!(cache.load("u"), Err(ResolutionError::Cache(_))));
    }
}
