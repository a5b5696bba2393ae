// Smoke test for the resolver: list a playlist, resolve one stream url
// Usage: cargo run --bin test_resolver [playlist_url] [track_number]

use prayerpause::config::{ConfigStore, Settings};
use prayerpause::resolver::{PlaylistCache, TrackResolver, TrackSource, YtDlpBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("🔍 Resolver Test Utility");
    println!("========================");

    let (settings, _) = Settings::load(None)?;
    let playlist_url = match std::env::args().nth(1) {
        Some(url) => url,
        None => ConfigStore::load(&settings.config_path)?.snapshot().await.playlist_url,
    };
    let track_number: usize = std::env::args()
        .nth(2)
        .and_then(|n| n.parse().ok())
        .unwrap_or(1)
        .max(1);

    println!("📃 Playlist: {}", playlist_url);
    println!("🗂  Cache:    {}", settings.playlist_cache_dir().display());

    let resolver = TrackResolver::new(
        YtDlpBackend::new(&settings.resolver),
        PlaylistCache::new(settings.playlist_cache_dir()),
    );

    let started = std::time::Instant::now();
    let tracks = match resolver.list_tracks(&playlist_url).await {
        Ok(tracks) => tracks,
        Err(e) => {
            println!("❌ Listing failed: {}", e);
            return Ok(());
        }
    };
    println!("🎵 {} tracks in {:.1}s", tracks.len(), started.elapsed().as_secs_f32());
    for track in tracks.iter().take(5) {
        println!("  #{:<3} {}", track.position + 1, track.id);
    }
    if tracks.len() > 5 {
        println!("  ... and {} more", tracks.len() - 5);
    }

    let Some(track) = tracks.get(track_number - 1) else {
        println!("❌ No track #{}", track_number);
        return Ok(());
    };

    println!();
    println!("🔗 Resolving #{} ({})", track_number, track.id);
    let started = std::time::Instant::now();
    match resolver.resolve_stream(&track.id).await {
        Ok(stream) => {
            let preview: String = stream.direct_url.chars().take(96).collect();
            println!("  ✅ {:.1}s: {}...", started.elapsed().as_secs_f32(), preview);
        }
        Err(e) => println!("  ❌ {}", e),
    }

    Ok(())
}
