// The coordinator task itself - sole owner of the player and the play order
// Requests are handled strictly one at a time in arrival order

use chrono::Local;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{CoordinatorHandle, CoordinatorState, Envelope, PlayOrder, PlayerStatus, Request, ResumeOrigin};
use crate::config::settings::PlaybackSettings;
use crate::config::ConfigStore;
use crate::error::{CoordinatorError, DriverError, ResolutionError};
use crate::playback::StreamPlayer;
use crate::resolver::{TrackRef, TrackSource};
use crate::schedule::{pause_in_effect, SharedSchedule};
use crate::translog::{TransitionEvent, TransitionLog, TransitionReason};

const QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    pub shuffle: bool,
    /// How many further tracks to try after the first one fails.
    pub max_track_advances: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            shuffle: true,
            max_track_advances: 1,
        }
    }
}

impl From<&PlaybackSettings> for CoordinatorOptions {
    fn from(settings: &PlaybackSettings) -> Self {
        Self {
            shuffle: settings.shuffle,
            max_track_advances: settings.max_track_advances,
        }
    }
}

/// One failed attempt at getting a track on air.
#[derive(Debug, Error)]
enum LaunchError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

pub struct Coordinator<S, P> {
    source: S,
    player: P,
    config: ConfigStore,
    log: TransitionLog,
    schedule: SharedSchedule,
    options: CoordinatorOptions,

    state: CoordinatorState,
    playlist_url: String,
    tracks: Vec<TrackRef>,
    order: PlayOrder,
    // playing now, or interrupted by the current pause
    current: Option<TrackRef>,
    unavailable: bool,
    last_error: Option<String>,
    paused_for: Option<TransitionReason>,
    status_tx: watch::Sender<PlayerStatus>,
}

impl<S, P> Coordinator<S, P>
where
    S: TrackSource + 'static,
    P: StreamPlayer + 'static,
{
    pub async fn new(
        source: S,
        mut player: P,
        config: ConfigStore,
        log: TransitionLog,
        schedule: SharedSchedule,
        options: CoordinatorOptions,
    ) -> Self {
        let snapshot = config.snapshot().await;
        player.set_volume(snapshot.volume);
        let (status_tx, _) = watch::channel(PlayerStatus::initial(snapshot.playlist_url.clone()));

        Self {
            source,
            player,
            config,
            log,
            schedule,
            options,
            state: CoordinatorState::Idle,
            playlist_url: snapshot.playlist_url,
            tracks: Vec::new(),
            order: PlayOrder::default(),
            current: None,
            unavailable: false,
            last_error: None,
            paused_for: None,
            status_tx,
        }
    }

    /// Move the coordinator onto its own task.
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = CoordinatorHandle {
            tx,
            status: self.status_tx.subscribe(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Envelope>) {
        info!("Coordinator started (playlist {})", self.playlist_url);

        while let Some(Envelope { request, reply }) = rx.recv().await {
            let shutdown = request == Request::Shutdown;
            debug!("Handling {:?} in state {:?}", request, self.state);

            let result = self.handle(request).await;
            let status = self.publish();
            // caller may have given up waiting, that's fine
            let _ = reply.send(result.map(|_| status));

            if shutdown {
                break;
            }
        }

        if let Err(e) = self.player.stop().await {
            warn!("Stopping player on shutdown failed: {}", e);
        }
        info!("Coordinator stopped");
    }

    async fn handle(&mut self, request: Request) -> Result<(), CoordinatorError> {
        let result = match request {
            Request::Start => self.start().await,
            Request::Pause { reason } => self.pause(reason).await,
            Request::Resume { origin } => self.resume(origin).await,
            Request::Stop | Request::Shutdown => self.stop().await,
            Request::ChangePlaylist { url } => self.change_playlist(url).await,
            Request::RefreshPlaylist => self.refresh_playlist().await,
            Request::ReloadConfig => self.reload_config().await,
            Request::CheckLiveness => self.check_liveness().await,
        };

        let result = match result {
            Err(CoordinatorError::InvariantViolation(msg))
            | Err(CoordinatorError::Player(DriverError::InvariantViolation(msg))) => {
                self.recover(&msg).await;
                Err(CoordinatorError::InvariantViolation(msg))
            }
            other => other,
        };

        // never leave a transition half done
        if self.state == CoordinatorState::Transitioning {
            self.state = if self.player.is_alive() {
                CoordinatorState::Playing
            } else {
                CoordinatorState::Idle
            };
            warn!("Transition did not settle, forced to {:?}", self.state);
        }

        result
    }

    fn publish(&self) -> PlayerStatus {
        let status = PlayerStatus {
            state: self.state,
            playing: self.state == CoordinatorState::Playing,
            paused: self.state == CoordinatorState::Paused,
            unavailable: self.unavailable,
            current_track: self.current.clone(),
            playlist_url: self.playlist_url.clone(),
            last_error: self.last_error.clone(),
            updated_at: Local::now(),
        };
        self.status_tx.send_replace(status.clone());
        status
    }

    fn begin(&mut self) {
        self.state = CoordinatorState::Transitioning;
        self.publish();
    }

    async fn recover(&mut self, msg: &str) {
        error!("Invariant violation: {} - resetting to idle", msg);
        if let Err(e) = self.player.stop().await {
            warn!("Stopping player during recovery failed: {}", e);
        }
        self.state = CoordinatorState::Idle;
        self.current = None;
        self.paused_for = None;
        self.last_error = Some(msg.to_string());
    }

    async fn start(&mut self) -> Result<(), CoordinatorError> {
        match self.state {
            CoordinatorState::Idle => {
                if self.hold_for_prayer().await {
                    return Ok(());
                }
                self.begin();
                self.play_from_current().await
            }
            CoordinatorState::Paused => {
                info!("Start requested while paused, ending the pause");
                self.end_pause().await
            }
            _ => {
                debug!("Already playing");
                Ok(())
            }
        }
    }

    /// From Idle inside a prayer window: go straight to Paused without launching.
    async fn hold_for_prayer(&mut self) -> bool {
        let Some(prayer) = pause_in_effect(&self.schedule, Local::now()).await else {
            return false;
        };
        let reason = TransitionReason::Prayer(prayer);
        self.log.record(TransitionEvent::PauseStart, &reason).await;
        info!("⏸ {} window is active, holding playback until it ends", prayer);
        self.state = CoordinatorState::Paused;
        self.paused_for = Some(reason);
        true
    }

    async fn pause(&mut self, reason: TransitionReason) -> Result<(), CoordinatorError> {
        if self.state == CoordinatorState::Paused {
            // overlapping windows: the later prayer owns the closing pause_end
            if let (Some(TransitionReason::Prayer(held)), TransitionReason::Prayer(next)) =
                (self.paused_for.clone(), reason.clone())
            {
                if held != next {
                    debug!("Pause now held for {} instead of {}", next, held);
                    self.paused_for = Some(reason);
                    return Ok(());
                }
            }
        }
        if self.state != CoordinatorState::Playing {
            debug!("Pause ({}) ignored in state {:?}", reason, self.state);
            return Ok(());
        }

        self.begin();
        self.player.stop().await?;
        self.log.record(TransitionEvent::PauseStart, &reason).await;
        info!("⏸ Paused ({})", reason);

        self.state = CoordinatorState::Paused;
        self.paused_for = Some(reason);
        Ok(())
    }

    async fn resume(&mut self, origin: ResumeOrigin) -> Result<(), CoordinatorError> {
        if origin == ResumeOrigin::Scheduled {
            if let Some(prayer) = pause_in_effect(&self.schedule, Local::now()).await {
                info!("Scheduled resume ignored, {} window is still active", prayer);
                return Ok(());
            }
        }

        match (self.state, origin) {
            (CoordinatorState::Paused, _) => self.end_pause().await,
            (CoordinatorState::Idle, ResumeOrigin::Manual) => {
                if self.hold_for_prayer().await {
                    return Ok(());
                }
                self.begin();
                self.play_from_current().await
            }
            (CoordinatorState::Idle, ResumeOrigin::Scheduled) => {
                debug!("Scheduled resume ignored, nothing was paused");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn end_pause(&mut self) -> Result<(), CoordinatorError> {
        self.begin();
        let reason = self.paused_for.take().unwrap_or(TransitionReason::Manual);
        self.log.record(TransitionEvent::PauseEnd, &reason).await;
        info!("Pause ({}) over, resuming", reason);
        self.play_from_current().await
    }

    async fn stop(&mut self) -> Result<(), CoordinatorError> {
        let was = self.state;
        self.begin();

        let stopped = self.player.stop().await;
        if was == CoordinatorState::Paused {
            self.paused_for = None;
            self.log.record(TransitionEvent::PauseEnd, &TransitionReason::Stopped).await;
        }

        self.state = CoordinatorState::Idle;
        self.current = None;
        self.unavailable = false;
        if was != CoordinatorState::Idle {
            info!("Playback stopped");
        }
        stopped.map_err(CoordinatorError::from)
    }

    async fn change_playlist(&mut self, url: String) -> Result<(), CoordinatorError> {
        let url = url.trim().to_string();
        self.config
            .update(|c| c.playlist_url = url.clone())
            .await
            .map_err(|e| CoordinatorError::Config(format!("{:#}", e)))?;
        info!("Playlist changed to {}", url);
        self.switch_playlist(url).await
    }

    async fn switch_playlist(&mut self, url: String) -> Result<(), CoordinatorError> {
        if url == self.playlist_url {
            return Ok(());
        }

        let was_playing = self.state == CoordinatorState::Playing;
        if was_playing {
            self.begin();
            self.player.stop().await?;
        }

        self.playlist_url = url;
        self.tracks.clear();
        self.order = PlayOrder::default();
        self.current = None;

        if was_playing {
            self.play_from_current().await
        } else {
            Ok(())
        }
    }

    async fn refresh_playlist(&mut self) -> Result<(), CoordinatorError> {
        let tracks = self.source.refresh_tracks(&self.playlist_url).await?;

        // keep the current track first so a pending resume replays it
        let keep = self
            .current
            .as_ref()
            .and_then(|cur| tracks.iter().position(|t| t.id == cur.id));
        self.order = match keep {
            Some(index) => PlayOrder::starting_at(tracks.len(), self.options.shuffle, index),
            None => PlayOrder::new(tracks.len(), self.options.shuffle),
        };
        info!("Playlist refreshed: {} tracks", tracks.len());
        self.tracks = tracks;
        Ok(())
    }

    async fn reload_config(&mut self) -> Result<(), CoordinatorError> {
        let config = self
            .config
            .reload()
            .await
            .map_err(|e| CoordinatorError::Config(format!("{:#}", e)))?;

        // takes effect on the next launch
        self.player.set_volume(config.volume);
        self.switch_playlist(config.playlist_url).await
    }

    async fn check_liveness(&mut self) -> Result<(), CoordinatorError> {
        if self.state != CoordinatorState::Playing || self.player.is_alive() {
            return Ok(());
        }

        let ended = self.current.as_ref().map(|t| t.id.clone()).unwrap_or_default();
        info!("Player for {} is gone, moving to the next track", ended);

        self.begin();
        // reaps the dead child and clears the session
        self.player.stop().await?;
        self.order.advance(self.options.shuffle);
        self.play_from_current().await
    }

    async fn ensure_tracks(&mut self) -> Result<(), CoordinatorError> {
        if !self.tracks.is_empty() {
            return Ok(());
        }

        match self.source.list_tracks(&self.playlist_url).await {
            Ok(tracks) => {
                self.order = PlayOrder::new(tracks.len(), self.options.shuffle);
                self.tracks = tracks;
                Ok(())
            }
            Err(e) => {
                error!("Could not list playlist {}: {}", self.playlist_url, e);
                self.state = CoordinatorState::Idle;
                self.current = None;
                self.unavailable = true;
                self.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    fn track_at_cursor(&self) -> Option<TrackRef> {
        self.order.current().and_then(|i| self.tracks.get(i)).cloned()
    }

    async fn play_from_current(&mut self) -> Result<(), CoordinatorError> {
        self.ensure_tracks().await?;
        self.launch().await
    }

    /// Resolve and start the track under the cursor, advancing on failure.
    async fn launch(&mut self) -> Result<(), CoordinatorError> {
        if let Some(live) = self.player.session().filter(|s| s.is_live()) {
            return Err(CoordinatorError::InvariantViolation(format!(
                "launch requested while {} is still live",
                live.track_id
            )));
        }

        let mut attempts = 0;
        let mut advances = 0;
        let mut retried = false;

        loop {
            let Some(track) = self.track_at_cursor() else {
                return Err(self.give_up(attempts, "play order is empty".to_string()));
            };
            attempts += 1;

            let failure = match self.try_track(&track).await {
                Ok(()) => {
                    self.state = CoordinatorState::Playing;
                    self.current = Some(track);
                    self.unavailable = false;
                    self.last_error = None;
                    return Ok(());
                }
                Err(LaunchError::Driver(DriverError::InvariantViolation(msg))) => {
                    return Err(CoordinatorError::InvariantViolation(msg));
                }
                Err(e) => e,
            };

            let early_exit = matches!(&failure, LaunchError::Driver(e) if e.is_early_exit());
            if early_exit && !retried {
                warn!("{} - re-resolving once", failure);
                retried = true;
                continue;
            }

            warn!("Track {} (#{}) failed: {}", track.id, track.position, failure);
            if advances >= self.options.max_track_advances {
                return Err(self.give_up(attempts, failure.to_string()));
            }
            advances += 1;
            retried = false;
            self.order.advance(self.options.shuffle);
        }
    }

    async fn try_track(&mut self, track: &TrackRef) -> Result<(), LaunchError> {
        // resolve and start back to back, the url is only good for seconds
        let stream = self.source.resolve_stream(&track.id).await?;
        self.player.start(stream).await?;
        Ok(())
    }

    fn give_up(&mut self, attempts: usize, last: String) -> CoordinatorError {
        error!("Giving up after {} attempt(s): {}", attempts, last);
        self.state = CoordinatorState::Idle;
        self.current = None;
        self.unavailable = true;
        self.last_error = Some(last.clone());
        CoordinatorError::PlaybackUnavailable { attempts, last }
    }
}
