// prayerpause - continuous playlist playback that steps aside for the five daily prayers
// The coordinator owns the player; everything else sends it requests

pub mod config;      // shared config.json + daemon settings
pub mod control;     // unix socket protocol
pub mod coordinator; // the playback state machine
pub mod error;       // error taxonomy
pub mod logging;     // tracing setup
pub mod playback;    // player subprocess
pub mod prayer;      // prayer windows from the time service
pub mod resolver;    // playlist listing + stream urls
pub mod schedule;    // cron triggers + daily refresh
pub mod translog;    // pause audit trail

pub use config::{Config, ConfigStore, Settings};
pub use coordinator::{Coordinator, CoordinatorHandle, CoordinatorOptions, CoordinatorState, PlayerStatus, ResumeOrigin};
pub use error::{ControlError, CoordinatorError, DriverError, ResolutionError, ScheduleUnavailable};
pub use playback::{PlaybackSession, ProcessDriver, SessionState, StreamPlayer};
pub use prayer::{PrayerCalculator, PrayerName, PrayerWindow};
pub use resolver::{ResolvedStream, TrackRef, TrackResolver, TrackSource};
pub use translog::{TransitionEvent, TransitionLog, TransitionReason};
