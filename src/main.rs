// prayerpause - playlist streamer that pauses for prayer
// `run` is the daemon; every other subcommand is a thin client over the control socket

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use prayerpause::config::{ConfigStore, Settings};
use prayerpause::control::{ControlClient, ControlRequest, ControlServer};
use prayerpause::coordinator::{spawn_liveness_monitor, Coordinator, CoordinatorOptions, PlayerStatus};
use prayerpause::logging::init_logging;
use prayerpause::playback::ProcessDriver;
use prayerpause::prayer::{AladhanClient, PrayerCalculator, PrayerName};
use prayerpause::resolver::{PlaylistCache, TrackResolver, YtDlpBackend};
use prayerpause::schedule::{
    plan_triggers, save_last_schedule, shared_schedule, CrontabInstaller, PauseScheduler, ScheduleService,
};
use prayerpause::translog::TransitionLog;

#[derive(Parser)]
#[command(name = "prayerpause")]
#[command(about = "Streams a playlist and pauses it for the five daily prayers")]
struct Cli {
    /// Settings file (default: ~/.config/prayerpause/settings.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Also log to stderr
    #[arg(long, global = true)]
    dev: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon in the foreground
    Run,
    /// Start playback
    Start,
    /// Pause playback
    Pause {
        /// Prayer this pause is for; omit for a manual pause
        #[arg(long, value_parser = parse_prayer)]
        prayer: Option<PrayerName>,
    },
    /// Resume playback
    Resume {
        /// Issued by a prayer trigger: yields to an active window, never starts from idle
        #[arg(long)]
        scheduled: bool,
    },
    /// Stop playback
    Stop,
    /// Show daemon status
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Switch to another playlist
    Playlist { url: String },
    /// Re-fetch the playlist listing
    Refresh,
    /// Re-read config.json
    Reload,
    /// Compute prayer windows without the daemon
    Schedule {
        /// Date as YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Also write the triggers into crontab
        #[arg(long)]
        install: bool,
    },
}

fn parse_prayer(value: &str) -> Result<PrayerName, String> {
    PrayerName::parse(value).ok_or_else(|| format!("unknown prayer '{}'", value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (settings, settings_path) = Settings::load(cli.settings.as_deref())?;

    let log_file = match cli.command {
        Command::Run => "prayerpause.log",
        _ => "prayerpause-cli.log",
    };
    let _guard = init_logging(&settings.log_dir, log_file, cli.dev)?;

    match cli.command {
        Command::Run => run_daemon(settings, &settings_path).await,
        Command::Start => send(&settings, ControlRequest::Start).await,
        Command::Pause { prayer } => send(&settings, ControlRequest::Pause { prayer }).await,
        Command::Resume { scheduled } => send(&settings, ControlRequest::Resume { scheduled }).await,
        Command::Stop => send(&settings, ControlRequest::Stop).await,
        Command::Status { json } => {
            let status = client(&settings).send(&ControlRequest::Status).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            Ok(())
        }
        Command::Playlist { url } => send(&settings, ControlRequest::ChangePlaylist { url }).await,
        Command::Refresh => send(&settings, ControlRequest::RefreshPlaylist).await,
        Command::Reload => send(&settings, ControlRequest::ReloadConfig).await,
        Command::Schedule { date, install } => show_schedule(&settings, &settings_path, date, install).await,
    }
}

fn client(settings: &Settings) -> ControlClient {
    ControlClient::new(&settings.socket_path)
}

async fn send(settings: &Settings, request: ControlRequest) -> Result<()> {
    info!("control request {:?}", request);
    let status = client(settings)
        .send(&request)
        .await
        .with_context(|| format!("daemon at {}", settings.socket_path.display()))?;
    print_status(&status);
    Ok(())
}

fn print_status(status: &PlayerStatus) {
    let icon = if status.unavailable {
        "❌"
    } else if status.playing {
        "▶"
    } else if status.paused {
        "⏸"
    } else {
        "■"
    };
    println!("{} {:?}", icon, status.state);
    println!("  playlist: {}", status.playlist_url);
    if let Some(track) = &status.current_track {
        println!("  track:    #{} {}", track.position + 1, track.id);
    }
    if let Some(err) = &status.last_error {
        println!("  error:    {}", err);
    }
    println!("  updated:  {}", status.updated_at.format("%Y-%m-%d %H:%M:%S"));
}

/// Quote for /bin/sh, which is what cron hands the line to.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn trigger_command(settings: &Settings, settings_path: &Path) -> Result<String> {
    let program = match &settings.schedule.trigger_program {
        Some(program) => program.clone(),
        None => std::env::current_exe().context("locating our own executable")?,
    };
    Ok(format!(
        "{} --settings {}",
        shell_quote(&program.to_string_lossy()),
        shell_quote(&settings_path.to_string_lossy())
    ))
}

async fn run_daemon(settings: Settings, settings_path: &Path) -> Result<()> {
    info!("prayerpause {} starting", env!("CARGO_PKG_VERSION"));

    let config = ConfigStore::load(&settings.config_path)?;
    let resolver = TrackResolver::new(
        YtDlpBackend::new(&settings.resolver),
        PlaylistCache::new(settings.playlist_cache_dir()),
    );
    let driver = ProcessDriver::new(&settings.player, settings.early_exit_grace(), settings.stop_timeout());
    let schedule = shared_schedule();

    let coordinator = Coordinator::new(
        resolver,
        driver,
        config.clone(),
        TransitionLog::new(&settings.transition_log),
        schedule.clone(),
        CoordinatorOptions::from(&settings.playback),
    )
    .await;
    let (handle, coordinator_task) = coordinator.spawn();

    // bound before playback starts so an early trigger can't miss us
    let server = ControlServer::bind(&settings.socket_path)?;
    let monitor = spawn_liveness_monitor(handle.clone(), config.clone());

    let timings = AladhanClient::new(
        settings.schedule.api_base.clone(),
        Duration::from_secs(settings.schedule.request_timeout_secs),
    )?;
    let mut service: ScheduleService<_, CrontabInstaller> = ScheduleService::new(
        PrayerCalculator::new(timings),
        config.clone(),
        schedule,
        settings.last_schedule_path(),
        &settings.schedule,
    )?
    .with_coordinator(handle.clone());
    if settings.schedule.install_triggers {
        let installer = CrontabInstaller::new(
            settings.schedule.crontab_program.clone(),
            trigger_command(&settings, settings_path)?,
        );
        service = service.with_installer(PauseScheduler::new(installer));
    }

    // a restart inside a window must hold rather than play until the first refresh lands
    service.restore_saved(Local::now()).await;

    match handle.start().await {
        Ok(status) => info!("Startup playback: {:?}", status.state),
        Err(e) => error!("Could not start playback: {}", e),
    }

    let schedule_task = tokio::spawn(service.run());
    let server_task = tokio::spawn(server.serve(handle.clone()));

    wait_for_shutdown().await?;
    info!("Shutting down");

    schedule_task.abort();
    monitor.abort();
    server_task.abort();

    if let Err(e) = handle.shutdown().await {
        warn!("Coordinator shutdown: {}", e);
    }
    drop(handle);
    if let Err(e) = coordinator_task.await {
        warn!("Coordinator task ended abnormally: {}", e);
    }
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}

async fn show_schedule(settings: &Settings, settings_path: &Path, date: Option<NaiveDate>, install: bool) -> Result<()> {
    let config = ConfigStore::load(&settings.config_path)?.snapshot().await;
    let date = date.unwrap_or_else(|| Local::now().date_naive());

    let timings = AladhanClient::new(
        settings.schedule.api_base.clone(),
        Duration::from_secs(settings.schedule.request_timeout_secs),
    )?;
    let windows = PrayerCalculator::new(timings)
        .compute_windows(&config.city, &config.country, config.method, date, config.prayer_duration_minutes)
        .await?;

    println!("🕌 {} - {}, {} (method {})", date, config.city, config.country, config.method);
    for window in &windows {
        println!(
            "  {:<8} {} - {}",
            window.name.as_str(),
            window.start_time.format("%H:%M"),
            window.end_time().format("%H:%M")
        );
    }

    let triggers = plan_triggers(&windows, config.prayer_duration_minutes);
    println!("\n⏰ {} trigger(s)", triggers.len());
    for trigger in &triggers {
        println!("  {} {:?} {}", trigger.at.format("%H:%M"), trigger.action, trigger.prayer);
    }

    if install {
        save_last_schedule(&settings.last_schedule_path(), &windows)?;
        let installer = CrontabInstaller::new(
            settings.schedule.crontab_program.clone(),
            trigger_command(settings, settings_path)?,
        );
        PauseScheduler::new(installer)
            .install(&windows, config.prayer_duration_minutes)
            .await?;
        println!("✅ crontab updated");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use prayerpause::prayer::PrayerWindow;
    use prayerpause::schedule::crontab::{render_crontab, MARKER};

    #[test]
    fn test_installed_trigger_lines_parse_as_commands() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let start = Local
            .from_local_datetime(&date.and_time(NaiveTime::from_hms_opt(5, 12, 0).unwrap()))
            .earliest()
            .unwrap();
        let window = PrayerWindow { name: PrayerName::Fajr, start_time: start, duration_minutes: 15 };
        let table = render_crontab("", &plan_triggers(&[window], 15), "prayerpause", Local::now());

        let commands: Vec<Vec<&str>> = table
            .lines()
            .filter(|line| line.contains(MARKER) && !line.starts_with('#'))
            .map(|line| {
                let command = line.split(MARKER).next().unwrap();
                command.split_whitespace().skip(5).collect()
            })
            .collect();
        assert_eq!(commands.len(), 2);

        for args in commands {
            let cli = Cli::try_parse_from(&args).unwrap();
            match cli.command {
                Command::Pause { prayer } => assert_eq!(prayer, Some(PrayerName::Fajr)),
                Command::Resume { scheduled } => assert!(scheduled),
                _ => panic!("unexpected trigger command {:?}", args),
            }
        }
    }

    #[test]
    fn test_resume_takes_no_prayer_argument() {
        assert!(Cli::try_parse_from(["prayerpause", "resume", "--scheduled", "--prayer", "Fajr"]).is_err());
    }
}
