// Smoke test for prayer times: fetch a day and show the triggers we'd install
// Usage: cargo run --bin test_schedule [city] [country] [method]
// Nothing is written to crontab.

use chrono::Local;
use prayerpause::config::{ConfigStore, Settings};
use prayerpause::prayer::{AladhanClient, PrayerCalculator};
use prayerpause::schedule::crontab::render_crontab;
use prayerpause::schedule::plan_triggers;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("🕌 Prayer Schedule Test Utility");
    println!("==============================");

    let (settings, _) = Settings::load(None)?;
    let config = ConfigStore::load(&settings.config_path)?.snapshot().await;

    let mut args = std::env::args().skip(1);
    let city = args.next().unwrap_or(config.city);
    let country = args.next().unwrap_or(config.country);
    let method = args
        .next()
        .and_then(|m| m.parse().ok())
        .unwrap_or(config.method);
    let today = Local::now().date_naive();

    println!("📍 {}, {} (method {}) on {}", city, country, method, today);

    let client = AladhanClient::new(
        settings.schedule.api_base.clone(),
        Duration::from_secs(settings.schedule.request_timeout_secs),
    )?;
    let calculator = PrayerCalculator::new(client);

    let started = std::time::Instant::now();
    let windows = match calculator
        .compute_windows(&city, &country, method, today, config.prayer_duration_minutes)
        .await
    {
        Ok(windows) => windows,
        Err(e) => {
            println!("❌ {}", e);
            return Ok(());
        }
    };
    println!("✅ Fetched in {:.1}s", started.elapsed().as_secs_f32());

    let now = Local::now();
    for window in &windows {
        let marker = if window.contains(now) { "  ⏸ now" } else { "" };
        println!(
            "  {:<8} {} - {}{}",
            window.name.as_str(),
            window.start_time.format("%H:%M"),
            window.end_time().format("%H:%M"),
            marker
        );
    }

    let triggers = plan_triggers(&windows, config.prayer_duration_minutes);
    println!();
    println!("📋 crontab preview:");
    print!("{}", render_crontab("", &triggers, "prayerpause", now));

    Ok(())
}
