// crontab-backed trigger installation
// Entries are pinned to a calendar date, so yesterday's leftovers can never fire today

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, Timelike};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Trigger, TriggerAction, TriggerInstaller};

/// Every line we own carries this tag so the next install can strip it.
pub const MARKER: &str = "# prayerpause-trigger";

pub struct CrontabInstaller {
    crontab_program: String,
    /// Invocation prefix for the trigger commands, e.g. `/usr/local/bin/prayerpause --settings ...`.
    command: String,
}

impl CrontabInstaller {
    pub fn new(crontab_program: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            crontab_program: crontab_program.into(),
            command: command.into(),
        }
    }

    async fn read_current(&self) -> Result<String> {
        let output = Command::new(&self.crontab_program)
            .arg("-l")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("running {} -l", self.crontab_program))?;

        // "no crontab for user" exits non-zero; that's just an empty table
        if !output.status.success() {
            debug!("{} -l exited with {}, starting from empty", self.crontab_program, output.status);
            return Ok(String::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn write(&self, table: &str) -> Result<()> {
        let mut child = Command::new(&self.crontab_program)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("running {} -", self.crontab_program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(table.as_bytes()).await?;
            // dropping stdin closes the pipe so crontab sees EOF
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            bail!(
                "{} rejected the table: {}",
                self.crontab_program,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

fn trigger_line(trigger: &Trigger, command: &str) -> String {
    let at = trigger.at;
    let invocation = match trigger.action {
        TriggerAction::Pause => format!("{} pause --prayer {}", command, trigger.prayer),
        TriggerAction::Resume => format!("{} resume --scheduled", command),
    };
    let action = match trigger.action {
        TriggerAction::Pause => "pause",
        TriggerAction::Resume => "resume",
    };

    format!(
        "{} {} {} {} * {} {} {} {}",
        at.minute(),
        at.hour(),
        at.day(),
        at.month(),
        invocation,
        MARKER,
        trigger.prayer,
        action
    )
}

/// Drop our old lines from `existing` and append the new set.
pub fn render_crontab(existing: &str, triggers: &[Trigger], command: &str, generated_at: DateTime<Local>) -> String {
    let mut lines: Vec<String> = existing
        .lines()
        .filter(|line| !line.contains(MARKER))
        .map(str::to_string)
        .collect();

    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }

    if !triggers.is_empty() {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(format!("{} prayer pauses, regenerated daily", MARKER));
        lines.push(format!("{} generated {}", MARKER, generated_at.format("%Y-%m-%d %H:%M:%S")));
        lines.extend(triggers.iter().map(|t| trigger_line(t, command)));
    }

    let mut table = lines.join("\n");
    table.push('\n');
    table
}

#[async_trait]
impl TriggerInstaller for CrontabInstaller {
    async fn install(&self, triggers: &[Trigger]) -> Result<()> {
        let current = self.read_current().await?;
        let table = render_crontab(&current, triggers, &self.command, Local::now());
        self.write(&table).await?;
        info!("crontab updated with {} trigger(s)", triggers.len());
        Ok(())
    }
}
