//! Operator command table
//!
//! Maps textual commands (`$setinterval 10`, `$addwindow 16:30 16:35 30`, ...)
//! onto schedule updates and the acknowledgement sent back. The scheduler
//! itself never sees commands, only the resulting schedule.

use crate::config::{ScheduleConfig, SettingsUpdate, SpecialWindow, StoreError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;

/// Error type for command parsing and application
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown command '{0}'.")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    /// Command would put an invalid value into the schedule
    #[error("{0}")]
    ConfigInvalid(#[from] ValidationError),

    /// Schedule could not be saved
    #[error("{0}")]
    Store(#[from] StoreError),
}

/// A parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetChannel(String),
    SetInterval(i64),
    AddWindow {
        start: String,
        end: String,
        interval_seconds: i64,
    },
    ClearWindows,
    SetAutoDelete(bool),
    Snap,
    Status,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    SetChannel,
    SetInterval,
    AddWindow,
    ClearWindows,
    SetAutoDelete,
    Snap,
    Status,
    Help,
}

/// One row of the command table
#[derive(Debug)]
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
    kind: CommandKind,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "setchannel",
        usage: "setchannel <channel name>",
        summary: "Post photos to this channel",
        kind: CommandKind::SetChannel,
    },
    CommandSpec {
        name: "setinterval",
        usage: "setinterval <minutes>",
        summary: "Capture every N minutes outside special windows",
        kind: CommandKind::SetInterval,
    },
    CommandSpec {
        name: "addwindow",
        usage: "addwindow <HH:MM> <HH:MM> <interval seconds>",
        summary: "Capture every N seconds between two times of day",
        kind: CommandKind::AddWindow,
    },
    CommandSpec {
        name: "clearwindows",
        usage: "clearwindows",
        summary: "Remove all special windows",
        kind: CommandKind::ClearWindows,
    },
    CommandSpec {
        name: "autodelete",
        usage: "autodelete <on|off>",
        summary: "Delete local photos after they were posted",
        kind: CommandKind::SetAutoDelete,
    },
    CommandSpec {
        name: "snap",
        usage: "snap",
        summary: "Take and post a photo right now",
        kind: CommandKind::Snap,
    },
    CommandSpec {
        name: "status",
        usage: "status",
        summary: "Show the current schedule",
        kind: CommandKind::Status,
    },
    CommandSpec {
        name: "help",
        usage: "help",
        summary: "List commands",
        kind: CommandKind::Help,
    },
];

/// Parse `text` as a command introduced by `prefix`
///
/// Returns `Ok(None)` for text that is not addressed to the bot.
pub fn parse_command(text: &str, prefix: &str) -> Result<Option<Command>, CommandError> {
    let Some(body) = text.trim().strip_prefix(prefix) else {
        return Ok(None);
    };
    let body = body.trim_start();
    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };

    let spec = COMMANDS
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| CommandError::Unknown(name.to_string()))?;
    let usage = || CommandError::Usage(spec.usage);

    let command = match spec.kind {
        CommandKind::SetChannel => {
            let name = rest.trim_start_matches('#').trim();
            if name.is_empty() {
                return Err(usage());
            }
            Command::SetChannel(name.to_string())
        }
        CommandKind::SetInterval => Command::SetInterval(rest.parse().map_err(|_| usage())?),
        CommandKind::AddWindow => {
            let args: Vec<&str> = rest.split_whitespace().collect();
            let [start, end, interval] = args.as_slice() else {
                return Err(usage());
            };
            Command::AddWindow {
                start: start.to_string(),
                end: end.to_string(),
                interval_seconds: interval.parse().map_err(|_| usage())?,
            }
        }
        CommandKind::ClearWindows => Command::ClearWindows,
        CommandKind::SetAutoDelete => {
            if rest.is_empty() {
                return Err(usage());
            }
            Command::SetAutoDelete(parse_flag(rest))
        }
        CommandKind::Snap => Command::Snap,
        CommandKind::Status => Command::Status,
        CommandKind::Help => Command::Help,
    };
    Ok(Some(command))
}

/// `yes`, `true`, `1` and `on` enable; anything else disables
fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "yes" | "true" | "1" | "on"
    )
}

impl Command {
    /// Schedule change this command asks for, or `None` if it changes nothing
    pub fn settings_update(
        &self,
        current: &ScheduleConfig,
    ) -> Result<Option<SettingsUpdate>, CommandError> {
        let update = match self {
            Command::SetChannel(name) => SettingsUpdate::channel(name.clone()),
            Command::SetInterval(minutes) => {
                let minutes = u32::try_from(*minutes)
                    .ok()
                    .filter(|m| *m >= 1)
                    .ok_or(ValidationError::IntervalTooSmall(*minutes))?;
                SettingsUpdate::interval_minutes(minutes)
            }
            Command::AddWindow {
                start,
                end,
                interval_seconds,
            } => {
                let window = SpecialWindow::parse(start, end, *interval_seconds)?;
                let mut windows = current.special_windows.clone();
                windows.push(window);
                SettingsUpdate::windows(windows)
            }
            Command::ClearWindows => SettingsUpdate::windows(Vec::new()),
            Command::SetAutoDelete(enabled) => SettingsUpdate::delete_after_upload(*enabled),
            Command::Snap | Command::Status | Command::Help => return Ok(None),
        };
        Ok(Some(update))
    }

    /// Acknowledgement for a schedule change that has been applied
    pub fn acknowledgement(&self) -> String {
        match self {
            Command::SetChannel(name) => format!("Photo channel set to #{}", name),
            Command::SetInterval(minutes) => format!("Interval set to every {} minutes.", minutes),
            Command::AddWindow {
                start,
                end,
                interval_seconds,
            } => format!(
                "Special window added: {}-{} every {}s.",
                start, end, interval_seconds
            ),
            Command::ClearWindows => "All special windows cleared.".to_string(),
            Command::SetAutoDelete(enabled) => format!(
                "Auto-delete after upload {}.",
                if *enabled { "enabled" } else { "disabled" }
            ),
            Command::Snap => "Snapshot requested.".to_string(),
            Command::Status => "Status requested.".to_string(),
            Command::Help => "Help requested.".to_string(),
        }
    }
}

/// Reply to an operator command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub ok: bool,
    pub message: String,
}

impl CommandReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Human-readable summary of the schedule
pub fn describe_settings(config: &ScheduleConfig) -> String {
    let mut out = String::new();
    match config.channel() {
        Some(name) => {
            let _ = writeln!(out, "Channel: #{}", name);
        }
        None => out.push_str("Channel: not set\n"),
    }
    let _ = writeln!(
        out,
        "Normal interval: every {} minutes",
        config.normal_interval_minutes
    );
    let _ = writeln!(
        out,
        "Delete after upload: {}",
        if config.delete_after_upload { "on" } else { "off" }
    );
    if config.special_windows.is_empty() {
        out.push_str("Special windows: none");
    } else {
        out.push_str("Special windows (first match wins):");
        for (index, window) in config.special_windows.iter().enumerate() {
            let _ = write!(out, "\n  {}. {}", index + 1, window);
        }
    }
    out
}

/// Command list with `prefix` applied
pub fn help_text(prefix: &str) -> String {
    COMMANDS
        .iter()
        .map(|spec| format!("{}{} - {}", prefix, spec.usage, spec.summary))
        .collect::<Vec<_>>()
        .join("\n")
}
