//! Startup checks for the camera relay daemon
//!
//! Preflight checks run before the scheduler starts:
//! - The still-capture program can be executed
//! - A chat token is configured
//! - The tick period is fine-grained enough for special windows

use crate::config::Config;
use std::process::Command;
use thiserror::Error;
use tracing::warn;

/// Tick periods above this miss special-window seconds
pub const MAX_ACCURATE_TICK_MILLIS: u64 = 1000;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Capture program not available: {0}")]
    CaptureUnavailable(String),

    #[error("Chat transport not configured: {0}")]
    TransportNotConfigured(String),

    #[error("Invalid tick period: {0}")]
    InvalidTick(String),
}

/// Check that the capture program runs, via `<program> --version`
pub fn check_capture_available(program: &str) -> Result<(), StartupError> {
    let output = Command::new(program)
        .arg("--version")
        .output()
        .map_err(|e| {
            StartupError::CaptureUnavailable(format!(
                "{} --version failed; is it installed and in PATH? Error: {}",
                program, e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::CaptureUnavailable(format!(
            "{} --version exited with {}",
            program, output.status
        )));
    }

    Ok(())
}

/// Check that a bot token is present
pub fn check_transport_configured(cfg: &Config) -> Result<(), StartupError> {
    match cfg.discord.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => Ok(()),
        _ => Err(StartupError::TransportNotConfigured(
            "set DISCORD_TOKEN or [discord] token".to_string(),
        )),
    }
}

/// Check the tick period
///
/// Zero is rejected. Periods above one second are allowed but logged, since
/// the scheduler only fires on ticks that land on matching seconds.
pub fn check_tick_period(tick_millis: u64) -> Result<(), StartupError> {
    if tick_millis == 0 {
        return Err(StartupError::InvalidTick(
            "schedule.tick_millis must be at least 1".to_string(),
        ));
    }
    if tick_millis > MAX_ACCURATE_TICK_MILLIS {
        warn!(
            tick_millis,
            "Tick period above one second; special windows and normal boundaries may be missed"
        );
    }
    Ok(())
}

/// Run all startup checks in order
///
/// 1. Tick period
/// 2. Chat token
/// 3. Capture program
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    check_tick_period(cfg.schedule.tick_millis)?;
    check_transport_configured(cfg)?;
    check_capture_available(&cfg.capture.program)?;
    Ok(())
}
