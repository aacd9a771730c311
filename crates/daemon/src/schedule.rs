//! Capture scheduling decisions
//!
//! [`evaluate`] is a pure function of the current time and the schedule. It
//! keeps no record of previous fires: every tick re-derives the answer from
//! wall-clock modulo arithmetic, which means the driver has to tick at least
//! once per second for special windows to be hit reliably.

use crate::config::ScheduleConfig;
use chrono::{NaiveDateTime, Timelike};

/// Why a capture is happening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireMode {
    /// Normal interval boundary (`minute % interval == 0`, second 0)
    Normal,
    /// Inside the special window at `index` in the schedule
    Special { index: usize, interval_seconds: u32 },
}

impl FireMode {
    /// Label the captured file is named after
    pub fn label(&self) -> &'static str {
        match self {
            FireMode::Normal => "interval",
            FireMode::Special { .. } => "special",
        }
    }
}

/// Outcome of evaluating one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoAction,
    Fire(FireMode),
}

/// Decide whether `now` is a capture moment under `config`
///
/// 1. Without a channel nothing ever fires.
/// 2. The first special window (in declared order) whose inclusive bounds
///    contain the time of day decides the tick on its own: it fires when the
///    current second is a multiple of its interval, and otherwise the tick is
///    idle. Later windows and the normal interval are not consulted.
/// 3. With no window matching, the tick fires at second 0 of every minute
///    divisible by the normal interval.
pub fn evaluate(now: NaiveDateTime, config: &ScheduleConfig) -> Decision {
    if config.channel().is_none() {
        return Decision::NoAction;
    }

    let time_of_day = now.time();
    if let Some((index, window)) = config
        .special_windows
        .iter()
        .enumerate()
        .find(|(_, window)| window.contains(time_of_day))
    {
        let interval_seconds = window.interval_seconds.max(1);
        return if now.second() % interval_seconds == 0 {
            Decision::Fire(FireMode::Special {
                index,
                interval_seconds,
            })
        } else {
            Decision::NoAction
        };
    }

    let interval_minutes = config.normal_interval_minutes.max(1);
    if now.minute() % interval_minutes == 0 && now.second() == 0 {
        Decision::Fire(FireMode::Normal)
    } else {
        Decision::NoAction
    }
}
