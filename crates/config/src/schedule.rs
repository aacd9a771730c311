//! Operator-editable capture schedule
//!
//! The schedule is what the `$setchannel`, `$setinterval`, `$addwindow`,
//! `$clearwindows` and `$autodelete` commands change. It is persisted as JSON
//! and read fresh by the scheduler on every tick.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normal interval used when nothing else has been configured
pub const DEFAULT_INTERVAL_MINUTES: u32 = 5;

const TIME_FORMAT: &str = "%H:%M";

/// Reasons a schedule change is refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Normal interval below one minute
    IntervalTooSmall(i64),
    /// Special window interval below one second
    WindowIntervalTooSmall(i64),
    /// Time of day not in `HH:MM` form
    InvalidTime(String),
    /// Window start later than its end
    CrossesMidnight { start: NaiveTime, end: NaiveTime },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::IntervalTooSmall(_) => {
                write!(f, "Interval must be at least 1 minute.")
            }
            ValidationError::WindowIntervalTooSmall(_) => {
                write!(f, "Window interval must be at least 1 second.")
            }
            ValidationError::InvalidTime(raw) => {
                write!(f, "'{}' is not a valid time, expected HH:MM.", raw)
            }
            ValidationError::CrossesMidnight { start, end } => write!(
                f,
                "Window {}-{} crosses midnight, which is not supported. \
                 Add two windows instead: {}-23:59 and 00:00-{}.",
                start.format(TIME_FORMAT),
                end.format(TIME_FORMAT),
                start.format(TIME_FORMAT),
                end.format(TIME_FORMAT),
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Parse an `HH:MM` time of day
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, ValidationError> {
    NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT)
        .map_err(|_| ValidationError::InvalidTime(raw.to_string()))
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(super::TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time_of_day(&raw).map_err(serde::de::Error::custom)
    }
}

/// A time-of-day range with its own second-level capture cadence
///
/// Bounds are inclusive and compared against time of day only, so a window
/// cannot span midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    #[serde(rename = "interval")]
    pub interval_seconds: u32,
}

impl SpecialWindow {
    /// Build a window, rejecting zero intervals and midnight-crossing ranges
    pub fn new(
        start: NaiveTime,
        end: NaiveTime,
        interval_seconds: i64,
    ) -> Result<Self, ValidationError> {
        if interval_seconds < 1 {
            return Err(ValidationError::WindowIntervalTooSmall(interval_seconds));
        }
        if start > end {
            return Err(ValidationError::CrossesMidnight { start, end });
        }
        let interval_seconds = u32::try_from(interval_seconds)
            .map_err(|_| ValidationError::WindowIntervalTooSmall(interval_seconds))?;
        Ok(Self {
            start,
            end,
            interval_seconds,
        })
    }

    /// Build a window from `HH:MM` strings
    pub fn parse(start: &str, end: &str, interval_seconds: i64) -> Result<Self, ValidationError> {
        Self::new(
            parse_time_of_day(start)?,
            parse_time_of_day(end)?,
            interval_seconds,
        )
    }

    /// Whether `time` falls inside `[start, end]`
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }

    /// A window whose start is after its end never matches any time of day
    pub fn crosses_midnight(&self) -> bool {
        self.start > self.end
    }
}

impl fmt::Display for SpecialWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{} every {}s",
            self.start.format(TIME_FORMAT),
            self.end.format(TIME_FORMAT),
            self.interval_seconds
        )
    }
}

/// The capture schedule
///
/// Field names on disk follow the settings file the bot has always written:
/// `channel_name`, `interval_minutes`, `delete_after_upload`, `special_windows`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Channel photos are posted to; nothing is captured while unset
    #[serde(default)]
    pub channel_name: Option<String>,
    /// Minutes between normal captures, matched against minute-of-hour
    #[serde(rename = "interval_minutes", default = "default_interval_minutes")]
    pub normal_interval_minutes: u32,
    #[serde(default)]
    pub delete_after_upload: bool,
    /// Checked in order; the first window containing the current time wins
    #[serde(default)]
    pub special_windows: Vec<SpecialWindow>,
}

fn default_interval_minutes() -> u32 {
    DEFAULT_INTERVAL_MINUTES
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            channel_name: None,
            normal_interval_minutes: DEFAULT_INTERVAL_MINUTES,
            delete_after_upload: false,
            special_windows: Vec::new(),
        }
    }
}

impl ScheduleConfig {
    /// Configured channel name, treating blank names as unset
    pub fn channel(&self) -> Option<&str> {
        self.channel_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Copy of `self` with every `Some` field of `update` applied
    pub fn merged(&self, update: &SettingsUpdate) -> Self {
        let mut merged = self.clone();
        if let Some(channel_name) = &update.channel_name {
            merged.channel_name = Some(channel_name.clone());
        }
        if let Some(minutes) = update.normal_interval_minutes {
            merged.normal_interval_minutes = minutes;
        }
        if let Some(delete) = update.delete_after_upload {
            merged.delete_after_upload = delete;
        }
        if let Some(windows) = &update.special_windows {
            merged.special_windows = windows.clone();
        }
        merged
    }

    /// Clamp intervals below one up to one.
    ///
    /// Hand-edited files can carry zeros that commands would have refused.
    /// Returns a description of every value that was changed.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut fixes = Vec::new();
        if self.normal_interval_minutes == 0 {
            self.normal_interval_minutes = 1;
            fixes.push("interval_minutes 0 clamped to 1".to_string());
        }
        for (index, window) in self.special_windows.iter_mut().enumerate() {
            if window.interval_seconds == 0 {
                window.interval_seconds = 1;
                fixes.push(format!("special window {} interval 0 clamped to 1", index));
            }
        }
        fixes
    }

    /// Windows that can never match because their start is after their end
    pub fn unreachable_windows(&self) -> impl Iterator<Item = (usize, &SpecialWindow)> {
        self.special_windows
            .iter()
            .enumerate()
            .filter(|(_, window)| window.crosses_midnight())
    }
}

/// Partial schedule change; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub channel_name: Option<String>,
    pub normal_interval_minutes: Option<u32>,
    pub delete_after_upload: Option<bool>,
    pub special_windows: Option<Vec<SpecialWindow>>,
}

impl SettingsUpdate {
    pub fn channel(name: impl Into<String>) -> Self {
        Self {
            channel_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn interval_minutes(minutes: u32) -> Self {
        Self {
            normal_interval_minutes: Some(minutes),
            ..Self::default()
        }
    }

    pub fn delete_after_upload(enabled: bool) -> Self {
        Self {
            delete_after_upload: Some(enabled),
            ..Self::default()
        }
    }

    pub fn windows(windows: Vec<SpecialWindow>) -> Self {
        Self {
            special_windows: Some(windows),
            ..Self::default()
        }
    }

    /// Reject values the schedule must never hold
    ///
    /// Windows already present in `current` are carried over as they are, so
    /// an unreachable window loaded from disk does not block later changes.
    pub fn validate(&self, current: &ScheduleConfig) -> Result<(), ValidationError> {
        if self.normal_interval_minutes == Some(0) {
            return Err(ValidationError::IntervalTooSmall(0));
        }
        let new_windows = self
            .special_windows
            .iter()
            .flatten()
            .filter(|window| !current.special_windows.contains(window));
        for window in new_windows {
            if window.interval_seconds == 0 {
                return Err(ValidationError::WindowIntervalTooSmall(0));
            }
            if window.crosses_midnight() {
                return Err(ValidationError::CrossesMidnight {
                    start: window.start,
                    end: window.end,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let window = SpecialWindow::parse("16:30", "16:35", 30).unwrap();

        assert!(window.contains(hm(16, 30)));
        assert!(window.contains(NaiveTime::from_hms_opt(16, 32, 15).unwrap()));
        assert!(window.contains(hm(16, 35)));
        // End is 16:35:00, anything later that minute is outside
        assert!(!window.contains(NaiveTime::from_hms_opt(16, 35, 1).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(16, 29, 59).unwrap()));
    }

    #[test]
    fn test_window_rejects_bad_input() {
        assert_eq!(
            SpecialWindow::parse("16:30", "16:35", 0),
            Err(ValidationError::WindowIntervalTooSmall(0))
        );
        assert_eq!(
            SpecialWindow::parse("16:30", "16:35", -10),
            Err(ValidationError::WindowIntervalTooSmall(-10))
        );
        assert_eq!(
            SpecialWindow::parse("4pm", "16:35", 30),
            Err(ValidationError::InvalidTime("4pm".to_string()))
        );
        assert!(matches!(
            SpecialWindow::parse("23:00", "01:00", 30),
            Err(ValidationError::CrossesMidnight { .. })
        ));
    }

    #[test]
    fn test_midnight_message_suggests_split() {
        let err = SpecialWindow::parse("23:00", "01:00", 30).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("23:00-23:59"));
        assert!(message.contains("00:00-01:00"));
    }

    #[test]
    fn test_settings_file_format() {
        let json = r#"{
            "channel_name": "garden",
            "interval_minutes": 10,
            "delete_after_upload": true,
            "special_windows": [{"start": "16:30", "end": "16:35", "interval": 30}]
        }"#;
        let config: ScheduleConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.channel(), Some("garden"));
        assert_eq!(config.normal_interval_minutes, 10);
        assert!(config.delete_after_upload);
        assert_eq!(
            config.special_windows,
            vec![SpecialWindow::parse("16:30", "16:35", 30).unwrap()]
        );

        let written = serde_json::to_value(&config).unwrap();
        assert_eq!(written["interval_minutes"], 10);
        assert_eq!(written["special_windows"][0]["start"], "16:30");
        assert_eq!(written["special_windows"][0]["interval"], 30);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: ScheduleConfig = serde_json::from_str(r#"{"channel_name": null}"#).unwrap();
        assert_eq!(config, ScheduleConfig::default());
    }

    #[test]
    fn test_blank_channel_is_unset() {
        let config = ScheduleConfig {
            channel_name: Some("   ".to_string()),
            ..ScheduleConfig::default()
        };
        assert_eq!(config.channel(), None);
    }

    #[test]
    fn test_merged_only_touches_some_fields() {
        let base = ScheduleConfig {
            channel_name: Some("garden".to_string()),
            normal_interval_minutes: 15,
            delete_after_upload: true,
            special_windows: vec![SpecialWindow::parse("06:00", "06:10", 10).unwrap()],
        };

        let merged = base.merged(&SettingsUpdate::interval_minutes(2));
        assert_eq!(merged.normal_interval_minutes, 2);
        assert_eq!(merged.channel_name, base.channel_name);
        assert_eq!(merged.special_windows, base.special_windows);
        assert!(merged.delete_after_upload);

        let cleared = base.merged(&SettingsUpdate::windows(Vec::new()));
        assert!(cleared.special_windows.is_empty());
    }

    #[test]
    fn test_sanitize_clamps_zero_intervals() {
        let mut config: ScheduleConfig = serde_json::from_str(
            r#"{"interval_minutes": 0,
                "special_windows": [{"start": "10:00", "end": "11:00", "interval": 0}]}"#,
        )
        .unwrap();

        let fixes = config.sanitize();
        assert_eq!(fixes.len(), 2);
        assert_eq!(config.normal_interval_minutes, 1);
        assert_eq!(config.special_windows[0].interval_seconds, 1);
        assert!(config.sanitize().is_empty());
    }

    #[test]
    fn test_update_validation() {
        let current = ScheduleConfig::default();
        assert!(SettingsUpdate::interval_minutes(1).validate(&current).is_ok());
        assert_eq!(
            SettingsUpdate::interval_minutes(0).validate(&current),
            Err(ValidationError::IntervalTooSmall(0))
        );

        let crossing = SpecialWindow {
            start: hm(23, 0),
            end: hm(1, 0),
            interval_seconds: 5,
        };
        assert!(matches!(
            SettingsUpdate::windows(vec![crossing]).validate(&current),
            Err(ValidationError::CrossesMidnight { .. })
        ));
    }

    #[test]
    fn test_validation_skips_windows_already_held() {
        let crossing = SpecialWindow {
            start: hm(23, 0),
            end: hm(1, 0),
            interval_seconds: 30,
        };
        let current = ScheduleConfig {
            special_windows: vec![crossing],
            ..ScheduleConfig::default()
        };
        let added = SpecialWindow::parse("06:00", "07:00", 60).unwrap();

        let update = SettingsUpdate::windows(vec![crossing, added]);
        assert_eq!(update.validate(&current), Ok(()));

        let second_crossing = SpecialWindow {
            start: hm(22, 0),
            end: hm(2, 0),
            interval_seconds: 30,
        };
        let update = SettingsUpdate::windows(vec![crossing, second_crossing]);
        assert_eq!(
            update.validate(&current),
            Err(ValidationError::CrossesMidnight {
                start: hm(22, 0),
                end: hm(2, 0),
            })
        );
    }

    #[test]
    fn test_unreachable_windows_reported() {
        let config = ScheduleConfig {
            special_windows: vec![
                SpecialWindow::parse("08:00", "09:00", 5).unwrap(),
                SpecialWindow {
                    start: hm(23, 0),
                    end: hm(1, 0),
                    interval_seconds: 5,
                },
            ],
            ..ScheduleConfig::default()
        };
        let unreachable: Vec<usize> = config.unreachable_windows().map(|(i, _)| i).collect();
        assert_eq!(unreachable, vec![1]);
    }
}
