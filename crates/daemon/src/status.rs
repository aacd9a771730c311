//! Runtime status counters
//!
//! Served as JSON by the control server's `/status` endpoint.

use crate::config::ScheduleConfig;
use crate::fire::{FireOutcome, ScheduleError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Point-in-time view of the daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    /// Schedule in effect when the snapshot was taken
    pub settings: ScheduleConfig,
    /// Whether the chat transport has reported ready
    pub transport_ready: bool,
    pub ticks: u64,
    /// Fire decisions handed to the relay (scheduled and snaps)
    pub fires: u64,
    pub deliveries: u64,
    /// Fire decisions dropped because a capture was still running
    pub dropped_busy: u64,
    pub failures: u64,
    pub last_fire_unix_ms: Option<i64>,
    pub last_artifact: Option<String>,
    pub last_error: Option<String>,
}

/// Shared status state
pub type SharedStatus = Arc<RwLock<StatusSnapshot>>;

/// Creates a new SharedStatus with zeroed counters
pub fn new_shared_status() -> SharedStatus {
    Arc::new(RwLock::new(StatusSnapshot::default()))
}

impl StatusSnapshot {
    /// Count the result of one fire
    pub fn record_fire(&mut self, result: &Result<FireOutcome, ScheduleError>, at_unix_ms: i64) {
        self.fires += 1;
        self.last_fire_unix_ms = Some(at_unix_ms);
        match result {
            Ok(outcome) => {
                self.deliveries += 1;
                self.last_artifact = Some(outcome.artifact.display().to_string());
            }
            Err(e) => {
                self.failures += 1;
                self.last_error = Some(e.to_string());
            }
        }
    }
}

/// Current time in milliseconds since the Unix epoch
pub fn unix_ms_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
