//! Daemon startup and tick loop for the camera relay
//!
//! Owns the shared schedule, the relay and the status counters, drives the
//! scheduler once per tick and answers operator commands.

use crate::capture::StillCapture;
use crate::clock::{Clock, SystemClock};
use crate::command::{
    describe_settings, help_text, parse_command, Command, CommandError, CommandReply,
};
use crate::config::{Config, ConfigError, SettingsStore};
use crate::control_server::{bind_control_listener, serve_control};
use crate::delivery::{DeliveryError, DiscordClient};
use crate::fire::{FireTimeouts, Relay};
use crate::schedule::{evaluate, Decision};
use crate::settings::SharedSettings;
use crate::startup::{run_startup_checks, StartupError};
use crate::status::{new_shared_status, unix_ms_now, SharedStatus, StatusSnapshot};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Readiness checks before the scheduler starts without a ready transport
const READY_ATTEMPTS: u32 = 5;
const READY_RETRY: Duration = Duration::from_secs(5);

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Chat transport could not be set up
    #[error("Transport error: {0}")]
    Transport(#[from] DeliveryError),

    /// Server error
    #[error("Server error: {0}")]
    Server(String),
}

/// What a single tick did
#[derive(Debug)]
pub enum TickOutcome {
    /// Nothing to do this second
    Idle,
    /// A fire was due but the previous one is still running
    Busy,
    /// A fire was started in the background
    Fired(JoinHandle<()>),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    settings: SharedSettings,
    status: SharedStatus,
    relay: Arc<Relay>,
    clock: Arc<dyn Clock>,
    /// Held for the whole of a fire; at most one runs at a time
    in_flight: Arc<Mutex<()>>,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// 1. Load config from file and apply environment overrides
    /// 2. Run startup checks (tick period, token, capture program)
    /// 3. Load the persisted schedule
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        run_startup_checks(&config)?;
        Self::from_config(config)
    }

    /// Initialize the daemon without running startup checks
    pub fn new_without_checks(config: Config) -> Result<Self, DaemonError> {
        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self, DaemonError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let chat = Arc::new(DiscordClient::new(&config.discord)?);
        let capture = Arc::new(StillCapture::new(&config.capture, clock.clone()));
        let timeouts = FireTimeouts {
            capture: Duration::from_secs(config.capture.timeout_secs),
            delivery: Duration::from_secs(config.discord.timeout_secs),
        };
        let settings = SharedSettings::load(SettingsStore::new(&config.schedule.settings_path));
        let relay = Relay::new(capture, chat.clone(), chat, timeouts);
        Ok(Self::with_parts(config, settings, relay, clock))
    }

    /// Assemble a daemon from already-built parts
    pub fn with_parts(
        config: Config,
        settings: SharedSettings,
        relay: Relay,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            settings,
            status: new_shared_status(),
            relay: Arc::new(relay),
            clock,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// Get the shared status
    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    /// Status counters together with the schedule currently in effect
    pub async fn status_snapshot(&self) -> StatusSnapshot {
        let mut snapshot = self.status.read().await.clone();
        snapshot.settings = self.settings.snapshot().await;
        snapshot
    }

    fn tick_period(&self) -> Duration {
        Duration::from_millis(self.config.schedule.tick_millis.max(1))
    }

    /// Evaluate the schedule once and start a fire if one is due
    ///
    /// The fire runs on its own task so a slow camera or upload never delays
    /// the next tick. A due fire is dropped while another one still runs.
    pub async fn tick(&self) -> TickOutcome {
        let now = self.clock.now();
        let config = self.settings.snapshot().await;
        let decision = evaluate(now, &config);
        self.status.write().await.ticks += 1;

        let Decision::Fire(mode) = decision else {
            return TickOutcome::Idle;
        };

        let Ok(guard) = self.in_flight.clone().try_lock_owned() else {
            self.status.write().await.dropped_busy += 1;
            debug!(%now, mode = mode.label(), "Previous capture still running, skipping");
            return TickOutcome::Busy;
        };

        info!(%now, mode = mode.label(), "Capture due");
        let relay = self.relay.clone();
        let status = self.status.clone();
        TickOutcome::Fired(tokio::spawn(async move {
            let _guard = guard;
            let result = relay.on_fire(mode, &config).await;
            if let Err(e) = &result {
                warn!(error = %e, "Scheduled capture failed");
            }
            status.write().await.record_fire(&result, unix_ms_now());
        }))
    }

    /// Wait for the chat transport, giving up after a few attempts
    ///
    /// Ticking starts either way; fires fail and are logged until the
    /// transport comes back.
    async fn wait_for_transport(&self, shutdown: &CancellationToken) {
        let limit = self.relay.timeouts().delivery;
        for attempt in 1..=READY_ATTEMPTS {
            match timeout(limit, self.relay.resolver().check_ready()).await {
                Ok(Ok(())) => {
                    self.status.write().await.transport_ready = true;
                    info!("Chat transport ready");
                    return;
                }
                Ok(Err(e)) => warn!(attempt, error = %e, "Chat transport not ready"),
                Err(_) => warn!(attempt, "Chat transport readiness check timed out"),
            }
            if attempt == READY_ATTEMPTS {
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = sleep(READY_RETRY) => {}
            }
        }
        warn!("Starting scheduler without a ready chat transport");
    }

    /// Wait for an in-flight fire to finish, bounded by its worst-case duration
    async fn drain(&self) {
        let limit = self.relay.timeouts().total();
        match timeout(limit, self.in_flight.lock()).await {
            Ok(_guard) => info!("Scheduler stopped"),
            Err(_) => warn!(?limit, "Capture still running at shutdown, abandoning it"),
        }
    }

    /// Run the scheduler until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), DaemonError> {
        self.wait_for_transport(&shutdown).await;

        let period = self.tick_period();
        info!(?period, "Scheduler started");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Run the scheduler together with the control server
    pub async fn run_with_server(
        self: Arc<Self>,
        shutdown: CancellationToken,
    ) -> Result<(), DaemonError> {
        let listener = bind_control_listener(&self.config.control.bind)
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;
        let server = tokio::spawn(serve_control(listener, self.clone(), shutdown.clone()));

        let result = self.run(shutdown.clone()).await;

        shutdown.cancel();
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Control server error"),
            Err(e) => error!(error = %e, "Control server task failed"),
        }
        result
    }

    /// Parse and handle one line of operator input
    pub async fn handle_text(&self, text: &str) -> CommandReply {
        let prefix = &self.config.control.command_prefix;
        match parse_command(text, prefix) {
            Ok(Some(command)) => self.handle_command(command).await,
            Ok(None) => CommandReply::err(format!(
                "Commands start with '{}'. Try {}help.",
                prefix, prefix
            )),
            Err(e) => CommandReply::err(e.to_string()),
        }
    }

    /// Handle a parsed operator command
    ///
    /// Schedule changes are validated, persisted and published before the
    /// acknowledgement is returned; the next tick sees the new schedule.
    pub async fn handle_command(&self, command: Command) -> CommandReply {
        match command {
            Command::Snap => return self.snap().await,
            Command::Status => {
                return CommandReply::ok(describe_settings(&self.settings.snapshot().await))
            }
            Command::Help => {
                return CommandReply::ok(help_text(&self.config.control.command_prefix))
            }
            _ => {}
        }

        let result = self
            .settings
            .apply_with(|current| {
                command
                    .settings_update(current)
                    .map(Option::unwrap_or_default)
            })
            .await;

        match result {
            Ok(_) => {
                info!(?command, "Schedule updated");
                CommandReply::ok(command.acknowledgement())
            }
            Err(CommandError::Store(e)) => {
                error!(error = %e, "Failed to save schedule");
                CommandReply::err(format!("Failed to save settings: {}", e))
            }
            Err(e) => CommandReply::err(e.to_string()),
        }
    }

    /// Capture and deliver right now
    ///
    /// Shares the in-flight guard with the scheduler, so a snap during a
    /// scheduled capture is refused rather than queued.
    pub async fn snap(&self) -> CommandReply {
        let config = self.settings.snapshot().await;
        let Some(channel) = config.channel().map(str::to_string) else {
            return CommandReply::err(format!(
                "No channel set. Use {}setchannel first.",
                self.config.control.command_prefix
            ));
        };
        let Ok(_guard) = self.in_flight.try_lock() else {
            return CommandReply::err("A capture is already in progress, try again shortly.");
        };

        let result = self.relay.snap(&config).await;
        self.status.write().await.record_fire(&result, unix_ms_now());
        match result {
            Ok(_) => CommandReply::ok(format!("Snapshot sent to #{}.", channel)),
            Err(e) => {
                warn!(error = %e, "Snapshot failed");
                CommandReply::err(format!("Snapshot failed: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fire::tests::{FakeCapture, FakeChat};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    struct Harness {
        daemon: Daemon,
        capture: Arc<FakeCapture>,
        chat: Arc<FakeChat>,
        clock: Arc<ManualClock>,
        _dir: TempDir,
    }

    fn harness_with(capture: FakeCapture, chat: FakeChat, dir: TempDir) -> Harness {
        let mut config = Config::default();
        config.schedule.settings_path = dir.path().join("camera_settings.json");
        let capture = Arc::new(capture);
        let chat = Arc::new(chat);
        let clock = Arc::new(ManualClock::new(at(10, 0, 30)));
        let settings = SharedSettings::load(SettingsStore::new(&config.schedule.settings_path));
        let relay = Relay::new(
            capture.clone(),
            chat.clone(),
            chat.clone(),
            FireTimeouts::default(),
        );
        let daemon = Daemon::with_parts(config, settings, relay, clock.clone());
        Harness {
            daemon,
            capture,
            chat,
            clock,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let capture = FakeCapture::new(dir.path());
        harness_with(capture, FakeChat::with_channel("garden"), dir)
    }

    #[tokio::test]
    async fn test_tick_without_channel_is_idle() {
        let h = harness();
        h.clock.set(at(10, 5, 0));

        assert!(matches!(h.daemon.tick().await, TickOutcome::Idle));
        assert_eq!(h.daemon.status().read().await.ticks, 1);
        assert!(h.capture.labels().is_empty());
    }

    #[tokio::test]
    async fn test_tick_on_boundary_fires_and_delivers() {
        let h = harness();
        assert!(h.daemon.handle_text("$setchannel garden").await.ok);

        h.clock.set(at(10, 4, 59));
        assert!(matches!(h.daemon.tick().await, TickOutcome::Idle));

        h.clock.set(at(10, 5, 0));
        let TickOutcome::Fired(handle) = h.daemon.tick().await else {
            panic!("expected a fire on the 5-minute boundary");
        };
        handle.await.unwrap();

        assert_eq!(h.capture.labels(), vec!["interval".to_string()]);
        assert_eq!(h.chat.delivered().len(), 1);
        let status = h.daemon.status_snapshot().await;
        assert_eq!(status.ticks, 2);
        assert_eq!(status.fires, 1);
        assert_eq!(status.deliveries, 1);
        assert_eq!(status.settings.channel(), Some("garden"));
    }

    #[tokio::test]
    async fn test_special_window_fires_with_special_label() {
        let h = harness();
        h.daemon.handle_text("$setchannel garden").await;
        assert!(h.daemon.handle_text("$addwindow 16:30 16:35 30").await.ok);

        h.clock.set(at(16, 30, 30));
        let TickOutcome::Fired(handle) = h.daemon.tick().await else {
            panic!("expected a special-window fire");
        };
        handle.await.unwrap();

        // Window end is inclusive
        h.clock.set(at(16, 35, 0));
        let TickOutcome::Fired(handle) = h.daemon.tick().await else {
            panic!("expected a fire at the inclusive window end");
        };
        handle.await.unwrap();

        assert_eq!(
            h.capture.labels(),
            vec!["special".to_string(), "special".to_string()]
        );
    }

    #[tokio::test]
    async fn test_due_fire_is_dropped_while_busy() {
        let h = harness();
        h.daemon.handle_text("$setchannel garden").await;
        h.clock.set(at(10, 5, 0));

        let held = h.daemon.in_flight.clone().try_lock_owned().unwrap();
        assert!(matches!(h.daemon.tick().await, TickOutcome::Busy));
        drop(held);

        assert_eq!(h.daemon.status().read().await.dropped_busy, 1);
        assert!(h.capture.labels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_capture_blocks_next_fire() {
        let dir = TempDir::new().unwrap();
        let mut capture = FakeCapture::new(dir.path());
        capture.delay = Duration::from_secs(10);
        let h = harness_with(capture, FakeChat::with_channel("garden"), dir);
        h.daemon.handle_text("$setchannel garden").await;
        h.clock.set(at(10, 5, 0));

        let TickOutcome::Fired(handle) = h.daemon.tick().await else {
            panic!("expected a fire");
        };
        tokio::task::yield_now().await;
        assert!(matches!(h.daemon.tick().await, TickOutcome::Busy));
        handle.await.unwrap();

        let status = h.daemon.status_snapshot().await;
        assert_eq!(status.fires, 1);
        assert_eq!(status.dropped_busy, 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_counted() {
        let dir = TempDir::new().unwrap();
        let capture = FakeCapture::new(dir.path());
        let mut chat = FakeChat::with_channel("garden");
        chat.fail_delivery = true;
        let h = harness_with(capture, chat, dir);
        h.daemon.handle_text("$setchannel garden").await;
        h.clock.set(at(10, 5, 0));

        let TickOutcome::Fired(handle) = h.daemon.tick().await else {
            panic!("expected a fire");
        };
        handle.await.unwrap();

        let status = h.daemon.status_snapshot().await;
        assert_eq!(status.failures, 1);
        assert_eq!(status.deliveries, 0);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_commands_update_and_persist_schedule() {
        let h = harness();

        let reply = h.daemon.handle_text("$setinterval 10").await;
        assert_eq!(reply, CommandReply::ok("Interval set to every 10 minutes."));

        let reply = h.daemon.handle_text("$autodelete on").await;
        assert!(reply.ok);

        let stored = h.daemon.settings().store().load();
        assert_eq!(stored.normal_interval_minutes, 10);
        assert!(stored.delete_after_upload);

        h.daemon.handle_text("$addwindow 06:00 07:00 60").await;
        assert_eq!(h.daemon.settings().snapshot().await.special_windows.len(), 1);
        h.daemon.handle_text("$clearwindows").await;
        assert!(h.daemon.settings().snapshot().await.special_windows.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_commands_change_nothing() {
        let h = harness();

        let reply = h.daemon.handle_text("$setinterval 0").await;
        assert_eq!(reply, CommandReply::err("Interval must be at least 1 minute."));

        let reply = h.daemon.handle_text("$addwindow 23:00 01:00 30").await;
        assert!(!reply.ok);

        let reply = h.daemon.handle_text("$reboot").await;
        assert!(!reply.ok);

        let reply = h.daemon.handle_text("hello").await;
        assert!(!reply.ok);

        assert_eq!(
            h.daemon.settings().snapshot().await,
            crate::config::ScheduleConfig::default()
        );
        assert!(!h.daemon.settings().store().path().exists());
    }

    #[tokio::test]
    async fn test_add_window_beside_unreachable_window_from_disk() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("camera_settings.json"),
            r#"{"channel_name": "garden", "interval_minutes": 5,
                "delete_after_upload": false,
                "special_windows": [{"start": "23:00", "end": "01:00", "interval": 30}]}"#,
        )
        .unwrap();
        let capture = FakeCapture::new(dir.path());
        let h = harness_with(capture, FakeChat::with_channel("garden"), dir);

        let reply = h.daemon.handle_text("$addwindow 06:00 07:00 60").await;
        assert_eq!(
            reply,
            CommandReply::ok("Special window added: 06:00-07:00 every 60s.")
        );

        let stored = h.daemon.settings().store().load();
        assert_eq!(stored.special_windows.len(), 2);
        assert_eq!(stored.special_windows[1].to_string(), "06:00-07:00 every 60s");

        // A new crossing window is still refused
        let reply = h.daemon.handle_text("$addwindow 22:00 02:00 30").await;
        assert!(!reply.ok);
        assert!(reply.message.contains("22:00"));
    }

    #[tokio::test]
    async fn test_status_and_help_replies() {
        let h = harness();
        h.daemon.handle_text("$setchannel garden").await;

        let status = h.daemon.handle_text("$status").await;
        assert!(status.ok);
        assert!(status.message.contains("Channel: #garden"));

        let help = h.daemon.handle_text("$help").await;
        assert!(help.message.contains("$snap"));
    }

    #[tokio::test]
    async fn test_snap_requires_channel() {
        let h = harness();
        let reply = h.daemon.handle_text("$snap").await;
        assert_eq!(
            reply,
            CommandReply::err("No channel set. Use $setchannel first.")
        );
        assert!(h.capture.labels().is_empty());
    }

    #[tokio::test]
    async fn test_snap_delivers_immediately() {
        let h = harness();
        h.daemon.handle_text("$setchannel garden").await;

        let reply = h.daemon.handle_text("$snap").await;

        assert_eq!(reply, CommandReply::ok("Snapshot sent to #garden."));
        assert_eq!(h.capture.labels(), vec!["snap".to_string()]);
        assert_eq!(h.daemon.status().read().await.deliveries, 1);
    }

    #[tokio::test]
    async fn test_snap_to_unknown_channel_reports_failure() {
        let h = harness();
        h.daemon.handle_text("$setchannel elsewhere").await;

        let reply = h.daemon.handle_text("$snap").await;

        assert!(!reply.ok);
        assert!(reply.message.contains("elsewhere"));
        assert!(h.capture.labels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_cancelled() {
        let h = harness();
        h.daemon.handle_text("$setchannel garden").await;
        h.clock.set(at(10, 5, 0));
        let daemon = Arc::new(h.daemon);
        let shutdown = CancellationToken::new();

        let task = {
            let daemon = daemon.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { daemon.run(shutdown).await })
        };
        sleep(Duration::from_millis(3_500)).await;
        shutdown.cancel();
        task.await.unwrap().unwrap();

        let status = daemon.status_snapshot().await;
        assert!(status.transport_ready);
        assert!(status.ticks >= 3);
        assert!(status.fires >= 1);
        assert_eq!(status.fires, status.deliveries);
        assert!(!h.chat.delivered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_proceeds_when_transport_never_ready() {
        let dir = TempDir::new().unwrap();
        let capture = FakeCapture::new(dir.path());
        let mut chat = FakeChat::with_channel("garden");
        chat.ready = false;
        let h = harness_with(capture, chat, dir);
        let daemon = Arc::new(h.daemon);
        let shutdown = CancellationToken::new();

        let task = {
            let daemon = daemon.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { daemon.run(shutdown).await })
        };
        sleep(READY_RETRY * READY_ATTEMPTS + Duration::from_secs(3)).await;
        shutdown.cancel();
        task.await.unwrap().unwrap();

        let status = daemon.status_snapshot().await;
        assert!(!status.transport_ready);
        assert!(status.ticks >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_readiness_wait() {
        let dir = TempDir::new().unwrap();
        let capture = FakeCapture::new(dir.path());
        let mut chat = FakeChat::with_channel("garden");
        chat.ready = false;
        let h = harness_with(capture, chat, dir);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        h.daemon.run(shutdown).await.unwrap();

        assert_eq!(h.daemon.status().read().await.ticks, 0);
    }
}
