//! Camera relay daemon
//!
//! Captures still images on a time-of-day schedule and posts them to a chat
//! channel. The schedule is edited at runtime through operator commands.

pub mod capture;
pub mod clock;
pub mod command;
pub mod control_server;
pub mod daemon;
pub mod delivery;
pub mod fire;
pub mod schedule;
pub mod settings;
pub mod startup;
pub mod status;

pub use camera_relay_config as config;
pub use camera_relay_config::Config;
pub use capture::{artifact_file_name, CaptureError, CapturePort, StillCapture};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{
    describe_settings, help_text, parse_command, Command, CommandError, CommandReply, COMMANDS,
};
pub use control_server::{
    bind_control_listener, create_control_router, run_control_server, serve_control,
    CommandRequest, ServerError,
};
pub use daemon::{Daemon, DaemonError, TickOutcome};
pub use delivery::{ChannelHandle, ChannelResolver, DeliveryError, DeliveryPort, DiscordClient};
pub use fire::{FireOutcome, FireTimeouts, Relay, ScheduleError, SNAP_LABEL};
pub use schedule::{evaluate, Decision, FireMode};
pub use settings::SharedSettings;
pub use startup::{
    check_capture_available, check_tick_period, check_transport_configured, run_startup_checks,
    StartupError,
};
pub use status::{new_shared_status, SharedStatus, StatusSnapshot};
