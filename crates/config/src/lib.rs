//! Configuration for the camera relay daemon
//!
//! Holds the daemon's TOML configuration (with environment variable overrides),
//! the operator-editable capture schedule, and the JSON store that persists it.

pub mod config;
pub mod schedule;
pub mod store;

pub use config::*;
pub use schedule::*;
pub use store::*;
