//! Still-image capture
//!
//! Wraps an external still-capture program (`libcamera-still` by default).
//! Each capture writes a new timestamped JPEG and returns its path.

use crate::clock::Clock;
use crate::config::CaptureConfig;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Error type for capture operations
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Capture program exited with non-zero status
    #[error("Capture command failed with exit code: {0}")]
    Failed(i32),

    /// Capture program was terminated by signal
    #[error("Capture command was terminated by signal")]
    Terminated,

    /// Capture program reported success but left no file behind
    #[error("Capture command produced no output at {}", .0.display())]
    MissingOutput(PathBuf),

    /// Capture did not finish in time
    #[error("Capture timed out after {0:?}")]
    TimedOut(Duration),

    /// IO error spawning the capture program
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces an image artifact on demand
#[async_trait]
pub trait CapturePort: Send + Sync {
    /// Capture one image named after `label`, returning the file written
    async fn capture(&self, label: &str) -> Result<PathBuf, CaptureError>;
}

/// File name for a capture taken at `now`: `<label>_<YYYY-MM-DD_HH-MM-SS>.jpg`
pub fn artifact_file_name(label: &str, now: NaiveDateTime) -> String {
    format!("{}_{}.jpg", label, now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Capture backed by an external still-image program
pub struct StillCapture {
    program: String,
    width: u32,
    height: u32,
    output_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl StillCapture {
    pub fn new(config: &CaptureConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            program: config.program.clone(),
            width: config.width,
            height: config.height,
            output_dir: config.output_dir.clone(),
            clock,
        }
    }

    /// Path the next capture with `label` will be written to
    pub fn artifact_path(&self, label: &str) -> PathBuf {
        self.output_dir
            .join(artifact_file_name(label, self.clock.now()))
    }

    /// Build the capture command writing to `output`
    ///
    /// `<program> -o <output> --width W --height H -n`, with `-n` disabling
    /// the preview window. The child is killed if the returned future is
    /// dropped, so a timed-out capture does not linger.
    pub fn build_command(&self, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-o").arg(output);
        cmd.arg("--width").arg(self.width.to_string());
        cmd.arg("--height").arg(self.height.to_string());
        cmd.arg("-n");
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CapturePort for StillCapture {
    async fn capture(&self, label: &str) -> Result<PathBuf, CaptureError> {
        let output = self.artifact_path(label);
        let status = self.build_command(&output).status().await?;

        if !status.success() {
            return Err(match status.code() {
                Some(code) => CaptureError::Failed(code),
                None => CaptureError::Terminated,
            });
        }

        if tokio::fs::metadata(&output).await.is_err() {
            return Err(CaptureError::MissingOutput(output));
        }

        Ok(output)
    }
}
