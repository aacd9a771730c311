//! CLI entry point for the camera relay
//!
//! `run` starts the scheduler and control server; `send` and `status` talk to
//! a daemon that is already running; `show` reads the settings file directly.

use camera_relay::config::SettingsStore;
use camera_relay::{describe_settings, CommandReply, CommandRequest, Config, Daemon, StatusSnapshot};
use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Camera relay - scheduled still captures posted to a chat channel
#[derive(Parser, Debug)]
#[command(name = "camera-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Action {
    /// Run the scheduler and control server (default)
    Run {
        /// Skip startup checks (capture program, token). For testing only.
        #[arg(long, default_value = "false")]
        skip_checks: bool,
    },
    /// Send an operator command to the running daemon, e.g. `send addwindow 16:30 16:35 30`
    Send {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },
    /// Print the running daemon's status as JSON
    Status,
    /// Print the persisted capture schedule
    Show,
}

type CliResult = Result<ExitCode, Box<dyn Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let action = args.action.unwrap_or(Action::Run { skip_checks: false });

    let result = match action {
        Action::Run { skip_checks } => run(&args.config, skip_checks).await,
        Action::Send { words } => send(&args.config, &words.join(" ")).await,
        Action::Status => status(&args.config).await,
        Action::Show => show(&args.config),
    };

    result.unwrap_or_else(|e| {
        error!(error = %e, "camera-relay failed");
        ExitCode::FAILURE
    })
}

async fn run(config_path: &Path, skip_checks: bool) -> CliResult {
    info!(config = %config_path.display(), "Camera relay starting");

    let daemon = if skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
        Daemon::new_without_checks(Config::load(config_path)?)?
    } else {
        Daemon::new(config_path)?
    };
    let daemon = Arc::new(daemon);
    info!(
        settings = %daemon.config.schedule.settings_path.display(),
        control = %daemon.config.control.bind,
        "Daemon initialized"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
            }
        }
    });

    daemon.run_with_server(shutdown).await?;
    Ok(ExitCode::SUCCESS)
}

fn control_url(config_path: &Path, endpoint: &str) -> Result<String, Box<dyn Error>> {
    let config = Config::load(config_path)?;
    Ok(format!("http://{}/{}", config.control.bind, endpoint))
}

async fn send(config_path: &Path, text: &str) -> CliResult {
    let url = control_url(config_path, "command")?;
    let reply: CommandReply = reqwest::Client::new()
        .post(&url)
        .json(&CommandRequest {
            text: text.to_string(),
        })
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    println!("{}", reply.message);
    Ok(if reply.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn status(config_path: &Path) -> CliResult {
    let url = control_url(config_path, "status")?;
    let status: StatusSnapshot = reqwest::get(&url).await?.error_for_status()?.json().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(ExitCode::SUCCESS)
}

fn show(config_path: &Path) -> CliResult {
    let config = Config::load(config_path)?;
    let store = SettingsStore::new(&config.schedule.settings_path);
    println!("Settings file: {}", store.path().display());
    println!("{}", describe_settings(&store.load()));
    Ok(ExitCode::SUCCESS)
}
