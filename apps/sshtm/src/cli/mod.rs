//! # sshtm CLI Module
//!
//! This module implements the CLI interface for sshtm.
//!
//! ## Available Commands
//!
//! - `update` - Refresh state and sensors of the selected hosts
//! - `ping` - Check whether a host answers pings
//! - `exec` - Execute a command on a host
//! - `run` - Run a named action of the host's collection
//! - `sensors` - Read every sensor of a host
//! - `turn-on` - Send a Wake-on-LAN magic packet
//! - `turn-off` - Shut a host down
//! - `restart` - Restart a host
//! - `watch` - Update periodically and print changes

mod commands;

use clap::{Parser, Subcommand};
use sshtm_core::{HostConfig, SshtmConfig, SshtmError};
use std::path::{Path, PathBuf};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// sshtm - SSH Terminal Manager
///
/// Track whether hosts are up, read their sensors and run commands over SSH.
#[derive(Parser, Debug)]
#[command(name = "sshtm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Host name or address (configured or ad hoc)
    #[arg(short = 'H', long, global = true)]
    pub host: Option<String>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Refresh state and sensors
    Update {
        /// Run every sensor command, due or not
        #[arg(short, long)]
        force: bool,

        /// Test the connection when no sensor command is due
        #[arg(short, long)]
        test: bool,

        /// Fail on offline, connection and execution errors
        #[arg(short, long)]
        raise_errors: bool,
    },

    /// Check whether the host answers pings
    Ping,

    /// Execute a command
    Exec {
        /// Timeout in seconds (defaults to the host's command timeout)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Command to execute
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Run a named action
    Run {
        /// Action key
        action: String,

        /// Template variable (key=value), may be repeated
        #[arg(short = 'e', long = "var")]
        vars: Vec<String>,
    },

    /// Read every sensor
    Sensors,

    /// Wake the host with a magic packet
    TurnOn,

    /// Shut the host down (needs allow_turn_off)
    TurnOff,

    /// Restart the host
    Restart,

    /// Update periodically and print changes
    Watch {
        /// Seconds between updates
        #[arg(short, long, default_value = "30")]
        interval: u64,

        /// Stop after this many updates
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },
}

// =============================================================================
// HOST SELECTION
// =============================================================================

/// Load `path`, else the default config file if it exists, else nothing.
pub fn load_config(path: Option<&Path>) -> Result<SshtmConfig, SshtmError> {
    if let Some(path) = path {
        return SshtmConfig::load(path);
    }
    match SshtmConfig::default_path().filter(|p| p.is_file()) {
        Some(path) => SshtmConfig::load(path),
        None => Ok(SshtmConfig::default()),
    }
}

/// Hosts a command applies to: `--host` if given, else every configured host.
///
/// An unknown `--host` is used as an ad hoc host with default options.
pub fn select_hosts(
    config: &SshtmConfig,
    host: Option<&str>,
) -> Result<Vec<HostConfig>, SshtmError> {
    if let Some(key) = host {
        let selected = config
            .host(key)
            .cloned()
            .unwrap_or_else(|| HostConfig::new(key));
        return Ok(vec![selected]);
    }
    if config.hosts.is_empty() {
        return Err(SshtmError::Config(
            "no hosts configured, use --host or --config".to_string(),
        ));
    }
    Ok(config.hosts.clone())
}

/// Exactly one host, for commands that change a host.
pub fn select_host(config: &SshtmConfig, host: Option<&str>) -> Result<HostConfig, SshtmError> {
    let mut hosts = select_hosts(config, host)?;
    if hosts.len() > 1 {
        return Err(SshtmError::Config(format!(
            "{} hosts configured, select one with --host",
            hosts.len()
        )));
    }
    hosts
        .pop()
        .ok_or_else(|| SshtmError::Config("no host selected".to_string()))
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), SshtmError> {
    let config = load_config(cli.config.as_deref())?;
    let host = cli.host.as_deref();
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Update {
            force,
            test,
            raise_errors,
        }) => {
            let options = sshtm_core::UpdateOptions {
                force,
                once: false,
                test,
                raise_errors,
            };
            cmd_update(&config, &select_hosts(&config, host)?, json_mode, options).await
        }
        Some(Commands::Ping) => cmd_ping(&config, &select_hosts(&config, host)?, json_mode).await,
        Some(Commands::Exec { timeout, command }) => {
            let host = select_host(&config, host)?;
            cmd_exec(&config, &host, json_mode, &command.join(" "), timeout).await
        }
        Some(Commands::Run { action, vars }) => {
            let vars = parse_vars(&vars)?;
            cmd_run(&config, &select_host(&config, host)?, json_mode, &action, &vars).await
        }
        Some(Commands::Sensors) => {
            cmd_sensors(&config, &select_host(&config, host)?, json_mode).await
        }
        Some(Commands::TurnOn) => {
            cmd_turn_on(&config, &select_host(&config, host)?, json_mode).await
        }
        Some(Commands::TurnOff) => {
            cmd_turn_off(&config, &select_host(&config, host)?, json_mode).await
        }
        Some(Commands::Restart) => {
            cmd_restart(&config, &select_host(&config, host)?, json_mode).await
        }
        Some(Commands::Watch { interval, count }) => {
            cmd_watch(&config, &select_host(&config, host)?, json_mode, interval, count).await
        }
        None => {
            // No subcommand - refresh every host once
            cmd_update(
                &config,
                &select_hosts(&config, host)?,
                json_mode,
                sshtm_core::UpdateOptions::default(),
            )
            .await
        }
    }
}
