//! # sshtm - SSH Terminal Manager
//!
//! The main binary for sshtm.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  apps/sshtm (THE BINARY)                 │
//! │                                                          │
//! │   ┌──────────────┐        ┌───────────────────────────┐  │
//! │   │  CLI (clap)  │ ─────► │ config.toml / --host      │  │
//! │   └──────┬───────┘        └───────────────────────────┘  │
//! │          ▼                                               │
//! │   ┌──────────────────┐                                   │
//! │   │   sshtm-core     │  Manager ─► SshTerminal (russh)   │
//! │   │  (THE LIBRARY)   │                                   │
//! │   └──────────────────┘                                   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Refresh every configured host
//! sshtm update
//!
//! # Run a command on one host
//! sshtm --host nas.local exec -- df -h
//!
//! # Follow state and sensor changes
//! sshtm --host nas.local watch --interval 10
//! ```

use clap::Parser;
use sshtm::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // SSHTM_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("SSHTM_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "sshtm=debug,sshtm_core=debug"
    } else {
        "sshtm=info,sshtm_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the sshtm startup banner.
fn print_banner() {
    println!(
        r#"
  ┌─┐┌─┐┬ ┬┌┬┐┌┬┐
  └─┐└─┐├─┤ │ │││
  └─┘└─┘┴ ┴ ┴ ┴ ┴

  SSH Terminal Manager v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
