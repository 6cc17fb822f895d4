//! # sshtm-core
//!
//! The SSH terminal manager for sshtm - THE LIBRARY.
//!
//! A [`Manager`] keeps track of one remote host:
//! - whether it answers pings (`online`) and has an open session (`connected`)
//! - pending power requests (turn on, turn off, restart) and their timeouts
//! - sensors fed by periodically executed commands
//! - actions run on demand
//!
//! ## Layout
//!
//! ```text
//!   Manager<T: Terminal> ──► State (watch channel)
//!        │               ──► Collection ──► SensorCommand ──► Sensor
//!        │                              └─► ActionCommand
//!        ▼
//!   Terminal ◄── SshTerminal (russh) ──► Ping (system ping)
//!                                    └─► shell (interactive mode parser)
//! ```
//!
//! ## Architectural Constraints
//!
//! - Every fallible operation returns `Result<T, SshtmError>`
//! - The manager never touches the network itself; it drives a `Terminal`
//! - State changes are published, never polled

// =============================================================================
// MODULES
// =============================================================================

pub mod collection;
pub mod command;
pub mod config;
pub mod manager;
pub mod ping;
pub mod sensor;
pub mod shell;
pub mod ssh;
pub mod state;
pub mod terminal;
pub mod types;
pub mod wol;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{CommandOutput, Request, SensorValue, SshtmError};

// =============================================================================
// RE-EXPORTS: Commands & Sensors
// =============================================================================

pub use collection::{ActionKey, Collection, SensorKey};
pub use command::{ActionCommand, Command, SensorCommand, Variables};
pub use sensor::{Sensor, SensorKind};

// =============================================================================
// RE-EXPORTS: State & Manager
// =============================================================================

pub use manager::{Manager, ManagerOptions, SensorUpdate, SshManager, UpdateOptions};
pub use state::{State, StateSnapshot};

// =============================================================================
// RE-EXPORTS: Transport
// =============================================================================

pub use ping::Ping;
pub use ssh::{SshOptions, SshTerminal};
pub use terminal::Terminal;

// =============================================================================
// RE-EXPORTS: Configuration
// =============================================================================

pub use config::{HostConfig, SshtmConfig};
