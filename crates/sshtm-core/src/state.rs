//! # State Module
//!
//! Host state tracked by a manager:
//! - `online`: the host answers pings
//! - `connected`: an SSH session is established
//! - `request`: a pending power/connection request, expires after a timeout
//! - `error`: latched on authentication / host key failures
//!
//! Every change is logged at debug level and published as a
//! [`StateSnapshot`] on a watch channel.

use crate::Request;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Immutable copy of a host state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub online: bool,
    pub connected: bool,
    pub request: Option<Request>,
    pub error: bool,
}

// =============================================================================
// STATE
// =============================================================================

/// Mutable host state with change notification.
#[derive(Debug)]
pub struct State {
    name: String,
    current: StateSnapshot,
    request_timestamp: Instant,
    tx: watch::Sender<StateSnapshot>,
}

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(StateSnapshot::default());
        Self {
            name: name.into(),
            current: StateSnapshot::default(),
            request_timestamp: Instant::now(),
            tx,
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.current
    }

    pub fn online(&self) -> bool {
        self.current.online
    }

    pub fn connected(&self) -> bool {
        self.current.connected
    }

    pub fn request(&self) -> Option<Request> {
        self.current.request
    }

    pub fn error(&self) -> bool {
        self.current.error
    }

    /// Receive a snapshot every time the state changes.
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.tx.subscribe()
    }

    pub fn set_online(&mut self, online: bool) {
        if self.current.online != online {
            self.current.online = online;
            self.changed("online", online);
        }
    }

    pub fn set_connected(&mut self, connected: bool) {
        if self.current.connected != connected {
            self.current.connected = connected;
            self.changed("connected", connected);
        }
    }

    pub fn set_error(&mut self, error: bool) {
        if self.current.error != error {
            self.current.error = error;
            self.changed("error", error);
        }
    }

    /// Set the pending request, stamping its time when it changes.
    pub fn set_request(&mut self, request: Option<Request>) {
        if self.current.request != request {
            self.current.request = request;
            self.request_timestamp = Instant::now();
            let shown = request.map(Request::as_str).unwrap_or("none");
            self.changed("request", shown);
        }
    }

    /// Clear the pending request once its timeout has elapsed.
    pub fn expire_request(&mut self) {
        let Some(request) = self.current.request else {
            return;
        };
        if self.request_timestamp.elapsed() > request.timeout() {
            self.set_request(None);
        }
    }

    fn changed(&self, field: &str, value: impl std::fmt::Display) {
        tracing::debug!("{}: state.{} => {}", self.name, field, value);
        self.tx.send_replace(self.current);
    }
}

// =============================================================================
// TESTS
// =============================================================================
