//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use serde::Serialize;
use sshtm_core::{
    CommandOutput, HostConfig, Manager, Request, SensorUpdate, SensorValue, SshManager,
    SshtmConfig, SshtmError, StateSnapshot, Terminal, UpdateOptions, Variables,
};
use std::time::Duration;

// =============================================================================
// REPORTS
// =============================================================================

/// One sensor as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReport {
    pub key: String,
    pub name: String,
    pub value: Option<SensorValue>,
    pub unit: Option<String>,
}

/// State and sensors of one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostReport {
    pub name: String,
    pub host: String,
    pub online: bool,
    pub connected: bool,
    pub request: Option<Request>,
    pub error: bool,
    pub sensors: Vec<SensorReport>,
}

impl HostReport {
    pub fn from_manager<T: Terminal>(manager: &Manager<T>) -> Self {
        let state = manager.state();
        Self {
            name: manager.name().to_string(),
            host: manager.host().to_string(),
            online: state.online,
            connected: state.connected,
            request: state.request,
            error: state.error,
            sensors: manager
                .collection()
                .sensors()
                .map(|s| SensorReport {
                    key: s.key.clone(),
                    name: s.display_name().to_string(),
                    value: s.value().cloned(),
                    unit: s.unit().map(str::to_string),
                })
                .collect(),
        }
    }

    fn print(&self) {
        println!("{} ({})", self.name, self.host);
        println!("  State:    {}", describe_state(self.online, self.connected, self.error));
        println!(
            "  Request:  {}",
            self.request.map(Request::as_str).unwrap_or("none")
        );
        if self.sensors.is_empty() {
            return;
        }
        println!();
        for sensor in &self.sensors {
            let value = match (&sensor.value, &sensor.unit) {
                (Some(v), Some(unit)) => format!("{} {}", v, unit),
                (Some(v), None) => v.to_string(),
                (None, _) => "unknown".to_string(),
            };
            println!("  {:<16} {}", sensor.name, value);
        }
    }
}

fn describe_state(online: bool, connected: bool, error: bool) -> String {
    let mut parts = vec![if online { "online" } else { "offline" }];
    if connected {
        parts.push("connected");
    }
    if error {
        parts.push("error");
    }
    parts.join(", ")
}

fn print_json(value: &impl Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

fn print_output(output: &CommandOutput, json_mode: bool) {
    if json_mode {
        print_json(output);
        return;
    }
    for line in &output.stdout {
        println!("{}", line);
    }
    for line in &output.stderr {
        eprintln!("{}", line);
    }
}

/// Parse `key=value` pairs into template variables.
pub fn parse_vars(vars: &[String]) -> Result<Variables, SshtmError> {
    vars.iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(SshtmError::Config(format!(
                "invalid variable '{}', expected key=value",
                pair
            ))),
        })
        .collect()
}

/// Ping, then connect unless the host runs in disconnect mode.
async fn open(manager: &mut SshManager) -> Result<(), SshtmError> {
    manager.ping().await?;
    if !manager.disconnect_mode() {
        manager.connect().await?;
    }
    Ok(())
}

// =============================================================================
// UPDATE COMMAND
// =============================================================================

/// Update every host and print its report.
pub async fn cmd_update(
    config: &SshtmConfig,
    hosts: &[HostConfig],
    json_mode: bool,
    options: UpdateOptions,
) -> Result<(), SshtmError> {
    let mut reports = Vec::with_capacity(hosts.len());
    let mut failed = None;

    for host in hosts {
        let mut manager = host.build_manager(config)?;
        if let Err(e) = manager.update(options).await {
            tracing::error!("{}: {}", manager.name(), e);
            failed = Some(e);
        }
        reports.push(HostReport::from_manager(&manager));
        manager.disconnect().await;
    }

    if json_mode {
        print_json(&reports);
    } else {
        for (i, report) in reports.iter().enumerate() {
            if i > 0 {
                println!();
            }
            report.print();
        }
    }

    failed.map_or(Ok(()), Err)
}

// =============================================================================
// PING COMMAND
// =============================================================================

/// Ping every host.
pub async fn cmd_ping(
    config: &SshtmConfig,
    hosts: &[HostConfig],
    json_mode: bool,
) -> Result<(), SshtmError> {
    let mut results = Vec::with_capacity(hosts.len());

    for host in hosts {
        let mut manager = host.build_manager(config)?;
        let online = match manager.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("{}", e);
                false
            }
        };
        results.push((manager.name().to_string(), manager.host().to_string(), online));
    }

    if json_mode {
        let output: Vec<serde_json::Value> = results
            .iter()
            .map(|(name, host, online)| {
                serde_json::json!({
                    "name": name,
                    "host": host,
                    "online": online
                })
            })
            .collect();
        print_json(&output);
        return Ok(());
    }

    for (name, _, online) in &results {
        println!("{}: {}", name, if *online { "online" } else { "offline" });
    }
    Ok(())
}

// =============================================================================
// EXEC & RUN COMMANDS
// =============================================================================

/// Execute a command string on a host.
pub async fn cmd_exec(
    config: &SshtmConfig,
    host: &HostConfig,
    json_mode: bool,
    command: &str,
    timeout: Option<u64>,
) -> Result<(), SshtmError> {
    let mut manager = host.build_manager(config)?;
    open(&mut manager).await?;

    let result = manager
        .execute_command_string(command, timeout.map(Duration::from_secs))
        .await;
    manager.disconnect().await;
    let output = result?;

    print_output(&output, json_mode);
    if !output.is_success() {
        return Err(SshtmError::Execution(format!(
            "'{}' exited with code {}",
            command, output.code
        )));
    }
    Ok(())
}

/// Run a named action of the host's collection.
pub async fn cmd_run(
    config: &SshtmConfig,
    host: &HostConfig,
    json_mode: bool,
    action: &str,
    vars: &Variables,
) -> Result<(), SshtmError> {
    let mut manager = host.build_manager(config)?;
    let result = run_with_sensors(&mut manager, action, vars).await;
    manager.disconnect().await;

    print_output(&result?, json_mode);
    Ok(())
}

/// Read every sensor once, then run the action with the caller's variables
/// layered over the sensor values.
pub async fn run_with_sensors<T: Terminal>(
    manager: &mut Manager<T>,
    action: &str,
    vars: &Variables,
) -> Result<CommandOutput, SshtmError> {
    let options = UpdateOptions {
        once: true,
        raise_errors: true,
        ..UpdateOptions::default()
    };
    manager.update(options).await?;
    manager.run_action(action, vars).await
}

// =============================================================================
// SENSORS COMMAND
// =============================================================================

/// Run every sensor command once and print the readings.
pub async fn cmd_sensors(
    config: &SshtmConfig,
    host: &HostConfig,
    json_mode: bool,
) -> Result<(), SshtmError> {
    let mut manager = host.build_manager(config)?;
    let options = UpdateOptions {
        force: true,
        raise_errors: true,
        ..UpdateOptions::default()
    };

    let result = manager.update(options).await;
    manager.disconnect().await;
    result?;

    let report = HostReport::from_manager(&manager);
    if json_mode {
        print_json(&report.sensors);
    } else {
        report.print();
    }
    Ok(())
}

// =============================================================================
// POWER COMMANDS
// =============================================================================

/// Send a Wake-on-LAN packet unless the host is already up.
pub async fn cmd_turn_on(
    config: &SshtmConfig,
    host: &HostConfig,
    json_mode: bool,
) -> Result<(), SshtmError> {
    let mut manager = host.build_manager(config)?;
    if let Err(e) = manager.ping().await {
        tracing::debug!("{}", e);
    }

    let already_online = manager.state().online;
    manager.turn_on().await?;

    if json_mode {
        print_json(&serde_json::json!({
            "name": manager.name(),
            "online": already_online,
            "request": manager.state().request,
            "mac_address": manager.mac_address()
        }));
    } else if already_online {
        println!("{} is already online", manager.name());
    } else {
        println!(
            "Magic packet sent to {} ({})",
            manager.name(),
            manager.mac_address().unwrap_or_default()
        );
    }
    Ok(())
}

/// Run the turn_off action.
pub async fn cmd_turn_off(
    config: &SshtmConfig,
    host: &HostConfig,
    json_mode: bool,
) -> Result<(), SshtmError> {
    let mut manager = host.build_manager(config)?;
    if !manager.allow_turn_off() {
        return Err(SshtmError::TurnOffNotAllowed);
    }
    open(&mut manager).await?;
    manager.turn_off().await?;
    print_request(&manager, json_mode);
    Ok(())
}

/// Run the restart action.
pub async fn cmd_restart(
    config: &SshtmConfig,
    host: &HostConfig,
    json_mode: bool,
) -> Result<(), SshtmError> {
    let mut manager = host.build_manager(config)?;
    open(&mut manager).await?;
    manager.restart().await?;
    print_request(&manager, json_mode);
    Ok(())
}

fn print_request(manager: &SshManager, json_mode: bool) {
    let request = manager.state().request;
    if json_mode {
        print_json(&serde_json::json!({
            "name": manager.name(),
            "request": request
        }));
        return;
    }
    println!(
        "{}: {}",
        manager.name(),
        request.map(Request::as_str).unwrap_or("none")
    );
}

// =============================================================================
// WATCH COMMAND
// =============================================================================

/// Update periodically and print state and sensor changes until Ctrl+C.
pub async fn cmd_watch(
    config: &SshtmConfig,
    host: &HostConfig,
    json_mode: bool,
    interval: u64,
    count: Option<u64>,
) -> Result<(), SshtmError> {
    let mut manager = host.build_manager(config)?;
    let mut state_rx = manager.subscribe();
    let mut sensor_rx = manager.subscribe_sensors();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    let options = UpdateOptions {
        test: true,
        ..UpdateOptions::default()
    };
    let mut rounds = 0u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = manager.update(options).await {
            tracing::warn!("{}: {}", manager.name(), e);
        }

        if state_rx.has_changed().unwrap_or(false) {
            let snapshot = *state_rx.borrow_and_update();
            print_state_change(manager.name(), &snapshot, json_mode);
        }
        while let Ok(update) = sensor_rx.try_recv() {
            print_sensor_change(manager.name(), &update, json_mode);
        }

        rounds += 1;
        if count.is_some_and(|c| rounds >= c) {
            break;
        }
    }

    manager.disconnect().await;
    Ok(())
}

fn print_state_change(name: &str, snapshot: &StateSnapshot, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            serde_json::json!({ "event": "state", "name": name, "state": snapshot })
        );
        return;
    }
    println!(
        "{}: {} (request: {})",
        name,
        describe_state(snapshot.online, snapshot.connected, snapshot.error),
        snapshot.request.map(Request::as_str).unwrap_or("none")
    );
}

fn print_sensor_change(name: &str, update: &SensorUpdate, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            serde_json::json!({ "event": "sensor", "name": name, "sensor": update })
        );
        return;
    }
    let value = update
        .value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string());
    println!("{}: {} = {}", name, update.key, value);
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_state_lists_flags() {
        assert_eq!(describe_state(false, false, false), "offline");
        assert_eq!(describe_state(true, true, false), "online, connected");
        assert_eq!(describe_state(true, false, true), "online, error");
    }

    #[test]
    fn parse_vars_splits_on_first_equals() {
        let vars = parse_vars(&["service=nginx".into(), "args=a=b".into()]).expect("vars");
        assert_eq!(vars.get("service").map(String::as_str), Some("nginx"));
        assert_eq!(vars.get("args").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn parse_vars_rejects_malformed() {
        assert!(parse_vars(&["novalue".into()]).is_err());
        assert!(parse_vars(&["=value".into()]).is_err());
    }
}
