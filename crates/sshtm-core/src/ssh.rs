//! # SSH Terminal
//!
//! [`Terminal`] implementation on top of `russh`.
//!
//! ## Host keys
//!
//! The server key is checked against the host keys file (created empty if
//! missing) and, when enabled, the user's `~/.ssh/known_hosts`. An unknown
//! key is learned into the host keys file with `add_host_keys`, otherwise the
//! connection is refused with `HostKeyUnknown`. A mismatching key is always
//! refused.
//!
//! ## Execution modes
//!
//! - exec: one `exec` request per command, stdout/stderr/exit status read
//!   from the channel
//! - shell: a PTY shell is opened and the command typed line by line, see
//!   [`crate::shell`]

use crate::ping::Ping;
use crate::shell::{self, ECHO_STRING, EXIT_STRING, ShellParser};
use crate::terminal::Terminal;
use crate::{CommandOutput, SshtmError};
use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_SSH_TIMEOUT: Duration = Duration::from_secs(4);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(4);

/// Width of the PTY used in shell mode. Long enough that typed commands
/// are never wrapped by the remote terminal.
const SHELL_WIDTH: u32 = 4095;
/// Pause after each line typed into `cmd.exe`, which drops fast input.
const CMD_LINE_DELAY: Duration = Duration::from_millis(1500);
/// How long to wait for the first shell bytes when detecting `cmd.exe`.
const SHELL_DETECT_WINDOW: Duration = Duration::from_secs(1);

// =============================================================================
// OPTIONS
// =============================================================================

/// Connection options for an [`SshTerminal`].
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub key_filename: Option<PathBuf>,
    pub host_keys_filename: Option<PathBuf>,
    pub add_host_keys: bool,
    pub load_system_host_keys: bool,
    pub invoke_shell: bool,
    pub ssh_timeout: Duration,
    pub ping_timeout: Duration,
}

impl SshOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            key_filename: None,
            host_keys_filename: None,
            add_host_keys: false,
            load_system_host_keys: false,
            invoke_shell: false,
            ssh_timeout: DEFAULT_SSH_TIMEOUT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }

    /// Username to log in with, falling back to the local user.
    pub fn login(&self) -> String {
        self.username
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "root".to_string())
    }
}

// =============================================================================
// HOST KEY CHECKING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostKeyVerdict {
    Unknown,
    Changed,
}

struct ClientHandler {
    host: String,
    port: u16,
    known_hosts: Vec<PathBuf>,
    learn_into: Option<PathBuf>,
    add_host_keys: bool,
    verdict: Arc<Mutex<Option<HostKeyVerdict>>>,
}

impl ClientHandler {
    fn reject(&self, verdict: HostKeyVerdict) -> Result<bool, russh::Error> {
        if let Ok(mut slot) = self.verdict.lock() {
            *slot = Some(verdict);
        }
        Ok(false)
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        for path in &self.known_hosts {
            let known =
                russh_keys::check_known_hosts_path(&self.host, self.port, server_public_key, path);
            match known {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(russh_keys::Error::KeyChanged { .. }) => {
                    return self.reject(HostKeyVerdict::Changed);
                }
                Err(e) => {
                    tracing::debug!("{}: cannot read {}: {}", self.host, path.display(), e);
                }
            }
        }

        if !self.add_host_keys {
            return self.reject(HostKeyVerdict::Unknown);
        }

        if let Some(path) = &self.learn_into {
            let learned =
                russh_keys::learn_known_hosts_path(&self.host, self.port, server_public_key, path);
            match learned {
                Ok(()) => {
                    tracing::debug!("{}: host key added to {}", self.host, path.display());
                }
                Err(e) => tracing::warn!("{}: cannot add host key: {}", self.host, e),
            }
        }
        Ok(true)
    }
}

// =============================================================================
// SSH TERMINAL
// =============================================================================

/// A [`Terminal`] backed by an SSH session.
pub struct SshTerminal {
    options: SshOptions,
    ping: Ping,
    known_hosts: Option<Vec<PathBuf>>,
    session: Option<Handle<ClientHandler>>,
}

impl SshTerminal {
    pub fn new(options: SshOptions) -> Self {
        let ping = Ping::new(options.host.clone(), options.ping_timeout);
        Self {
            options,
            ping,
            known_hosts: None,
            session: None,
        }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_closed())
    }

    fn handler(
        &self,
        known_hosts: Vec<PathBuf>,
        verdict: Arc<Mutex<Option<HostKeyVerdict>>>,
    ) -> ClientHandler {
        ClientHandler {
            host: self.options.host.clone(),
            port: self.options.port,
            known_hosts,
            learn_into: self.options.host_keys_filename.clone(),
            add_host_keys: self.options.add_host_keys,
            verdict,
        }
    }

    async fn authenticate(&self, session: &mut Handle<ClientHandler>) -> Result<(), SshtmError> {
        let user = self.options.login();

        if let Some(path) = &self.options.key_filename {
            let key = russh_keys::load_secret_key(path, self.options.password.as_deref())
                .map_err(|e| {
                    SshtmError::Authentication(format!("cannot load {}: {e}", path.display()))
                })?;
            let accepted = session
                .authenticate_publickey(user.clone(), Arc::new(key))
                .await
                .map_err(|e| SshtmError::Connect(e.to_string()))?;
            if accepted {
                return Ok(());
            }
        }

        if let Some(password) = &self.options.password {
            let accepted = session
                .authenticate_password(user.clone(), password.clone())
                .await
                .map_err(|e| SshtmError::Connect(e.to_string()))?;
            if accepted {
                return Ok(());
            }
        }

        Err(SshtmError::Authentication(format!("credentials rejected for {user}")))
    }

    fn session(&self) -> Result<&Handle<ClientHandler>, SshtmError> {
        self.session
            .as_ref()
            .filter(|s| !s.is_closed())
            .ok_or_else(|| SshtmError::Execution("Not connected".to_string()))
    }

    async fn open_channel(&self) -> Result<Channel<Msg>, SshtmError> {
        self.session()?
            .channel_open_session()
            .await
            .map_err(|e| SshtmError::Execution(format!("Failed to open channel: {e}")))
    }

    async fn execute_without_shell(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SshtmError> {
        let mut channel = self.open_channel().await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshtmError::Execution(format!("Failed to execute command: {e}")))?;

        let read = tokio::time::timeout(timeout, read_exec(&mut channel)).await;
        let Ok(output) = read else {
            let _ = channel.close().await;
            return Err(SshtmError::Timeout(timeout));
        };
        Ok(output.into_output(command))
    }

    async fn execute_with_shell(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SshtmError> {
        let mut channel = self.open_channel().await?;
        channel
            .request_pty(false, "xterm", SHELL_WIDTH, 24, 0, 0, &[])
            .await
            .map_err(|e| SshtmError::Execution(format!("Failed to open channel: {e}")))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| SshtmError::Execution(format!("Failed to open channel: {e}")))?;

        let stdin = ShellParser::input_lines(command);
        let session = async {
            let mut transcript = Vec::new();
            let cmd = detect_shell(&mut channel, &mut transcript).await;
            type_lines(&mut channel, &stdin, cmd).await?;
            read_shell(&mut channel, &mut transcript).await;
            Ok::<_, SshtmError>(transcript)
        };

        let result = tokio::time::timeout(timeout, session).await;
        let _ = channel.close().await;
        let transcript = result.map_err(|_| SshtmError::Timeout(timeout))??;

        let (stdout, code) = ShellParser::new(stdin).parse(&transcript);
        Ok(CommandOutput::new(command, stdout, Vec::new(), code))
    }
}

#[async_trait]
impl Terminal for SshTerminal {
    fn host(&self) -> &str {
        &self.options.host
    }

    async fn ping(&mut self) -> Result<(), SshtmError> {
        self.ping.ping().await
    }

    async fn connect(&mut self) -> Result<(), SshtmError> {
        if self.is_connected() {
            return Ok(());
        }
        if self.known_hosts.is_none() {
            self.load_host_keys().await?;
        }

        let verdict = Arc::new(Mutex::new(None));
        let handler = self.handler(self.known_hosts.clone().unwrap_or_default(), verdict.clone());
        let config = Arc::new(client::Config::default());
        let addr = (self.options.host.clone(), self.options.port);

        let connected = tokio::time::timeout(
            self.options.ssh_timeout,
            client::connect(config, addr, handler),
        )
        .await;

        let mut session = match connected {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                let host = self.options.host.clone();
                let verdict = verdict.lock().ok().and_then(|v| *v);
                return Err(match verdict {
                    Some(HostKeyVerdict::Unknown) => SshtmError::HostKeyUnknown { host },
                    Some(HostKeyVerdict::Changed) => SshtmError::HostKeyChanged { host },
                    None => SshtmError::Connect(e.to_string()),
                });
            }
            Err(_) => {
                return Err(SshtmError::Connect(format!(
                    "timed out after {}s",
                    self.options.ssh_timeout.as_secs()
                )));
            }
        };

        if let Err(e) = self.authenticate(&mut session).await {
            let _ = session.disconnect(Disconnect::ByApplication, "", "English").await;
            return Err(e);
        }

        self.session = Some(session);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(Disconnect::ByApplication, "", "English").await;
        }
    }

    async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SshtmError> {
        if self.options.invoke_shell {
            self.execute_with_shell(command, timeout).await
        } else {
            self.execute_without_shell(command, timeout).await
        }
    }

    async fn load_host_keys(&mut self) -> Result<(), SshtmError> {
        let mut paths = Vec::new();

        if self.options.load_system_host_keys {
            if let Some(home) = dirs::home_dir() {
                let system = home.join(".ssh").join("known_hosts");
                if system.is_file() {
                    paths.push(system);
                }
            }
        }

        if let Some(path) = &self.options.host_keys_filename {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            paths.push(path.clone());
        }

        self.known_hosts = Some(paths);
        Ok(())
    }
}

// =============================================================================
// CHANNEL HELPERS
// =============================================================================

/// Exit code reported when the remote command ends without an exit status,
/// for example when it is killed by a signal.
const NO_EXIT_STATUS: i32 = -1;

/// Output of an `exec` channel, folded from its messages.
#[derive(Debug, Default)]
struct ExecOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    code: Option<i32>,
}

impl ExecOutput {
    fn push(&mut self, msg: &ChannelMsg) {
        match msg {
            ChannelMsg::Data { data } => self.stdout.extend_from_slice(data),
            ChannelMsg::ExtendedData { data, ext: 1 } => self.stderr.extend_from_slice(data),
            ChannelMsg::ExitStatus { exit_status } => {
                self.code = Some(i32::try_from(*exit_status).unwrap_or(NO_EXIT_STATUS));
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                tracing::debug!("command terminated by signal {:?}", signal_name);
                self.code.get_or_insert(NO_EXIT_STATUS);
            }
            _ => {}
        }
    }

    fn into_output(self, command: &str) -> CommandOutput {
        let code = self.code.unwrap_or(NO_EXIT_STATUS);
        CommandOutput::from_streams(command, &self.stdout, &self.stderr, code)
    }
}

async fn read_exec(channel: &mut Channel<Msg>) -> ExecOutput {
    let mut output = ExecOutput::default();
    while let Some(msg) = channel.wait().await {
        output.push(&msg);
    }
    output
}

/// Collect the first shell bytes and decide whether this is `cmd.exe`.
async fn detect_shell(channel: &mut Channel<Msg>, transcript: &mut Vec<u8>) -> bool {
    loop {
        if let Some(cmd) = shell::detect_cmd(transcript) {
            return cmd;
        }
        match tokio::time::timeout(SHELL_DETECT_WINDOW, channel.wait()).await {
            Ok(Some(ChannelMsg::Data { ref data })) => transcript.extend_from_slice(data),
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => return false,
        }
    }
}

async fn type_lines(
    channel: &mut Channel<Msg>,
    stdin: &[String],
    cmd: bool,
) -> Result<(), SshtmError> {
    let send_failed =
        |e: russh::Error| SshtmError::Execution(format!("Failed to send command: {e}"));

    for line in stdin {
        channel.data(format!("{line}\r").as_bytes()).await.map_err(send_failed)?;
        if cmd {
            tokio::time::sleep(CMD_LINE_DELAY).await;
        }
        channel
            .data(format!("{ECHO_STRING}\r").as_bytes())
            .await
            .map_err(send_failed)?;
    }
    channel
        .data(format!("{EXIT_STRING}\r").as_bytes())
        .await
        .map_err(send_failed)
}

async fn read_shell(channel: &mut Channel<Msg>, transcript: &mut Vec<u8>) {
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => transcript.extend_from_slice(data),
            ChannelMsg::Eof | ChannelMsg::Close => break,
            _ => {}
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use russh::client::Handler as _;
    use russh::{CryptoVec, Sig};
    use russh_keys::key::KeyPair;
    use std::path::Path;

    #[test]
    fn options_defaults() {
        let options = SshOptions::new("nas.local");
        assert_eq!(options.port, 22);
        assert_eq!(options.ssh_timeout, Duration::from_secs(4));
        assert!(!options.add_host_keys);
        assert!(!options.invoke_shell);
    }

    #[test]
    fn explicit_username_wins() {
        let mut options = SshOptions::new("nas.local");
        options.username = Some("admin".into());
        assert_eq!(options.login(), "admin");
    }

    #[tokio::test]
    async fn load_host_keys_creates_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("keys").join("known_hosts");

        let mut options = SshOptions::new("nas.local");
        options.host_keys_filename = Some(path.clone());
        let mut terminal = SshTerminal::new(options);

        terminal.load_host_keys().await.expect("load");
        assert!(path.is_file());
        assert_eq!(terminal.known_hosts, Some(vec![path]));
    }

    #[tokio::test]
    async fn execute_without_session_fails() {
        let mut terminal = SshTerminal::new(SshOptions::new("nas.local"));
        let err = terminal
            .execute("true", Duration::from_secs(1))
            .await
            .expect_err("not connected");
        assert_eq!(err, SshtmError::Execution("Not connected".into()));
        assert!(!terminal.is_connected());
    }

    // -------------------------------------------------------------------------
    // exec output
    // -------------------------------------------------------------------------

    fn fold(messages: Vec<ChannelMsg>) -> CommandOutput {
        let mut output = ExecOutput::default();
        for msg in &messages {
            output.push(msg);
        }
        output.into_output("cmd")
    }

    fn data(bytes: &[u8]) -> ChannelMsg {
        ChannelMsg::Data {
            data: CryptoVec::from_slice(bytes),
        }
    }

    #[test]
    fn exec_output_collects_streams_and_status() {
        let output = fold(vec![
            data(b"one\ntwo\n"),
            ChannelMsg::ExtendedData {
                data: CryptoVec::from_slice(b"warning\n"),
                ext: 1,
            },
            ChannelMsg::ExitStatus { exit_status: 3 },
            ChannelMsg::Eof,
            ChannelMsg::Close,
        ]);
        assert_eq!(output.stdout, vec!["one", "two"]);
        assert_eq!(output.stderr, vec!["warning"]);
        assert_eq!(output.code, 3);
    }

    #[test]
    fn killed_command_has_non_zero_code() {
        let output = fold(vec![
            data(b"partial\n"),
            ChannelMsg::ExitSignal {
                signal_name: Sig::KILL,
                core_dumped: false,
                error_message: String::new(),
                lang_tag: String::new(),
            },
            ChannelMsg::Eof,
            ChannelMsg::Close,
        ]);
        assert_eq!(output.stdout, vec!["partial"]);
        assert_eq!(output.code, -1);
    }

    #[test]
    fn exit_status_wins_over_signal() {
        let output = fold(vec![
            ChannelMsg::ExitStatus { exit_status: 0 },
            ChannelMsg::ExitSignal {
                signal_name: Sig::TERM,
                core_dumped: false,
                error_message: String::new(),
                lang_tag: String::new(),
            },
        ]);
        assert_eq!(output.code, 0);
    }

    #[test]
    fn closed_channel_without_status_has_non_zero_code() {
        let output = fold(vec![data(b"out\n"), ChannelMsg::Eof, ChannelMsg::Close]);
        assert_eq!(output.stdout, vec!["out"]);
        assert_eq!(output.code, -1);
    }

    // -------------------------------------------------------------------------
    // host keys
    // -------------------------------------------------------------------------

    fn server_key() -> PublicKey {
        KeyPair::generate_ed25519()
            .expect("keypair")
            .clone_public_key()
            .expect("public key")
    }

    fn client_handler(path: &Path, port: u16, add_host_keys: bool) -> ClientHandler {
        ClientHandler {
            host: "nas.local".to_string(),
            port,
            known_hosts: vec![path.to_path_buf()],
            learn_into: Some(path.to_path_buf()),
            add_host_keys,
            verdict: Arc::new(Mutex::new(None)),
        }
    }

    fn verdict(handler: &ClientHandler) -> Option<HostKeyVerdict> {
        *handler.verdict.lock().expect("verdict")
    }

    async fn host_key_lifecycle(port: u16, entry: &str) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("known_hosts");
        std::fs::write(&path, "").expect("create");
        let key = server_key();

        let mut strict = client_handler(&path, port, false);
        assert!(!strict.check_server_key(&key).await.expect("unknown"));
        assert_eq!(verdict(&strict), Some(HostKeyVerdict::Unknown));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "");

        let mut learning = client_handler(&path, port, true);
        assert!(learning.check_server_key(&key).await.expect("learn"));
        assert_eq!(verdict(&learning), None);
        let contents = std::fs::read_to_string(&path).expect("read");
        assert!(
            contents.lines().any(|l| l.starts_with(&format!("{entry} ssh-ed25519 "))),
            "{contents:?}"
        );

        let mut known = client_handler(&path, port, false);
        assert!(known.check_server_key(&key).await.expect("known"));
        assert_eq!(verdict(&known), None);

        let mut changed = client_handler(&path, port, true);
        assert!(!changed.check_server_key(&server_key()).await.expect("changed"));
        assert_eq!(verdict(&changed), Some(HostKeyVerdict::Changed));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), contents);
    }

    #[tokio::test]
    async fn host_key_lifecycle_default_port() {
        host_key_lifecycle(22, "nas.local").await;
    }

    #[tokio::test]
    async fn host_key_lifecycle_custom_port() {
        host_key_lifecycle(2222, "[nas.local]:2222").await;
    }

    #[tokio::test]
    async fn missing_known_hosts_file_is_unknown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut handler = client_handler(&dir.path().join("absent"), 22, false);
        assert!(!handler.check_server_key(&server_key()).await.expect("unknown"));
        assert_eq!(verdict(&handler), Some(HostKeyVerdict::Unknown));
    }
}
