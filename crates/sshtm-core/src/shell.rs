//! # Interactive Shell Output
//!
//! Some hosts (network appliances, Windows `cmd.exe`) only work through an
//! interactive shell. Commands are typed line by line, each followed by an
//! echo of the exit code markers, then `exit`. The captured terminal stream
//! is cleaned of escape sequences and parsed back into stdout and a code.
//!
//! ```text
//! user@host:~$ uname -s                         <- input echo, window opens
//! Linux                                         <- captured
//! user@host:~$ echo "__exit_code__|$LastE...    <- window closes
//! __exit_code__||0|%errorlevel%                 <- commit, code 0
//! user@host:~$ exit
//! ```

use regex::Regex;
use std::sync::LazyLock;

/// Marker echoed after every input line.
pub const END: &str = "__exit_code__";
/// Exit code markers for PowerShell, POSIX shells and cmd.exe.
pub const ECHO_STRING: &str = "echo \"__exit_code__|$LastExitCode|$?|%errorlevel%\"";
pub const EXIT_STRING: &str = "exit";

/// Screen setup `cmd.exe` sends before its banner.
pub const CMD_START: &[u8] = b"\x1b[?25l\x1b[2J\x1b[m\x1b[H";
const CMD_TEST: &str = "Microsoft Windows";

struct Patterns {
    win_title: Regex,
    win_newline: Regex,
    ansi_escape: Regex,
}

static PATTERNS: LazyLock<Option<Patterns>> = LazyLock::new(|| {
    Some(Patterns {
        win_title: Regex::new(r"\x1b\]0;.*?\x07").ok()?,
        win_newline: Regex::new(r"\x1b\[\d+;1H").ok()?,
        ansi_escape: Regex::new(r"\x1b(?:[@-Z\x5C-_]|\[[0-?]*[ -/]*[@-~])").ok()?,
    })
});

// =============================================================================
// CLEANING
// =============================================================================

/// Decode a terminal stream and strip it down to plain lines.
pub fn clean(bytes: &[u8]) -> Vec<String> {
    let mut string = String::from_utf8_lossy(bytes).into_owned();

    if let Some(p) = PATTERNS.as_ref() {
        string = p.win_title.replace_all(&string, "").into_owned();
        string = p.win_newline.replace_all(&string, "\n").into_owned();
        string = p.ansi_escape.replace_all(&string, "").into_owned();
    }

    string
        .replace(['\u{8}', '\r', '\0'], "")
        .lines()
        .map(str::to_string)
        .collect()
}

/// Detect a Windows `cmd.exe` session from the first bytes it sent.
///
/// Returns `None` while more bytes are needed to decide.
pub fn detect_cmd(initial: &[u8]) -> Option<bool> {
    if initial.len() < CMD_START.len() {
        return if CMD_START.starts_with(initial) {
            None
        } else {
            Some(false)
        };
    }
    if !initial.starts_with(CMD_START) {
        return Some(false);
    }

    let rest = &initial[CMD_START.len()..];
    let start = rest.iter().position(|b| !matches!(b, b'\r' | b'\n'))?;
    let rest = &rest[start..];
    let end = rest.iter().position(|b| matches!(b, b'\r' | b'\n'))?;

    Some(String::from_utf8_lossy(&rest[..end]).contains(CMD_TEST))
}

// =============================================================================
// PARSER
// =============================================================================

/// Rebuilds stdout and the exit code from an interactive session transcript.
#[derive(Debug, Clone)]
pub struct ShellParser {
    stdin: Vec<String>,
}

impl ShellParser {
    /// `stdin` holds the input lines in the order they were typed.
    pub fn new(stdin: Vec<String>) -> Self {
        Self { stdin }
    }

    /// Input lines worth typing: blank lines would match every output line.
    pub fn input_lines(command: &str) -> Vec<String> {
        command
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Parse a transcript into `(stdout, code)`.
    pub fn parse(&self, bytes: &[u8]) -> (Vec<String>, i32) {
        let lines = clean(bytes);
        let mut stdout = Vec::new();
        let mut code = 0;
        let mut stdin_count = 0;
        let mut start = 0;
        let mut end = 0;

        for (i, line) in lines.iter().enumerate() {
            let Some(current) = self.stdin.get(stdin_count) else {
                break;
            };

            if line.ends_with(current.as_str())
                || self.stdin.iter().any(|s| s == line)
                || line == ECHO_STRING
                || line == EXIT_STRING
            {
                start = i + 1;
                end = i + 1;
            } else if line.ends_with(ECHO_STRING) {
                end = i;
            } else if line.starts_with(END) || line.starts_with(&format!("\"{END}")) {
                if start < end {
                    stdout.extend_from_slice(&lines[start..end]);
                }
                if code == 0 {
                    code = exit_code(line);
                }
                start = i + 1;
                end = i + 1;
                stdin_count += 1;
            }
        }

        (stdout, code)
    }
}

/// First non-zero code among the marker fields; `False` (PowerShell `$?`) is 1.
fn exit_code(line: &str) -> i32 {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() != 4 {
        return 0;
    }

    for item in fields {
        if !item.is_empty() && item.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(code) = item.parse::<i32>() {
                if code != 0 {
                    return code;
                }
            }
        }
        if item == "False" {
            return 1;
        }
    }
    0
}

// =============================================================================
// TESTS
// =============================================================================
