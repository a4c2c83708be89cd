//! Activation settings.
//!
//! The settings file lists, one per line, the processes the agent should
//! instrument:
//!
//! ```text
//! MyService.exe
//! dotnet "MyApp.dll" --worker
//! ```
//!
//! The first token is an executable base name, compared exactly. A line with
//! nothing else activates the agent for that process. Any further tokens are
//! command-line fragments: the line activates when at least one of them
//! occurs in the process command line. Lines are independent, so several
//! lines for the same process combine with OR.
//!
//! Tokens are separated by unquoted whitespace. Double quotes group a token
//! that contains spaces; inside quotes `\"` and `\\` stand for `"` and `\`.
//! Outside quotes a backslash is an ordinary character.

use std::path::Path;

use log::{debug, info};

use crate::config::ProcessInfo;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    /// Between tokens.
    Scanning,
    Bare,
    Quoted,
    /// Just saw a backslash inside quotes.
    QuotedEscape,
}

/// Split one settings line into tokens.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut state = State::Scanning;

    for c in line.chars() {
        state = match (state, c) {
            (State::Scanning, c) if c.is_whitespace() => State::Scanning,
            (State::Scanning, '"') => State::Quoted,
            (State::Scanning, c) => {
                current.push(c);
                State::Bare
            }

            (State::Bare, c) if c.is_whitespace() => {
                tokens.push(std::mem::take(&mut current));
                State::Scanning
            }
            (State::Bare, '"') => State::Quoted,
            (State::Bare, c) => {
                current.push(c);
                State::Bare
            }

            (State::Quoted, '"') => State::Bare,
            (State::Quoted, '\\') => State::QuotedEscape,
            (State::Quoted, c) => {
                current.push(c);
                State::Quoted
            }

            (State::QuotedEscape, c @ ('"' | '\\')) => {
                current.push(c);
                State::Quoted
            }
            (State::QuotedEscape, c) => {
                current.push('\\');
                current.push(c);
                State::Quoted
            }
        };
    }

    match state {
        State::Scanning => {}
        State::QuotedEscape => {
            current.push('\\');
            tokens.push(current);
        }
        State::Bare | State::Quoted => tokens.push(current),
    }
    tokens
}

/// One non-empty settings line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub process: String,
    /// Command-line fragments; empty means "always".
    pub patterns: Vec<String>,
}

impl Directive {
    pub fn matches(&self, process: &ProcessInfo) -> bool {
        if self.process != process.executable_name {
            return false;
        }
        self.patterns.is_empty()
            || self
                .patterns
                .iter()
                .any(|p| process.command_line.contains(p.as_str()))
    }
}

/// Parse every non-blank line of a settings file.
pub fn parse(contents: &str) -> Vec<Directive> {
    contents
        .lines()
        .filter_map(|line| {
            let mut tokens = tokenize(line).into_iter();
            let process = tokens.next()?;
            Some(Directive {
                process,
                patterns: tokens.collect(),
            })
        })
        .collect()
}

/// Decide activation from settings text.
pub fn should_instrument(contents: &str, process: &ProcessInfo) -> bool {
    parse(contents).iter().any(|d| d.matches(process))
}

/// Decide activation from a settings file. An unreadable file means
/// "do not instrument".
pub fn should_instrument_file(path: &Path, process: &ProcessInfo) -> bool {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("settings file {} unavailable: {}", path.display(), e);
            return false;
        }
    };
    let decision = should_instrument(&String::from_utf8_lossy(&bytes), process);
    info!(
        "activation for {} from {}: {}",
        process.executable_name,
        path.display(),
        if decision { "instrument" } else { "skip" }
    );
    decision
}
