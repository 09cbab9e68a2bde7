//! Pattern helpers for response completion and prompt classification.

use regex::Regex;

use crate::error::ChannelError;

/// Default response terminator: a root or user shell prompt.
pub const DEFAULT_PROMPT: &str = r"[#$] ";

/// Text of a getty login prompt.
pub const LOGIN_PROMPT: &str = "login: ";

/// Text of a password prompt.
pub const PASSWORD_PROMPT: &str = "Password: ";

/// Compile a completion pattern.
///
/// Patterns are tested against the line in progress and may match
/// anywhere in it; anchoring is left to the caller.
pub fn compile_pattern(pattern: &str) -> Result<Regex, ChannelError> {
    Ok(Regex::new(pattern)?)
}

/// What kind of prompt a matched line shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptClass {
    Login,
    Password,
    Shell,
    None,
}

/// Compiled patterns used by the login handshake.
#[derive(Debug, Clone)]
pub struct LoginPatterns {
    /// Completion pattern for the first prompt of an attempt: login,
    /// a leftover password prompt, or the shell.
    pub first_prompt: Regex,

    /// Completion pattern after the username was sent.
    pub password_or_shell: Regex,

    shell: Regex,
}

impl LoginPatterns {
    /// Build the handshake patterns around a shell prompt pattern.
    pub fn new(shell_prompt: &str) -> Result<Self, ChannelError> {
        let login = regex::escape(LOGIN_PROMPT);
        let password = regex::escape(PASSWORD_PROMPT);
        Ok(Self {
            first_prompt: compile_pattern(&format!("(?:{login}|{password}|{shell_prompt})"))?,
            password_or_shell: compile_pattern(&format!("(?:{password}|{shell_prompt})"))?,
            shell: compile_pattern(shell_prompt)?,
        })
    }

    /// Classify one line.
    pub fn classify(&self, line: &str) -> PromptClass {
        if line.contains(LOGIN_PROMPT) {
            PromptClass::Login
        } else if line.contains(PASSWORD_PROMPT) {
            PromptClass::Password
        } else if self.shell.is_match(line) {
            PromptClass::Shell
        } else {
            PromptClass::None
        }
    }

    /// Classify a response by the line that completed it.
    ///
    /// Expects a response read with `keep`, so the matched line is last.
    pub fn classify_response(&self, lines: &[String]) -> PromptClass {
        lines
            .last()
            .map(|line| self.classify(line))
            .unwrap_or(PromptClass::None)
    }
}
