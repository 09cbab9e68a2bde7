//! Session and transfer configuration.
//!
//! Both structs deserialize from JSON with every field optional; durations
//! are written as integer milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::DEFAULT_PROMPT;
use crate::error::Result;

/// Placeholder substituted with the remote path in transfer launcher commands.
pub const REMOTE_PLACEHOLDER: &str = "{remote}";

/// Configuration for a text automation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Pattern that ends a response when the caller supplies none.
    pub default_pattern: String,

    /// Terminate commands with CR LF instead of LF (strict terminals).
    pub add_cr: bool,

    /// Longest single wait on the capture queue.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// Default `command` timeout. `None` waits forever.
    #[serde(with = "opt_duration_ms")]
    pub command_timeout: Option<Duration>,

    /// Wait bound for each login handshake step.
    #[serde(with = "duration_ms")]
    pub login_timeout: Duration,

    /// Number of login handshake attempts.
    pub login_retries: u32,

    /// Drop ANSI escape sequences before they reach the line buffer.
    pub strip_ansi: bool,

    /// Cap on the in-progress line. `None` lets it grow without bound.
    pub max_line_len: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_pattern: DEFAULT_PROMPT.to_string(),
            add_cr: false,
            poll_interval: Duration::from_millis(500),
            command_timeout: None,
            login_timeout: Duration::from_secs(1),
            login_retries: 3,
            strip_ansi: false,
            max_line_len: None,
        }
    }
}

impl SessionConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Configuration for the byte transfer mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Longest single wait on the capture queue.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// Default overall bound for one `get` call.
    #[serde(with = "duration_ms")]
    pub get_timeout: Duration,

    /// Bound for each banner line read before binary mode.
    #[serde(with = "duration_ms")]
    pub banner_timeout: Duration,

    /// Pause after the banner so the remote can enter binary mode.
    #[serde(with = "duration_ms")]
    pub guard_interval: Duration,

    /// Remote command that sends a file to us. `{remote}` is the path.
    pub receive_command: String,

    /// Remote command that receives a file from us. `{remote}` is the path.
    pub send_command: String,

    /// Banner lines printed by the remote before a receive starts.
    pub receive_banners: usize,

    /// Banner lines printed by the remote before a send starts.
    pub send_banners: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            get_timeout: Duration::from_secs(1),
            banner_timeout: Duration::from_secs(5),
            guard_interval: Duration::from_secs(1),
            receive_command: format!("lsz -Xq -C 4 {REMOTE_PLACEHOLDER}"),
            send_command: format!("lrz -Xq {REMOTE_PLACEHOLDER}"),
            receive_banners: 1,
            send_banners: 2,
        }
    }
}

impl TransferConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Launcher command for receiving `remote`.
    pub fn receive_command_for(&self, remote: &str) -> String {
        self.receive_command.replace(REMOTE_PLACEHOLDER, remote)
    }

    /// Launcher command for sending to `remote`.
    pub fn send_command_for(&self, remote: &str) -> String {
        self.send_command.replace(REMOTE_PLACEHOLDER, remote)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.default_pattern, "[#$] ");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.login_timeout, Duration::from_secs(1));
        assert_eq!(config.login_retries, 3);
        assert!(config.command_timeout.is_none());
        assert!(config.max_line_len.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"add_cr": true, "command_timeout": 2500}"#).unwrap();
        assert!(config.add_cr);
        assert_eq!(config.command_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.login_retries, 3);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"poll_interval": 100, "strip_ansi": true}"#).unwrap();

        let config = SessionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!(config.strip_ansi);
    }

    #[test]
    fn test_launcher_commands() {
        let config = TransferConfig::default();
        assert_eq!(config.receive_command_for("/tmp/a.bin"), "lsz -Xq -C 4 /tmp/a.bin");
        assert_eq!(config.send_command_for("b.bin"), "lrz -Xq b.bin");
    }
}
