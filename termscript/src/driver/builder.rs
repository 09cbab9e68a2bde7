//! Builder for composing sessions.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use super::recorder::Recorder;
use super::session::Session;
use crate::channel::{CharacterSource, TimedQueueReader, compile_pattern};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::ui::UiSink;

/// Builder for constructing sessions.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use termscript::SessionBuilder;
///
/// # async fn example() -> Result<(), termscript::Error> {
/// let mut session = SessionBuilder::new()
///     .add_cr(true)
///     .command_timeout(Duration::from_secs(10))
///     .build_stdio()
///     .await?;
///
/// let lines = session.cmd("uname -a").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
    ui: Option<UiSink>,
    recorder: Option<Recorder>,
}

impl SessionBuilder {
    /// Create a builder with default configuration and no components.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default completion pattern (default: `[#$] `).
    pub fn default_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.default_pattern = pattern.into();
        self
    }

    /// Terminate commands with CR LF.
    pub fn add_cr(mut self, add_cr: bool) -> Self {
        self.config.add_cr = add_cr;
        self
    }

    /// Set the poll interval (default: 500ms).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the default command timeout (default: wait forever).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = Some(timeout);
        self
    }

    /// Set the per-step login wait and retry budget.
    pub fn login(mut self, step_timeout: Duration, retries: u32) -> Self {
        self.config.login_timeout = step_timeout;
        self.config.login_retries = retries;
        self
    }

    /// Drop ANSI escape sequences from captured text.
    pub fn strip_ansi(mut self, strip: bool) -> Self {
        self.config.strip_ansi = strip;
        self
    }

    /// Cap the in-progress line length.
    pub fn max_line_len(mut self, max: usize) -> Self {
        self.config.max_line_len = Some(max);
        self
    }

    /// Attach a side-channel UI sink.
    pub fn ui(mut self, ui: UiSink) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Attach a transcript recorder.
    pub fn recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.config.poll_interval.is_zero() {
            return Err(SessionError::InvalidConfig {
                message: "poll interval must be non-zero".to_string(),
            }
            .into());
        }
        if self.config.login_retries == 0 {
            return Err(SessionError::InvalidConfig {
                message: "login retries must be at least 1".to_string(),
            }
            .into());
        }
        if self.config.max_line_len == Some(0) {
            return Err(SessionError::InvalidConfig {
                message: "max line length must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Build a session over the two halves of a duplex stream.
    ///
    /// Starts the capture task on the current tokio runtime.
    pub async fn build<R, W>(self, reader: R, writer: W) -> Result<Session>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.validate()?;
        let default_pattern = compile_pattern(&self.config.default_pattern)?;

        let (source, rx) = CharacterSource::spawn(reader, Session::decoder(&self.config));
        let input = TimedQueueReader::new(rx, self.config.poll_interval);

        Ok(Session::new(
            source,
            input,
            Box::new(writer),
            self.config,
            default_pattern,
            self.ui,
            self.recorder,
        ))
    }

    /// Build a session on stdin/stdout. Attaches a stderr UI sink unless
    /// one was set.
    pub async fn build_stdio(mut self) -> Result<Session> {
        if self.ui.is_none() {
            self.ui = Some(UiSink::stderr());
        }
        self.build(tokio::io::stdin(), tokio::io::stdout()).await
    }
}
