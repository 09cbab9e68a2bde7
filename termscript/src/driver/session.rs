//! Text automation session over a duplex character stream.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use regex::Regex;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::recorder::Recorder;
use crate::channel::{
    CharacterSource, Deadline, LineBuffer, TimedQueueReader, TextDecoder, compile_pattern,
};
use crate::config::SessionConfig;
use crate::error::{ChannelError, Result};
use crate::ui::UiSink;

/// Boxed output half of the duplex stream.
pub(crate) type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// One automation session: the command/response engine plus the optional
/// UI sink and transcript recorder it was composed with.
///
/// All reads run on the caller and suspend only while polling the capture
/// queue. Timeouts yield `Ok(None)`; errors are reserved for a closed
/// input stream, a failed write, or the optional components.
pub struct Session {
    /// Capture task feeding `input`. Dropping the session stops it.
    _source: CharacterSource,

    /// Consumer end of the capture queue.
    input: TimedQueueReader<char>,

    /// Output half of the stream.
    output: Output,

    /// Session configuration.
    config: SessionConfig,

    /// Compiled `config.default_pattern`.
    default_pattern: Regex,

    /// Line assembly state, reset by every read.
    buffer: LineBuffer,

    /// Side-channel sink for alerts and menus.
    ui: Option<UiSink>,

    /// Transcript of `cmd` calls and explicit entries.
    recorder: Option<Recorder>,
}

impl Session {
    pub(crate) fn new(
        source: CharacterSource,
        input: TimedQueueReader<char>,
        output: Output,
        config: SessionConfig,
        default_pattern: Regex,
        ui: Option<UiSink>,
        recorder: Option<Recorder>,
    ) -> Self {
        Self {
            _source: source,
            input,
            output,
            buffer: LineBuffer::new(config.max_line_len),
            config,
            default_pattern,
            ui,
            recorder,
        }
    }

    /// Text-mode decoder for a configuration.
    pub(crate) fn decoder(config: &SessionConfig) -> TextDecoder {
        TextDecoder::new(config.strip_ansi)
    }

    /// Read until `pattern` matches the line in progress.
    ///
    /// Returns the completed lines, oldest first, plus the matching partial
    /// line when `keep` is set. `None` for `pattern` uses the session
    /// default; `None` for `timeout` waits forever. Returns `Ok(None)` when
    /// the deadline passes first.
    pub async fn read_response(
        &mut self,
        pattern: Option<&Regex>,
        timeout: Option<Duration>,
        keep: bool,
    ) -> Result<Option<Vec<String>>> {
        let pattern = pattern.unwrap_or(&self.default_pattern).clone();
        let deadline = Deadline::after(timeout);
        let start = Instant::now();
        self.buffer.reset();

        loop {
            if let Some(ch) = self.input.poll_until(&deadline).await? {
                if self.buffer.push_response(ch) && self.buffer.matches(&pattern) {
                    let lines = self.buffer.finish(keep);
                    debug!(
                        "read_response: matched {:?} after {:?}, {} lines",
                        pattern.as_str(),
                        start.elapsed(),
                        lines.len()
                    );
                    return Ok(Some(lines));
                }
            }

            if deadline.expired() {
                debug!(
                    "read_response: no {:?} within {:?}, partial line {:?}",
                    pattern.as_str(),
                    timeout,
                    self.buffer.current()
                );
                return Ok(None);
            }
        }
    }

    /// Read one CR/LF terminated, non-empty line.
    pub async fn read_line(&mut self, timeout: Option<Duration>) -> Result<Option<String>> {
        let deadline = Deadline::after(timeout);
        self.buffer.reset();

        loop {
            if let Some(ch) = self.input.poll_until(&deadline).await? {
                if let Some(line) = self.buffer.push_line(ch) {
                    trace!("read_line: {:?}", line);
                    return Ok(Some(line));
                }
            }

            if deadline.expired() {
                return Ok(None);
            }
        }
    }

    /// Write `line` plus the line terminator and flush.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        trace!("write_line: {:?}", line);
        self.write_terminated(line).await
    }

    /// Like [`write_line`](Self::write_line) but never logs the text.
    pub(crate) async fn write_hidden(&mut self, line: &str) -> Result<()> {
        trace!("write_line: <hidden>");
        self.write_terminated(line).await
    }

    async fn write_terminated(&mut self, line: &str) -> Result<()> {
        let terminator = if self.config.add_cr { "\r\n" } else { "\n" };
        let mut data = Vec::with_capacity(line.len() + terminator.len());
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(terminator.as_bytes());

        self.output
            .write_all(&data)
            .await
            .map_err(ChannelError::Io)?;
        self.output.flush().await.map_err(ChannelError::Io)?;
        Ok(())
    }

    /// Send a command and read its response.
    ///
    /// `None` for `timeout` falls back to the configured command timeout.
    pub async fn command(
        &mut self,
        line: &str,
        pattern: Option<&Regex>,
        timeout: Option<Duration>,
        keep: bool,
    ) -> Result<Option<Vec<String>>> {
        let timeout = timeout.or(self.config.command_timeout);
        self.write_line(line).await?;
        self.read_response(pattern, timeout, keep).await
    }

    /// [`command`](Self::command) with a pattern given as text.
    pub async fn command_str(
        &mut self,
        line: &str,
        pattern: &str,
        timeout: Option<Duration>,
        keep: bool,
    ) -> Result<Option<Vec<String>>> {
        let pattern = compile_pattern(pattern)?;
        self.command(line, Some(&pattern), timeout, keep).await
    }

    /// Send a secret and read its response without logging it.
    pub(crate) async fn command_hidden(
        &mut self,
        line: &str,
        pattern: Option<&Regex>,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<String>>> {
        self.write_hidden(line).await?;
        self.read_response(pattern, timeout, false).await
    }

    /// Send a command with all defaults and record it in the transcript.
    pub async fn cmd(&mut self, line: &str) -> Result<Option<Vec<String>>> {
        let response = self.command(line, None, None, false).await?;
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.add(line, &response)?;
        }
        Ok(response)
    }

    /// Discard any input arriving within `window`.
    pub async fn flush_input(&mut self, window: Duration) -> Result<usize> {
        Ok(self.input.drain(window).await?)
    }

    /// Show an alert line on the side channel, if one is attached.
    pub fn alert(&mut self, text: &str) -> Result<()> {
        match self.ui.as_mut() {
            Some(ui) => ui.alert(text)?,
            None => trace!("alert without ui sink: {}", text),
        }
        Ok(())
    }

    /// Add an entry to the transcript, if recording. Returns `value`.
    pub fn record<T: Serialize>(&mut self, request: &str, value: T) -> Result<T> {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.add(request, &value)?;
        }
        Ok(value)
    }

    /// Save the transcript and announce it on the side channel.
    ///
    /// Returns `None` when the session is not recording.
    pub fn save_transcript(&mut self) -> Result<Option<PathBuf>> {
        let Some(recorder) = self.recorder.as_ref() else {
            warn!("save_transcript: session is not recording");
            return Ok(None);
        };
        let path = recorder.save()?;
        self.alert(&format!("Saving {}", path.display()))?;
        Ok(Some(path))
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The default completion pattern.
    pub fn default_pattern(&self) -> &Regex {
        &self.default_pattern
    }

    /// The attached UI sink.
    pub fn ui_mut(&mut self) -> Option<&mut UiSink> {
        self.ui.as_mut()
    }

    /// The attached recorder.
    pub fn recorder(&self) -> Option<&Recorder> {
        self.recorder.as_ref()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("ui", &self.ui.is_some())
            .field("recording", &self.recorder.is_some())
            .finish_non_exhaustive()
    }
}
