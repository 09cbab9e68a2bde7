//! Side-channel UI protocol.
//!
//! The hosting terminal reads a secondary stream (stderr by default) in
//! which every line starts with a one-byte prefix naming its kind. Lines
//! without a known prefix are shown as plain text by the host.

use std::io::{self, Write};

/// Kind of a side-channel line, identified by its prefix byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UiMessage {
    Alert = 0x11,
    MenuTitle = 0x12,
    MenuItem = 0x13,
    MenuPrompt = 0x14,
    MenuSelected = 0x15,
    TransferBegin = 0x16,
    TransferEnd = 0x17,
}

impl UiMessage {
    /// The prefix byte.
    pub fn prefix(self) -> u8 {
        self as u8
    }

    /// Map a prefix byte back to its kind.
    pub fn from_prefix(byte: u8) -> Option<Self> {
        match byte {
            0x11 => Some(Self::Alert),
            0x12 => Some(Self::MenuTitle),
            0x13 => Some(Self::MenuItem),
            0x14 => Some(Self::MenuPrompt),
            0x15 => Some(Self::MenuSelected),
            0x16 => Some(Self::TransferBegin),
            0x17 => Some(Self::TransferEnd),
            _ => None,
        }
    }

    /// Split a received line into its kind and text.
    pub fn parse_line(line: &str) -> Option<(Self, &str)> {
        let first = *line.as_bytes().first()?;
        let kind = Self::from_prefix(first)?;
        Some((kind, line[1..].trim_end_matches('\n')))
    }
}

/// Writer for the side-channel protocol.
pub struct UiSink {
    out: Box<dyn Write + Send>,
}

impl UiSink {
    /// Wrap any writer.
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    /// Sink on the process stderr.
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Write one prefixed line and flush it.
    pub fn emit(&mut self, kind: UiMessage, text: &str) -> io::Result<()> {
        let mut line = Vec::with_capacity(text.len() + 2);
        line.push(kind.prefix());
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');
        self.out.write_all(&line)?;
        self.out.flush()
    }

    pub fn alert(&mut self, text: &str) -> io::Result<()> {
        self.emit(UiMessage::Alert, text)
    }

    pub fn menu_title(&mut self, text: &str) -> io::Result<()> {
        self.emit(UiMessage::MenuTitle, text)
    }

    pub fn menu_item(&mut self, text: &str) -> io::Result<()> {
        self.emit(UiMessage::MenuItem, text)
    }

    pub fn menu_prompt(&mut self, text: &str) -> io::Result<()> {
        self.emit(UiMessage::MenuPrompt, text)
    }

    pub fn selected(&mut self, text: &str) -> io::Result<()> {
        self.emit(UiMessage::MenuSelected, text)
    }

    /// Tell the host that raw binary follows on the main stream.
    pub fn transfer_begin(&mut self) -> io::Result<()> {
        self.emit(UiMessage::TransferBegin, "")
    }

    /// Tell the host that the main stream is text again.
    pub fn transfer_end(&mut self) -> io::Result<()> {
        self.emit(UiMessage::TransferEnd, "")
    }
}

impl std::fmt::Debug for UiSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiSink").finish_non_exhaustive()
    }
}

/// In-memory sink shared with a test so emitted lines can be inspected.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct CaptureBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl CaptureBuffer {
    pub(crate) fn sink(&self) -> UiSink {
        UiSink::new(self.clone())
    }

    pub(crate) fn messages(&self) -> Vec<(UiMessage, String)> {
        let data = self.0.lock().unwrap();
        String::from_utf8_lossy(&data)
            .lines()
            .filter_map(|l| UiMessage::parse_line(l).map(|(k, t)| (k, t.to_string())))
            .collect()
    }
}

#[cfg(test)]
impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
