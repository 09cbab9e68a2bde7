//! Background capture of the input stream.
//!
//! [`CharacterSource`] spawns one task that reads the stream a single byte
//! at a time, decodes it into units and pushes them onto an unbounded
//! queue. The task never waits on the consumer, and decode faults are
//! replaced rather than reported so that no input can stop the capture.

use std::fmt::Debug;
use std::io;

use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Substitute for an undecodable input sequence.
const SUBSTITUTE: char = ' ';

/// Turns raw input bytes into queue units.
pub trait UnitDecoder: Send + 'static {
    /// The unit delivered to the consumer.
    type Unit: Debug + Send + 'static;

    /// Feed one byte, appending any completed units to `out`.
    fn decode(&mut self, byte: u8, out: &mut Vec<Self::Unit>);
}

/// Pass-through decoder for transfer mode.
#[derive(Debug, Default)]
pub struct ByteDecoder;

impl UnitDecoder for ByteDecoder {
    type Unit = u8;

    fn decode(&mut self, byte: u8, out: &mut Vec<u8>) {
        out.push(byte);
    }
}

/// Incremental UTF-8 decoder.
///
/// Multi-byte characters are assembled across calls. An invalid lead
/// byte or a broken continuation yields one [`SUBSTITUTE`] and decoding
/// resumes with the offending byte.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: [u8; 4],
    len: usize,
    expected: usize,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.len = 0;
        self.expected = 0;
    }

    fn start(&mut self, byte: u8, expected: usize) {
        self.pending[0] = byte;
        self.len = 1;
        self.expected = expected;
    }
}

impl UnitDecoder for Utf8Decoder {
    type Unit = char;

    fn decode(&mut self, byte: u8, out: &mut Vec<char>) {
        if self.expected == 0 {
            match byte {
                0x00..=0x7f => out.push(byte as char),
                0xc2..=0xdf => self.start(byte, 2),
                0xe0..=0xef => self.start(byte, 3),
                0xf0..=0xf4 => self.start(byte, 4),
                _ => out.push(SUBSTITUTE),
            }
            return;
        }

        if byte & 0xc0 != 0x80 {
            // Truncated sequence
            out.push(SUBSTITUTE);
            self.reset();
            self.decode(byte, out);
            return;
        }

        self.pending[self.len] = byte;
        self.len += 1;
        if self.len == self.expected {
            match std::str::from_utf8(&self.pending[..self.len]) {
                Ok(s) => out.extend(s.chars()),
                Err(_) => out.push(SUBSTITUTE),
            }
            self.reset();
        }
    }
}

/// Decoder that drops ANSI escape sequences.
///
/// Printable characters pass through; of the C0 controls only the ones
/// the line rules act on (CR, LF, backspace, tab) are kept.
pub struct AnsiDecoder {
    parser: vte::Parser,
}

impl AnsiDecoder {
    pub fn new() -> Self {
        Self {
            parser: vte::Parser::new(),
        }
    }
}

impl Default for AnsiDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for AnsiDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnsiDecoder").finish_non_exhaustive()
    }
}

struct Printable<'a>(&'a mut Vec<char>);

impl vte::Perform for Printable<'_> {
    fn print(&mut self, c: char) {
        if c == char::REPLACEMENT_CHARACTER {
            self.0.push(SUBSTITUTE);
        } else {
            self.0.push(c);
        }
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\r' | b'\n' | b'\t' | 0x08) {
            self.0.push(byte as char);
        }
    }
}

impl UnitDecoder for AnsiDecoder {
    type Unit = char;

    fn decode(&mut self, byte: u8, out: &mut Vec<char>) {
        self.parser.advance(&mut Printable(out), &[byte]);
    }
}

/// Text-mode decoder selected by configuration.
#[derive(Debug)]
pub enum TextDecoder {
    Plain(Utf8Decoder),
    StripAnsi(AnsiDecoder),
}

impl TextDecoder {
    pub fn new(strip_ansi: bool) -> Self {
        if strip_ansi {
            Self::StripAnsi(AnsiDecoder::new())
        } else {
            Self::Plain(Utf8Decoder::new())
        }
    }
}

impl UnitDecoder for TextDecoder {
    type Unit = char;

    fn decode(&mut self, byte: u8, out: &mut Vec<char>) {
        match self {
            Self::Plain(d) => d.decode(byte, out),
            Self::StripAnsi(d) => d.decode(byte, out),
        }
    }
}

/// Handle to the background capture task.
///
/// The task stops when the stream reports EOF or a hard I/O error, when
/// the queue receiver is dropped, or when this handle is dropped.
#[derive(Debug)]
pub struct CharacterSource {
    handle: JoinHandle<()>,
}

impl CharacterSource {
    /// Start capturing `reader`. Must be called within a tokio runtime.
    pub fn spawn<R, D>(reader: R, decoder: D) -> (Self, UnboundedReceiver<D::Unit>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        D: UnitDecoder,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(capture(reader, decoder, tx));
        (Self { handle }, rx)
    }

    /// Whether the capture task is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for CharacterSource {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn capture<R, D>(mut reader: R, mut decoder: D, tx: UnboundedSender<D::Unit>)
where
    R: AsyncRead + Unpin,
    D: UnitDecoder,
{
    let mut byte = [0u8; 1];
    let mut units = Vec::with_capacity(4);

    loop {
        match reader.read(&mut byte).await {
            Ok(0) => {
                debug!("capture: end of input stream");
                return;
            }
            Ok(_) => {
                decoder.decode(byte[0], &mut units);
                for unit in units.drain(..) {
                    trace!("capture: {:?}", unit);
                    if tx.send(unit).is_err() {
                        debug!("capture: queue receiver dropped");
                        return;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("capture: read failed: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all<D: UnitDecoder>(decoder: &mut D, bytes: &[u8]) -> Vec<D::Unit> {
        let mut out = Vec::new();
        for &b in bytes {
            decoder.decode(b, &mut out);
        }
        out
    }

    #[test]
    fn test_utf8_multibyte() {
        let mut decoder = Utf8Decoder::new();
        let chars = decode_all(&mut decoder, "aé€😀".as_bytes());
        assert_eq!(chars, vec!['a', 'é', '€', '😀']);
    }

    #[test]
    fn test_utf8_invalid_is_substituted() {
        let mut decoder = Utf8Decoder::new();
        // Stray continuation, then a lead byte cut short by ASCII
        let chars = decode_all(&mut decoder, &[0x80, b'x', 0xe2, 0x82, b'y']);
        assert_eq!(chars, vec![' ', 'x', ' ', 'y']);
    }

    #[test]
    fn test_ansi_decoder_strips_sequences() {
        let mut decoder = AnsiDecoder::new();
        let chars: String = decode_all(&mut decoder, b"\x1b[32mroot\x1b[0m@host:~# \r\n")
            .into_iter()
            .collect();
        assert_eq!(chars, "root@host:~# \r\n");
    }

    #[test]
    fn test_ansi_decoder_keeps_backspace() {
        let mut decoder = TextDecoder::new(true);
        let chars = decode_all(&mut decoder, b"ab\x08c\x07");
        assert_eq!(chars, vec!['a', 'b', '\x08', 'c']);
    }

    #[tokio::test]
    async fn test_capture_preserves_order() {
        let (mut remote, local) = tokio::io::duplex(64);
        let (source, mut rx) = CharacterSource::spawn(local, ByteDecoder);

        tokio::io::AsyncWriteExt::write_all(&mut remote, b"0123456789")
            .await
            .unwrap();

        let mut got = Vec::new();
        while got.len() < 10 {
            got.push(rx.recv().await.unwrap());
        }
        assert_eq!(got, b"0123456789");
        assert!(source.is_running());
    }

    #[tokio::test]
    async fn test_capture_ends_on_eof() {
        let (remote, local) = tokio::io::duplex(64);
        let (_source, mut rx) = CharacterSource::spawn(local, ByteDecoder);
        drop(remote);
        assert!(rx.recv().await.is_none());
    }
}
