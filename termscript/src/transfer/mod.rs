//! Byte transfer over the console stream.
//!
//! [`ByteTransfer`] exposes the captured stream as timed single-byte reads
//! and writes, which is all a legacy transfer protocol needs. The file
//! helpers launch the remote side of the protocol, skip its banner, and
//! bracket the binary phase with side-channel markers so the host stops
//! rendering the stream as text.

mod xmodem;

pub use xmodem::{Xmodem, checksum, crc16};

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::channel::{ByteDecoder, CharacterSource, Deadline, TimedQueueReader};
use crate::config::TransferConfig;
use crate::error::{ChannelError, Result};
use crate::ui::UiSink;

/// Timed byte source and sink consumed by a transfer protocol.
pub trait TimedByteIo: Send {
    /// Read exactly `size` bytes within `timeout`.
    ///
    /// `Ok(None)` when fewer than `size` bytes arrived in time; those
    /// bytes are left for the next read.
    fn get(
        &mut self,
        size: usize,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Write and flush one byte. Returns the count written.
    fn put(&mut self, byte: u8) -> impl Future<Output = Result<usize>> + Send;

    /// Write a whole block.
    fn write_block(&mut self, data: &[u8]) -> impl Future<Output = Result<usize>> + Send {
        async move {
            let mut written = 0;
            for &byte in data {
                written += self.put(byte).await?;
            }
            Ok(written)
        }
    }
}

/// A binary file transfer protocol driven over [`TimedByteIo`].
///
/// Failures are returned as-is by the file helpers.
pub trait TransferProtocol: Sync {
    /// Receive a file into `sink`. Returns the byte count written.
    fn receive<I, W>(&self, io: &mut I, sink: &mut W) -> impl Future<Output = Result<u64>> + Send
    where
        I: TimedByteIo,
        W: AsyncWrite + Unpin + Send;

    /// Send `data`. Returns the payload byte count sent.
    fn send<I>(&self, io: &mut I, data: &[u8]) -> impl Future<Output = Result<u64>> + Send
    where
        I: TimedByteIo;
}

/// Byte-granularity adapter over the console stream.
pub struct ByteTransfer {
    /// Capture task feeding `input`.
    _source: CharacterSource,

    input: TimedQueueReader<u8>,

    output: Box<dyn AsyncWrite + Send + Unpin>,

    config: TransferConfig,

    ui: Option<UiSink>,
}

impl ByteTransfer {
    /// Wrap the two halves of a duplex stream. Must be called within a
    /// tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, config: TransferConfig, ui: Option<UiSink>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (source, rx) = CharacterSource::spawn(reader, ByteDecoder);
        Self {
            _source: source,
            input: TimedQueueReader::new(rx, config.poll_interval),
            output: Box::new(writer),
            config,
            ui,
        }
    }

    /// Adapter on stdin/stdout with the side channel on stderr.
    pub fn stdio(config: TransferConfig) -> Self {
        Self::new(
            tokio::io::stdin(),
            tokio::io::stdout(),
            config,
            Some(UiSink::stderr()),
        )
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Read one CR/LF terminated, non-empty line of bytes.
    pub async fn read_line(&mut self, timeout: Option<Duration>) -> Result<Option<String>> {
        let deadline = Deadline::after(timeout);
        let mut line = BytesMut::new();

        loop {
            match self.input.poll_until(&deadline).await? {
                Some(terminator @ (b'\r' | b'\n')) if !line.is_empty() => {
                    if terminator == b'\r' {
                        self.skip_line_feed().await?;
                    }
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                Some(b'\r' | b'\n') => {}
                Some(0x08) => {
                    line.truncate(line.len().saturating_sub(1));
                }
                Some(byte) => line.extend_from_slice(&[byte]),
                None => {}
            }

            if deadline.expired() {
                self.input.unread(line.to_vec());
                return Ok(None);
            }
        }
    }

    /// Consume the LF of a CR LF pair so it never reaches the protocol.
    async fn skip_line_feed(&mut self) -> Result<()> {
        let wait = self.input.poll_interval();
        match self.input.poll(Some(wait)).await? {
            Some(b'\n') | None => {}
            Some(byte) => self.input.unread(vec![byte]),
        }
        Ok(())
    }

    /// Write a text line for the remote shell.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        debug!("transfer: launching {:?}", line);
        let mut data = BytesMut::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\n");
        self.write_flush(&data).await
    }

    async fn write_flush(&mut self, data: &[u8]) -> Result<()> {
        self.output.write_all(data).await.map_err(ChannelError::Io)?;
        self.output.flush().await.map_err(ChannelError::Io)?;
        Ok(())
    }

    /// Skip `count` banner lines, echoing each as an alert.
    ///
    /// Stops early when a line does not arrive within the banner timeout.
    /// Returns the number of lines skipped.
    pub async fn discard_banner(&mut self, count: usize) -> Result<usize> {
        for skipped in 0..count {
            match self.read_line(Some(self.config.banner_timeout)).await? {
                Some(line) => {
                    debug!("transfer: banner {:?}", line);
                    self.alert(&line)?;
                }
                None => {
                    warn!(
                        "transfer: banner ended after {} of {} lines",
                        skipped, count
                    );
                    return Ok(skipped);
                }
            }
        }
        Ok(count)
    }

    /// Fetch `remote` into the local file `local`.
    pub async fn receive_file<P: TransferProtocol>(
        &mut self,
        protocol: &P,
        remote: &str,
        local: impl AsRef<Path>,
    ) -> Result<u64> {
        let local = local.as_ref();
        let mut file = tokio::fs::File::create(local).await?;

        let command = self.config.receive_command_for(remote);
        self.enter_binary(&command, self.config.receive_banners).await?;
        let result = protocol.receive(self, &mut file).await;
        self.leave_binary()?;

        let count = result?;
        file.flush().await?;
        self.alert(&format!("Transferred {} to {}", remote, local.display()))?;
        Ok(count)
    }

    /// Upload the local file `local` to `remote`.
    pub async fn send_file<P: TransferProtocol>(
        &mut self,
        protocol: &P,
        remote: &str,
        local: impl AsRef<Path>,
    ) -> Result<u64> {
        let local = local.as_ref();
        let data = tokio::fs::read(local).await?;

        let command = self.config.send_command_for(remote);
        self.enter_binary(&command, self.config.send_banners).await?;
        let result = protocol.send(self, &data).await;
        self.leave_binary()?;

        let count = result?;
        self.alert(&format!("Transferred {} to {}", local.display(), remote))?;
        Ok(count)
    }

    async fn enter_binary(&mut self, command: &str, banners: usize) -> Result<()> {
        self.write_line(command).await?;
        self.discard_banner(banners).await?;
        if let Some(ui) = self.ui.as_mut() {
            ui.transfer_begin()?;
        }
        tokio::time::sleep(self.config.guard_interval).await;
        Ok(())
    }

    fn leave_binary(&mut self) -> Result<()> {
        if let Some(ui) = self.ui.as_mut() {
            ui.transfer_end()?;
        }
        Ok(())
    }

    /// Show an alert line on the side channel, if one is attached.
    pub fn alert(&mut self, text: &str) -> Result<()> {
        match self.ui.as_mut() {
            Some(ui) => ui.alert(text)?,
            None => trace!("alert without ui sink: {}", text),
        }
        Ok(())
    }
}

impl TimedByteIo for ByteTransfer {
    async fn get(&mut self, size: usize, timeout: Duration) -> Result<Option<Bytes>> {
        let deadline = Deadline::after(Some(timeout));
        let mut data = BytesMut::with_capacity(size);

        while data.len() < size {
            if let Some(byte) = self.input.poll_until(&deadline).await? {
                data.extend_from_slice(&[byte]);
                continue;
            }
            if deadline.expired() {
                trace!("get: {} of {} bytes before timeout", data.len(), size);
                self.input.unread(data.to_vec());
                return Ok(None);
            }
        }
        Ok(Some(data.freeze()))
    }

    async fn put(&mut self, byte: u8) -> Result<usize> {
        self.write_flush(&[byte]).await?;
        Ok(1)
    }

    async fn write_block(&mut self, data: &[u8]) -> Result<usize> {
        self.write_flush(data).await?;
        Ok(data.len())
    }
}

impl std::fmt::Debug for ByteTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteTransfer")
            .field("config", &self.config)
            .field("ui", &self.ui.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tokio::io::{AsyncReadExt, DuplexStream};

    use super::*;
    use crate::error::TransferError;
    use crate::ui::{CaptureBuffer, UiMessage};

    fn fast_config() -> TransferConfig {
        TransferConfig {
            poll_interval: Duration::from_millis(20),
            get_timeout: Duration::from_millis(500),
            banner_timeout: Duration::from_millis(300),
            guard_interval: Duration::from_millis(10),
            ..TransferConfig::default()
        }
    }

    fn transfer_pair(ui: Option<UiSink>) -> (ByteTransfer, DuplexStream) {
        let (remote, local) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(local);
        (ByteTransfer::new(reader, writer, fast_config(), ui), remote)
    }

    #[tokio::test]
    async fn test_get_exact_size() {
        let (mut io, mut remote) = transfer_pair(None);
        remote.write_all(&[1, 2, 3, 4]).await.unwrap();

        let got = io.get(4, Duration::from_secs(1)).await.unwrap();
        assert_eq!(got.as_deref(), Some(&[1u8, 2, 3, 4][..]));
    }

    #[tokio::test]
    async fn test_get_short_keeps_bytes() {
        let (mut io, mut remote) = transfer_pair(None);
        remote.write_all(&[1, 2, 3]).await.unwrap();

        let got = io.get(4, Duration::from_millis(200)).await.unwrap();
        assert!(got.is_none());

        let got = io.get(3, Duration::from_millis(10)).await.unwrap();
        assert_eq!(got.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[tokio::test]
    async fn test_put_writes_one_byte() {
        let (mut io, mut remote) = transfer_pair(None);
        assert_eq!(io.put(0x15).await.unwrap(), 1);

        let mut buf = [0u8; 1];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x15]);
    }

    #[tokio::test]
    async fn test_read_line_skips_empty_lines() {
        let (mut io, mut remote) = transfer_pair(None);
        remote.write_all(b"\r\n\r\nlsz waiting\r\n").await.unwrap();

        let line = io.read_line(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(line.as_deref(), Some("lsz waiting"));
    }

    #[tokio::test]
    async fn test_discard_banner_alerts_each_line() {
        let capture = CaptureBuffer::default();
        let (mut io, mut remote) = transfer_pair(Some(capture.sink()));
        remote.write_all(b"lrz -Xq x\r\nrx: ready\r\n").await.unwrap();

        assert_eq!(io.discard_banner(2).await.unwrap(), 2);
        assert_eq!(
            capture.messages(),
            vec![
                (UiMessage::Alert, "lrz -Xq x".to_string()),
                (UiMessage::Alert, "rx: ready".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_discard_banner_stops_on_timeout() {
        let (mut io, mut remote) = transfer_pair(None);
        remote.write_all(b"only line\n").await.unwrap();
        assert_eq!(io.discard_banner(2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_closed_stream() {
        let (mut io, remote) = transfer_pair(None);
        drop(remote);
        let err = io.get(1, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, crate::Error::Channel(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_banner_discard_consumes_crlf() {
        let (mut io, mut remote) = transfer_pair(None);
        remote.write_all(b"lsz -Xq -C 4 f\r\n").await.unwrap();

        assert_eq!(io.discard_banner(1).await.unwrap(), 1);
        let next = io.get(1, Duration::from_millis(100)).await.unwrap();
        assert!(next.is_none(), "terminator left for the protocol: {next:?}");
    }

    #[tokio::test]
    async fn test_banner_discard_keeps_byte_after_cr() {
        let (mut io, mut remote) = transfer_pair(None);
        remote.write_all(b"rz ready\r\x15").await.unwrap();

        assert_eq!(io.discard_banner(1).await.unwrap(), 1);
        let next = io.get(1, Duration::from_millis(100)).await.unwrap();
        assert_eq!(next.as_deref(), Some(&[0x15u8][..]));
    }

    /// Protocol double that runs only once the begin marker is out.
    struct Scripted {
        capture: CaptureBuffer,
        payload: Vec<u8>,
        fail: bool,
    }

    impl Scripted {
        fn new(capture: &CaptureBuffer, payload: &[u8], fail: bool) -> Self {
            Self {
                capture: capture.clone(),
                payload: payload.to_vec(),
                fail,
            }
        }

        fn check_binary_mode(&self) -> Result<()> {
            let last = self.capture.messages().last().map(|(kind, _)| *kind);
            assert_eq!(last, Some(UiMessage::TransferBegin));
            if self.fail {
                return Err(TransferError::Cancelled.into());
            }
            Ok(())
        }
    }

    impl TransferProtocol for Scripted {
        async fn receive<I, W>(&self, _io: &mut I, sink: &mut W) -> Result<u64>
        where
            I: TimedByteIo,
            W: AsyncWrite + Unpin + Send,
        {
            self.check_binary_mode()?;
            sink.write_all(&self.payload).await?;
            Ok(self.payload.len() as u64)
        }

        async fn send<I>(&self, io: &mut I, data: &[u8]) -> Result<u64>
        where
            I: TimedByteIo,
        {
            self.check_binary_mode()?;
            io.write_block(data).await?;
            Ok(data.len() as u64)
        }
    }

    async fn expect_line(remote: &mut DuplexStream, line: &[u8]) {
        let mut buf = vec![0u8; line.len()];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, line);
    }

    #[tokio::test]
    async fn test_receive_file_flow() {
        let capture = CaptureBuffer::default();
        let (mut io, mut remote) = transfer_pair(Some(capture.sink()));
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("messages.log");
        std::fs::write(&local, b"stale contents longer than the payload").unwrap();

        let shell = tokio::spawn(async move {
            expect_line(&mut remote, b"lsz -Xq -C 4 /var/log/messages\n").await;
            remote
                .write_all(b"lsz -Xq -C 4 /var/log/messages\r\n")
                .await
                .unwrap();
            remote
        });

        let protocol = Scripted::new(&capture, b"payload", false);
        let start = Instant::now();
        let count = io
            .receive_file(&protocol, "/var/log/messages", &local)
            .await
            .unwrap();
        assert!(start.elapsed() >= io.config().guard_interval);
        let _remote = shell.await.unwrap();

        assert_eq!(count, 7);
        assert_eq!(std::fs::read(&local).unwrap(), b"payload");
        assert_eq!(
            capture.messages(),
            vec![
                (UiMessage::Alert, "lsz -Xq -C 4 /var/log/messages".to_string()),
                (UiMessage::TransferBegin, String::new()),
                (UiMessage::TransferEnd, String::new()),
                (
                    UiMessage::Alert,
                    format!("Transferred /var/log/messages to {}", local.display())
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_send_file_flow() {
        let capture = CaptureBuffer::default();
        let (mut io, mut remote) = transfer_pair(Some(capture.sink()));
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("upload.txt");
        std::fs::write(&local, b"hello world").unwrap();

        let shell = tokio::spawn(async move {
            expect_line(&mut remote, b"lrz -Xq /tmp/upload.txt\n").await;
            remote
                .write_all(b"lrz -Xq /tmp/upload.txt\r\nrz ready to receive\r\n")
                .await
                .unwrap();
            expect_line(&mut remote, b"hello world").await;
            remote
        });

        let protocol = Scripted::new(&capture, b"", false);
        let count = io
            .send_file(&protocol, "/tmp/upload.txt", &local)
            .await
            .unwrap();
        let _remote = shell.await.unwrap();

        assert_eq!(count, 11);
        assert_eq!(
            capture.messages(),
            vec![
                (UiMessage::Alert, "lrz -Xq /tmp/upload.txt".to_string()),
                (UiMessage::Alert, "rz ready to receive".to_string()),
                (UiMessage::TransferBegin, String::new()),
                (UiMessage::TransferEnd, String::new()),
                (
                    UiMessage::Alert,
                    format!("Transferred {} to /tmp/upload.txt", local.display())
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_transfer_still_ends_binary_mode() {
        let capture = CaptureBuffer::default();
        let (mut io, mut remote) = transfer_pair(Some(capture.sink()));
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("partial.bin");
        remote.write_all(b"lsz banner\r\n").await.unwrap();

        let protocol = Scripted::new(&capture, b"unused", true);
        let err = io
            .receive_file(&protocol, "/tmp/file.bin", &local)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            crate::Error::Transfer(TransferError::Cancelled)
        ));
        assert_eq!(
            capture.messages(),
            vec![
                (UiMessage::Alert, "lsz banner".to_string()),
                (UiMessage::TransferBegin, String::new()),
                (UiMessage::TransferEnd, String::new()),
            ]
        );
    }
}
