//! XMODEM file transfer.
//!
//! Sends 128-byte blocks; receives 128-byte and 1K blocks. The receiver
//! asks for CRC-16 first and falls back to the 8-bit checksum after half
//! of its retries.

use std::time::Duration;

use log::{debug, trace, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{TimedByteIo, TransferProtocol};
use crate::error::{Result, TransferError};

const SOH: u8 = 0x01;
const STX: u8 = 0x02;
const EOT: u8 = 0x04;
const ACK: u8 = 0x06;
const NAK: u8 = 0x15;
const CAN: u8 = 0x18;
const CRC: u8 = b'C';
const PAD: u8 = 0x1a;

const BLOCK_SIZE: usize = 128;
const BLOCK_SIZE_1K: usize = 1024;

/// CRC-16/XMODEM (polynomial 0x1021, initial value 0).
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |mut crc, &byte| {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// 8-bit additive checksum.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte))
}

/// Error check negotiated with the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    Crc,
    Sum,
}

impl Check {
    fn len(self) -> usize {
        match self {
            Self::Crc => 2,
            Self::Sum => 1,
        }
    }

    fn trailer(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Crc => crc16(data).to_be_bytes().to_vec(),
            Self::Sum => vec![checksum(data)],
        }
    }

    fn verify(self, data: &[u8], trailer: &[u8]) -> bool {
        self.trailer(data) == trailer
    }
}

/// XMODEM protocol settings.
#[derive(Debug, Clone)]
pub struct Xmodem {
    /// Attempts per stage before giving up.
    pub retries: u32,

    /// Wait for each protocol byte or block.
    pub timeout: Duration,
}

impl Default for Xmodem {
    fn default() -> Self {
        Self {
            retries: 16,
            timeout: Duration::from_secs(1),
        }
    }
}

impl Xmodem {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    async fn get_byte<I: TimedByteIo>(&self, io: &mut I) -> Result<Option<u8>> {
        Ok(io.get(1, self.timeout).await?.map(|b| b[0]))
    }

    async fn cancel<I: TimedByteIo>(&self, io: &mut I) -> Result<()> {
        io.write_block(&[CAN, CAN]).await?;
        Ok(())
    }

    /// Discard line noise until the peer goes quiet.
    async fn purge<I: TimedByteIo>(&self, io: &mut I) -> Result<()> {
        while io.get(1, self.timeout / 4).await?.is_some() {}
        Ok(())
    }

    /// A CAN was read; a second one confirms the abort.
    async fn confirm_cancel<I: TimedByteIo>(&self, io: &mut I) -> Result<bool> {
        Ok(self.get_byte(io).await? == Some(CAN))
    }

    /// Solicit the first block. Returns its header byte and the check mode.
    async fn start_receive<I: TimedByteIo>(&self, io: &mut I) -> Result<(u8, Check)> {
        for attempt in 0..self.retries {
            let check = if attempt < self.retries / 2 {
                Check::Crc
            } else {
                Check::Sum
            };
            io.put(if check == Check::Crc { CRC } else { NAK }).await?;

            match self.get_byte(io).await? {
                Some(header @ (SOH | STX | EOT)) => {
                    debug!("xmodem: peer started, {:?} mode", check);
                    return Ok((header, check));
                }
                Some(CAN) => {
                    if self.confirm_cancel(io).await? {
                        return Err(TransferError::Cancelled.into());
                    }
                }
                Some(byte) => trace!("xmodem: ignoring {:#04x} before start", byte),
                None => trace!("xmodem: no start, attempt {}", attempt + 1),
            }
        }
        Err(TransferError::RetriesExceeded {
            stage: "start",
            retries: self.retries,
        }
        .into())
    }

    /// Wait for the receiver to request a transfer. Returns the check mode.
    async fn start_send<I: TimedByteIo>(&self, io: &mut I) -> Result<Check> {
        for _ in 0..self.retries {
            match self.get_byte(io).await? {
                Some(CRC) => return Ok(Check::Crc),
                Some(NAK) => return Ok(Check::Sum),
                Some(CAN) => {
                    if self.confirm_cancel(io).await? {
                        return Err(TransferError::Cancelled.into());
                    }
                }
                Some(byte) => trace!("xmodem: ignoring {:#04x} before start", byte),
                None => {}
            }
        }
        Err(TransferError::RetriesExceeded {
            stage: "start",
            retries: self.retries,
        }
        .into())
    }

    /// Send one framed block and wait for its ACK.
    async fn send_block<I: TimedByteIo>(
        &self,
        io: &mut I,
        seq: u8,
        payload: &[u8],
        check: Check,
    ) -> Result<()> {
        let mut frame = Vec::with_capacity(BLOCK_SIZE + 5);
        frame.extend_from_slice(&[SOH, seq, 0xff - seq]);
        frame.extend_from_slice(payload);
        frame.resize(3 + BLOCK_SIZE, PAD);
        let trailer = check.trailer(&frame[3..]);
        frame.extend_from_slice(&trailer);

        for attempt in 0..self.retries {
            io.write_block(&frame).await?;
            match self.get_byte(io).await? {
                Some(ACK) => {
                    trace!("xmodem: block {} acknowledged", seq);
                    return Ok(());
                }
                Some(CAN) => {
                    if self.confirm_cancel(io).await? {
                        return Err(TransferError::Cancelled.into());
                    }
                }
                Some(NAK) | None => {
                    debug!("xmodem: resending block {}, attempt {}", seq, attempt + 1)
                }
                Some(byte) => warn!("xmodem: {}", TransferError::UnexpectedByte(byte)),
            }
        }
        self.cancel(io).await?;
        Err(TransferError::RetriesExceeded {
            stage: "block",
            retries: self.retries,
        }
        .into())
    }

    async fn send_eot<I: TimedByteIo>(&self, io: &mut I) -> Result<()> {
        for _ in 0..self.retries {
            io.put(EOT).await?;
            if self.get_byte(io).await? == Some(ACK) {
                return Ok(());
            }
        }
        Err(TransferError::RetriesExceeded {
            stage: "end of transmission",
            retries: self.retries,
        }
        .into())
    }
}

impl TransferProtocol for Xmodem {
    async fn receive<I, W>(&self, io: &mut I, sink: &mut W) -> Result<u64>
    where
        I: TimedByteIo,
        W: AsyncWrite + Unpin + Send,
    {
        let (mut header, check) = self.start_receive(io).await?;
        let mut expected: u8 = 1;
        let mut errors = 0;
        let mut total = 0u64;

        loop {
            let size = match header {
                SOH => Some(BLOCK_SIZE),
                STX => Some(BLOCK_SIZE_1K),
                EOT => {
                    io.put(ACK).await?;
                    debug!("xmodem: received {} bytes", total);
                    return Ok(total);
                }
                CAN => {
                    if self.confirm_cancel(io).await? {
                        return Err(TransferError::Cancelled.into());
                    }
                    None
                }
                _ => None,
            };

            let accepted = match size {
                Some(size) => {
                    let frame_len = 2 + size + check.len();
                    match io.get(frame_len, self.timeout).await? {
                        Some(frame) => {
                            let (seq, inv) = (frame[0], frame[1]);
                            let (data, trailer) = frame[2..].split_at(size);
                            if seq != 0xff - inv || !check.verify(data, trailer) {
                                debug!("xmodem: bad block {}", seq);
                                false
                            } else if seq == expected {
                                sink.write_all(data).await?;
                                total += size as u64;
                                expected = expected.wrapping_add(1);
                                true
                            } else if seq == expected.wrapping_sub(1) {
                                trace!("xmodem: duplicate block {}", seq);
                                true
                            } else {
                                warn!("xmodem: out of sequence block {}, expected {}", seq, expected);
                                self.cancel(io).await?;
                                return Err(TransferError::UnexpectedByte(seq).into());
                            }
                        }
                        None => false,
                    }
                }
                None => {
                    trace!("xmodem: ignoring {:#04x} at block start", header);
                    false
                }
            };

            if accepted {
                errors = 0;
                io.put(ACK).await?;
            } else {
                errors += 1;
                if errors >= self.retries {
                    self.cancel(io).await?;
                    return Err(TransferError::RetriesExceeded {
                        stage: "block",
                        retries: self.retries,
                    }
                    .into());
                }
                self.purge(io).await?;
                io.put(NAK).await?;
            }

            header = loop {
                match self.get_byte(io).await? {
                    Some(byte) => break byte,
                    None => {
                        errors += 1;
                        if errors >= self.retries {
                            self.cancel(io).await?;
                            return Err(TransferError::Timeout.into());
                        }
                        io.put(NAK).await?;
                    }
                }
            };
        }
    }

    async fn send<I>(&self, io: &mut I, data: &[u8]) -> Result<u64>
    where
        I: TimedByteIo,
    {
        let check = self.start_send(io).await?;
        debug!("xmodem: sending {} bytes, {:?} mode", data.len(), check);

        let mut seq: u8 = 1;
        for payload in data.chunks(BLOCK_SIZE) {
            self.send_block(io, seq, payload, check).await?;
            seq = seq.wrapping_add(1);
        }
        self.send_eot(io).await?;
        Ok(data.len() as u64)
    }
}
