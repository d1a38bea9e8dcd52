//! SPI transport framing.
//!
//! SPI frames are delimited by chip select. The host opens every transaction
//! with a direction prefix on MOSI:
//!
//! ```text
//! Command:  MOSI [0x11][seq][command][data...][crc:2]
//!           MISO [dummy bytes]
//! Query:    MOSI [0x55][dummy bytes]
//!           MISO [dummy]["LEN"][len:2][crc:2]        length reply
//!           MISO [dummy]["RSP"][seq][status][data...][crc:2]
//! ```
//!
//! The 3-byte ASCII prefix on MISO disambiguates a length-only reply from a
//! full response; anything else means the client has no reply ready yet.

use heapless::Vec;

use mdfu_protocol::{verify, CommandPacket, PacketError, StatusPacket, MAX_PACKET_SIZE};

use crate::{Framer, FramingError, CHECKSUM_SIZE};

/// MOSI prefix opening a command transaction
pub const WRITE_PREFIX: u8 = 0x11;

/// MOSI prefix opening a response query
pub const READ_PREFIX: u8 = 0x55;

/// MISO prefix of a length reply
pub const LENGTH_REPLY_PREFIX: [u8; 3] = *b"LEN";

/// MISO prefix of a response reply
pub const RESPONSE_REPLY_PREFIX: [u8; 3] = *b"RSP";

/// Smallest decodable frame: two-byte packet header plus checksum
const MIN_FRAME: usize = 2 + CHECKSUM_SIZE;

/// Reply payload offset: dummy byte plus 3-byte prefix
const REPLY_PAYLOAD_START: usize = 4;

/// One transaction: prefix, packet, checksum
const TRANSACTION_CAPACITY: usize = REPLY_PAYLOAD_START + MAX_PACKET_SIZE + CHECKSUM_SIZE;

/// SPI bus events delivered to the framer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiEvent {
    /// Chip select asserted
    Enable,
    /// One full-duplex byte transfer
    Transfer { mosi: u8, miso: u8 },
    /// Chip select released, closing the transaction
    Disable,
}

/// Decoded output of one SPI transaction
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiOutput {
    /// Command frame decoded from a write transaction
    Command(CommandPacket),
    /// Write frame whose checksum validated but whose packet did not decode
    CommandInvalid(PacketError),
    /// Response length announced by the client
    ResponseLength(u16),
    /// Full response frame
    Response(StatusPacket),
    /// Response frame whose checksum validated but whose packet did not decode
    ResponseInvalid(PacketError),
    /// Query answered without a LEN/RSP prefix: no reply ready yet
    NotReady,
    /// Transaction discarded as malformed
    Malformed(FramingError),
}

/// State machine decoding MDFU traffic from SPI transactions.
///
/// Both lines are buffered between chip select edges; the transaction is
/// decoded when chip select releases. MOSI carries command frames, MISO
/// carries the client's replies behind a dummy turnaround byte.
#[derive(Debug, Clone)]
pub struct SpiFramer {
    mosi: Vec<u8, TRANSACTION_CAPACITY>,
    miso: Vec<u8, TRANSACTION_CAPACITY>,
    selected: bool,
    overflow: bool,
}

impl Default for SpiFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiFramer {
    /// Create a framer
    pub fn new() -> Self {
        Self {
            mosi: Vec::new(),
            miso: Vec::new(),
            selected: false,
            overflow: false,
        }
    }

    /// Feed one bus event.
    ///
    /// Returns a decode result when chip select releases.
    pub fn feed(&mut self, event: SpiEvent) -> Option<SpiOutput> {
        match event {
            SpiEvent::Enable => {
                self.selected = true;
                self.mosi.clear();
                self.miso.clear();
                self.overflow = false;
                None
            }
            SpiEvent::Transfer { mosi, miso } => {
                if self.selected {
                    let pushed = self.mosi.push(mosi).is_ok() && self.miso.push(miso).is_ok();
                    if !pushed {
                        self.overflow = true;
                    }
                }
                None
            }
            SpiEvent::Disable => {
                if !self.selected {
                    return None;
                }
                self.selected = false;
                self.finish_transaction()
            }
        }
    }

    /// Reset, discarding buffered data
    pub fn reset(&mut self) {
        self.mosi.clear();
        self.miso.clear();
        self.selected = false;
        self.overflow = false;
    }

    fn finish_transaction(&mut self) -> Option<SpiOutput> {
        if self.overflow {
            return Some(SpiOutput::Malformed(FramingError::FrameTooLong));
        }
        let &first = self.mosi.first()?;
        match first {
            WRITE_PREFIX => Some(self.finish_command()),
            READ_PREFIX => Some(self.finish_reply()),
            other => Some(SpiOutput::Malformed(FramingError::BadStartCode(other))),
        }
    }

    /// Decode the MOSI line of a command transaction
    fn finish_command(&self) -> SpiOutput {
        let frame = &self.mosi[1..];
        if frame.len() < MIN_FRAME {
            return SpiOutput::Malformed(FramingError::FrameTooShort);
        }
        let (packet_bytes, crc) = frame.split_at(frame.len() - CHECKSUM_SIZE);
        if !verify(packet_bytes, u16::from_le_bytes([crc[0], crc[1]])) {
            return SpiOutput::Malformed(FramingError::ChecksumMismatch);
        }
        match CommandPacket::decode(packet_bytes) {
            Ok(packet) => SpiOutput::Command(packet),
            Err(err) => SpiOutput::CommandInvalid(err),
        }
    }

    /// Decode the MISO line of a response query
    fn finish_reply(&self) -> SpiOutput {
        if self.miso.len() < REPLY_PAYLOAD_START {
            return SpiOutput::Malformed(FramingError::FrameTooShort);
        }
        let prefix = &self.miso[1..REPLY_PAYLOAD_START];
        let payload = &self.miso[REPLY_PAYLOAD_START..];
        if prefix == &RESPONSE_REPLY_PREFIX {
            self.finish_response(payload)
        } else if prefix == &LENGTH_REPLY_PREFIX {
            self.finish_length(payload)
        } else {
            // A missing prefix is the client's "not ready" indication
            SpiOutput::NotReady
        }
    }

    fn finish_length(&self, payload: &[u8]) -> SpiOutput {
        if payload.len() != 2 + CHECKSUM_SIZE {
            let error = if payload.len() < 2 + CHECKSUM_SIZE {
                FramingError::FrameTooShort
            } else {
                FramingError::FrameTooLong
            };
            return SpiOutput::Malformed(error);
        }
        let length_bytes = [payload[0], payload[1]];
        if !verify(&length_bytes, u16::from_le_bytes([payload[2], payload[3]])) {
            return SpiOutput::Malformed(FramingError::ChecksumMismatch);
        }
        SpiOutput::ResponseLength(u16::from_le_bytes(length_bytes))
    }

    fn finish_response(&self, payload: &[u8]) -> SpiOutput {
        if payload.len() < MIN_FRAME {
            return SpiOutput::Malformed(FramingError::FrameTooShort);
        }
        let (packet_bytes, crc) = payload.split_at(payload.len() - CHECKSUM_SIZE);
        if !verify(packet_bytes, u16::from_le_bytes([crc[0], crc[1]])) {
            return SpiOutput::Malformed(FramingError::ChecksumMismatch);
        }
        match StatusPacket::decode(packet_bytes) {
            Ok(packet) => SpiOutput::Response(packet),
            Err(err) => SpiOutput::ResponseInvalid(err),
        }
    }
}

impl Framer for SpiFramer {
    type Event = SpiEvent;
    type Output = SpiOutput;

    fn feed(&mut self, event: SpiEvent) -> Option<SpiOutput> {
        SpiFramer::feed(self, event)
    }

    fn reset(&mut self) {
        SpiFramer::reset(self);
    }
}
