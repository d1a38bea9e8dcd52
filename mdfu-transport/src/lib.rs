//! MDFU transport framers
//!
//! Each MDFU transport wraps protocol packets in its own framing and appends
//! a 16-bit checksum:
//!
//! ```text
//! Serial: ┌──────┬─────────────────────────────────┬──────┐
//!         │ 0x56 │ escape(packet + checksum)       │ 0x9E │
//!         └──────┴─────────────────────────────────┴──────┘
//! I2C:    write  = [packet][checksum:2]
//!         read   = status byte, then [len:2][crc:2], then [packet][crc:2]
//! SPI:    MOSI   = [0x11][packet][checksum:2]          (command)
//!         MOSI   = [0x55][dummy...]                    (response query)
//!         MISO   = [dummy]["LEN"|"RSP"][payload][crc:2]
//! ```
//!
//! Every framer is an exclusively-owned state machine fed one transport
//! event at a time: it returns `None` until a complete frame has been
//! recognized, then yields a typed output. Corrupt traffic never aborts the
//! stream; framers resynchronize and keep decoding subsequent frames.

#![no_std]
#![deny(unsafe_code)]

pub mod i2c;
pub mod serial;
pub mod spi;

use mdfu_protocol::{
    ClientInfo, ClientInfoError, FileTransferAbortCause, ImageState, MdfuCommand, MdfuStatus,
    StatusPacket,
};

pub use i2c::{I2cEvent, I2cFramer, I2cOutput, I2cPhase, PollStatus};
pub use serial::{SerialDirection, SerialFrame, SerialFramer};
pub use spi::{SpiEvent, SpiFramer, SpiOutput};

/// Size of the transport checksum trailing every frame
pub const CHECKSUM_SIZE: usize = 2;

/// Transport-level framing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FramingError {
    /// Frame did not begin with the expected start code or prefix
    BadStartCode(u8),
    /// Frame did not end with the expected end code
    BadEndCode(u8),
    /// Escape code followed by an unknown byte
    UnknownEscape(u8),
    /// Frame checksum did not match its contents
    ChecksumMismatch,
    /// Frame too short to hold a packet and checksum
    FrameTooShort,
    /// Frame exceeds the framer buffer capacity
    FrameTooLong,
}

impl core::fmt::Display for FramingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FramingError::BadStartCode(byte) => write!(f, "invalid frame start code {byte:#04x}"),
            FramingError::BadEndCode(byte) => write!(f, "invalid frame end code {byte:#04x}"),
            FramingError::UnknownEscape(byte) => {
                write!(f, "unknown escape sequence 0xCC{byte:02x}")
            }
            FramingError::ChecksumMismatch => write!(f, "frame check sequence error"),
            FramingError::FrameTooShort => write!(f, "too few bytes for a valid frame"),
            FramingError::FrameTooLong => write!(f, "frame exceeds buffer capacity"),
        }
    }
}

/// A source of transport events for a framer.
///
/// Concrete adapters (capture hosts, bus drivers) implement this; the
/// framers never depend on how events are produced.
pub trait TransportEventSource {
    type Event;

    /// Return the next event, or `None` when the stream is exhausted
    fn next_event(&mut self) -> Option<Self::Event>;
}

/// A transport framer state machine
pub trait Framer {
    type Event;
    type Output;

    /// Feed one transport event.
    ///
    /// Returns a decode result once a complete frame has been recognized,
    /// `None` while more events are needed.
    fn feed(&mut self, event: Self::Event) -> Option<Self::Output>;

    /// Reset to the initial state, discarding buffered data
    fn reset(&mut self);
}

/// Drain `source`, feeding `framer` and passing each output to `sink`
pub fn run_framer<S, F>(source: &mut S, framer: &mut F, mut sink: impl FnMut(F::Output))
where
    S: TransportEventSource<Event = F::Event>,
    F: Framer,
{
    while let Some(event) = source.next_event() {
        if let Some(output) = framer.feed(event) {
            sink(output);
        }
    }
}

/// Interpretation of a status packet's data, derived from the command it
/// answers
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponseDetail {
    /// No interpretation available for this response
    None,
    /// Decoded GetClientInfo response payload
    ClientInfo(ClientInfo),
    /// GetClientInfo response payload that failed to decode
    ClientInfoInvalid(ClientInfoError),
    /// Decoded GetImageState response payload
    ImageState(ImageState),
    /// Abort cause from an AbortFileTransfer status payload
    AbortCause(FileTransferAbortCause),
}

/// Interpret a status packet's data in the context of the command it
/// acknowledges.
///
/// Used by the I2C framer, which tracks the in-flight command; consumers of
/// the other transports can call it with their own command tracking.
pub fn interpret_response(command: Option<MdfuCommand>, packet: &StatusPacket) -> ResponseDetail {
    if packet.status == MdfuStatus::AbortFileTransfer {
        if let Some(&cause) = packet.data.first() {
            if let Some(cause) = FileTransferAbortCause::from_code(cause) {
                return ResponseDetail::AbortCause(cause);
            }
        }
        return ResponseDetail::None;
    }
    if packet.status != MdfuStatus::Success {
        return ResponseDetail::None;
    }
    match command {
        Some(MdfuCommand::GetClientInfo) => match ClientInfo::decode(&packet.data) {
            Ok(info) => ResponseDetail::ClientInfo(info),
            Err(err) => ResponseDetail::ClientInfoInvalid(err),
        },
        Some(MdfuCommand::GetImageState) => match packet.data.as_slice() {
            &[state] => ImageState::from_code(state)
                .map(ResponseDetail::ImageState)
                .unwrap_or(ResponseDetail::None),
            _ => ResponseDetail::None,
        },
        _ => ResponseDetail::None,
    }
}
