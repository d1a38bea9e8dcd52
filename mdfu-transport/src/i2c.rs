//! I2C transport framing.
//!
//! The I2C transport is message-oriented: every frame is delimited by the
//! bus transaction itself (start condition, address phase, data bytes, stop
//! condition). A write transaction carries a command frame
//! `[seq][command][data...][crc:2]`. Reads are client-paced and progress
//! through a three-phase cycle:
//!
//! ```text
//! command ──write──▶ response-status ──ready──▶ response-length ──▶ response
//!    ▲                      │ busy: re-poll            │ crc error: re-read
//!    └──────────────────────┴── response frame read ◀──┘
//! ```
//!
//! The status byte reports bit 0 = command buffer ready, bit 1 = response
//! ready, and bit 7 = whether the ready reply is the response frame itself
//! rather than the length frame. A phase only advances once the prior
//! phase's checksum validated; a failed checksum holds the phase so the
//! host's re-read of the same frame is decoded against it again.

use heapless::Vec;

use mdfu_protocol::{
    verify, CommandPacket, MdfuCommand, PacketError, StatusPacket, MAX_PACKET_SIZE,
};

use crate::{interpret_response, Framer, FramingError, ResponseDetail, CHECKSUM_SIZE};

/// Status byte: client can accept a command
pub const CMD_READY_MASK: u8 = 0x01;

/// Status byte: client has a response ready
pub const RSP_READY_MASK: u8 = 0x02;

/// Status byte: the ready reply is the response frame, not the length frame
pub const RSP_FIELD_MASK: u8 = 0x80;

/// Smallest decodable frame: two-byte packet header plus checksum
const MIN_FRAME: usize = 2 + CHECKSUM_SIZE;

/// Length frame: 16-bit length plus checksum
const LENGTH_FRAME_SIZE: usize = 2 + CHECKSUM_SIZE;

/// One transaction: optional status byte, packet, checksum
const TRANSACTION_CAPACITY: usize = 1 + MAX_PACKET_SIZE + CHECKSUM_SIZE;

/// I2C bus events delivered to the framer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cEvent {
    /// Start or repeated-start condition
    Start,
    /// Address phase
    Address { address: u8, read: bool, ack: bool },
    /// One data byte transferred
    Data(u8),
    /// Stop condition, closing the transaction
    Stop,
}

/// Transaction flow phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cPhase {
    /// Waiting for the host to write a command frame
    Command,
    /// Host polls the client status byte
    ResponseStatus,
    /// Host reads the response length frame
    ResponseLength,
    /// Host reads the response frame
    Response,
}

/// Decoded client status byte from a poll read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollStatus {
    /// Client can accept the next command
    pub cmd_ready: bool,
    /// Client has a response ready
    pub rsp_ready: bool,
    /// The ready reply is the response frame rather than the length frame
    pub response_field: bool,
}

impl PollStatus {
    /// Decode a raw status byte
    pub fn from_byte(byte: u8) -> Self {
        Self {
            cmd_ready: byte & CMD_READY_MASK != 0,
            rsp_ready: byte & RSP_READY_MASK != 0,
            response_field: byte & RSP_FIELD_MASK != 0,
        }
    }

    /// Client is neither accepting commands nor holding a response
    pub fn is_busy(&self) -> bool {
        !self.cmd_ready && !self.rsp_ready
    }
}

/// Decoded output of one I2C transaction
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cOutput {
    /// Command frame decoded from a write transaction
    Command(CommandPacket),
    /// Write frame whose checksum validated but whose packet did not decode
    CommandInvalid(PacketError),
    /// Client status byte from a poll read
    Poll(PollStatus),
    /// Response length announced by the client
    ResponseLength(u16),
    /// Full response frame
    Response {
        packet: StatusPacket,
        /// Payload interpretation derived from the in-flight command
        detail: ResponseDetail,
    },
    /// Response frame whose checksum validated but whose packet did not decode
    ResponseInvalid(PacketError),
    /// Address phase NACKed: client busy
    ClientBusy,
    /// Frame discarded at the given phase; the phase is held for a re-read
    Malformed {
        phase: I2cPhase,
        error: FramingError,
    },
}

/// State machine decoding MDFU traffic from I2C transactions.
///
/// The framer buffers one transaction at a time and decodes it at the stop
/// condition. It tracks the in-flight command so a GetClientInfo or
/// GetImageState response payload can be interpreted in context.
#[derive(Debug, Clone)]
pub struct I2cFramer {
    phase: I2cPhase,
    buffer: Vec<u8, TRANSACTION_CAPACITY>,
    pending_command: Option<MdfuCommand>,
    address: u8,
    read: bool,
    ack: bool,
    addressed: bool,
    overflow: bool,
}

impl Default for I2cFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cFramer {
    /// Create a framer expecting the host's next command
    pub fn new() -> Self {
        Self {
            phase: I2cPhase::Command,
            buffer: Vec::new(),
            pending_command: None,
            address: 0,
            read: false,
            ack: false,
            addressed: false,
            overflow: false,
        }
    }

    /// Current transaction flow phase
    pub fn phase(&self) -> I2cPhase {
        self.phase
    }

    /// Client address seen in the most recent address phase
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Feed one bus event.
    ///
    /// Returns a decode result at each stop condition.
    pub fn feed(&mut self, event: I2cEvent) -> Option<I2cOutput> {
        match event {
            I2cEvent::Start => {
                // Buffers reset per transaction, including repeated start
                self.buffer.clear();
                self.overflow = false;
                self.addressed = false;
                None
            }
            I2cEvent::Address { address, read, ack } => {
                self.address = address;
                self.read = read;
                self.ack = ack;
                self.addressed = true;
                None
            }
            I2cEvent::Data(byte) => {
                if self.buffer.push(byte).is_err() {
                    self.overflow = true;
                }
                None
            }
            I2cEvent::Stop => self.finish_transaction(),
        }
    }

    /// Reset to the initial phase, discarding buffered data
    pub fn reset(&mut self) {
        self.phase = I2cPhase::Command;
        self.buffer.clear();
        self.pending_command = None;
        self.addressed = false;
        self.overflow = false;
    }

    fn finish_transaction(&mut self) -> Option<I2cOutput> {
        if !self.addressed {
            return None;
        }
        self.addressed = false;
        if !self.ack {
            return Some(I2cOutput::ClientBusy);
        }
        if self.overflow {
            self.overflow = false;
            return Some(I2cOutput::Malformed {
                phase: self.phase,
                error: FramingError::FrameTooLong,
            });
        }
        if self.read {
            self.finish_read()
        } else {
            self.finish_write()
        }
    }

    /// Decode a write transaction as a command frame.
    ///
    /// Writes are accepted in any phase: a host may abandon a response cycle
    /// and issue a fresh command.
    fn finish_write(&mut self) -> Option<I2cOutput> {
        if self.buffer.len() < MIN_FRAME {
            return Some(I2cOutput::Malformed {
                phase: I2cPhase::Command,
                error: FramingError::FrameTooShort,
            });
        }
        let (packet_bytes, crc) = self.buffer.split_at(self.buffer.len() - CHECKSUM_SIZE);
        if !verify(packet_bytes, u16::from_le_bytes([crc[0], crc[1]])) {
            // The client rejects the frame; the host must rewrite it
            return Some(I2cOutput::Malformed {
                phase: I2cPhase::Command,
                error: FramingError::ChecksumMismatch,
            });
        }
        let output = match CommandPacket::decode(packet_bytes) {
            Ok(packet) => {
                self.pending_command = Some(packet.command);
                I2cOutput::Command(packet)
            }
            Err(err) => {
                self.pending_command = None;
                I2cOutput::CommandInvalid(err)
            }
        };
        self.phase = I2cPhase::ResponseStatus;
        Some(output)
    }

    fn finish_read(&mut self) -> Option<I2cOutput> {
        if self.buffer.is_empty() {
            return Some(I2cOutput::Malformed {
                phase: self.phase,
                error: FramingError::FrameTooShort,
            });
        }
        match self.phase {
            // A read before any command is treated as a poll so a framer
            // attached mid-capture converges to the real phase
            I2cPhase::Command | I2cPhase::ResponseStatus => self.finish_poll(),
            I2cPhase::ResponseLength => self.finish_length(0),
            I2cPhase::Response => self.finish_response(0),
        }
    }

    fn finish_poll(&mut self) -> Option<I2cOutput> {
        let status = PollStatus::from_byte(self.buffer[0]);
        if !status.rsp_ready {
            self.phase = I2cPhase::ResponseStatus;
            return Some(I2cOutput::Poll(status));
        }
        self.phase = if status.response_field {
            I2cPhase::Response
        } else {
            I2cPhase::ResponseLength
        };
        if self.buffer.len() == 1 {
            return Some(I2cOutput::Poll(status));
        }
        // Clients that prepend the status byte deliver the ready frame in
        // the same transaction
        match self.phase {
            I2cPhase::Response => self.finish_response(1),
            _ => self.finish_length(1),
        }
    }

    fn finish_length(&mut self, offset: usize) -> Option<I2cOutput> {
        let frame = &self.buffer[offset..];
        if frame.len() != LENGTH_FRAME_SIZE {
            let error = if frame.len() < LENGTH_FRAME_SIZE {
                FramingError::FrameTooShort
            } else {
                FramingError::FrameTooLong
            };
            return Some(I2cOutput::Malformed {
                phase: I2cPhase::ResponseLength,
                error,
            });
        }
        let length_bytes = [frame[0], frame[1]];
        if !verify(&length_bytes, u16::from_le_bytes([frame[2], frame[3]])) {
            // Phase holds so the host can re-read the length frame
            return Some(I2cOutput::Malformed {
                phase: I2cPhase::ResponseLength,
                error: FramingError::ChecksumMismatch,
            });
        }
        self.phase = I2cPhase::Response;
        Some(I2cOutput::ResponseLength(u16::from_le_bytes(length_bytes)))
    }

    fn finish_response(&mut self, offset: usize) -> Option<I2cOutput> {
        let frame = &self.buffer[offset..];
        if frame.len() < MIN_FRAME {
            return Some(I2cOutput::Malformed {
                phase: I2cPhase::Response,
                error: FramingError::FrameTooShort,
            });
        }
        let (packet_bytes, crc) = frame.split_at(frame.len() - CHECKSUM_SIZE);
        if !verify(packet_bytes, u16::from_le_bytes([crc[0], crc[1]])) {
            // Phase holds so the host can re-read the response frame
            return Some(I2cOutput::Malformed {
                phase: I2cPhase::Response,
                error: FramingError::ChecksumMismatch,
            });
        }
        let output = match StatusPacket::decode(packet_bytes) {
            Ok(packet) => {
                let detail = interpret_response(self.pending_command, &packet);
                I2cOutput::Response { packet, detail }
            }
            Err(err) => I2cOutput::ResponseInvalid(err),
        };
        self.phase = I2cPhase::Command;
        self.pending_command = None;
        Some(output)
    }
}

impl Framer for I2cFramer {
    type Event = I2cEvent;
    type Output = I2cOutput;

    fn feed(&mut self, event: I2cEvent) -> Option<I2cOutput> {
        I2cFramer::feed(self, event)
    }

    fn reset(&mut self) {
        I2cFramer::reset(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdfu_protocol::{checksum, ImageState, MdfuStatus};

    const CLIENT: u8 = 0x54;

    fn transaction(framer: &mut I2cFramer, read: bool, data: &[u8]) -> Option<I2cOutput> {
        transaction_at(framer, read, true, data)
    }

    fn transaction_at(
        framer: &mut I2cFramer,
        read: bool,
        ack: bool,
        data: &[u8],
    ) -> Option<I2cOutput> {
        assert!(framer.feed(I2cEvent::Start).is_none());
        assert!(framer
            .feed(I2cEvent::Address {
                address: CLIENT,
                read,
                ack,
            })
            .is_none());
        for &byte in data {
            assert!(framer.feed(I2cEvent::Data(byte)).is_none());
        }
        framer.feed(I2cEvent::Stop)
    }

    fn with_checksum(packet: &[u8]) -> heapless::Vec<u8, 64> {
        let mut framed = heapless::Vec::new();
        framed.extend_from_slice(packet).unwrap();
        framed
            .extend_from_slice(&checksum(packet).to_le_bytes())
            .unwrap();
        framed
    }

    #[test]
    fn test_command_write() {
        let mut framer = I2cFramer::new();
        let frame = with_checksum(&[0x03, 0x01]);
        match transaction(&mut framer, false, &frame) {
            Some(I2cOutput::Command(packet)) => {
                assert_eq!(packet.sequence_number, 3);
                assert_eq!(packet.command, MdfuCommand::GetClientInfo);
            }
            other => panic!("expected command, got {other:?}"),
        }
        assert_eq!(framer.phase(), I2cPhase::ResponseStatus);
    }

    #[test]
    fn test_command_checksum_failure_holds_phase() {
        let mut framer = I2cFramer::new();
        let output = transaction(&mut framer, false, &[0x03, 0x01, 0x00, 0x00]);
        assert_eq!(
            output,
            Some(I2cOutput::Malformed {
                phase: I2cPhase::Command,
                error: FramingError::ChecksumMismatch,
            })
        );
        assert_eq!(framer.phase(), I2cPhase::Command);
    }

    #[test]
    fn test_unready_poll_repolls() {
        let mut framer = I2cFramer::new();
        transaction(&mut framer, false, &with_checksum(&[0x03, 0x01]));

        // Client busy: neither ready bit set
        let output = transaction(&mut framer, true, &[0x00]);
        match output {
            Some(I2cOutput::Poll(status)) => assert!(status.is_busy()),
            other => panic!("expected poll, got {other:?}"),
        }
        assert_eq!(framer.phase(), I2cPhase::ResponseStatus);

        // Response ready: advance to the length phase
        let output = transaction(&mut framer, true, &[RSP_READY_MASK]);
        match output {
            Some(I2cOutput::Poll(status)) => assert!(status.rsp_ready),
            other => panic!("expected poll, got {other:?}"),
        }
        assert_eq!(framer.phase(), I2cPhase::ResponseLength);
    }

    #[test]
    fn test_full_transaction_cycle() {
        let mut framer = I2cFramer::new();
        transaction(&mut framer, false, &with_checksum(&[0x03, 0x04]));
        transaction(&mut framer, true, &[RSP_READY_MASK]);

        // Length frame: response is 3 bytes
        let output = transaction(&mut framer, true, &with_checksum(&[0x03, 0x00]));
        assert_eq!(output, Some(I2cOutput::ResponseLength(3)));
        assert_eq!(framer.phase(), I2cPhase::Response);

        // Response frame: GetImageState success with a valid image
        let output = transaction(&mut framer, true, &with_checksum(&[0x03, 0x01, 0x01]));
        match output {
            Some(I2cOutput::Response { packet, detail }) => {
                assert_eq!(packet.sequence_number, 3);
                assert_eq!(packet.status, MdfuStatus::Success);
                assert_eq!(detail, ResponseDetail::ImageState(ImageState::Valid));
            }
            other => panic!("expected response, got {other:?}"),
        }
        assert_eq!(framer.phase(), I2cPhase::Command);
    }

    #[test]
    fn test_length_checksum_failure_holds_phase() {
        let mut framer = I2cFramer::new();
        transaction(&mut framer, false, &with_checksum(&[0x00, 0x02]));
        transaction(&mut framer, true, &[RSP_READY_MASK]);

        let output = transaction(&mut framer, true, &[0x03, 0x00, 0xAA, 0xBB]);
        assert_eq!(
            output,
            Some(I2cOutput::Malformed {
                phase: I2cPhase::ResponseLength,
                error: FramingError::ChecksumMismatch,
            })
        );
        assert_eq!(framer.phase(), I2cPhase::ResponseLength);

        // Re-read of the same frame succeeds
        let output = transaction(&mut framer, true, &with_checksum(&[0x03, 0x00]));
        assert_eq!(output, Some(I2cOutput::ResponseLength(3)));
    }

    #[test]
    fn test_client_info_response_detail() {
        let mut framer = I2cFramer::new();
        transaction(&mut framer, false, &with_checksum(&[0x01, 0x01]));
        transaction(&mut framer, true, &[RSP_READY_MASK]);
        transaction(&mut framer, true, &with_checksum(&[0x11, 0x00]));

        let mut response = heapless::Vec::<u8, 32>::new();
        response.extend_from_slice(&[0x01, 0x01]).unwrap();
        response
            .extend_from_slice(&[
                0x02, 0x03, 0x40, 0x00, 0x05, //
                0x01, 0x03, 0x01, 0x02, 0x03, //
                0x03, 0x03, 0x00, 0x01, 0x00,
            ])
            .unwrap();
        let output = transaction(&mut framer, true, &with_checksum(&response));
        match output {
            Some(I2cOutput::Response { detail, .. }) => match detail {
                ResponseDetail::ClientInfo(info) => {
                    assert_eq!(info.buffer_count, 5);
                    assert_eq!(info.buffer_size, 64);
                }
                other => panic!("expected client info, got {other:?}"),
            },
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_status_prefixed_response_in_one_read() {
        // Clients that prepend the status byte deliver the ready frame in
        // the same transaction, flagged as a response by bit 7
        let mut framer = I2cFramer::new();
        transaction(&mut framer, false, &with_checksum(&[0x02, 0x02]));

        let mut read = heapless::Vec::<u8, 16>::new();
        read.push(RSP_READY_MASK | RSP_FIELD_MASK).unwrap();
        read.extend_from_slice(&with_checksum(&[0x02, 0x01]))
            .unwrap();
        let output = transaction(&mut framer, true, &read);
        match output {
            Some(I2cOutput::Response { packet, .. }) => {
                assert_eq!(packet.sequence_number, 2);
                assert_eq!(packet.status, MdfuStatus::Success);
            }
            other => panic!("expected response, got {other:?}"),
        }
        assert_eq!(framer.phase(), I2cPhase::Command);
    }

    #[test]
    fn test_nacked_address_reports_busy() {
        let mut framer = I2cFramer::new();
        let output = transaction_at(&mut framer, false, false, &[]);
        assert_eq!(output, Some(I2cOutput::ClientBusy));
        assert_eq!(framer.phase(), I2cPhase::Command);
    }

    #[test]
    fn test_write_during_response_cycle_restarts() {
        let mut framer = I2cFramer::new();
        transaction(&mut framer, false, &with_checksum(&[0x00, 0x01]));
        transaction(&mut framer, true, &[RSP_READY_MASK]);

        // The host abandons the cycle and issues a fresh command
        let output = transaction(&mut framer, false, &with_checksum(&[0x01, 0x05]));
        assert!(matches!(output, Some(I2cOutput::Command(_))));
        assert_eq!(framer.phase(), I2cPhase::ResponseStatus);
    }

    #[test]
    fn test_invalid_command_packet_with_valid_checksum() {
        let mut framer = I2cFramer::new();
        // Command code 0x09 is unknown; the checksum is still valid
        let output = transaction(&mut framer, false, &with_checksum(&[0x00, 0x09]));
        assert_eq!(
            output,
            Some(I2cOutput::CommandInvalid(PacketError::CommandNotSupported(
                0x09
            )))
        );
        assert_eq!(framer.phase(), I2cPhase::ResponseStatus);
    }

    #[test]
    fn test_read_before_any_command_is_a_poll() {
        let mut framer = I2cFramer::new();
        let output = transaction(&mut framer, true, &[CMD_READY_MASK]);
        match output {
            Some(I2cOutput::Poll(status)) => {
                assert!(status.cmd_ready);
                assert!(!status.rsp_ready);
            }
            other => panic!("expected poll, got {other:?}"),
        }
    }
}
