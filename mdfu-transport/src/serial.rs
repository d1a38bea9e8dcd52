//! Serial (UART) transport framing.
//!
//! Frame format:
//! - START (1 byte): 0x56
//! - payload: escaped packet bytes followed by the escaped 16-bit checksum
//! - END (1 byte): 0x9E
//!
//! Any literal occurrence of the start, end, or escape code inside the
//! payload is replaced by the escape code followed by the complement of the
//! literal byte (0x56 -> CC A9, 0x9E -> CC 61, 0xCC -> CC 33).

use heapless::Vec;

use mdfu_protocol::{
    checksum, verify, CommandPacket, MdfuPacket, StatusPacket, MAX_PACKET_SIZE,
};

use crate::{Framer, FramingError, CHECKSUM_SIZE};

/// Frame start code
pub const FRAME_START: u8 = 0x56;

/// Frame end code
pub const FRAME_END: u8 = 0x9E;

/// Escape code introducing a complemented literal
pub const ESCAPE: u8 = 0xCC;

const FRAME_START_ESC: u8 = !FRAME_START;
const FRAME_END_ESC: u8 = !FRAME_END;
const ESCAPE_ESC: u8 = !ESCAPE;

/// Maximum unescaped frame interior (packet plus checksum)
const MAX_PAYLOAD: usize = MAX_PACKET_SIZE + CHECKSUM_SIZE;

/// Maximum complete frame size: every payload byte escaped, plus delimiters
pub const MAX_FRAME_SIZE: usize = 2 * MAX_PAYLOAD + 2;

/// A serial transport frame holding one packet
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SerialFrame {
    /// Packet bytes, without the transport checksum
    pub packet: Vec<u8, MAX_PACKET_SIZE>,
}

impl SerialFrame {
    /// Create a frame around packet bytes
    pub fn new(packet: &[u8]) -> Result<Self, FramingError> {
        let mut buf = Vec::new();
        buf.extend_from_slice(packet)
            .map_err(|_| FramingError::FrameTooLong)?;
        Ok(Self { packet: buf })
    }

    /// Encode this frame into delimited, escaped bytes
    pub fn encode(&self) -> Vec<u8, MAX_FRAME_SIZE> {
        let mut out = Vec::new();
        // Worst case (every byte escaped) fits by construction
        let _ = out.push(FRAME_START);
        escape_into(&mut out, &self.packet);
        escape_into(&mut out, &checksum(&self.packet).to_le_bytes());
        let _ = out.push(FRAME_END);
        out
    }

    /// Decode a frame from delimited, escaped bytes.
    ///
    /// Validates the delimiters, reverses escaping, and verifies the
    /// trailing checksum.
    pub fn decode(frame: &[u8]) -> Result<Self, FramingError> {
        let (&start, rest) = frame.split_first().ok_or(FramingError::FrameTooShort)?;
        let (&end, body) = rest.split_last().ok_or(FramingError::FrameTooShort)?;
        if start != FRAME_START {
            return Err(FramingError::BadStartCode(start));
        }
        if end != FRAME_END {
            return Err(FramingError::BadEndCode(end));
        }

        let payload = unescape(body)?;
        if payload.len() < CHECKSUM_SIZE {
            return Err(FramingError::FrameTooShort);
        }
        let (packet, crc) = payload.split_at(payload.len() - CHECKSUM_SIZE);
        if !verify(packet, u16::from_le_bytes([crc[0], crc[1]])) {
            return Err(FramingError::ChecksumMismatch);
        }
        Self::new(packet)
    }
}

fn escape_into<const N: usize>(out: &mut Vec<u8, N>, data: &[u8]) {
    for &byte in data {
        match byte {
            FRAME_START | FRAME_END | ESCAPE => {
                let _ = out.push(ESCAPE);
                let _ = out.push(!byte);
            }
            _ => {
                let _ = out.push(byte);
            }
        }
    }
}

fn unescape(data: &[u8]) -> Result<Vec<u8, MAX_PAYLOAD>, FramingError> {
    let mut out = Vec::new();
    let mut escaped = false;
    for &byte in data {
        if escaped {
            let literal = match byte {
                FRAME_START_ESC => FRAME_START,
                FRAME_END_ESC => FRAME_END,
                ESCAPE_ESC => ESCAPE,
                other => return Err(FramingError::UnknownEscape(other)),
            };
            out.push(literal).map_err(|_| FramingError::FrameTooLong)?;
            escaped = false;
        } else if byte == ESCAPE {
            escaped = true;
        } else {
            out.push(byte).map_err(|_| FramingError::FrameTooLong)?;
        }
    }
    Ok(out)
}

/// Which direction of the serial link a framer decodes.
///
/// Host-to-client traffic carries command packets, client-to-host traffic
/// carries status packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerialDirection {
    /// Decode command packets sent by the host
    HostToClient,
    /// Decode status packets sent by the client
    ClientToHost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SerialState {
    /// Discarding bytes until a start code is seen
    Idle,
    /// Accumulating frame bytes until the end code
    Decoding,
}

/// State machine extracting MDFU packets from a raw serial byte stream.
///
/// A partial or corrupt frame on an asynchronous line is expected traffic:
/// the framer silently discards it and resynchronizes on the next start
/// code, so one bad frame never stalls the stream. A fresh start code seen
/// mid-frame likewise discards the partial frame and restarts.
#[derive(Debug, Clone)]
pub struct SerialFramer {
    direction: SerialDirection,
    state: SerialState,
    buffer: Vec<u8, MAX_FRAME_SIZE>,
}

impl SerialFramer {
    /// Create a framer for one direction of the link
    pub fn new(direction: SerialDirection) -> Self {
        Self {
            direction,
            state: SerialState::Idle,
            buffer: Vec::new(),
        }
    }

    /// Feed a single received byte.
    ///
    /// Returns a decoded packet when the byte completes a valid frame.
    pub fn feed(&mut self, byte: u8) -> Option<MdfuPacket> {
        match self.state {
            SerialState::Idle => {
                if byte == FRAME_START {
                    self.buffer.clear();
                    let _ = self.buffer.push(byte);
                    self.state = SerialState::Decoding;
                }
                None
            }
            SerialState::Decoding => {
                if byte == FRAME_START {
                    // Resync: discard the partial frame and restart
                    self.buffer.clear();
                    let _ = self.buffer.push(byte);
                    return None;
                }
                if byte == FRAME_END {
                    self.state = SerialState::Idle;
                    if self.buffer.push(byte).is_err() {
                        return None;
                    }
                    return self.decode_frame();
                }
                if self.buffer.push(byte).is_err() {
                    // Oversized frame: drop it and wait for the next start
                    self.state = SerialState::Idle;
                }
                None
            }
        }
    }

    /// Feed multiple bytes, returning the first complete packet found
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Option<MdfuPacket> {
        for &byte in bytes {
            if let Some(packet) = self.feed(byte) {
                return Some(packet);
            }
        }
        None
    }

    /// Reset to idle, discarding buffered data
    pub fn reset(&mut self) {
        self.state = SerialState::Idle;
        self.buffer.clear();
    }

    fn decode_frame(&self) -> Option<MdfuPacket> {
        let frame = SerialFrame::decode(&self.buffer).ok()?;
        match self.direction {
            SerialDirection::HostToClient => CommandPacket::decode(&frame.packet)
                .ok()
                .map(MdfuPacket::Command),
            SerialDirection::ClientToHost => StatusPacket::decode(&frame.packet)
                .ok()
                .map(MdfuPacket::Status),
        }
    }
}

impl Framer for SerialFramer {
    type Event = u8;
    type Output = MdfuPacket;

    fn feed(&mut self, event: u8) -> Option<MdfuPacket> {
        SerialFramer::feed(self, event)
    }

    fn reset(&mut self) {
        SerialFramer::reset(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdfu_protocol::MdfuCommand;

    fn command_framer() -> SerialFramer {
        SerialFramer::new(SerialDirection::HostToClient)
    }

    #[test]
    fn test_frame_encode_get_client_info() {
        // Packet 03 01, checksum = !0x0103 = 0xFEFC
        let frame = SerialFrame::new(&[0x03, 0x01]).unwrap();
        assert_eq!(
            frame.encode().as_slice(),
            &[0x56, 0x03, 0x01, 0xFC, 0xFE, 0x9E]
        );
    }

    #[test]
    fn test_decode_two_byte_payload() {
        let mut framer = command_framer();
        // Payload 00 01: checksum over word 0x0100 -> 0xFEFF
        let packet = framer
            .feed_bytes(&[0x56, 0x00, 0x01, 0xFF, 0xFE, 0x9E])
            .unwrap();
        match packet {
            MdfuPacket::Command(packet) => {
                assert_eq!(packet.sequence_number, 0);
                assert_eq!(packet.command, MdfuCommand::GetClientInfo);
                assert!(packet.data.is_empty());
            }
            other => panic!("expected command packet, got {other:?}"),
        }
    }

    #[test]
    fn test_escape_round_trip() {
        // A literal end code in the packet must travel as CC 61
        let frame = SerialFrame::new(&[0x9E, 0x01]).unwrap();
        let encoded = frame.encode();
        assert_eq!(&encoded[1..3], &[ESCAPE, 0x61]);

        let decoded = SerialFrame::decode(&encoded).unwrap();
        assert_eq!(decoded.packet.as_slice(), &[0x9E, 0x01]);
    }

    #[test]
    fn test_escape_all_reserved_codes() {
        let frame = SerialFrame::new(&[0x56, 0x9E, 0xCC]).unwrap();
        let encoded = frame.encode();
        assert_eq!(&encoded[1..7], &[0xCC, 0xA9, 0xCC, 0x61, 0xCC, 0x33]);

        let decoded = SerialFrame::decode(&encoded).unwrap();
        assert_eq!(decoded.packet.as_slice(), &[0x56, 0x9E, 0xCC]);
    }

    #[test]
    fn test_unknown_escape_sequence() {
        assert_eq!(
            SerialFrame::decode(&[0x56, 0xCC, 0x00, 0x00, 0x00, 0x9E]),
            Err(FramingError::UnknownEscape(0x00))
        );
    }

    #[test]
    fn test_checksum_mismatch_is_discarded() {
        let mut framer = command_framer();
        assert!(framer
            .feed_bytes(&[0x56, 0x03, 0x01, 0xFC, 0x00, 0x9E])
            .is_none());

        // The framer recovers and decodes the next valid frame
        let packet = framer
            .feed_bytes(&[0x56, 0x03, 0x01, 0xFC, 0xFE, 0x9E])
            .unwrap();
        assert!(matches!(packet, MdfuPacket::Command(_)));
    }

    #[test]
    fn test_resync_on_fresh_start_code() {
        let mut framer = command_framer();
        // Partial frame, then a fresh start code begins a complete frame
        assert!(framer.feed_bytes(&[0x56, 0x03, 0x01]).is_none());
        let packet = framer
            .feed_bytes(&[0x56, 0x03, 0x01, 0xFC, 0xFE, 0x9E])
            .unwrap();
        assert!(matches!(packet, MdfuPacket::Command(_)));
    }

    #[test]
    fn test_garbage_before_frame_ignored() {
        let mut framer = command_framer();
        assert!(framer.feed_bytes(&[0x00, 0xFF, 0x12]).is_none());
        let packet = framer
            .feed_bytes(&[0x56, 0x03, 0x01, 0xFC, 0xFE, 0x9E])
            .unwrap();
        assert!(matches!(packet, MdfuPacket::Command(_)));
    }

    #[test]
    fn test_status_direction() {
        let mut framer = SerialFramer::new(SerialDirection::ClientToHost);
        // Status packet 02 01 (seq 2, SUCCESS), checksum = !0x0102 = 0xFEFD
        let packet = framer
            .feed_bytes(&[0x56, 0x02, 0x01, 0xFD, 0xFE, 0x9E])
            .unwrap();
        match packet {
            MdfuPacket::Status(packet) => {
                assert_eq!(packet.sequence_number, 2);
                assert!(!packet.resend);
            }
            other => panic!("expected status packet, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_command_is_discarded() {
        let mut framer = command_framer();
        // Valid framing and checksum, but command 0x07 is unknown:
        // word 0x0703 -> checksum 0xF8FC
        assert!(framer
            .feed_bytes(&[0x56, 0x03, 0x07, 0xFC, 0xF8, 0x9E])
            .is_none());
    }

    #[test]
    fn test_odd_length_packet_checksum() {
        // Three packet bytes exercise the checksum padding path:
        // words 0x0203, 0x00AA -> sum 0x02AD -> checksum 0xFD52
        let frame = SerialFrame::new(&[0x03, 0x02, 0xAA]).unwrap();
        let encoded = frame.encode();
        assert_eq!(encoded.as_slice(), &[0x56, 0x03, 0x02, 0xAA, 0x52, 0xFD, 0x9E]);

        let mut framer = command_framer();
        let packet = framer.feed_bytes(&encoded).unwrap();
        match packet {
            MdfuPacket::Command(packet) => {
                assert_eq!(packet.command, MdfuCommand::StartTransfer);
                assert_eq!(packet.data.as_slice(), &[0xAA]);
            }
            other => panic!("expected command packet, got {other:?}"),
        }
    }
}
