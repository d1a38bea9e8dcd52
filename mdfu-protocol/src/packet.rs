//! MDFU packet encoding and decoding.
//!
//! Two packet kinds travel over every transport: command packets from the
//! host and status packets from the client. Both share a one-byte sequence
//! field (low 5 bits carry the sequence number) followed by a one-byte code
//! and arbitrary data. The command sequence field uses bit 7 as the sync
//! flag; the status sequence field uses bit 6 as the resend flag.

use heapless::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum packet data length supported by the decoder buffers
pub const MAX_PACKET_DATA: usize = 1024;

/// Maximum complete packet size (sequence field + code + data)
pub const MAX_PACKET_SIZE: usize = 2 + MAX_PACKET_DATA;

/// Highest valid packet sequence number (5-bit field)
pub const MAX_SEQUENCE_NUMBER: u8 = 31;

const SEQUENCE_MASK: u8 = 0x1F;
const SYNC_MASK: u8 = 0x80;
const RESEND_MASK: u8 = 0x40;

/// Errors that can occur during packet construction or decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketError {
    /// Packet is shorter than the two-byte header
    TooShort,
    /// Sequence number outside the 5-bit range
    SequenceOutOfRange,
    /// Unknown command code
    CommandNotSupported(u8),
    /// Unknown status code
    StatusInvalid(u8),
    /// Packet data exceeds the decoder buffer capacity
    DataTooLarge,
}

impl core::fmt::Display for PacketError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PacketError::TooShort => write!(f, "packet shorter than the two-byte header"),
            PacketError::SequenceOutOfRange => {
                write!(f, "valid packet sequence numbers are 0..=31")
            }
            PacketError::CommandNotSupported(code) => {
                write!(f, "{code:#04x} is not a valid MDFU command")
            }
            PacketError::StatusInvalid(code) => {
                write!(f, "{code:#04x} is not a valid MDFU status")
            }
            PacketError::DataTooLarge => write!(f, "packet data exceeds buffer capacity"),
        }
    }
}

/// MDFU command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MdfuCommand {
    /// Query client capabilities and timing parameters
    GetClientInfo,
    /// Begin a firmware file transfer
    StartTransfer,
    /// Write one chunk of the update file
    WriteChunk,
    /// Query the state of the transferred image
    GetImageState,
    /// Finish the file transfer
    EndTransfer,
}

impl MdfuCommand {
    /// Every command, in code order
    pub const ALL: [MdfuCommand; 5] = [
        MdfuCommand::GetClientInfo,
        MdfuCommand::StartTransfer,
        MdfuCommand::WriteChunk,
        MdfuCommand::GetImageState,
        MdfuCommand::EndTransfer,
    ];

    /// Parse a command from its wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MdfuCommand::GetClientInfo),
            2 => Some(MdfuCommand::StartTransfer),
            3 => Some(MdfuCommand::WriteChunk),
            4 => Some(MdfuCommand::GetImageState),
            5 => Some(MdfuCommand::EndTransfer),
            _ => None,
        }
    }

    /// Wire code for this command
    pub fn code(self) -> u8 {
        match self {
            MdfuCommand::GetClientInfo => 1,
            MdfuCommand::StartTransfer => 2,
            MdfuCommand::WriteChunk => 3,
            MdfuCommand::GetImageState => 4,
            MdfuCommand::EndTransfer => 5,
        }
    }

    /// Human-readable label
    pub fn description(self) -> &'static str {
        match self {
            MdfuCommand::GetClientInfo => "Get client info",
            MdfuCommand::StartTransfer => "Start transfer",
            MdfuCommand::WriteChunk => "Write chunk",
            MdfuCommand::GetImageState => "Get image state",
            MdfuCommand::EndTransfer => "End transfer",
        }
    }
}

impl core::fmt::Display for MdfuCommand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

/// MDFU status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MdfuStatus {
    /// Command executed successfully
    Success,
    /// Command is not supported by the client
    NotSupported,
    /// Command is not authorized in the current client state
    NotAuthorized,
    /// Packet transport layer failure
    PacketTransportFailure,
    /// Client aborted the file transfer
    AbortFileTransfer,
}

impl MdfuStatus {
    /// Parse a status from its wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MdfuStatus::Success),
            2 => Some(MdfuStatus::NotSupported),
            3 => Some(MdfuStatus::NotAuthorized),
            4 => Some(MdfuStatus::PacketTransportFailure),
            5 => Some(MdfuStatus::AbortFileTransfer),
            _ => None,
        }
    }

    /// Wire code for this status
    pub fn code(self) -> u8 {
        match self {
            MdfuStatus::Success => 1,
            MdfuStatus::NotSupported => 2,
            MdfuStatus::NotAuthorized => 3,
            MdfuStatus::PacketTransportFailure => 4,
            MdfuStatus::AbortFileTransfer => 5,
        }
    }

    /// Human-readable label
    pub fn description(self) -> &'static str {
        match self {
            MdfuStatus::Success => "Success",
            MdfuStatus::NotSupported => "Command not supported",
            MdfuStatus::NotAuthorized => "Command not authorized",
            MdfuStatus::PacketTransportFailure => "Packet transport failure",
            MdfuStatus::AbortFileTransfer => "Abort file transfer",
        }
    }
}

impl core::fmt::Display for MdfuStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

/// Firmware image states reported by a GetImageState response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ImageState {
    /// Transferred image passed client validation
    Valid,
    /// Transferred image failed client validation
    Invalid,
}

impl ImageState {
    /// Parse an image state from its wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ImageState::Valid),
            2 => Some(ImageState::Invalid),
            _ => None,
        }
    }

    /// Wire code for this image state
    pub fn code(self) -> u8 {
        match self {
            ImageState::Valid => 1,
            ImageState::Invalid => 2,
        }
    }
}

impl core::fmt::Display for ImageState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ImageState::Valid => f.write_str("Image valid"),
            ImageState::Invalid => f.write_str("Image invalid"),
        }
    }
}

/// Abort causes carried in an AbortFileTransfer status payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FileTransferAbortCause {
    GenericClientError,
    InvalidFile,
    InvalidClientDeviceId,
    AddressError,
    EraseError,
    WriteError,
    ReadError,
    ApplicationVersionError,
}

impl FileTransferAbortCause {
    /// Parse an abort cause from its wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FileTransferAbortCause::GenericClientError),
            1 => Some(FileTransferAbortCause::InvalidFile),
            2 => Some(FileTransferAbortCause::InvalidClientDeviceId),
            3 => Some(FileTransferAbortCause::AddressError),
            4 => Some(FileTransferAbortCause::EraseError),
            5 => Some(FileTransferAbortCause::WriteError),
            6 => Some(FileTransferAbortCause::ReadError),
            7 => Some(FileTransferAbortCause::ApplicationVersionError),
            _ => None,
        }
    }

    /// Wire code for this abort cause
    pub fn code(self) -> u8 {
        match self {
            FileTransferAbortCause::GenericClientError => 0,
            FileTransferAbortCause::InvalidFile => 1,
            FileTransferAbortCause::InvalidClientDeviceId => 2,
            FileTransferAbortCause::AddressError => 3,
            FileTransferAbortCause::EraseError => 4,
            FileTransferAbortCause::WriteError => 5,
            FileTransferAbortCause::ReadError => 6,
            FileTransferAbortCause::ApplicationVersionError => 7,
        }
    }

    /// Human-readable label
    pub fn description(self) -> &'static str {
        match self {
            FileTransferAbortCause::GenericClientError => {
                "Generic problem encountered by client"
            }
            FileTransferAbortCause::InvalidFile => "Generic problem with the update file",
            FileTransferAbortCause::InvalidClientDeviceId => {
                "The update file is not compatible with the client device ID"
            }
            FileTransferAbortCause::AddressError => {
                "An invalid address is present in the update file"
            }
            FileTransferAbortCause::EraseError => "Client memory did not properly erase",
            FileTransferAbortCause::WriteError => "Client memory did not properly write",
            FileTransferAbortCause::ReadError => "Client memory did not properly read",
            FileTransferAbortCause::ApplicationVersionError => {
                "Client did not allow changing to the application version in the update file"
            }
        }
    }
}

impl core::fmt::Display for FileTransferAbortCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

/// Transport failure causes carried in a PacketTransportFailure status payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TransportFailureCause {
    InvalidChecksum,
    PacketTooLarge,
}

impl TransportFailureCause {
    /// Parse a transport failure cause from its wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TransportFailureCause::InvalidChecksum),
            1 => Some(TransportFailureCause::PacketTooLarge),
            _ => None,
        }
    }

    /// Wire code for this failure cause
    pub fn code(self) -> u8 {
        match self {
            TransportFailureCause::InvalidChecksum => 0,
            TransportFailureCause::PacketTooLarge => 1,
        }
    }

    /// Human-readable label
    pub fn description(self) -> &'static str {
        match self {
            TransportFailureCause::InvalidChecksum => "Invalid checksum detected",
            TransportFailureCause::PacketTooLarge => "Packet was too large",
        }
    }
}

impl core::fmt::Display for TransportFailureCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

/// An MDFU command packet sent from host to client
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommandPacket {
    /// Packet sequence number, 0..=31
    pub sequence_number: u8,
    /// Whether this packet requests sequence-number resynchronization
    pub sync: bool,
    /// Command to execute
    pub command: MdfuCommand,
    /// Command-specific data
    pub data: Vec<u8, MAX_PACKET_DATA>,
}

impl CommandPacket {
    /// Create a command packet, enforcing the sequence-number range
    pub fn new(
        sequence_number: u8,
        command: MdfuCommand,
        data: &[u8],
        sync: bool,
    ) -> Result<Self, PacketError> {
        if sequence_number > MAX_SEQUENCE_NUMBER {
            return Err(PacketError::SequenceOutOfRange);
        }
        let mut buf = Vec::new();
        buf.extend_from_slice(data)
            .map_err(|_| PacketError::DataTooLarge)?;
        Ok(Self {
            sequence_number,
            sync,
            command,
            data: buf,
        })
    }

    /// Decode a command packet from its binary form
    pub fn decode(packet: &[u8]) -> Result<Self, PacketError> {
        if packet.len() < 2 {
            return Err(PacketError::TooShort);
        }
        let sequence_field = packet[0];
        let command = MdfuCommand::from_code(packet[1])
            .ok_or(PacketError::CommandNotSupported(packet[1]))?;
        Self::new(
            sequence_field & SEQUENCE_MASK,
            command,
            &packet[2..],
            sequence_field & SYNC_MASK != 0,
        )
    }

    /// Encode this packet into its binary form
    pub fn encode(&self) -> Vec<u8, MAX_PACKET_SIZE> {
        let mut out = Vec::new();
        let mut sequence_field = self.sequence_number;
        if self.sync {
            sequence_field |= SYNC_MASK;
        }
        // Capacity holds header plus data by construction
        let _ = out.push(sequence_field);
        let _ = out.push(self.command.code());
        let _ = out.extend_from_slice(&self.data);
        out
    }
}

/// An MDFU status packet sent from client to host
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatusPacket {
    /// Packet sequence number, 0..=31
    pub sequence_number: u8,
    /// Whether the client requests retransmission of the prior command
    pub resend: bool,
    /// Status code for the acknowledged command
    pub status: MdfuStatus,
    /// Status-specific data
    pub data: Vec<u8, MAX_PACKET_DATA>,
}

impl StatusPacket {
    /// Create a status packet, enforcing the sequence-number range
    pub fn new(
        sequence_number: u8,
        status: MdfuStatus,
        data: &[u8],
        resend: bool,
    ) -> Result<Self, PacketError> {
        if sequence_number > MAX_SEQUENCE_NUMBER {
            return Err(PacketError::SequenceOutOfRange);
        }
        let mut buf = Vec::new();
        buf.extend_from_slice(data)
            .map_err(|_| PacketError::DataTooLarge)?;
        Ok(Self {
            sequence_number,
            resend,
            status,
            data: buf,
        })
    }

    /// Decode a status packet from its binary form
    pub fn decode(packet: &[u8]) -> Result<Self, PacketError> {
        if packet.len() < 2 {
            return Err(PacketError::TooShort);
        }
        let sequence_field = packet[0];
        let status =
            MdfuStatus::from_code(packet[1]).ok_or(PacketError::StatusInvalid(packet[1]))?;
        Self::new(
            sequence_field & SEQUENCE_MASK,
            status,
            &packet[2..],
            sequence_field & RESEND_MASK != 0,
        )
    }

    /// Encode this packet into its binary form
    pub fn encode(&self) -> Vec<u8, MAX_PACKET_SIZE> {
        let mut out = Vec::new();
        let mut sequence_field = self.sequence_number;
        if self.resend {
            sequence_field |= RESEND_MASK;
        }
        // Capacity holds header plus data by construction
        let _ = out.push(sequence_field);
        let _ = out.push(self.status.code());
        let _ = out.extend_from_slice(&self.data);
        out
    }
}

/// Either kind of MDFU packet
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MdfuPacket {
    /// Host-to-client command
    Command(CommandPacket),
    /// Client-to-host status
    Status(StatusPacket),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_decode() {
        let packet = CommandPacket::decode(&[0x03, 0x01]).unwrap();
        assert_eq!(packet.sequence_number, 3);
        assert!(!packet.sync);
        assert_eq!(packet.command, MdfuCommand::GetClientInfo);
        assert!(packet.data.is_empty());
    }

    #[test]
    fn test_command_decode_sync_flag() {
        // Bit 7 carries sync; bits 5..6 are reserved and ignored
        let packet = CommandPacket::decode(&[0xFF, 0x02, 0xAA]).unwrap();
        assert_eq!(packet.sequence_number, 31);
        assert!(packet.sync);
        assert_eq!(packet.command, MdfuCommand::StartTransfer);
        assert_eq!(packet.data.as_slice(), &[0xAA]);
    }

    #[test]
    fn test_command_encode() {
        let packet = CommandPacket::new(3, MdfuCommand::GetClientInfo, &[], false).unwrap();
        assert_eq!(packet.encode().as_slice(), &[0x03, 0x01]);

        let packet = CommandPacket::new(5, MdfuCommand::WriteChunk, &[1, 2, 3], true).unwrap();
        assert_eq!(packet.encode().as_slice(), &[0x85, 0x03, 1, 2, 3]);
    }

    #[test]
    fn test_command_roundtrip() {
        let original = CommandPacket::new(17, MdfuCommand::EndTransfer, &[9, 8, 7], true).unwrap();
        let decoded = CommandPacket::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_command_unknown_code() {
        assert_eq!(
            CommandPacket::decode(&[0x00, 0x09]),
            Err(PacketError::CommandNotSupported(0x09))
        );
    }

    #[test]
    fn test_command_sequence_bound() {
        assert_eq!(
            CommandPacket::new(32, MdfuCommand::GetClientInfo, &[], false),
            Err(PacketError::SequenceOutOfRange)
        );
    }

    #[test]
    fn test_command_too_short() {
        assert_eq!(CommandPacket::decode(&[0x01]), Err(PacketError::TooShort));
        assert_eq!(CommandPacket::decode(&[]), Err(PacketError::TooShort));
    }

    #[test]
    fn test_status_decode_resend_flag() {
        // Bit 6 carries resend; bit 7 is reserved for status packets
        let packet = StatusPacket::decode(&[0x42, 0x01]).unwrap();
        assert_eq!(packet.sequence_number, 2);
        assert!(packet.resend);
        assert_eq!(packet.status, MdfuStatus::Success);
    }

    #[test]
    fn test_status_encode() {
        let packet = StatusPacket::new(2, MdfuStatus::Success, &[], true).unwrap();
        assert_eq!(packet.encode().as_slice(), &[0x42, 0x01]);
    }

    #[test]
    fn test_status_roundtrip() {
        let original = StatusPacket::new(30, MdfuStatus::AbortFileTransfer, &[4], false).unwrap();
        let decoded = StatusPacket::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_status_unknown_code() {
        assert_eq!(
            StatusPacket::decode(&[0x00, 0x00]),
            Err(PacketError::StatusInvalid(0x00))
        );
        assert_eq!(
            StatusPacket::decode(&[0x00, 0x06]),
            Err(PacketError::StatusInvalid(0x06))
        );
    }

    #[test]
    fn test_code_roundtrips() {
        for command in MdfuCommand::ALL {
            assert_eq!(MdfuCommand::from_code(command.code()), Some(command));
        }
        for code in 1..=5 {
            let status = MdfuStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        for code in 0..=7 {
            let cause = FileTransferAbortCause::from_code(code).unwrap();
            assert_eq!(cause.code(), code);
        }
    }

    #[test]
    fn test_unknown_enum_codes() {
        assert_eq!(MdfuCommand::from_code(0), None);
        assert_eq!(MdfuCommand::from_code(6), None);
        assert_eq!(MdfuStatus::from_code(0xFF), None);
        assert_eq!(ImageState::from_code(3), None);
        assert_eq!(FileTransferAbortCause::from_code(8), None);
        assert_eq!(TransportFailureCause::from_code(2), None);
    }
}
