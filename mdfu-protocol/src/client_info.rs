//! Client information parameter codec.
//!
//! A successful GetClientInfo response carries a self-describing parameter
//! stream: repeated `[type:1][length:1][value:length]` records. The stream
//! must contain the protocol version, the buffer info, and a default command
//! timeout; per-command timeout overrides and an inter-transaction delay are
//! optional.
//!
//! ```text
//! ┌──────┬────────┬───────────────┐ ┌──────┬────────┬───────────┐
//! │ TYPE │ LENGTH │ VALUE         │ │ TYPE │ LENGTH │ VALUE     │ ...
//! │ 1B   │ 1B     │ LENGTH bytes  │ │ 1B   │ 1B     │           │
//! └──────┴────────┴───────────────┘ └──────┴────────┴───────────┘
//! ```
//!
//! Decoding accepts parameters in any order (last occurrence wins);
//! encoding always emits buffer info, protocol version, command timeouts,
//! then the optional inter-transaction delay.

use heapless::Vec;

use crate::delay::InterTransactionDelay;
use crate::packet::MdfuCommand;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const BUFFER_INFO_SIZE: usize = 3;
const PROTOCOL_VERSION_SIZE: usize = 3;
const PROTOCOL_VERSION_INTERNAL_SIZE: usize = 4;
const COMMAND_TIMEOUT_SIZE: usize = 3;
const INTER_TRANSACTION_DELAY_SIZE: usize = 4;

/// One timeout slot per known command
pub const MAX_TIMEOUT_OVERRIDES: usize = MdfuCommand::ALL.len();

/// Upper bound for an encoded client info stream
pub const MAX_ENCODED_CLIENT_INFO: usize = 64;

/// Parameter types in a client info stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ParameterType {
    /// Client MDFU protocol version
    ProtocolVersion,
    /// Command buffer count and size
    BufferInfo,
    /// Default and per-command timeouts
    CommandTimeouts,
    /// Delay between MAC-layer transactions
    InterTransactionDelay,
}

impl ParameterType {
    /// Parse a parameter type from its wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ParameterType::ProtocolVersion),
            2 => Some(ParameterType::BufferInfo),
            3 => Some(ParameterType::CommandTimeouts),
            4 => Some(ParameterType::InterTransactionDelay),
            _ => None,
        }
    }

    /// Wire code for this parameter type
    pub fn code(self) -> u8 {
        match self {
            ParameterType::ProtocolVersion => 1,
            ParameterType::BufferInfo => 2,
            ParameterType::CommandTimeouts => 3,
            ParameterType::InterTransactionDelay => 4,
        }
    }
}

/// Errors that can occur while decoding client information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClientInfoError {
    /// Unrecognized parameter type byte
    UnknownParameterType(u8),
    /// A parameter's declared length overruns the stream
    Truncated,
    /// A recognized parameter with an unexpected value length
    InvalidLength {
        parameter: ParameterType,
        length: usize,
    },
    /// A command timeout entry references an unknown command code
    UnknownCommand(u8),
    /// Mandatory protocol version parameter is missing
    MissingVersion,
    /// Mandatory buffer info parameter is missing
    MissingBufferInfo,
    /// Mandatory default timeout is missing from the command timeouts
    MissingDefaultTimeout,
}

impl core::fmt::Display for ClientInfoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ClientInfoError::UnknownParameterType(code) => {
                write!(f, "invalid client info parameter type {code:#04x}")
            }
            ClientInfoError::Truncated => {
                write!(f, "not enough data to decode client information")
            }
            ClientInfoError::InvalidLength { parameter, length } => {
                write!(f, "invalid length {length} for parameter {parameter:?}")
            }
            ClientInfoError::UnknownCommand(code) => {
                write!(f, "invalid command code {code:#04x} in command timeouts")
            }
            ClientInfoError::MissingVersion => {
                write!(f, "mandatory protocol version parameter is missing")
            }
            ClientInfoError::MissingBufferInfo => {
                write!(f, "mandatory buffer info parameter is missing")
            }
            ClientInfoError::MissingDefaultTimeout => {
                write!(f, "mandatory default timeout is missing")
            }
        }
    }
}

/// Client MDFU protocol version, with an optional pre-release ordinal for
/// internal client builds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    /// Pre-release build ordinal, reported only by internal builds
    pub pre_release: Option<u8>,
}

impl ProtocolVersion {
    /// Create a release version
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
        }
    }

    /// Create a pre-release version with a build ordinal
    pub const fn new_pre_release(major: u8, minor: u8, patch: u8, ordinal: u8) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: Some(ordinal),
        }
    }
}

impl core::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ordinal) = self.pre_release {
            write!(f, "-alpha{ordinal}")?;
        }
        Ok(())
    }
}

/// Command timeout with 0.1 s resolution.
///
/// Stored as the raw tick count (1 tick = 0.1 s) so decoded values compare
/// exactly. The largest representable timeout is 6553.5 s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommandTimeout(u16);

impl CommandTimeout {
    /// Timeout resolution in seconds
    pub const SECONDS_PER_TICK: f64 = 0.1;

    /// Largest representable timeout in seconds
    pub const MAX_SECONDS: f64 = u16::MAX as f64 * Self::SECONDS_PER_TICK;

    /// Create a timeout from raw 0.1 s ticks
    pub const fn from_ticks(ticks: u16) -> Self {
        Self(ticks)
    }

    /// Create a timeout from seconds.
    ///
    /// Returns `None` when `seconds` is negative or exceeds
    /// [`Self::MAX_SECONDS`].
    pub fn from_secs_f64(seconds: f64) -> Option<Self> {
        if !(0.0..=Self::MAX_SECONDS).contains(&seconds) {
            return None;
        }
        Some(Self((seconds / Self::SECONDS_PER_TICK + 0.5) as u16))
    }

    /// Raw tick count
    pub const fn ticks(self) -> u16 {
        self.0
    }

    /// Timeout in seconds
    pub fn as_secs_f64(self) -> f64 {
        f64::from(self.0) * Self::SECONDS_PER_TICK
    }
}

/// Decoded MDFU client information
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClientInfo {
    /// Client MDFU protocol version
    pub protocol_version: ProtocolVersion,
    /// Number of command buffers on the client
    pub buffer_count: u8,
    /// Maximum packet data length (command buffer size)
    pub buffer_size: u16,
    /// Timeout for commands without an explicit override
    pub default_timeout: CommandTimeout,
    /// Optional delay between MAC-layer transactions
    pub inter_transaction_delay: Option<InterTransactionDelay>,
    timeouts: Vec<(MdfuCommand, CommandTimeout), MAX_TIMEOUT_OVERRIDES>,
}

impl ClientInfo {
    /// Create client information with the mandatory fields
    pub fn new(
        protocol_version: ProtocolVersion,
        buffer_count: u8,
        buffer_size: u16,
        default_timeout: CommandTimeout,
    ) -> Self {
        Self {
            protocol_version,
            buffer_count,
            buffer_size,
            default_timeout,
            inter_transaction_delay: None,
            timeouts: Vec::new(),
        }
    }

    /// Per-command timeout overrides in stored order
    pub fn timeouts(&self) -> &[(MdfuCommand, CommandTimeout)] {
        &self.timeouts
    }

    /// Timeout for `command`: its override, or the default
    pub fn timeout_for(&self, command: MdfuCommand) -> CommandTimeout {
        self.timeouts
            .iter()
            .find(|(c, _)| *c == command)
            .map(|(_, t)| *t)
            .unwrap_or(self.default_timeout)
    }

    /// Set or replace the timeout override for `command`
    pub fn set_timeout(&mut self, command: MdfuCommand, timeout: CommandTimeout) {
        if let Some(entry) = self.timeouts.iter_mut().find(|(c, _)| *c == command) {
            entry.1 = timeout;
        } else {
            // One slot per command, so the push cannot fail
            let _ = self.timeouts.push((command, timeout));
        }
    }

    /// Insert the default timeout for every command lacking an override.
    ///
    /// Existing overrides are left untouched; afterwards the override list
    /// covers the whole command set.
    pub fn set_default_timeouts(&mut self) {
        for command in MdfuCommand::ALL {
            if !self.timeouts.iter().any(|(c, _)| *c == command) {
                let _ = self.timeouts.push((command, self.default_timeout));
            }
        }
    }

    /// Decode client information from a parameter stream
    pub fn decode(data: &[u8]) -> Result<Self, ClientInfoError> {
        let mut version = None;
        let mut buffer_info = None;
        let mut default_timeout = None;
        let mut timeouts = Vec::new();
        let mut delay = None;

        let mut rest = data;
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(ClientInfoError::Truncated);
            }
            let parameter = ParameterType::from_code(rest[0])
                .ok_or(ClientInfoError::UnknownParameterType(rest[0]))?;
            let length = usize::from(rest[1]);
            let value = rest.get(2..2 + length).ok_or(ClientInfoError::Truncated)?;

            match parameter {
                ParameterType::ProtocolVersion => version = Some(decode_version(value)?),
                ParameterType::BufferInfo => buffer_info = Some(decode_buffer_info(value)?),
                ParameterType::CommandTimeouts => {
                    let decoded = decode_command_timeouts(value)?;
                    default_timeout = Some(decoded.0);
                    timeouts = decoded.1;
                }
                ParameterType::InterTransactionDelay => delay = Some(decode_delay(value)?),
            }
            rest = &rest[2 + length..];
        }

        let protocol_version = version.ok_or(ClientInfoError::MissingVersion)?;
        let (buffer_count, buffer_size) = buffer_info.ok_or(ClientInfoError::MissingBufferInfo)?;
        let default_timeout = default_timeout.ok_or(ClientInfoError::MissingDefaultTimeout)?;

        Ok(Self {
            protocol_version,
            buffer_count,
            buffer_size,
            default_timeout,
            inter_transaction_delay: delay,
            timeouts,
        })
    }

    /// Encode client information into a parameter stream.
    ///
    /// Emission order is fixed: buffer info, protocol version, command
    /// timeouts (default first), then the inter-transaction delay if present.
    pub fn encode(&self) -> Vec<u8, MAX_ENCODED_CLIENT_INFO> {
        let mut out = Vec::new();

        let _ = out.push(ParameterType::BufferInfo.code());
        let _ = out.push(BUFFER_INFO_SIZE as u8);
        let _ = out.extend_from_slice(&self.buffer_size.to_le_bytes());
        let _ = out.push(self.buffer_count);

        // Pre-release ordinals are not reported on the wire
        let _ = out.push(ParameterType::ProtocolVersion.code());
        let _ = out.push(PROTOCOL_VERSION_SIZE as u8);
        let _ = out.push(self.protocol_version.major);
        let _ = out.push(self.protocol_version.minor);
        let _ = out.push(self.protocol_version.patch);

        let entries = 1 + self.timeouts.len();
        let _ = out.push(ParameterType::CommandTimeouts.code());
        let _ = out.push((entries * COMMAND_TIMEOUT_SIZE) as u8);
        let _ = out.push(0);
        let _ = out.extend_from_slice(&self.default_timeout.ticks().to_le_bytes());
        for (command, timeout) in &self.timeouts {
            let _ = out.push(command.code());
            let _ = out.extend_from_slice(&timeout.ticks().to_le_bytes());
        }

        if let Some(delay) = self.inter_transaction_delay {
            let _ = out.push(ParameterType::InterTransactionDelay.code());
            let _ = out.push(INTER_TRANSACTION_DELAY_SIZE as u8);
            let _ = out.extend_from_slice(&delay.to_le_bytes());
        }
        out
    }
}

fn decode_version(value: &[u8]) -> Result<ProtocolVersion, ClientInfoError> {
    match value.len() {
        PROTOCOL_VERSION_SIZE => Ok(ProtocolVersion::new(value[0], value[1], value[2])),
        PROTOCOL_VERSION_INTERNAL_SIZE => Ok(ProtocolVersion::new_pre_release(
            value[0], value[1], value[2], value[3],
        )),
        length => Err(ClientInfoError::InvalidLength {
            parameter: ParameterType::ProtocolVersion,
            length,
        }),
    }
}

fn decode_buffer_info(value: &[u8]) -> Result<(u8, u16), ClientInfoError> {
    if value.len() != BUFFER_INFO_SIZE {
        return Err(ClientInfoError::InvalidLength {
            parameter: ParameterType::BufferInfo,
            length: value.len(),
        });
    }
    let buffer_size = u16::from_le_bytes([value[0], value[1]]);
    Ok((value[2], buffer_size))
}

type Timeouts = Vec<(MdfuCommand, CommandTimeout), MAX_TIMEOUT_OVERRIDES>;

fn decode_command_timeouts(value: &[u8]) -> Result<(CommandTimeout, Timeouts), ClientInfoError> {
    if value.len() % COMMAND_TIMEOUT_SIZE != 0 {
        return Err(ClientInfoError::InvalidLength {
            parameter: ParameterType::CommandTimeouts,
            length: value.len(),
        });
    }
    let mut default_timeout = None;
    let mut timeouts: Timeouts = Vec::new();
    for entry in value.chunks_exact(COMMAND_TIMEOUT_SIZE) {
        let timeout = CommandTimeout::from_ticks(u16::from_le_bytes([entry[1], entry[2]]));
        if entry[0] == 0 {
            // Command code zero denotes the mandatory default timeout
            default_timeout = Some(timeout);
        } else {
            let command = MdfuCommand::from_code(entry[0])
                .ok_or(ClientInfoError::UnknownCommand(entry[0]))?;
            if let Some(existing) = timeouts.iter_mut().find(|(c, _)| *c == command) {
                existing.1 = timeout;
            } else {
                let _ = timeouts.push((command, timeout));
            }
        }
    }
    let default_timeout = default_timeout.ok_or(ClientInfoError::MissingDefaultTimeout)?;
    Ok((default_timeout, timeouts))
}

fn decode_delay(value: &[u8]) -> Result<InterTransactionDelay, ClientInfoError> {
    let bytes: [u8; 4] = value
        .try_into()
        .map_err(|_| ClientInfoError::InvalidLength {
            parameter: ParameterType::InterTransactionDelay,
            length: value.len(),
        })?;
    Ok(InterTransactionDelay::from_le_bytes(bytes))
}
