//! MDFU (Microchip Device Firmware Update) protocol codecs
//!
//! This crate implements the transport-independent layer of the MDFU
//! command/status protocol: packet encoding and decoding, the transport
//! frame checksum, and the self-describing client-info parameter stream
//! carried in a GetClientInfo response.
//!
//! # Protocol Overview
//!
//! A host drives a firmware update by sending command packets and polling
//! for status packets:
//!
//! ```text
//! Command: ┌──────────────────────────┬─────────┬────────────┐
//!          │ [sync:1][rsvd:2][seq:5]  │ command │ data       │
//!          │ 1B                       │ 1B      │ 0..N bytes │
//!          └──────────────────────────┴─────────┴────────────┘
//! Status:  ┌──────────────────────────┬─────────┬────────────┐
//!          │ [rsvd:1][resend:1]       │ status  │ data       │
//!          │ [rsvd:1][seq:5]  1B      │ 1B      │ 0..N bytes │
//!          └──────────────────────────┴─────────┴────────────┘
//! ```
//!
//! The transport layer wraps each packet in its own framing and appends a
//! 16-bit checksum; see the `mdfu-transport` crate. Packets and decoded
//! client info are plain value objects; decoding never retains state.

#![no_std]
#![deny(unsafe_code)]

pub mod checksum;
pub mod client_info;
pub mod delay;
pub mod packet;

pub use checksum::{checksum, verify};
pub use client_info::{
    ClientInfo, ClientInfoError, CommandTimeout, ParameterType, ProtocolVersion,
};
pub use delay::InterTransactionDelay;
pub use packet::{
    CommandPacket, FileTransferAbortCause, ImageState, MdfuCommand, MdfuPacket, MdfuStatus,
    PacketError, StatusPacket, TransportFailureCause, MAX_PACKET_DATA, MAX_PACKET_SIZE,
    MAX_SEQUENCE_NUMBER,
};
