//! Property tests for the packet codec and checksum engine.

use mdfu_protocol::{
    checksum, verify, CommandPacket, MdfuCommand, MdfuStatus, StatusPacket,
};
use proptest::prelude::*;

fn any_command() -> impl Strategy<Value = MdfuCommand> {
    (1u8..=5).prop_map(|code| MdfuCommand::from_code(code).expect("valid command code"))
}

fn any_status() -> impl Strategy<Value = MdfuStatus> {
    (1u8..=5).prop_map(|code| MdfuStatus::from_code(code).expect("valid status code"))
}

proptest! {
    #[test]
    fn command_packet_roundtrip(
        sequence in 0u8..=31,
        sync: bool,
        command in any_command(),
        data in proptest::collection::vec(any::<u8>(), 0..128),
    ) {
        let packet = CommandPacket::new(sequence, command, &data, sync).expect("valid packet");
        let decoded = CommandPacket::decode(&packet.encode()).expect("roundtrip decode");
        prop_assert_eq!(decoded, packet);
    }

    #[test]
    fn status_packet_roundtrip(
        sequence in 0u8..=31,
        resend: bool,
        status in any_status(),
        data in proptest::collection::vec(any::<u8>(), 0..128),
    ) {
        let packet = StatusPacket::new(sequence, status, &data, resend).expect("valid packet");
        let decoded = StatusPacket::decode(&packet.encode()).expect("roundtrip decode");
        prop_assert_eq!(decoded, packet);
    }

    #[test]
    fn checksum_verifies_all_buffers(
        data in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        // Covers the empty buffer and the odd-length padding path
        prop_assert!(verify(&data, checksum(&data)));
    }

    #[test]
    fn checksum_detects_single_bit_flips(
        data in proptest::collection::vec(any::<u8>(), 1..64),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let crc = checksum(&data);
        let mut corrupted = data.clone();
        let index = index.index(corrupted.len());
        corrupted[index] ^= 1 << bit;
        prop_assert!(!verify(&corrupted, crc));
    }
}
