//! Black-box tests for the vendor framing layer (spec §4.3, §8).

use ws63_flash::frame::{encode, FrameError, FrameReceiver};

#[test]
fn round_trip_preserves_cmd_and_payload() {
    for (cmd, payload) in [
        (0xF0u8, vec![1u8, 2, 3, 4, 5, 6, 7, 8]),
        (0xD2, vec![0u8; 14]),
        (0x87, vec![0x00, 0x00]),
        (0x00, vec![]),
    ] {
        let bytes = encode(cmd, &payload);
        let mut recv = FrameReceiver::with_default_timeout();
        let frame = recv.push_bytes(&bytes).unwrap().unwrap();
        assert_eq!(frame.cmd, cmd);
        assert_eq!(frame.payload, payload);
    }
}

#[test]
fn receiver_scans_across_interleaved_noise_and_multiple_frames() {
    let first = encode(0xF0, &[1, 2, 3]);
    let second = encode(0xD2, &[4, 5, 6]);

    let mut stream = vec![0x11, 0x22, 0x33];
    stream.extend_from_slice(&first);
    stream.push(0xEF); // a lone false-start byte between frames
    stream.extend_from_slice(&second);

    let mut recv = FrameReceiver::with_default_timeout();
    let mut decoded = Vec::new();
    for &byte in &stream {
        if let Some(result) = recv.push_byte(byte) {
            decoded.push(result.unwrap());
        }
    }

    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].cmd, 0xF0);
    assert_eq!(decoded[1].cmd, 0xD2);
}

#[test]
fn crc_corruption_is_reported_as_frame_bad_crc() {
    let mut bytes = encode(0xF0, &[9, 9, 9]);
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;

    let mut recv = FrameReceiver::with_default_timeout();
    let result = recv.push_bytes(&bytes);
    assert_eq!(result, Some(Err(FrameError::FrameBadCrc)));
}

#[test]
fn every_encoded_frame_satisfies_the_spec_8_invariants() {
    for payload_len in [0usize, 1, 16, 128, 1024] {
        let payload = vec![0x5Au8; payload_len];
        let bytes = encode(0xD2, &payload);

        assert_eq!(&bytes[0..4], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(bytes[6] ^ bytes[7], 0xFF);

        let len = bytes.len();
        let stored_crc = u16::from_le_bytes([bytes[len - 2], bytes[len - 1]]);
        let computed_crc = ws63_flash::crc::crc16(&bytes[..len - 2]);
        assert_eq!(stored_crc, computed_crc);
    }
}
