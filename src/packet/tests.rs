//! Tests for the wire codec.

use super::command::{Command, APP_BASE};
use super::frame::Packet;
use super::header::{PacketFlags, PacketHeader, HEADER_SIZE};
use bytes::BytesMut;

fn header(command: Command) -> PacketHeader {
    PacketHeader {
        command,
        flags: PacketFlags::RELIABLE,
        reliable_ack: 0x0102,
        reliable: 0x0304,
        unreliable: 0x0506,
    }
}

#[test]
fn test_command_round_trip() {
    for byte in [0u8, 1, 2, 3, 4, 5, 0x10, 0x42, 0xFF] {
        let cmd = Command::from_u8(byte).expect("valid command byte");
        assert_eq!(cmd.to_u8(), byte);
    }
}

#[test]
fn test_command_gap_is_invalid() {
    // Bytes between PONG and APP_BASE are not assigned.
    for byte in 6..APP_BASE {
        assert_eq!(Command::from_u8(byte), None);
    }
}

#[test]
fn test_header_layout_is_network_order() {
    let mut buf = BytesMut::new();
    header(Command::App(0x02)).encode(&mut buf);

    assert_eq!(buf.len(), HEADER_SIZE);
    assert_eq!(
        &buf[..],
        &[0x12, 0x01, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]
    );
}

#[test]
fn test_header_decode_rejects_short_buffer() {
    let buf = [0u8; HEADER_SIZE - 1];
    assert_eq!(PacketHeader::decode(&mut &buf[..]), None);
}

#[test]
fn test_flags() {
    let mut flags = PacketFlags::empty();
    assert!(!flags.contains(PacketFlags::RELIABLE));

    flags.insert(PacketFlags::RELIABLE);
    flags.insert(PacketFlags::ACK);
    assert!(flags.contains(PacketFlags::RELIABLE | PacketFlags::ACK));
    assert!(!flags.contains(PacketFlags::RETRANSMITTED));
    assert_eq!(flags.bits(), 3);
}

#[test]
fn test_packet_round_trips() {
    let packets = [
        Packet::Noop {
            header: header(Command::Noop),
        },
        Packet::Close {
            header: header(Command::Close),
        },
        Packet::ConnReq {
            header: header(Command::ConnReq),
            cookie: 0,
        },
        Packet::ConnRsp {
            header: header(Command::ConnRsp),
            accepted: 1,
        },
        Packet::Ping {
            header: header(Command::Ping),
            timestamp: 0x0011_2233_4455_6677,
        },
        Packet::Pong {
            header: header(Command::Pong),
            timestamp: 42,
        },
        Packet::App {
            header: header(Command::App(7)),
            sub_command: 7,
            payload: bytes::Bytes::from_static(b"hello"),
        },
    ];

    for packet in packets {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        assert_eq!(buf.len(), packet.encoded_len());
        let decoded = Packet::decode(&buf).expect("decode");
        assert_eq!(decoded, packet);
    }
}

#[test]
fn test_decode_rejects_truncated_typed_payloads() {
    // A CONN-RSP with its `accepted` word cut short.
    let mut buf = BytesMut::new();
    Packet::ConnRsp {
        header: header(Command::ConnRsp),
        accepted: 1,
    }
    .encode(&mut buf);
    assert!(Packet::decode(&buf[..buf.len() - 1]).is_none());

    // A PING missing part of its timestamp.
    let mut buf = BytesMut::new();
    Packet::Ping {
        header: header(Command::Ping),
        timestamp: 1,
    }
    .encode(&mut buf);
    assert!(Packet::decode(&buf[..HEADER_SIZE + 4]).is_none());
}

#[test]
fn test_decode_rejects_unknown_command() {
    let datagram = [0x06, 0, 0, 0, 0, 0, 0, 0];
    assert!(Packet::decode(&datagram).is_none());
}

#[test]
fn test_app_payload_is_verbatim() {
    let payload = bytes::Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]);
    let packet = Packet::App {
        header: header(Command::App(0)),
        sub_command: 0,
        payload: payload.clone(),
    };
    let mut buf = BytesMut::new();
    packet.encode(&mut buf);
    assert_eq!(&buf[HEADER_SIZE..], &payload[..]);

    // An empty application payload is legal.
    let empty = Packet::App {
        header: header(Command::App(3)),
        sub_command: 3,
        payload: bytes::Bytes::new(),
    };
    let mut buf = BytesMut::new();
    empty.encode(&mut buf);
    assert_eq!(Packet::decode(&buf), Some(empty));
}
