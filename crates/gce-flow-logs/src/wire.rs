// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Binary record consumed by the flow collector.
//!
//! Records are protobuf encoded (`gce_flow_logs.SimplePacket`). Addresses travel as
//! `fixed32`, which protobuf always writes little-endian, and hold the IPv4 octets read
//! in little-endian order. That is what the collector expects, it is not network order.
//!
//! ```text
//! message SimplePacket {
//!   fixed32 destination_ipv4    = 1;
//!   fixed32 source_ipv4         = 2;
//!   uint32  source_port         = 3;
//!   uint32  destination_port    = 4;
//!   uint32  sample_ratio        = 5;
//!   uint32  ip_protocol_version = 6;
//!   uint32  protocol            = 7;
//!   uint64  length              = 8;
//!   uint64  number_of_packets   = 9;
//!   uint32  schema_version      = 15;
//! }
//! ```

use std::net::{IpAddr, Ipv4Addr};

use prost::Message;

use crate::constants::{IP_PROTOCOL_VERSION, SAMPLE_RATIO, WIRE_SCHEMA_VERSION};
use crate::errors::DecodeError;
use crate::validator::ValidFlowRecord;

#[derive(Clone, PartialEq, Message)]
struct SimplePacket {
    #[prost(fixed32, tag = "1")]
    destination_ipv4: u32,
    #[prost(fixed32, tag = "2")]
    source_ipv4: u32,
    #[prost(uint32, tag = "3")]
    source_port: u32,
    #[prost(uint32, tag = "4")]
    destination_port: u32,
    #[prost(uint32, tag = "5")]
    sample_ratio: u32,
    #[prost(uint32, tag = "6")]
    ip_protocol_version: u32,
    #[prost(uint32, tag = "7")]
    protocol: u32,
    #[prost(uint64, tag = "8")]
    length: u64,
    #[prost(uint64, tag = "9")]
    number_of_packets: u64,
    #[prost(uint32, tag = "15")]
    schema_version: u32,
}

/// Decoded view of one wire record.
///
/// Sample ratio and IP protocol version are constants of the format and are not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireMessage {
    destination_ipv4: u32,
    source_ipv4: u32,
    source_port: u16,
    destination_port: u16,
    protocol_number: u32,
    byte_count: u64,
    packet_count: u64,
}

impl From<&ValidFlowRecord> for WireMessage {
    fn from(record: &ValidFlowRecord) -> Self {
        WireMessage {
            destination_ipv4: ipv4_to_le_u32(record.destination()),
            source_ipv4: ipv4_to_le_u32(record.source()),
            source_port: record.source_port(),
            destination_port: record.destination_port(),
            protocol_number: record.protocol_number(),
            byte_count: record.bytes(),
            packet_count: record.packets(),
        }
    }
}

impl WireMessage {
    pub fn destination_ipv4(&self) -> u32 {
        self.destination_ipv4
    }

    pub fn source_ipv4(&self) -> u32 {
        self.source_ipv4
    }

    pub fn source_port(&self) -> u16 {
        self.source_port
    }

    pub fn destination_port(&self) -> u16 {
        self.destination_port
    }

    pub fn sample_ratio(&self) -> u32 {
        SAMPLE_RATIO
    }

    pub fn ip_protocol_version(&self) -> u32 {
        IP_PROTOCOL_VERSION
    }

    pub fn protocol_number(&self) -> u32 {
        self.protocol_number
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    #[must_use]
    pub fn encode_to_vec(&self) -> Vec<u8> {
        SimplePacket {
            destination_ipv4: self.destination_ipv4,
            source_ipv4: self.source_ipv4,
            source_port: u32::from(self.source_port),
            destination_port: u32::from(self.destination_port),
            sample_ratio: SAMPLE_RATIO,
            ip_protocol_version: IP_PROTOCOL_VERSION,
            protocol: self.protocol_number,
            length: self.byte_count,
            number_of_packets: self.packet_count,
            schema_version: WIRE_SCHEMA_VERSION,
        }
        .encode_to_vec()
    }
}

/// Serializes a validated record into one datagram payload.
#[must_use]
pub fn encode(record: &ValidFlowRecord) -> Vec<u8> {
    WireMessage::from(record).encode_to_vec()
}

/// Decodes a datagram payload, rejecting records that break the format constants.
pub fn decode(buf: &[u8]) -> Result<WireMessage, DecodeError> {
    let packet = SimplePacket::decode(buf)?;

    if packet.schema_version != WIRE_SCHEMA_VERSION {
        return Err(DecodeError::SchemaVersion(packet.schema_version));
    }
    if packet.sample_ratio != SAMPLE_RATIO {
        return Err(DecodeError::InvalidField {
            field: "sample_ratio",
            value: u64::from(packet.sample_ratio),
        });
    }
    if packet.ip_protocol_version != IP_PROTOCOL_VERSION {
        return Err(DecodeError::InvalidField {
            field: "ip_protocol_version",
            value: u64::from(packet.ip_protocol_version),
        });
    }
    let port = |field: &'static str, value: u32| {
        u16::try_from(value).map_err(|_| DecodeError::InvalidField {
            field,
            value: u64::from(value),
        })
    };

    Ok(WireMessage {
        destination_ipv4: packet.destination_ipv4,
        source_ipv4: packet.source_ipv4,
        source_port: port("source_port", packet.source_port)?,
        destination_port: port("destination_port", packet.destination_port)?,
        protocol_number: packet.protocol,
        byte_count: packet.length,
        packet_count: packet.number_of_packets,
    })
}

/// Reads the address octets little-endian, `10.154.0.2` becomes `0x02009a0a`.
pub fn ipv4_to_le_u32(addr: Ipv4Addr) -> u32 {
    u32::from_le_bytes(addr.octets())
}

/// Like [`ipv4_to_le_u32`], an IPv6 address contributes its trailing 4 octets.
///
/// The ingest side never calls this, it only encodes validated IPv4 records. It is kept
/// for collectors and tools that compare [`WireMessage`] addresses against an
/// [`IpAddr`] taken from elsewhere, which may be in IPv4-mapped form.
///
/// ```
/// use std::net::IpAddr;
/// use gce_flow_logs::wire::ip_to_le_u32;
///
/// let mapped: IpAddr = "::ffff:10.154.0.2".parse().unwrap();
/// let plain: IpAddr = "10.154.0.2".parse().unwrap();
/// assert_eq!(ip_to_le_u32(mapped), ip_to_le_u32(plain));
/// assert_eq!(ip_to_le_u32(plain), u32::from_le_bytes([10, 154, 0, 2]));
/// ```
pub fn ip_to_le_u32(addr: IpAddr) -> u32 {
    match addr {
        IpAddr::V4(v4) => ipv4_to_le_u32(v4),
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            u32::from_le_bytes([octets[12], octets[13], octets[14], octets[15]])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_record::FlowRecord;
    use crate::validator::validate;
    use proptest::prelude::*;

    fn valid(src: &str, dst: &str, bytes: u64, packets: u64) -> ValidFlowRecord {
        validate(FlowRecord {
            protocol_number: 6,
            source_ip: src.to_string(),
            destination_ip: dst.to_string(),
            source_port: 22,
            destination_port: 37332,
            bytes_sent: bytes.to_string(),
            packets_sent: packets.to_string(),
        })
        .expect("record is valid")
    }

    #[test]
    fn test_little_endian_address() {
        let value = ipv4_to_le_u32(Ipv4Addr::new(10, 154, 0, 2));
        assert_eq!(value, 10 + 154 * 256 + 2 * 16_777_216);
        assert_ne!(value, u32::from(Ipv4Addr::new(10, 154, 0, 2)));
    }

    #[test]
    fn test_mapped_address_uses_trailing_octets() {
        let mapped: IpAddr = "::ffff:10.154.0.2".parse().unwrap();
        assert_eq!(
            ip_to_le_u32(mapped),
            ipv4_to_le_u32(Ipv4Addr::new(10, 154, 0, 2))
        );
    }

    #[test]
    fn test_encode_sample_record() {
        let record = valid("10.154.0.2", "86.184.83.214", 4004, 12);
        let decoded = decode(&encode(&record)).expect("decode failed");

        assert_eq!(
            decoded.destination_ipv4(),
            u32::from_le_bytes([86, 184, 83, 214])
        );
        assert_eq!(decoded.source_ipv4(), u32::from_le_bytes([10, 154, 0, 2]));
        assert_eq!(decoded.source_port(), 22);
        assert_eq!(decoded.destination_port(), 37332);
        assert_eq!(decoded.protocol_number(), 6);
        assert_eq!(decoded.byte_count(), 4004);
        assert_eq!(decoded.packet_count(), 12);
        assert_eq!(decoded.sample_ratio(), 1);
        assert_eq!(decoded.ip_protocol_version(), 4);
    }

    #[test]
    fn test_address_bytes_on_the_wire() {
        let buf = encode(&valid("10.154.0.2", "86.184.83.214", 1, 1));
        // tag 1, wire type 5 (fixed32), then the octets in address order
        assert_eq!(&buf[..5], &[0x0d, 86, 184, 83, 214]);
        assert_eq!(&buf[5..10], &[0x15, 10, 154, 0, 2]);
    }

    #[test]
    fn test_constants_are_always_written() {
        // zero counters and ports are omitted by protobuf, the constants never are
        let record = validate(FlowRecord {
            protocol_number: 0,
            source_ip: "0.0.0.0".to_string(),
            destination_ip: "0.0.0.0".to_string(),
            source_port: 0,
            destination_port: 0,
            bytes_sent: "0".to_string(),
            packets_sent: "0".to_string(),
        })
        .unwrap();
        let packet = SimplePacket::decode(encode(&record).as_slice()).unwrap();
        assert_eq!(packet.sample_ratio, 1);
        assert_eq!(packet.ip_protocol_version, 4);
        assert_eq!(packet.schema_version, WIRE_SCHEMA_VERSION);
    }

    #[test]
    fn test_decode_rejects_bad_records() {
        assert!(matches!(decode(&[0xff, 0xff, 0xff]), Err(DecodeError::Malformed(_))));

        let mut packet = SimplePacket {
            sample_ratio: 0,
            ip_protocol_version: 4,
            schema_version: WIRE_SCHEMA_VERSION,
            ..Default::default()
        };
        assert!(matches!(
            decode(&packet.encode_to_vec()),
            Err(DecodeError::InvalidField {
                field: "sample_ratio",
                ..
            })
        ));

        packet.sample_ratio = 1;
        packet.schema_version = 2;
        assert!(matches!(
            decode(&packet.encode_to_vec()),
            Err(DecodeError::SchemaVersion(2))
        ));

        packet.schema_version = WIRE_SCHEMA_VERSION;
        packet.source_port = 70_000;
        assert!(matches!(
            decode(&packet.encode_to_vec()),
            Err(DecodeError::InvalidField {
                field: "source_port",
                ..
            })
        ));
    }

    proptest! {
        #[test]
        fn test_decode_inverts_encode(
            src in any::<[u8; 4]>(),
            dst in any::<[u8; 4]>(),
            src_port in any::<u16>(),
            dst_port in any::<u16>(),
            protocol in any::<u8>(),
            bytes in any::<u64>(),
            packets in any::<u64>(),
        ) {
            let record = validate(FlowRecord {
                protocol_number: u32::from(protocol),
                source_ip: Ipv4Addr::from(src).to_string(),
                destination_ip: Ipv4Addr::from(dst).to_string(),
                source_port: src_port,
                destination_port: dst_port,
                bytes_sent: bytes.to_string(),
                packets_sent: packets.to_string(),
            }).unwrap();
            let decoded = decode(&encode(&record)).unwrap();
            prop_assert_eq!(decoded, WireMessage::from(&record));
            prop_assert_eq!(decoded.source_ipv4(), u32::from_le_bytes(src));
            prop_assert_eq!(decoded.destination_ipv4(), u32::from_le_bytes(dst));
        }
    }
}
