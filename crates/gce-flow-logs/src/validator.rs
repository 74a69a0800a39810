// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::net::{IpAddr, Ipv4Addr};

use crate::errors::{Field, ValidationError};
use crate::flow_record::FlowRecord;

/// A flow record the collector can accept: both ends are IPv4 and the counters are numbers.
///
/// Only [`validate`] builds one, so encoding it can not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidFlowRecord {
    source: Ipv4Addr,
    destination: Ipv4Addr,
    source_port: u16,
    destination_port: u16,
    protocol_number: u32,
    bytes: u64,
    packets: u64,
}

impl ValidFlowRecord {
    pub fn source(&self) -> Ipv4Addr {
        self.source
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    pub fn source_port(&self) -> u16 {
        self.source_port
    }

    pub fn destination_port(&self) -> u16 {
        self.destination_port
    }

    pub fn protocol_number(&self) -> u32 {
        self.protocol_number
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }
}

/// Checks address family and counters of a parsed flow record.
pub fn validate(record: FlowRecord) -> Result<ValidFlowRecord, ValidationError> {
    let destination = parse_ipv4(Field::DestinationIp, &record.destination_ip)?;
    let source = parse_ipv4(Field::SourceIp, &record.source_ip)?;
    let bytes = parse_counter(Field::BytesSent, &record.bytes_sent)?;
    let packets = parse_counter(Field::PacketsSent, &record.packets_sent)?;

    Ok(ValidFlowRecord {
        source,
        destination,
        source_port: record.source_port,
        destination_port: record.destination_port,
        protocol_number: record.protocol_number,
        bytes,
        packets,
    })
}

// IPv4-mapped IPv6 addresses are rejected as well, only the dotted form is accepted.
fn parse_ipv4(field: Field, value: &str) -> Result<Ipv4Addr, ValidationError> {
    match value.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => Ok(addr),
        Ok(IpAddr::V6(_)) => Err(ValidationError::NotIpv4 {
            field,
            value: value.to_string(),
        }),
        Err(_) => Err(ValidationError::AddressUnparseable {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_counter(field: Field, value: &str) -> Result<u64, ValidationError> {
    let unparseable = || ValidationError::NumericFieldUnparseable {
        field,
        value: value.to_string(),
    };
    // u64::from_str also takes a leading '+'
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(unparseable());
    }
    value.parse::<u64>().map_err(|_| unparseable())
}
