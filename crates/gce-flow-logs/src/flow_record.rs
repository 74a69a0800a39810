// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decoding of GCE VPC flow log entries as exported to Pub/Sub.
//!
//! Example entry (only the fields we use are shown):
//!
//! ```text
//! {"jsonPayload":{"bytes_sent":"4004","packets_sent":"12","connection":{"dest_ip":"86.184.83.214",
//!   "dest_port":37332,"protocol":6,"src_ip":"10.154.0.2","src_port":22}}}
//! ```

use serde::Deserialize;

use crate::errors::ParseError;

#[derive(Debug, Deserialize)]
struct LogEntry {
    #[serde(rename = "jsonPayload")]
    payload: Payload,
}

#[derive(Debug, Deserialize)]
struct Payload {
    bytes_sent: String,
    packets_sent: String,
    connection: Connection,
}

#[derive(Debug, Deserialize)]
struct Connection {
    protocol: u32,
    dest_ip: String,
    dest_port: u16,
    src_ip: String,
    src_port: u16,
}

/// One connection record as found in the flow log, before any semantic checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRecord {
    pub protocol_number: u32,
    pub source_ip: String,
    pub destination_ip: String,
    pub source_port: u16,
    pub destination_port: u16,
    /// Decimal string, the exporter emits counters as strings
    pub bytes_sent: String,
    pub packets_sent: String,
}

impl From<LogEntry> for FlowRecord {
    fn from(entry: LogEntry) -> Self {
        let Payload {
            bytes_sent,
            packets_sent,
            connection,
        } = entry.payload;
        FlowRecord {
            protocol_number: connection.protocol,
            source_ip: connection.src_ip,
            destination_ip: connection.dest_ip,
            source_port: connection.src_port,
            destination_port: connection.dest_port,
            bytes_sent,
            packets_sent,
        }
    }
}

/// Parses a raw Pub/Sub message body into a [`FlowRecord`].
///
/// Missing fields, wrong JSON types and ports outside of `u16` are all reported as
/// [`ParseError`].
pub fn parse(raw: &[u8]) -> Result<FlowRecord, ParseError> {
    let entry: LogEntry = serde_json::from_slice(raw)?;
    Ok(entry.into())
}
