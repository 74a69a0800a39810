// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Payload is not a well-formed flow log JSON document.
#[derive(Debug, thiserror::Error)]
#[error("malformed flow log payload: {0}")]
pub struct ParseError(#[from] pub serde_json::Error);

/// Names the flow log field a validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    SourceIp,
    DestinationIp,
    BytesSent,
    PacketsSent,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::SourceIp => "src_ip",
            Field::DestinationIp => "dest_ip",
            Field::BytesSent => "bytes_sent",
            Field::PacketsSent => "packets_sent",
        };
        f.write_str(name)
    }
}

/// Flow log decoded fine but carries values the collector cannot accept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("cannot parse {field} as an IP address: {value:?}")]
    AddressUnparseable { field: Field, value: String },
    #[error("{field} is not an IPv4 address: {value:?}")]
    NotIpv4 { field: Field, value: String },
    #[error("cannot parse {field} as an unsigned 64-bit integer: {value:?}")]
    NumericFieldUnparseable { field: Field, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("cannot resolve export address {address}: {source}")]
    Resolve {
        address: String,
        source: std::io::Error,
    },
    #[error("export address {0} has no IPv4 address")]
    NoIpv4Address(String),
    #[error("cannot bind local UDP socket: {0}")]
    Bind(std::io::Error),
    #[error("cannot connect UDP socket to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },
    #[error("cannot send datagram: {0}")]
    Send(#[from] std::io::Error),
    #[error("short datagram write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed wire message: {0}")]
    Malformed(#[from] prost::DecodeError),
    #[error("unsupported wire schema version {0}")]
    SchemaVersion(u32),
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: u64 },
}

/// Failures talking to Pub/Sub or the GCE metadata server.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("{url} answered {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("cannot decode response from {url}: {source}")]
    Body { url: String, source: reqwest::Error },
    #[error("cannot build HTTP client: {0}")]
    Client(reqwest::Error),
}

/// Startup configuration failures, the process must not start consuming.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("cannot resolve project id: {0}")]
    ProjectId(String),
}
