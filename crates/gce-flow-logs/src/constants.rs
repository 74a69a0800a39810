// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// FastNetMon multiplies counters by this value, it must never be zero
pub const SAMPLE_RATIO: u32 = 1;
pub const IP_PROTOCOL_VERSION: u32 = 4;
pub const WIRE_SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_EXPORT_ADDRESS: &str = "127.0.0.1:8104";
pub const DEFAULT_SUBSCRIPTION_ID: &str = "fastnetmon-instance-5";
pub const DEFAULT_MAX_MESSAGES: u32 = 100;
pub const MAX_PULL_MESSAGES: u32 = 1_000;
pub const DEFAULT_MAX_OUTSTANDING: u32 = 1_000;

pub const PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com/v1";
pub const METADATA_HOST: &str = "metadata.google.internal";

/// Pub/Sub rejects acknowledge requests above this many ids
pub const MAX_ACK_IDS_PER_REQUEST: usize = 1_000;
