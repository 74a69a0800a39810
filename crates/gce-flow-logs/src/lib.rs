// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # GCE Flow Logs
//!
//! Bridges Google Compute Engine VPC flow logs to a UDP flow collector.
//!
//! Flow logs exported to Pub/Sub are pulled, parsed, validated (IPv4 only) and re-encoded
//! as a compact binary [`wire::WireMessage`] which is sent to the collector as a single
//! datagram. A message that can not be turned into a valid record is logged and
//! acknowledged, it never stops the process.
//!
//! ## Architecture
//!
//! - [`subscriber`]: pull loop, one task per message
//! - [`pipeline`]: parse, validate, encode, forward, settle
//! - [`flow_record`], [`validator`], [`wire`]: the record stages
//! - [`forwarder`]: UDP transport
//! - [`pubsub`], [`acker_service`], [`token`], [`metadata`]: Google API plumbing
//! - [`config`]: environment configuration

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod acker_service;
pub mod config;
pub mod constants;
pub mod errors;
pub mod flow_record;
pub mod forwarder;
pub mod http;
pub mod metadata;
pub mod pipeline;
pub mod pubsub;
pub mod subscriber;
pub mod token;
pub mod util;
pub mod validator;
pub mod wire;
