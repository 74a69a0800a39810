// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-message ingest: parse, validate, encode, forward, then acknowledge.
//!
//! Every failure is contained in the message that caused it. Malformed or rejected flow
//! logs are logged and acknowledged since redelivery can not fix them. Transport failures
//! are acknowledged or negatively acknowledged depending on [`AckPolicy`].

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::errors::{ForwardError, ParseError, ValidationError};
use crate::flow_record;
use crate::forwarder::Forwarder;
use crate::validator;
use crate::wire;

/// Acknowledgement primitives of one delivered message.
///
/// Both consume the handle, a message is settled exactly once.
pub trait AckHandle: Send {
    fn ack(self);
    fn nack(self);
}

/// What to do with a message whose record could not be sent to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// Acknowledge anyway, the queue can not repair a collector outage
    #[default]
    Always,
    /// Negative-acknowledge so the queue redelivers with its own backoff
    OnSuccess,
}

impl FromStr for AckPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(AckPolicy::Always),
            "on_success" | "on-success" => Ok(AckPolicy::OnSuccess),
            other => Err(format!(
                "unknown ack policy '{other}', expected 'always' or 'on_success'"
            )),
        }
    }
}

#[derive(Debug)]
pub enum Rejection {
    Parse(ParseError),
    Validation(ValidationError),
    Transport(ForwardError),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Parse(e) => write!(f, "{e}"),
            Rejection::Validation(e) => write!(f, "{e}"),
            Rejection::Transport(e) => write!(f, "{e}"),
        }
    }
}

/// Terminal state of one message.
#[derive(Debug)]
pub enum Outcome {
    Forwarded,
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Outcome::Forwarded)
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    forwarded: AtomicU64,
    parse_rejected: AtomicU64,
    validation_rejected: AtomicU64,
    transport_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub received: u64,
    pub forwarded: u64,
    pub parse_rejected: u64,
    pub validation_rejected: u64,
    pub transport_failed: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} forwarded={} parse_rejected={} validation_rejected={} transport_failed={}",
            self.received,
            self.forwarded,
            self.parse_rejected,
            self.validation_rejected,
            self.transport_failed
        )
    }
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            parse_rejected: self.parse_rejected.load(Ordering::Relaxed),
            validation_rejected: self.validation_rejected.load(Ordering::Relaxed),
            transport_failed: self.transport_failed.load(Ordering::Relaxed),
        }
    }
}

pub struct IngestPipeline {
    forwarder: Arc<dyn Forwarder>,
    ack_policy: AckPolicy,
    stats: PipelineStats,
}

impl IngestPipeline {
    pub fn new(forwarder: Arc<dyn Forwarder>, ack_policy: AckPolicy) -> Self {
        IngestPipeline {
            forwarder,
            ack_policy,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Drives one raw message to a terminal state and settles it through `ack`.
    pub async fn handle<A: AckHandle>(&self, raw: &[u8], ack: A) -> Outcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let outcome = match self.process(raw).await {
            Ok(()) => {
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                Outcome::Forwarded
            }
            Err(rejection) => {
                self.record_rejection(raw, &rejection);
                Outcome::Rejected(rejection)
            }
        };

        match (&outcome, self.ack_policy) {
            (Outcome::Rejected(Rejection::Transport(_)), AckPolicy::OnSuccess) => ack.nack(),
            _ => ack.ack(),
        }
        outcome
    }

    async fn process(&self, raw: &[u8]) -> Result<(), Rejection> {
        let record = flow_record::parse(raw).map_err(Rejection::Parse)?;
        let valid = validator::validate(record).map_err(Rejection::Validation)?;
        let buf = wire::encode(&valid);
        self.forwarder
            .send(&buf)
            .await
            .map_err(Rejection::Transport)?;
        debug!(
            "Forwarded flow {}:{} -> {}:{} proto {}",
            valid.source(),
            valid.source_port(),
            valid.destination(),
            valid.destination_port(),
            valid.protocol_number()
        );
        Ok(())
    }

    fn record_rejection(&self, raw: &[u8], rejection: &Rejection) {
        match rejection {
            Rejection::Parse(e) => {
                self.stats.parse_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Dropping flow log {}: {}",
                    String::from_utf8_lossy(raw),
                    e
                );
            }
            Rejection::Validation(e) => {
                self.stats
                    .validation_rejected
                    .fetch_add(1, Ordering::Relaxed);
                warn!("Dropping flow log rejected by validation: {}", e);
            }
            Rejection::Transport(e) => {
                self.stats.transport_failed.fetch_add(1, Ordering::Relaxed);
                error!("Failed to forward flow record: {}", e);
            }
        }
    }
}
