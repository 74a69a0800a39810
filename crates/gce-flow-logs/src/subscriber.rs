// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pull loop feeding Pub/Sub messages into the [`IngestPipeline`].
//!
//! Each pulled message is handled on its own task. A semaphore bounds how many messages
//! are in flight; the loop stops pulling while it is exhausted. Settlement goes through
//! the [`AckerService`](crate::acker_service::AckerService) so acks are batched.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::acker_service::AckerHandle;
use crate::pipeline::{AckHandle, IngestPipeline};
use crate::pubsub::{PubSubClient, ReceivedMessage};

// Pull errors back off 200ms, 400ms, ... capped at 6.4s
const MAX_BACKOFF_EXPONENT: u32 = 6;
const EMPTY_PULL_DELAY: Duration = Duration::from_millis(100);

pub struct SubscriberConfig {
    /// Subscription id, not the full resource name
    pub subscription: String,
    /// Upper bound of messages returned by one pull request
    pub max_messages: u32,
    /// Messages being processed at once
    pub max_outstanding: u32,
}

/// Settles one Pub/Sub message through the acker.
pub struct PubSubAckHandle {
    ack_id: String,
    acker: AckerHandle,
}

impl PubSubAckHandle {
    pub fn new(ack_id: String, acker: AckerHandle) -> Self {
        PubSubAckHandle { ack_id, acker }
    }
}

impl AckHandle for PubSubAckHandle {
    fn ack(self) {
        if let Err(e) = self.acker.ack(self.ack_id) {
            error!("Failed to queue ack: {}", e);
        }
    }

    fn nack(self) {
        if let Err(e) = self.acker.nack(self.ack_id) {
            error!("Failed to queue nack: {}", e);
        }
    }
}

pub struct Subscriber {
    client: Arc<PubSubClient>,
    pipeline: Arc<IngestPipeline>,
    acker: AckerHandle,
    cancel_token: CancellationToken,
    subscription: String,
    max_messages: u32,
    max_outstanding: u32,
    outstanding: Arc<Semaphore>,
}

impl Subscriber {
    #[must_use]
    pub fn new(
        config: &SubscriberConfig,
        client: Arc<PubSubClient>,
        pipeline: Arc<IngestPipeline>,
        acker: AckerHandle,
        cancel_token: CancellationToken,
    ) -> Subscriber {
        Subscriber {
            client,
            pipeline,
            acker,
            cancel_token,
            subscription: config.subscription.clone(),
            max_messages: config.max_messages,
            max_outstanding: config.max_outstanding,
            outstanding: Arc::new(Semaphore::new(config.max_outstanding as usize)),
        }
    }

    /// Pulls and dispatches until cancelled, then waits for in-flight messages.
    ///
    /// A pull only asks for as many messages as there are free permits, so pulled
    /// messages never sit waiting for a slot while their ack deadline runs. A pull
    /// abandoned on shutdown may still have leased messages; Pub/Sub redelivers those
    /// once the subscription's ack deadline expires.
    pub async fn spin(self) {
        let mut consecutive_errors = 0u32;

        while !self.cancel_token.is_cancelled() {
            let permits = tokio::select! {
                permits = self.reserve() => permits,
                _ = self.cancel_token.cancelled() => break,
            };
            let Some(permits) = permits else { break };
            let max_messages = u32::try_from(permits.len()).unwrap_or(self.max_messages);

            let pulled = tokio::select! {
                result = self.client.pull(&self.subscription, max_messages) => result,
                _ = self.cancel_token.cancelled() => break,
            };

            match pulled {
                Ok(messages) if messages.is_empty() => {
                    consecutive_errors = 0;
                    drop(permits);
                    self.pause(EMPTY_PULL_DELAY).await;
                }
                Ok(messages) => {
                    consecutive_errors = 0;
                    trace!("Pulled {} messages", messages.len());
                    self.dispatch(messages, permits).await;
                }
                Err(e) => {
                    consecutive_errors = (consecutive_errors + 1).min(MAX_BACKOFF_EXPONENT);
                    let backoff = Duration::from_millis(100u64 * (1 << consecutive_errors));
                    error!(
                        "Failed to pull from subscription {}: {}. Retrying in {:?}",
                        self.subscription, e, backoff
                    );
                    drop(permits);
                    self.pause(backoff).await;
                }
            }
        }

        debug!("Subscriber cancelled, waiting for in-flight messages");
        // every task holds a permit until it settles its message
        if let Err(e) = self.outstanding.acquire_many(self.max_outstanding).await {
            error!("Failed to wait for in-flight messages: {}", e);
        }
        debug!("Subscriber stopped");
    }

    // Waits for one free permit, then takes whatever else is free up to max_messages
    async fn reserve(&self) -> Option<Vec<OwnedSemaphorePermit>> {
        let first = match Arc::clone(&self.outstanding).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Outstanding message limiter closed: {}", e);
                return None;
            }
        };
        let mut permits = vec![first];
        while permits.len() < self.max_messages as usize {
            match Arc::clone(&self.outstanding).try_acquire_owned() {
                Ok(permit) => permits.push(permit),
                Err(_) => break,
            }
        }
        Some(permits)
    }

    async fn dispatch(
        &self,
        messages: Vec<ReceivedMessage>,
        mut permits: Vec<OwnedSemaphorePermit>,
    ) {
        let mut messages = messages.into_iter();
        while let Some(message) = messages.next() {
            let permit = match permits.pop() {
                Some(permit) => permit,
                None => {
                    // more messages than requested, wait for a slot unless shutting down
                    let acquired = tokio::select! {
                        permit = Arc::clone(&self.outstanding).acquire_owned() => permit.ok(),
                        _ = self.cancel_token.cancelled() => None,
                    };
                    match acquired {
                        Some(permit) => permit,
                        None => {
                            self.release(std::iter::once(message).chain(messages));
                            return;
                        }
                    }
                }
            };
            let pipeline = Arc::clone(&self.pipeline);
            let ack = PubSubAckHandle::new(message.ack_id, self.acker.clone());
            tokio::spawn(async move {
                trace!("Handling message {}", message.message_id);
                pipeline.handle(&message.data, ack).await;
                drop(permit);
            });
        }
    }

    // Hands undispatched messages back to Pub/Sub for immediate redelivery
    fn release(&self, messages: impl Iterator<Item = ReceivedMessage>) {
        let mut released = 0usize;
        for message in messages {
            PubSubAckHandle::new(message.ack_id, self.acker.clone()).nack();
            released += 1;
        }
        debug!("Released {} undispatched messages", released);
    }

    // Sleeps unless cancelled first
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = sleep(duration) => {},
            _ = self.cancel_token.cancelled() => {},
        }
    }
}
