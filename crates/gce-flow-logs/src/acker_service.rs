// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error};

use crate::constants::MAX_ACK_IDS_PER_REQUEST;
use crate::pubsub::PubSubClient;

#[derive(Debug)]
pub enum AckerCommand {
    Ack(String),
    Nack(String),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Cheap to clone sender side of the [`AckerService`].
#[derive(Clone, Debug)]
pub struct AckerHandle {
    tx: mpsc::UnboundedSender<AckerCommand>,
}

impl AckerHandle {
    pub fn ack(&self, ack_id: String) -> Result<(), mpsc::error::SendError<AckerCommand>> {
        self.tx.send(AckerCommand::Ack(ack_id))
    }

    pub fn nack(&self, ack_id: String) -> Result<(), mpsc::error::SendError<AckerCommand>> {
        self.tx.send(AckerCommand::Nack(ack_id))
    }

    /// Waits until everything queued so far was sent to Pub/Sub.
    pub async fn flush(&self) -> Result<(), String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AckerCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {}", e))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {}", e))
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<AckerCommand>> {
        self.tx.send(AckerCommand::Shutdown)
    }
}

/// Batches acknowledgements of one subscription into as few requests as possible.
pub struct AckerService {
    client: Arc<PubSubClient>,
    subscription: String,
    flush_interval: Duration,
    rx: mpsc::UnboundedReceiver<AckerCommand>,
    pending_acks: Vec<String>,
    pending_nacks: Vec<String>,
}

impl AckerService {
    pub fn new(
        client: Arc<PubSubClient>,
        subscription: &str,
        flush_interval: Duration,
    ) -> (Self, AckerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();

        let service = Self {
            client,
            subscription: subscription.to_string(),
            flush_interval,
            rx,
            pending_acks: Vec::new(),
            pending_nacks: Vec::new(),
        };

        let handle = AckerHandle { tx };

        (service, handle)
    }

    pub async fn run(mut self) {
        debug!("Acker service started");

        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(AckerCommand::Ack(ack_id)) => {
                        self.pending_acks.push(ack_id);
                        if self.pending_acks.len() >= MAX_ACK_IDS_PER_REQUEST {
                            self.flush_acks().await;
                        }
                    }
                    Some(AckerCommand::Nack(ack_id)) => {
                        self.pending_nacks.push(ack_id);
                        if self.pending_nacks.len() >= MAX_ACK_IDS_PER_REQUEST {
                            self.flush_nacks().await;
                        }
                    }
                    Some(AckerCommand::Flush(response_tx)) => {
                        self.flush_all().await;
                        if response_tx.send(()).is_err() {
                            error!("Failed to send flush response - receiver dropped");
                        }
                    }
                    Some(AckerCommand::Shutdown) | None => {
                        debug!("Acker service shutting down");
                        self.flush_all().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.flush_all().await,
            }
        }

        debug!("Acker service stopped");
    }

    async fn flush_all(&mut self) {
        self.flush_acks().await;
        self.flush_nacks().await;
    }

    // Failed requests are not retried, Pub/Sub redelivers once the ack deadline expires.
    async fn flush_acks(&mut self) {
        let ack_ids = std::mem::take(&mut self.pending_acks);
        for batch in ack_ids.chunks(MAX_ACK_IDS_PER_REQUEST) {
            match self.client.acknowledge(&self.subscription, batch).await {
                Ok(()) => debug!("Acknowledged {} messages", batch.len()),
                Err(e) => error!("Failed to acknowledge {} messages: {}", batch.len(), e),
            }
        }
    }

    async fn flush_nacks(&mut self) {
        let ack_ids = std::mem::take(&mut self.pending_nacks);
        for batch in ack_ids.chunks(MAX_ACK_IDS_PER_REQUEST) {
            match self
                .client
                .modify_ack_deadline(&self.subscription, batch, 0)
                .await
            {
                Ok(()) => debug!("Negatively acknowledged {} messages", batch.len()),
                Err(e) => error!(
                    "Failed to negatively acknowledge {} messages: {}",
                    batch.len(),
                    e
                ),
            }
        }
    }
}
