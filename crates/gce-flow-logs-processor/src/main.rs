// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process::ExitCode, sync::Arc};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use gce_flow_logs::{
    acker_service::AckerService,
    config::Config,
    errors::ConfigError,
    forwarder::UdpForwarder,
    http::build_client,
    metadata::MetadataClient,
    pipeline::IngestPipeline,
    pubsub::PubSubClient,
    subscriber::{Subscriber, SubscriberConfig},
    token::TokenFactory,
};

// Pulls may be held open by Pub/Sub until messages arrive
const PUBSUB_TIMEOUT: Duration = Duration::from_secs(120);
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const ACK_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("FLOW_LOGS_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::new() {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating config on flow logs processor startup: {e}");
            return ExitCode::FAILURE;
        }
    };

    let metadata = match build_client(METADATA_TIMEOUT) {
        Ok(client) => MetadataClient::new(client, &config.metadata_host),
        Err(e) => {
            error!("Unable to build metadata client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let project_id = match resolve_project_id(&config, &metadata).await {
        Ok(project_id) => project_id,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let tokens = if config.pubsub_emulator_host.is_some() {
        info!("Using Pub/Sub emulator at {}", config.pubsub_endpoint());
        TokenFactory::new_anonymous()
    } else if let Some(token) = config.access_token.as_deref() {
        TokenFactory::new_from_static_token(token)
    } else {
        TokenFactory::new_from_metadata(metadata)
    };

    let forwarder = match UdpForwarder::connect(&config.export_address).await {
        Ok(forwarder) => forwarder,
        Err(e) => {
            error!("Unable to set up the collector socket: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Sending flow records to {}", forwarder.destination());

    let http_client = match build_client(PUBSUB_TIMEOUT) {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to build Pub/Sub client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let pubsub = Arc::new(PubSubClient::new(
        http_client,
        &config.pubsub_endpoint(),
        &project_id,
        tokens,
    ));

    if let Err(e) = pubsub
        .ensure_subscription(&config.subscription_id, &config.topic_id)
        .await
    {
        error!(
            "Unable to set up subscription {} on topic {}: {e}",
            config.subscription_id, config.topic_id
        );
        return ExitCode::FAILURE;
    }

    let (acker_service, acker) =
        AckerService::new(Arc::clone(&pubsub), &config.subscription_id, ACK_FLUSH_INTERVAL);
    let acker_task = tokio::spawn(acker_service.run());

    let pipeline = Arc::new(IngestPipeline::new(Arc::new(forwarder), config.ack_policy));
    let cancel_token = CancellationToken::new();
    let subscriber = Subscriber::new(
        &SubscriberConfig {
            subscription: config.subscription_id.clone(),
            max_messages: config.max_messages,
            max_outstanding: config.max_outstanding,
        },
        pubsub,
        Arc::clone(&pipeline),
        acker.clone(),
        cancel_token.clone(),
    );
    let subscriber_task = tokio::spawn(subscriber.spin());

    info!(
        "Consuming flow logs from projects/{}/subscriptions/{}",
        project_id, config.subscription_id
    );

    shutdown_signal().await;
    info!("Shutting down flow logs processor");

    cancel_token.cancel();
    if let Err(e) = subscriber_task.await {
        error!("Subscriber task failed: {e}");
    }
    if let Err(e) = acker.shutdown() {
        error!("Failed to stop acker service: {e}");
    }
    if let Err(e) = acker_task.await {
        error!("Acker task failed: {e}");
    }

    info!("Flow logs processor stopped: {}", pipeline.stats());
    ExitCode::SUCCESS
}

async fn resolve_project_id(
    config: &Config,
    metadata: &MetadataClient,
) -> Result<String, ConfigError> {
    if let Some(project_id) = &config.project_id {
        return Ok(project_id.clone());
    }
    debug!("FLOW_LOGS_PROJECT_ID not set, asking the metadata server");
    match metadata.project_id().await {
        Ok(project_id) if !project_id.is_empty() => Ok(project_id),
        Ok(_) => Err(ConfigError::ProjectId(
            "metadata server returned an empty project id".to_string(),
        )),
        Err(e) => Err(ConfigError::ProjectId(e.to_string())),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
                return;
            }
            Err(e) => error!("Unable to listen for SIGTERM: {e}"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {e}");
    }
}
