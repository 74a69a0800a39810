// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;

use crate::constants::{
    DEFAULT_EXPORT_ADDRESS, DEFAULT_MAX_MESSAGES, DEFAULT_MAX_OUTSTANDING,
    DEFAULT_SUBSCRIPTION_ID, MAX_PULL_MESSAGES, METADATA_HOST, PUBSUB_ENDPOINT,
};
use crate::errors::ConfigError;
use crate::pipeline::AckPolicy;
use crate::util::{parse_host_port, parse_resource_id};

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` means the metadata server is asked at startup
    pub project_id: Option<String>,
    pub topic_id: String,
    pub subscription_id: String,
    /// UDP collector, `host:port`
    pub export_address: String,
    pub ack_policy: AckPolicy,
    /// Pull batch size
    pub max_messages: u32,
    pub max_outstanding: u32,
    pub access_token: Option<String>,
    pub pubsub_emulator_host: Option<String>,
    pub metadata_host: String,
}

impl Config {
    pub fn new() -> Result<Config, ConfigError> {
        let project_id = match non_empty_var("FLOW_LOGS_PROJECT_ID") {
            Some(id) => Some(resource_id("FLOW_LOGS_PROJECT_ID", &id)?),
            None => None,
        };

        let topic_id = non_empty_var("FLOW_LOGS_TOPIC_ID")
            .ok_or(ConfigError::Missing("FLOW_LOGS_TOPIC_ID"))?;
        let topic_id = resource_id("FLOW_LOGS_TOPIC_ID", &topic_id)?;

        let subscription_id = resource_id(
            "FLOW_LOGS_SUBSCRIPTION_ID",
            &non_empty_var("FLOW_LOGS_SUBSCRIPTION_ID")
                .unwrap_or_else(|| DEFAULT_SUBSCRIPTION_ID.to_string()),
        )?;

        let export_address = parse_host_port(
            &non_empty_var("FLOW_LOGS_EXPORT_ADDRESS")
                .unwrap_or_else(|| DEFAULT_EXPORT_ADDRESS.to_string()),
        )
        .map_err(|reason| ConfigError::Invalid {
            name: "FLOW_LOGS_EXPORT_ADDRESS",
            reason,
        })?;

        let ack_policy = match non_empty_var("FLOW_LOGS_ACK_POLICY") {
            Some(policy) => {
                AckPolicy::from_str(&policy).map_err(|reason| ConfigError::Invalid {
                    name: "FLOW_LOGS_ACK_POLICY",
                    reason,
                })?
            }
            None => AckPolicy::default(),
        };

        let max_messages = number_var("FLOW_LOGS_MAX_MESSAGES", DEFAULT_MAX_MESSAGES)?;
        if !(1..=MAX_PULL_MESSAGES).contains(&max_messages) {
            return Err(ConfigError::Invalid {
                name: "FLOW_LOGS_MAX_MESSAGES",
                reason: format!("{max_messages} is not between 1 and {MAX_PULL_MESSAGES}"),
            });
        }

        let max_outstanding = number_var("FLOW_LOGS_MAX_OUTSTANDING", DEFAULT_MAX_OUTSTANDING)?;
        if max_outstanding == 0 {
            return Err(ConfigError::Invalid {
                name: "FLOW_LOGS_MAX_OUTSTANDING",
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(Config {
            project_id,
            topic_id,
            subscription_id,
            export_address,
            ack_policy,
            max_messages,
            max_outstanding,
            access_token: non_empty_var("FLOW_LOGS_ACCESS_TOKEN"),
            pubsub_emulator_host: non_empty_var("PUBSUB_EMULATOR_HOST"),
            metadata_host: non_empty_var("GCE_METADATA_HOST")
                .unwrap_or_else(|| METADATA_HOST.to_string()),
        })
    }

    /// Pub/Sub REST root, pointing at the emulator when one is configured.
    pub fn pubsub_endpoint(&self) -> String {
        match &self.pubsub_emulator_host {
            Some(host) => format!("http://{}/v1", host.trim_end_matches('/')),
            None => PUBSUB_ENDPOINT.to_string(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resource_id(name: &'static str, value: &str) -> Result<String, ConfigError> {
    parse_resource_id(value).map_err(|reason| ConfigError::Invalid { name, reason })
}

fn number_var(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match non_empty_var(name) {
        Some(value) => value.parse::<u32>().map_err(|e| ConfigError::Invalid {
            name,
            reason: format!("'{value}': {e}"),
        }),
        None => Ok(default),
    }
}
