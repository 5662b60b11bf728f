//! Resolved per-deployment settings
//!
//! Built once at startup from the bootstrap config and the parameter set,
//! then handed to every component. Only the keys the selected variant uses
//! are required.

use std::path::PathBuf;
use std::time::Duration;

use super::{Config, ConfigError, Variant};
use crate::broker::{ConnectOptions, DEFAULT_CA_BUNDLE};
use crate::parameters::ParameterSet;

const BROKER_USER: &str = "/BROKER/USER";
const BROKER_PASSWORD: &str = "/BROKER/PASSWORD";
const BROKER_ENDPOINT: &str = "/BROKER/ENDPOINT/MQTT";

/// How the process is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentShape {
    /// Long-running worker polling or consuming its source
    #[default]
    Worker,
    /// Invoked once per topic event delivery
    EventHandler,
}

/// Cloud-side polling options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudOptions {
    pub wait_time: Duration,
    pub max_messages: u32,
    pub sqs_endpoint: Option<String>,
    pub sns_endpoint: Option<String>,
}

impl Default for CloudOptions {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_secs(20),
            max_messages: 1,
            sqs_endpoint: None,
            sns_endpoint: None,
        }
    }
}

/// Everything a bridge needs, resolved from configuration
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub variant: Variant,
    pub shape: DeploymentShape,
    pub broker: ConnectOptions,
    /// Broker queue (point-to-point) or topic (publish-subscribe)
    pub broker_destination: String,
    /// Broker queue responses are consumed from (cloud-native request-response)
    pub broker_response_queue: Option<String>,
    /// Durable subscriber identity for broker topic consumption
    pub subscriber_id: String,
    /// Cloud queue sent to or polled
    pub cloud_queue_url: Option<String>,
    /// Cloud queue carrying responses
    pub cloud_response_queue_url: Option<String>,
    /// Cloud topic published to (broker to cloud, publish-subscribe)
    pub cloud_topic_arn: Option<String>,
    pub cloud: CloudOptions,
}

fn required(params: &ParameterSet, key: &str) -> Result<String, ConfigError> {
    params
        .get(key)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingParameter(params.full_name(key)))
}

impl BridgeSettings {
    /// Resolve settings for the configured variant
    pub fn resolve(
        config: &Config,
        params: &ParameterSet,
        shape: DeploymentShape,
    ) -> Result<Self, ConfigError> {
        let variant = config.bridge.variant();
        let key = variant.key();

        if shape == DeploymentShape::EventHandler
            && !(variant.is_cloud_native() && variant.is_publish_subscribe())
        {
            return Err(ConfigError::Validation(format!(
                "{} cannot be driven by topic events",
                key
            )));
        }

        let client_id = config
            .bridge
            .client_id
            .clone()
            .unwrap_or_else(|| variant.client_id());
        let mut broker = ConnectOptions::new(
            required(params, BROKER_ENDPOINT)?,
            required(params, BROKER_USER)?,
            required(params, BROKER_PASSWORD)?,
            client_id,
        );
        broker.connect_timeout = config.broker.connect_timeout;
        broker.keep_alive = config.broker.keep_alive;
        broker.session_expiry = config.broker.session_expiry;
        broker.ca_bundle = config
            .broker
            .ca_cert
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CA_BUNDLE));
        broker.allow_plaintext = config.broker.allow_plaintext;

        let broker_destination = if variant.is_publish_subscribe() {
            required(params, &format!("/BROKER/TOPIC/{}", key))?
        } else {
            required(params, &format!("/BROKER/QUEUE/{}", key))?
        };

        let broker_response_queue = if variant.is_cloud_native() && variant.is_request_response()
        {
            Some(required(params, &format!("/BROKER/QUEUE/{}-RESPONSE", key))?)
        } else {
            None
        };

        // The cloud queue is the sink when broker to cloud over queues, and
        // the source when cloud to broker unless topic events drive the process
        let needs_cloud_queue = if variant.is_cloud_native() {
            shape == DeploymentShape::Worker
        } else {
            !variant.is_publish_subscribe()
        };
        let cloud_queue_url = if needs_cloud_queue {
            Some(required(params, &format!("/SQS/ENDPOINT/{}", key))?)
        } else {
            None
        };

        // A topic event handler only carries requests
        let cloud_response_queue_url = if variant.is_request_response()
            && shape == DeploymentShape::Worker
        {
            Some(required(params, &format!("/SQS/ENDPOINT/{}-RESPONSE", key))?)
        } else {
            None
        };

        let cloud_topic_arn = if !variant.is_cloud_native() && variant.is_publish_subscribe() {
            Some(required(params, &format!("/SNS/ENDPOINT/{}", key))?)
        } else {
            None
        };

        Ok(Self {
            variant,
            shape,
            broker,
            broker_destination,
            broker_response_queue,
            subscriber_id: config
                .bridge
                .subscriber_id
                .clone()
                .unwrap_or_else(|| variant.subscriber_id()),
            cloud_queue_url,
            cloud_response_queue_url,
            cloud_topic_arn,
            cloud: CloudOptions {
                wait_time: config.cloud.wait_time,
                max_messages: config.cloud.max_messages,
                sqs_endpoint: config.cloud.sqs_endpoint.clone(),
                sns_endpoint: config.cloud.sns_endpoint.clone(),
            },
        })
    }
}
