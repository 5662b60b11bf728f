//! Bridge driver
//!
//! Wires relays for the configured variant and runs them. Startup is
//! strictly ordered: load parameters, resolve settings, connect the broker,
//! create consumers and producers, then relay. Any failure along the way is
//! returned to the caller; nothing is retried.
//!
//! # Example Configuration
//!
//! ```toml
//! [bridge]
//! direction = "cloud-native"
//! pattern = "request-response"
//! topology = "point-to-point"
//!
//! [parameters]
//! source = "ssm"
//! region = "us-east-1"
//! prefix = "/PROD/INTEGRATION-APP"
//! ```

mod handler;


pub use handler::{EventRecord, Notification, NotificationAttribute, TopicEvent, TopicEventHandler};

use std::sync::Arc;

use tracing::{debug, info};

use crate::broker::{BrokerError, MqttSession, SharedSession};
use crate::cloud::{CloudQueue, CloudTopic, SnsTopic, SqsQueue};
use crate::config::{
    BridgeSettings, CloudOptions, Config, ConfigError, DeploymentShape, ParameterSource,
};
use crate::error::BridgeError;
use crate::message::Destination;
use crate::parameters::{self, FileParameterStore, ParameterStore, SsmParameterStore};
use crate::relay::{
    BrokerReplySink, BrokerSink, BrokerSource, QueueSink, QueueSource, Relay,
    RequestResponseRelay, TopicSink,
};
use crate::signing::{requires_signing, Credentials};

/// Credentials to sign calls to `endpoint` with
///
/// Public service endpoints refuse unsigned calls, so they need credentials;
/// emulators and signing proxies are called unsigned when none are set.
fn signing_credentials(
    endpoint: &str,
    credentials: Option<&Credentials>,
) -> Result<Option<Credentials>, ConfigError> {
    match credentials {
        Some(credentials) => Ok(Some(credentials.clone())),
        None if requires_signing(endpoint) => Err(ConfigError::Validation(format!(
            "{} requires credentials: set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
            endpoint
        ))),
        None => Ok(None),
    }
}

/// Parameter store selected by the bootstrap config
pub fn parameter_store(config: &Config) -> Result<Box<dyn ParameterStore>, ConfigError> {
    parameter_store_with(config, Credentials::from_env().as_ref())
}

fn parameter_store_with(
    config: &Config,
    credentials: Option<&Credentials>,
) -> Result<Box<dyn ParameterStore>, ConfigError> {
    let parameters = &config.parameters;
    match parameters.source {
        ParameterSource::File => {
            let path = parameters.file.as_ref().ok_or_else(|| {
                ConfigError::Validation("parameters.file is not set".to_string())
            })?;
            Ok(Box::new(FileParameterStore::from_file(path)?))
        }
        ParameterSource::Ssm => {
            let mut store = match (&parameters.endpoint, &parameters.region) {
                (Some(endpoint), Some(region)) => {
                    SsmParameterStore::new(endpoint.clone()).with_region(region.clone())
                }
                (Some(endpoint), None) => SsmParameterStore::new(endpoint.clone()),
                (None, Some(region)) => SsmParameterStore::for_region(region),
                (None, None) => {
                    return Err(ConfigError::Validation(
                        "parameters.endpoint or parameters.region is required".to_string(),
                    ))
                }
            };
            if let Some(credentials) = signing_credentials(store.endpoint(), credentials)? {
                store = store.with_credentials(credentials);
            }
            Ok(Box::new(store))
        }
    }
}

/// Read the parameter store once and resolve the settings for `shape`
pub async fn load_settings(
    config: &Config,
    shape: DeploymentShape,
) -> Result<BridgeSettings, ConfigError> {
    let store = parameter_store(config)?;
    let params = parameters::load(store.as_ref(), &config.parameters.prefix).await?;
    let settings = BridgeSettings::resolve(config, &params, shape)?;
    info!(
        "Resolved settings for {} ({} parameters)",
        settings.variant,
        params.len()
    );
    Ok(settings)
}

/// Connected substrates a bridge is assembled from
#[derive(Clone)]
pub struct Substrates {
    pub session: SharedSession,
    /// Cloud queue sent to or polled
    pub queue: Option<Arc<dyn CloudQueue>>,
    /// Cloud queue carrying responses
    pub response_queue: Option<Arc<dyn CloudQueue>>,
    /// Cloud topic published to
    pub topic: Option<Arc<dyn CloudTopic>>,
}

fn sqs_queue(
    url: &str,
    options: &CloudOptions,
    credentials: Option<&Credentials>,
) -> Result<Arc<dyn CloudQueue>, BridgeError> {
    let mut queue = SqsQueue::new(url)
        .map_err(|e| BridgeError::Config(ConfigError::Validation(e.to_string())))?;
    if let Some(endpoint) = &options.sqs_endpoint {
        queue = queue.with_endpoint(endpoint.clone());
    }
    if let Some(credentials) = signing_credentials(queue.endpoint(), credentials)? {
        queue = queue.with_credentials(credentials);
    }
    Ok(Arc::new(queue))
}

fn sns_topic(
    arn: &str,
    options: &CloudOptions,
    credentials: Option<&Credentials>,
) -> Result<Arc<dyn CloudTopic>, BridgeError> {
    let mut topic = SnsTopic::new(arn)
        .map_err(|e| BridgeError::Config(ConfigError::Validation(e.to_string())))?;
    if let Some(endpoint) = &options.sns_endpoint {
        topic = topic.with_endpoint(endpoint.clone());
    }
    if let Some(credentials) = signing_credentials(topic.endpoint(), credentials)? {
        topic = topic.with_credentials(credentials);
    }
    Ok(Arc::new(topic))
}

impl Substrates {
    /// Connect the broker and build cloud clients for the configured endpoints
    pub async fn connect(settings: &BridgeSettings) -> Result<Self, BridgeError> {
        let credentials = Credentials::from_env();
        let credentials = credentials.as_ref();
        let queue = settings
            .cloud_queue_url
            .as_deref()
            .map(|url| sqs_queue(url, &settings.cloud, credentials))
            .transpose()?;
        let response_queue = settings
            .cloud_response_queue_url
            .as_deref()
            .map(|url| sqs_queue(url, &settings.cloud, credentials))
            .transpose()?;
        let topic = settings
            .cloud_topic_arn
            .as_deref()
            .map(|arn| sns_topic(arn, &settings.cloud, credentials))
            .transpose()?;

        let session = MqttSession::connect(&settings.broker)
            .await
            .map_err(BridgeError::Connect)?;
        info!(
            "Connected to broker as '{}'",
            settings.broker.client_id
        );

        Ok(Self {
            session: Arc::new(session),
            queue,
            response_queue,
            topic,
        })
    }
}

fn present<T: ?Sized>(
    substrate: &Option<Arc<T>>,
    what: &str,
) -> Result<Arc<T>, BridgeError> {
    substrate.clone().ok_or_else(|| {
        BridgeError::Config(ConfigError::Validation(format!("{} is not configured", what)))
    })
}

fn connect_error(e: BrokerError) -> BridgeError {
    BridgeError::Connect(e)
}

/// Relays of one running bridge
pub enum Bridge {
    OneWay(Relay),
    RequestResponse(RequestResponseRelay),
}

impl Bridge {
    /// Relay until a relay fails
    pub async fn run(self) -> Result<(), BridgeError> {
        match self {
            Bridge::OneWay(relay) => relay.run().await,
            Bridge::RequestResponse(pair) => pair.run().await,
        }
    }
}

/// Build the relays for the configured variant on connected substrates
///
/// The session learns that every consumer exists once the relays are built,
/// so a resumed session delivering on a subscription this bridge no longer
/// makes fails here rather than stalling later.
pub async fn assemble(
    settings: &BridgeSettings,
    substrates: &Substrates,
) -> Result<Bridge, BridgeError> {
    let bridge = build_relays(settings, substrates).await?;
    substrates
        .session
        .consumers_ready()
        .await
        .map_err(connect_error)?;
    Ok(bridge)
}

async fn build_relays(
    settings: &BridgeSettings,
    substrates: &Substrates,
) -> Result<Bridge, BridgeError> {
    let variant = settings.variant;
    if settings.shape != DeploymentShape::Worker {
        return Err(BridgeError::Config(ConfigError::Validation(format!(
            "{} is driven by topic events, not as a worker",
            variant
        ))));
    }

    let name = variant.key();
    let session = &substrates.session;
    let broker_destination = if variant.is_publish_subscribe() {
        Destination::Topic(settings.broker_destination.clone())
    } else {
        Destination::Queue(settings.broker_destination.clone())
    };

    let request = if variant.is_cloud_native() {
        let queue = present(&substrates.queue, "cloud queue")?;
        let producer = session
            .create_producer(&broker_destination)
            .await
            .map_err(connect_error)?;
        let relay = Relay::new(
            name.clone(),
            Box::new(QueueSource::new(
                queue,
                settings.cloud.max_messages,
                settings.cloud.wait_time,
            )),
            Box::new(BrokerSink::new(producer)),
        );
        match &settings.broker_response_queue {
            Some(response_queue) if variant.is_request_response() => {
                relay.with_reply_to(response_queue.clone())
            }
            _ => relay,
        }
    } else {
        let consumer = match &broker_destination {
            Destination::Topic(topic) => session
                .create_durable_consumer(topic, &settings.subscriber_id)
                .await
                .map_err(connect_error)?,
            Destination::Queue(_) => session
                .create_consumer(&broker_destination)
                .await
                .map_err(connect_error)?,
        };
        let source = Box::new(BrokerSource::new(consumer, broker_destination.to_string()));
        if variant.is_publish_subscribe() {
            let topic = present(&substrates.topic, "cloud topic")?;
            Relay::new(name.clone(), source, Box::new(TopicSink::new(topic)))
        } else {
            let queue = present(&substrates.queue, "cloud queue")?;
            Relay::new(name.clone(), source, Box::new(QueueSink::new(queue)))
        }
    };

    if !variant.is_request_response() {
        debug!("Assembled one-way bridge {}", name);
        return Ok(Bridge::OneWay(request));
    }

    let response_name = format!("{}-RESPONSE", name);
    let response_queue = present(&substrates.response_queue, "cloud response queue")?;
    let response = if variant.is_cloud_native() {
        let queue_name = settings.broker_response_queue.clone().ok_or_else(|| {
            BridgeError::Config(ConfigError::Validation(
                "broker response queue is not configured".to_string(),
            ))
        })?;
        let destination = Destination::Queue(queue_name);
        let consumer = session
            .create_consumer(&destination)
            .await
            .map_err(connect_error)?;
        Relay::new(
            response_name,
            Box::new(BrokerSource::new(consumer, destination.to_string())),
            Box::new(QueueSink::new(response_queue)),
        )
    } else {
        Relay::new(
            response_name,
            Box::new(QueueSource::new(
                response_queue,
                settings.cloud.max_messages,
                settings.cloud.wait_time,
            )),
            Box::new(BrokerReplySink::new(session.clone())),
        )
    };

    debug!("Assembled request-response bridge {}", name);
    Ok(Bridge::RequestResponse(RequestResponseRelay::new(
        request, response,
    )))
}

/// Connect, assemble and relay until something fails
pub async fn run(settings: &BridgeSettings) -> Result<(), BridgeError> {
    let substrates = Substrates::connect(settings).await?;
    let result = match assemble(settings, &substrates).await {
        Ok(bridge) => bridge.run().await,
        Err(e) => Err(e),
    };

    if let Err(e) = substrates.session.close().await {
        debug!("Closing broker session failed: {}", e);
    }
    result
}

/// Forward one topic event document to the broker
pub async fn handle_event(settings: &BridgeSettings, event_json: &str) -> Result<usize, BridgeError> {
    let event = TopicEvent::parse(event_json)?;
    let session: SharedSession = Arc::new(
        MqttSession::connect(&settings.broker)
            .await
            .map_err(BridgeError::Connect)?,
    );

    let result = match TopicEventHandler::from_session(&session, settings).await {
        Ok(handler) => match session.consumers_ready().await {
            Ok(()) => handler.handle(event).await,
            Err(e) => Err(connect_error(e)),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = session.close().await {
        debug!("Closing broker session failed: {}", e);
    }
    result
}
