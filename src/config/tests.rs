//! Config module tests

use std::collections::HashSet;

use pretty_assertions::assert_eq;

use super::*;
use crate::parameters::ParameterSet;

const FILE_SOURCE: &str = r#"
[parameters]
source = "file"
file = "/etc/mqbridge/parameters.toml"
"#;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("MQB_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${MQB_TEST_VAR_SIMPLE}\"").unwrap();
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("MQB_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("MQB_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${MQB_TEST_VAR_UNSET:-fallback}\"").unwrap();
    assert_eq!(result, "value = \"fallback\"");

    std::env::set_var("MQB_TEST_VAR_SET", "from_env");
    let result = substitute_env_vars("value = \"${MQB_TEST_VAR_SET:-fallback}\"").unwrap();
    assert_eq!(result, "value = \"from_env\"");
    std::env::remove_var("MQB_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("MQB_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${MQB_TEST_VAR_MISSING}\"").unwrap();
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.bridge.variant(), Variant::default());
    assert_eq!(config.parameters.source, ParameterSource::Ssm);
    assert_eq!(config.parameters.prefix, "/PROD/INTEGRATION-APP");
    assert_eq!(config.broker.connect_timeout, Duration::from_secs(10));
    assert_eq!(config.broker.keep_alive, 60);
    assert_eq!(config.broker.session_expiry, u32::MAX);
    assert!(!config.broker.allow_plaintext);
    assert_eq!(config.cloud.wait_time, Duration::from_secs(20));
    assert_eq!(config.cloud.max_messages, 1);
}

#[test]
fn test_parse_minimal_config() {
    let config = Config::parse(FILE_SOURCE).unwrap();
    assert_eq!(config.parameters.source, ParameterSource::File);
    assert_eq!(
        config.parameters.file,
        Some(PathBuf::from("/etc/mqbridge/parameters.toml"))
    );
    assert_eq!(
        config.bridge.variant(),
        Variant::new(Direction::Traditional, Pattern::OneWay, Topology::PointToPoint)
    );
}

#[test]
fn test_parse_full_config() {
    let config = Config::parse(
        r#"
[log]
level = "debug"

[bridge]
direction = "cloud-native"
pattern = "request-response"
topology = "publish-subscribe"
client_id = "OrdersProxy"
subscriber_id = "OrdersSubscriber"

[parameters]
source = "ssm"
region = "eu-west-1"
prefix = "/TEST/INTEGRATION-APP"

[broker]
connect_timeout = "5s"
keep_alive = 30
session_expiry = 3600
ca_cert = "/etc/ssl/broker-ca.pem"
allow_plaintext = true

[cloud]
wait_time = "10s"
max_messages = 5
sqs_endpoint = "http://localhost:4566"
sns_endpoint = "http://localhost:4566"
"#,
    )
    .unwrap();

    assert_eq!(config.log.level, "debug");
    assert_eq!(
        config.bridge.variant(),
        Variant::new(
            Direction::CloudNative,
            Pattern::RequestResponse,
            Topology::PublishSubscribe
        )
    );
    assert_eq!(config.bridge.client_id.as_deref(), Some("OrdersProxy"));
    assert_eq!(config.parameters.region.as_deref(), Some("eu-west-1"));
    assert_eq!(config.parameters.prefix, "/TEST/INTEGRATION-APP");
    assert_eq!(config.broker.connect_timeout, Duration::from_secs(5));
    assert_eq!(config.broker.keep_alive, 30);
    assert_eq!(config.broker.session_expiry, 3600);
    assert!(config.broker.allow_plaintext);
    assert_eq!(config.cloud.wait_time, Duration::from_secs(10));
    assert_eq!(config.cloud.max_messages, 5);
    assert_eq!(
        config.cloud.sqs_endpoint.as_deref(),
        Some("http://localhost:4566")
    );
}

#[test]
fn test_direction_aliases() {
    let config = Config::parse(&format!(
        "{}\n[bridge]\ndirection = \"cloud-to-broker\"\n",
        FILE_SOURCE
    ))
    .unwrap();
    assert_eq!(config.bridge.direction, Direction::CloudNative);

    let config = Config::parse(&format!(
        "{}\n[bridge]\ndirection = \"broker-to-cloud\"\n",
        FILE_SOURCE
    ))
    .unwrap();
    assert_eq!(config.bridge.direction, Direction::Traditional);

    let result = Config::parse(&format!(
        "{}\n[bridge]\ndirection = \"sideways\"\n",
        FILE_SOURCE
    ));
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_file_source_requires_file() {
    let result = Config::parse("[parameters]\nsource = \"file\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_ssm_source_requires_location() {
    let result = Config::parse("[parameters]\nsource = \"ssm\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let config =
        Config::parse("[parameters]\nsource = \"ssm\"\nendpoint = \"http://localhost:4566\"\n")
            .unwrap();
    assert_eq!(
        config.parameters.endpoint.as_deref(),
        Some("http://localhost:4566")
    );
}

#[test]
fn test_invalid_prefix() {
    let result = Config::parse(&format!("{}prefix = \"PROD\"\n", FILE_SOURCE));
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_cloud_options() {
    let result = Config::parse(&format!("{}\n[cloud]\nwait_time = \"30s\"\n", FILE_SOURCE));
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let result = Config::parse(&format!("{}\n[cloud]\nmax_messages = 0\n", FILE_SOURCE));
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let result = Config::parse(&format!("{}\n[cloud]\nmax_messages = 11\n", FILE_SOURCE));
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_identities() {
    let result = Config::parse(&format!(
        "{}\n[bridge]\nsubscriber_id = \"a/b\"\n",
        FILE_SOURCE
    ));
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let result = Config::parse(&format!("{}\n[bridge]\nclient_id = \"\"\n", FILE_SOURCE));
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_load_config_with_env() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("mqbridge.toml");

    std::env::set_var("MQB_TEST_PARAMETER_FILE", "/srv/parameters.toml");
    std::env::remove_var("MQB_TEST_WAIT");
    std::env::set_var("MQBRIDGE__BRIDGE__PATTERN", "request-response");

    std::fs::write(
        &config_path,
        r#"
[bridge]
direction = "cloud-native"

[parameters]
source = "file"
file = "${MQB_TEST_PARAMETER_FILE}"

[cloud]
wait_time = "${MQB_TEST_WAIT:-5s}"
"#,
    )
    .unwrap();

    let config = Config::load(&config_path).unwrap();

    std::env::remove_var("MQB_TEST_PARAMETER_FILE");
    std::env::remove_var("MQBRIDGE__BRIDGE__PATTERN");

    assert_eq!(
        config.parameters.file,
        Some(PathBuf::from("/srv/parameters.toml"))
    );
    assert_eq!(config.cloud.wait_time, Duration::from_secs(5));
    assert_eq!(config.bridge.direction, Direction::CloudNative);
    assert_eq!(config.bridge.pattern, Pattern::RequestResponse);
    assert_eq!(config.broker.connect_timeout, Duration::from_secs(10));
    assert_eq!(config.broker.session_expiry, u32::MAX);
}

// ============================================================================
// Variants
// ============================================================================

#[test]
fn test_variant_names() {
    let variant = Variant::new(
        Direction::CloudNative,
        Pattern::RequestResponse,
        Topology::PointToPoint,
    );
    assert_eq!(variant.key(), "POINT-TO-POINT-REQUEST-RESPONSE-CLOUD-NATIVE");
    assert_eq!(
        variant.client_id(),
        "PointToPointRequestResponseCloudNativeProxy"
    );
    assert_eq!(variant.to_string(), variant.key());

    let variant = Variant::new(
        Direction::Traditional,
        Pattern::OneWay,
        Topology::PublishSubscribe,
    );
    assert_eq!(variant.key(), "PUBLISH-SUBSCRIBE-ONE-WAY-TRADITIONAL");
    assert_eq!(
        variant.subscriber_id(),
        "PublishSubscribeOneWayTraditionalDurableSubscriber"
    );
}

#[test]
fn test_all_variants_distinct() {
    let all = Variant::all();
    assert_eq!(all.len(), 8);
    let keys: HashSet<String> = all.iter().map(Variant::key).collect();
    assert_eq!(keys.len(), 8);
    let ids: HashSet<String> = all.iter().map(Variant::client_id).collect();
    assert_eq!(ids.len(), 8);
}

// ============================================================================
// Settings resolution
// ============================================================================

const PREFIX: &str = "/PROD/INTEGRATION-APP";

/// Every key any variant could ask for
fn full_parameters() -> ParameterSet {
    let mut params = ParameterSet::new(PREFIX)
        .with("/BROKER/USER", "bridge")
        .with("/BROKER/PASSWORD", "s3cret")
        .with("/BROKER/ENDPOINT/MQTT", "ssl://broker.example.com:8883");
    for variant in Variant::all() {
        let key = variant.key();
        params.insert(format!("/BROKER/QUEUE/{}", key), format!("queue-{}", key));
        params.insert(format!("/BROKER/TOPIC/{}", key), format!("topic-{}", key));
        params.insert(
            format!("/BROKER/QUEUE/{}-RESPONSE", key),
            format!("response-{}", key),
        );
        params.insert(
            format!("/SQS/ENDPOINT/{}", key),
            format!("https://sqs.us-east-1.amazonaws.com/1/{}", key),
        );
        params.insert(
            format!("/SQS/ENDPOINT/{}-RESPONSE", key),
            format!("https://sqs.us-east-1.amazonaws.com/1/{}-RESPONSE", key),
        );
        params.insert(
            format!("/SNS/ENDPOINT/{}", key),
            format!("arn:aws:sns:us-east-1:1:{}", key),
        );
    }
    params
}

fn config_for(direction: Direction, pattern: Pattern, topology: Topology) -> Config {
    let mut config = Config::default();
    config.bridge.direction = direction;
    config.bridge.pattern = pattern;
    config.bridge.topology = topology;
    config
}

#[test]
fn test_resolve_point_to_point_one_way_traditional() {
    let config = config_for(
        Direction::Traditional,
        Pattern::OneWay,
        Topology::PointToPoint,
    );
    let settings =
        BridgeSettings::resolve(&config, &full_parameters(), DeploymentShape::Worker).unwrap();

    assert_eq!(settings.broker.endpoint, "ssl://broker.example.com:8883");
    assert_eq!(settings.broker.username, "bridge");
    assert_eq!(settings.broker.password, "s3cret");
    assert_eq!(settings.broker.client_id, "PointToPointOneWayTraditionalProxy");
    assert_eq!(
        settings.broker.ca_bundle,
        PathBuf::from(crate::broker::DEFAULT_CA_BUNDLE)
    );
    assert_eq!(
        settings.broker_destination,
        "queue-POINT-TO-POINT-ONE-WAY-TRADITIONAL"
    );
    assert_eq!(
        settings.cloud_queue_url.as_deref(),
        Some("https://sqs.us-east-1.amazonaws.com/1/POINT-TO-POINT-ONE-WAY-TRADITIONAL")
    );
    assert_eq!(settings.cloud_response_queue_url, None);
    assert_eq!(settings.cloud_topic_arn, None);
    assert_eq!(settings.broker_response_queue, None);
}

#[test]
fn test_resolve_publish_subscribe_request_response_traditional() {
    let config = config_for(
        Direction::Traditional,
        Pattern::RequestResponse,
        Topology::PublishSubscribe,
    );
    let settings =
        BridgeSettings::resolve(&config, &full_parameters(), DeploymentShape::Worker).unwrap();

    let key = "PUBLISH-SUBSCRIBE-REQUEST-RESPONSE-TRADITIONAL";
    assert_eq!(settings.broker_destination, format!("topic-{}", key));
    assert_eq!(
        settings.subscriber_id,
        "PublishSubscribeRequestResponseTraditionalDurableSubscriber"
    );
    assert_eq!(
        settings.cloud_topic_arn,
        Some(format!("arn:aws:sns:us-east-1:1:{}", key))
    );
    assert_eq!(settings.cloud_queue_url, None);
    assert!(settings.cloud_response_queue_url.is_some());
}

#[test]
fn test_resolve_cloud_native_request_response() {
    let config = config_for(
        Direction::CloudNative,
        Pattern::RequestResponse,
        Topology::PointToPoint,
    );
    let settings =
        BridgeSettings::resolve(&config, &full_parameters(), DeploymentShape::Worker).unwrap();

    let key = "POINT-TO-POINT-REQUEST-RESPONSE-CLOUD-NATIVE";
    assert_eq!(
        settings.broker_response_queue,
        Some(format!("response-{}", key))
    );
    assert!(settings.cloud_queue_url.is_some());
    assert!(settings.cloud_response_queue_url.is_some());
    assert_eq!(settings.cloud_topic_arn, None);
}

#[test]
fn test_resolve_requires_only_variant_keys() {
    let key = "POINT-TO-POINT-ONE-WAY-CLOUD-NATIVE";
    let params = ParameterSet::new(PREFIX)
        .with("/BROKER/USER", "bridge")
        .with("/BROKER/PASSWORD", "s3cret")
        .with("/BROKER/ENDPOINT/MQTT", "ssl://broker.example.com:8883")
        .with(format!("/BROKER/QUEUE/{}", key), "orders")
        .with(format!("/SQS/ENDPOINT/{}", key), "https://sqs.example.com/1/orders");

    let config = config_for(
        Direction::CloudNative,
        Pattern::OneWay,
        Topology::PointToPoint,
    );
    let settings = BridgeSettings::resolve(&config, &params, DeploymentShape::Worker).unwrap();
    assert_eq!(settings.broker_destination, "orders");
}

#[test]
fn test_resolve_missing_parameter_names_key() {
    let params = ParameterSet::new(PREFIX)
        .with("/BROKER/USER", "bridge")
        .with("/BROKER/ENDPOINT/MQTT", "ssl://broker.example.com:8883");
    let config = Config::default();

    match BridgeSettings::resolve(&config, &params, DeploymentShape::Worker) {
        Err(ConfigError::MissingParameter(name)) => {
            assert_eq!(name, "/PROD/INTEGRATION-APP/BROKER/PASSWORD");
        }
        other => panic!("expected missing parameter, got {:?}", other),
    }
}

#[test]
fn test_resolve_event_handler_shape() {
    let key = "PUBLISH-SUBSCRIBE-ONE-WAY-CLOUD-NATIVE";
    let params = ParameterSet::new(PREFIX)
        .with("/BROKER/USER", "bridge")
        .with("/BROKER/PASSWORD", "s3cret")
        .with("/BROKER/ENDPOINT/MQTT", "ssl://broker.example.com:8883")
        .with(format!("/BROKER/TOPIC/{}", key), "events");

    let config = config_for(
        Direction::CloudNative,
        Pattern::OneWay,
        Topology::PublishSubscribe,
    );

    // Topic events replace the polled queue
    let settings =
        BridgeSettings::resolve(&config, &params, DeploymentShape::EventHandler).unwrap();
    assert_eq!(settings.cloud_queue_url, None);

    let worker = BridgeSettings::resolve(&config, &params, DeploymentShape::Worker);
    assert!(matches!(worker, Err(ConfigError::MissingParameter(_))));

    let point_to_point = config_for(
        Direction::CloudNative,
        Pattern::OneWay,
        Topology::PointToPoint,
    );
    let result =
        BridgeSettings::resolve(&point_to_point, &full_parameters(), DeploymentShape::EventHandler);
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_resolve_applies_overrides() {
    let mut config = config_for(
        Direction::Traditional,
        Pattern::OneWay,
        Topology::PublishSubscribe,
    );
    config.bridge.client_id = Some("CustomProxy".to_string());
    config.bridge.subscriber_id = Some("CustomSubscriber".to_string());
    config.broker.connect_timeout = Duration::from_secs(3);
    config.broker.ca_cert = Some(PathBuf::from("/tmp/ca.pem"));
    config.broker.allow_plaintext = true;
    config.cloud.wait_time = Duration::from_secs(1);
    config.cloud.sns_endpoint = Some("http://localhost:4566".to_string());

    let settings =
        BridgeSettings::resolve(&config, &full_parameters(), DeploymentShape::Worker).unwrap();
    assert_eq!(settings.broker.client_id, "CustomProxy");
    assert_eq!(settings.subscriber_id, "CustomSubscriber");
    assert_eq!(settings.broker.connect_timeout, Duration::from_secs(3));
    assert_eq!(settings.broker.ca_bundle, PathBuf::from("/tmp/ca.pem"));
    assert!(settings.broker.allow_plaintext);
    assert_eq!(settings.cloud.wait_time, Duration::from_secs(1));
    assert_eq!(
        settings.cloud.sns_endpoint.as_deref(),
        Some("http://localhost:4566")
    );
}
