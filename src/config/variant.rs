//! Deployment variants
//!
//! A variant is one (direction, pattern, topology) combination. Its canonical
//! name keys the parameter store and derives the default broker identities.

use std::fmt;

use serde::Deserialize;

/// Which substrate messages flow out of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Broker to cloud
    #[default]
    #[serde(alias = "broker-to-cloud")]
    Traditional,
    /// Cloud to broker
    #[serde(alias = "cloud-to-broker")]
    CloudNative,
}

/// One-way relay or request plus response relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pattern {
    #[default]
    OneWay,
    RequestResponse,
}

/// Queues or topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    #[default]
    PointToPoint,
    PublishSubscribe,
}

impl Direction {
    fn words(self) -> &'static [&'static str] {
        match self {
            Direction::Traditional => &["Traditional"],
            Direction::CloudNative => &["Cloud", "Native"],
        }
    }
}

impl Pattern {
    fn words(self) -> &'static [&'static str] {
        match self {
            Pattern::OneWay => &["One", "Way"],
            Pattern::RequestResponse => &["Request", "Response"],
        }
    }
}

impl Topology {
    fn words(self) -> &'static [&'static str] {
        match self {
            Topology::PointToPoint => &["Point", "To", "Point"],
            Topology::PublishSubscribe => &["Publish", "Subscribe"],
        }
    }
}

/// A deployment variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Variant {
    pub direction: Direction,
    pub pattern: Pattern,
    pub topology: Topology,
}

impl Variant {
    pub fn new(direction: Direction, pattern: Pattern, topology: Topology) -> Self {
        Self {
            direction,
            pattern,
            topology,
        }
    }

    /// Every supported variant
    pub fn all() -> Vec<Variant> {
        let mut all = Vec::with_capacity(8);
        for direction in [Direction::Traditional, Direction::CloudNative] {
            for pattern in [Pattern::OneWay, Pattern::RequestResponse] {
                for topology in [Topology::PointToPoint, Topology::PublishSubscribe] {
                    all.push(Variant::new(direction, pattern, topology));
                }
            }
        }
        all
    }

    fn words(&self) -> impl Iterator<Item = &'static str> {
        self.topology
            .words()
            .iter()
            .chain(self.pattern.words())
            .chain(self.direction.words())
            .copied()
    }

    /// Canonical name, e.g. `POINT-TO-POINT-REQUEST-RESPONSE-CLOUD-NATIVE`
    pub fn key(&self) -> String {
        self.words()
            .map(str::to_ascii_uppercase)
            .collect::<Vec<_>>()
            .join("-")
    }

    fn camel(&self) -> String {
        self.words().collect()
    }

    /// Default broker client identity, e.g. `PointToPointOneWayTraditionalProxy`
    pub fn client_id(&self) -> String {
        format!("{}Proxy", self.camel())
    }

    /// Default durable subscriber identity
    pub fn subscriber_id(&self) -> String {
        format!("{}DurableSubscriber", self.camel())
    }

    pub fn is_request_response(&self) -> bool {
        self.pattern == Pattern::RequestResponse
    }

    pub fn is_publish_subscribe(&self) -> bool {
        self.topology == Topology::PublishSubscribe
    }

    pub fn is_cloud_native(&self) -> bool {
        self.direction == Direction::CloudNative
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
