//! MQTT v5.0 properties
//!
//! Every property identifier defined by the protocol is recognised on decode
//! so that a broker may send any of them; only the ones the bridge acts on
//! are kept.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{Reader, WireWrite};
use crate::protocol::{DecodeError, EncodeError};

/// Property identifiers (Table 2-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyId {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0B,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1A,
    ServerReference = 0x1C,
    ReasonString = 0x1F,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2A,
}

/// Encoding of a property value on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Byte,
    TwoByte,
    FourByte,
    VarInt,
    Utf8,
    Binary,
    Pair,
}

/// A decoded property value before it is stored
enum Value<'a> {
    Int(u32),
    Text(&'a str),
    Data(&'a [u8]),
    Pair(&'a str, &'a str),
}

impl PropertyId {
    pub fn from_u8(v: u8) -> Option<Self> {
        use PropertyId::*;
        Some(match v {
            0x01 => PayloadFormatIndicator,
            0x02 => MessageExpiryInterval,
            0x03 => ContentType,
            0x08 => ResponseTopic,
            0x09 => CorrelationData,
            0x0B => SubscriptionIdentifier,
            0x11 => SessionExpiryInterval,
            0x12 => AssignedClientIdentifier,
            0x13 => ServerKeepAlive,
            0x15 => AuthenticationMethod,
            0x16 => AuthenticationData,
            0x17 => RequestProblemInformation,
            0x18 => WillDelayInterval,
            0x19 => RequestResponseInformation,
            0x1A => ResponseInformation,
            0x1C => ServerReference,
            0x1F => ReasonString,
            0x21 => ReceiveMaximum,
            0x22 => TopicAliasMaximum,
            0x23 => TopicAlias,
            0x24 => MaximumQoS,
            0x25 => RetainAvailable,
            0x26 => UserProperty,
            0x27 => MaximumPacketSize,
            0x28 => WildcardSubscriptionAvailable,
            0x29 => SubscriptionIdentifierAvailable,
            0x2A => SharedSubscriptionAvailable,
            _ => return None,
        })
    }

    fn kind(self) -> ValueKind {
        use PropertyId::*;
        match self {
            PayloadFormatIndicator
            | RequestProblemInformation
            | RequestResponseInformation
            | MaximumQoS
            | RetainAvailable
            | WildcardSubscriptionAvailable
            | SubscriptionIdentifierAvailable
            | SharedSubscriptionAvailable => ValueKind::Byte,
            ServerKeepAlive | ReceiveMaximum | TopicAliasMaximum | TopicAlias => {
                ValueKind::TwoByte
            }
            MessageExpiryInterval
            | SessionExpiryInterval
            | WillDelayInterval
            | MaximumPacketSize => ValueKind::FourByte,
            SubscriptionIdentifier => ValueKind::VarInt,
            ContentType
            | ResponseTopic
            | AssignedClientIdentifier
            | AuthenticationMethod
            | ResponseInformation
            | ServerReference
            | ReasonString => ValueKind::Utf8,
            CorrelationData | AuthenticationData => ValueKind::Binary,
            UserProperty => ValueKind::Pair,
        }
    }
}

/// Properties relevant to a bridging client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub payload_format_indicator: Option<u8>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Bytes>,
    pub subscription_identifiers: Vec<u32>,
    pub session_expiry_interval: Option<u32>,
    pub assigned_client_identifier: Option<String>,
    pub server_keep_alive: Option<u16>,
    pub reason_string: Option<String>,
    pub receive_maximum: Option<u16>,
    pub topic_alias_maximum: Option<u16>,
    pub topic_alias: Option<u16>,
    pub maximum_qos: Option<u8>,
    pub user_properties: Vec<(String, String)>,
    pub maximum_packet_size: Option<u32>,
    pub subscription_identifier_available: Option<u8>,
    pub shared_subscription_available: Option<u8>,
}

fn set_once<T>(slot: &mut Option<T>, value: T, id: PropertyId) -> Result<(), DecodeError> {
    if slot.is_some() {
        return Err(DecodeError::MalformedPacket(duplicate_message(id)));
    }
    *slot = Some(value);
    Ok(())
}

fn duplicate_message(id: PropertyId) -> &'static str {
    match id {
        PropertyId::ResponseTopic => "duplicate response topic",
        PropertyId::CorrelationData => "duplicate correlation data",
        PropertyId::PayloadFormatIndicator => "duplicate payload format indicator",
        _ => "duplicate property",
    }
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the first user property with the given key
    pub fn user_property(&self, key: &str) -> Option<&str> {
        self.user_properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Read a length-prefixed properties block
    pub fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let len = r.var_int()? as usize;
        let mut block = r.sub(len)?;

        let mut props = Properties::new();
        while !block.is_empty() {
            let raw = block.var_int()?;
            let id = u8::try_from(raw)
                .ok()
                .and_then(PropertyId::from_u8)
                .ok_or(DecodeError::InvalidPropertyId(raw as u8))?;
            let value = Self::read_value(id.kind(), &mut block)?;
            props.store(id, value)?;
        }
        Ok(props)
    }

    fn read_value<'a>(kind: ValueKind, r: &mut Reader<'a>) -> Result<Value<'a>, DecodeError> {
        Ok(match kind {
            ValueKind::Byte => Value::Int(u32::from(r.u8()?)),
            ValueKind::TwoByte => Value::Int(u32::from(r.u16()?)),
            ValueKind::FourByte => Value::Int(r.u32()?),
            ValueKind::VarInt => Value::Int(r.var_int()?),
            ValueKind::Utf8 => Value::Text(r.string()?),
            ValueKind::Binary => Value::Data(r.binary()?),
            ValueKind::Pair => Value::Pair(r.string()?, r.string()?),
        })
    }

    fn store(&mut self, id: PropertyId, value: Value<'_>) -> Result<(), DecodeError> {
        use PropertyId::*;
        match (id, value) {
            (PayloadFormatIndicator, Value::Int(v)) => {
                if v > 1 {
                    return Err(DecodeError::MalformedPacket(
                        "payload format indicator must be 0 or 1",
                    ));
                }
                set_once(&mut self.payload_format_indicator, v as u8, id)
            }
            (MessageExpiryInterval, Value::Int(v)) => {
                set_once(&mut self.message_expiry_interval, v, id)
            }
            (ContentType, Value::Text(s)) => set_once(&mut self.content_type, s.to_string(), id),
            (ResponseTopic, Value::Text(s)) => {
                set_once(&mut self.response_topic, s.to_string(), id)
            }
            (CorrelationData, Value::Data(d)) => {
                set_once(&mut self.correlation_data, Bytes::copy_from_slice(d), id)
            }
            (SubscriptionIdentifier, Value::Int(v)) => {
                if v == 0 {
                    return Err(DecodeError::MalformedPacket(
                        "subscription identifier cannot be 0",
                    ));
                }
                self.subscription_identifiers.push(v);
                Ok(())
            }
            (SessionExpiryInterval, Value::Int(v)) => {
                set_once(&mut self.session_expiry_interval, v, id)
            }
            (AssignedClientIdentifier, Value::Text(s)) => {
                set_once(&mut self.assigned_client_identifier, s.to_string(), id)
            }
            (ServerKeepAlive, Value::Int(v)) => set_once(&mut self.server_keep_alive, v as u16, id),
            (ReasonString, Value::Text(s)) => set_once(&mut self.reason_string, s.to_string(), id),
            (ReceiveMaximum, Value::Int(v)) => {
                if v == 0 {
                    return Err(DecodeError::MalformedPacket("receive maximum cannot be 0"));
                }
                set_once(&mut self.receive_maximum, v as u16, id)
            }
            (TopicAliasMaximum, Value::Int(v)) => {
                set_once(&mut self.topic_alias_maximum, v as u16, id)
            }
            (TopicAlias, Value::Int(v)) => set_once(&mut self.topic_alias, v as u16, id),
            (MaximumQoS, Value::Int(v)) => set_once(&mut self.maximum_qos, v as u8, id),
            (UserProperty, Value::Pair(k, v)) => {
                self.user_properties.push((k.to_string(), v.to_string()));
                Ok(())
            }
            (MaximumPacketSize, Value::Int(v)) => {
                set_once(&mut self.maximum_packet_size, v, id)
            }
            (SubscriptionIdentifierAvailable, Value::Int(v)) => {
                set_once(&mut self.subscription_identifier_available, v as u8, id)
            }
            (SharedSubscriptionAvailable, Value::Int(v)) => {
                set_once(&mut self.shared_subscription_available, v as u8, id)
            }
            // Recognised but irrelevant to the bridge
            _ => Ok(()),
        }
    }

    /// Write the properties block, including its length prefix
    pub fn write(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let mut block = BytesMut::new();
        let b = &mut block;

        if let Some(v) = self.payload_format_indicator {
            b.put_u8(PropertyId::PayloadFormatIndicator as u8);
            b.put_u8(v);
        }
        if let Some(v) = self.message_expiry_interval {
            b.put_u8(PropertyId::MessageExpiryInterval as u8);
            b.put_u32(v);
        }
        for (id, text) in [
            (PropertyId::ContentType, &self.content_type),
            (PropertyId::ResponseTopic, &self.response_topic),
        ] {
            if let Some(text) = text {
                b.put_u8(id as u8);
                b.put_string(text)?;
            }
        }
        if let Some(data) = &self.correlation_data {
            b.put_u8(PropertyId::CorrelationData as u8);
            b.put_binary(data)?;
        }
        for id in &self.subscription_identifiers {
            b.put_u8(PropertyId::SubscriptionIdentifier as u8);
            b.put_var_int(*id)?;
        }
        if let Some(v) = self.session_expiry_interval {
            b.put_u8(PropertyId::SessionExpiryInterval as u8);
            b.put_u32(v);
        }
        if let Some(text) = &self.assigned_client_identifier {
            b.put_u8(PropertyId::AssignedClientIdentifier as u8);
            b.put_string(text)?;
        }
        if let Some(v) = self.server_keep_alive {
            b.put_u8(PropertyId::ServerKeepAlive as u8);
            b.put_u16(v);
        }
        if let Some(text) = &self.reason_string {
            b.put_u8(PropertyId::ReasonString as u8);
            b.put_string(text)?;
        }
        for (id, value) in [
            (PropertyId::ReceiveMaximum, self.receive_maximum),
            (PropertyId::TopicAliasMaximum, self.topic_alias_maximum),
            (PropertyId::TopicAlias, self.topic_alias),
        ] {
            if let Some(v) = value {
                b.put_u8(id as u8);
                b.put_u16(v);
            }
        }
        if let Some(v) = self.maximum_qos {
            b.put_u8(PropertyId::MaximumQoS as u8);
            b.put_u8(v);
        }
        for (key, value) in &self.user_properties {
            b.put_u8(PropertyId::UserProperty as u8);
            b.put_string(key)?;
            b.put_string(value)?;
        }
        if let Some(v) = self.maximum_packet_size {
            b.put_u8(PropertyId::MaximumPacketSize as u8);
            b.put_u32(v);
        }
        for (id, value) in [
            (
                PropertyId::SubscriptionIdentifierAvailable,
                self.subscription_identifier_available,
            ),
            (
                PropertyId::SharedSubscriptionAvailable,
                self.shared_subscription_available,
            ),
        ] {
            if let Some(v) = value {
                b.put_u8(id as u8);
                b.put_u8(v);
            }
        }

        let len = u32::try_from(block.len()).map_err(|_| EncodeError::PacketTooLarge)?;
        buf.put_var_int(len)?;
        buf.put_slice(&block);
        Ok(())
    }
}
