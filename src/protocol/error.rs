//! Wire error types

use std::fmt;

/// Errors that can occur while decoding a packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough data in buffer
    InsufficientData,
    /// Packet type a client never receives, or an unknown type
    UnexpectedPacketType(u8),
    /// Invalid remaining length encoding
    InvalidRemainingLength,
    /// Invalid protocol name in CONNECT
    InvalidProtocolName,
    /// Protocol level other than 5
    UnsupportedProtocolVersion(u8),
    /// Invalid QoS value
    InvalidQoS(u8),
    /// Invalid UTF-8 string
    InvalidUtf8,
    /// Unknown property identifier
    InvalidPropertyId(u8),
    /// Invalid packet flags
    InvalidFlags,
    /// Unknown reason code
    InvalidReasonCode(u8),
    /// Malformed packet
    MalformedPacket(&'static str),
    /// Packet exceeds the configured maximum
    PacketTooLarge,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data in buffer"),
            Self::UnexpectedPacketType(t) => write!(f, "unexpected packet type: {}", t),
            Self::InvalidRemainingLength => write!(f, "invalid remaining length encoding"),
            Self::InvalidProtocolName => write!(f, "invalid protocol name"),
            Self::UnsupportedProtocolVersion(v) => {
                write!(f, "unsupported protocol version: {}", v)
            }
            Self::InvalidQoS(q) => write!(f, "invalid QoS value: {}", q),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            Self::InvalidPropertyId(id) => write!(f, "invalid property identifier: {}", id),
            Self::InvalidFlags => write!(f, "invalid packet flags"),
            Self::InvalidReasonCode(r) => write!(f, "invalid reason code: {}", r),
            Self::MalformedPacket(msg) => write!(f, "malformed packet: {}", msg),
            Self::PacketTooLarge => write!(f, "packet too large"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur while encoding a packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Packet too large
    PacketTooLarge,
    /// String or binary field longer than 65535 bytes
    StringTooLong,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketTooLarge => write!(f, "packet too large"),
            Self::StringTooLong => write!(f, "string too long"),
        }
    }
}

impl std::error::Error for EncodeError {}
