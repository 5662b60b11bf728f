//! MQTT v5.0 wire types
//!
//! The broker side of the bridge is reached as an MQTT v5.0 client. Only the
//! packets a client exchanges with a broker are modelled here; v3.1.1 is not
//! supported because correlation data and response topics are v5.0 features.

mod error;
mod packet;
mod properties;
mod reason;

pub use error::{DecodeError, EncodeError};
pub use packet::*;
pub use properties::{Properties, PropertyId};
pub use reason::ReasonCode;

/// Protocol level byte sent in CONNECT
pub const PROTOCOL_LEVEL_V5: u8 = 5;

/// Quality of Service levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery
    #[default]
    AtMostOnce = 0,
    /// At least once delivery
    AtLeastOnce = 1,
    /// Exactly once delivery
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(DecodeError::InvalidQoS(other)),
        }
    }
}

/// Per-filter subscription options
///
/// The bridge always subscribes at QoS 1 with default options; the other
/// fields are carried so SUBSCRIBE packets survive a decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionOptions {
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    /// 0: send retained at subscribe, 1: only if new, 2: never
    pub retain_handling: u8,
}

impl SubscriptionOptions {
    pub fn at_least_once() -> Self {
        Self {
            qos: QoS::AtLeastOnce,
            ..Default::default()
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        let retain_handling = (byte >> 4) & 0x03;
        // Reserved bits must be zero
        if byte & 0xC0 != 0 || retain_handling > 2 {
            return Err(DecodeError::MalformedPacket("invalid subscription options"));
        }

        Ok(Self {
            qos: QoS::try_from(byte & 0x03)?,
            no_local: byte & 0x04 != 0,
            retain_as_published: byte & 0x08 != 0,
            retain_handling,
        })
    }

    pub fn to_byte(self) -> u8 {
        (self.qos as u8)
            | (u8::from(self.no_local) << 2)
            | (u8::from(self.retain_as_published) << 3)
            | ((self.retain_handling & 0x03) << 4)
    }
}
