//! MQTT v5.0 packet decoder

use bytes::Bytes;

use super::{Reader, DEFAULT_MAX_PACKET_SIZE};
use crate::protocol::{
    ConnAck, Connect, DecodeError, Disconnect, Packet, Properties, PubAck, Publish, QoS,
    ReasonCode, SubAck, Subscribe, Subscription, SubscriptionOptions, PROTOCOL_LEVEL_V5,
};

fn reason_code(byte: u8) -> Result<ReasonCode, DecodeError> {
    ReasonCode::from_u8(byte).ok_or(DecodeError::InvalidReasonCode(byte))
}

fn no_flags(flags: u8) -> Result<(), DecodeError> {
    if flags != 0 {
        return Err(DecodeError::InvalidFlags);
    }
    Ok(())
}

/// Properties block that may be omitted at the end of a packet
fn trailing_properties(r: &mut Reader<'_>) -> Result<Properties, DecodeError> {
    if r.is_empty() {
        Ok(Properties::default())
    } else {
        Properties::read(r)
    }
}

/// MQTT v5.0 packet decoder
#[derive(Debug, Clone)]
pub struct Decoder {
    max_packet_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Decode one packet from the front of the buffer
    ///
    /// Returns `Ok(None)` until a complete packet is buffered, otherwise
    /// the packet and the number of bytes it occupied.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        let Some((&header, rest)) = buf.split_first() else {
            return Ok(None);
        };

        let mut length = Reader::new(rest);
        let remaining = match length.var_int() {
            Ok(n) => n as usize,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };
        if remaining > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge);
        }

        let start = 1 + length.position();
        let total = start + remaining;
        let Some(body) = buf.get(start..total) else {
            return Ok(None);
        };

        let flags = header & 0x0F;
        let mut r = Reader::new(body);
        let packet = match header >> 4 {
            1 => Self::connect(flags, &mut r)?,
            2 => Self::connack(flags, &mut r)?,
            3 => Self::publish(flags, &mut r)?,
            4 => Self::puback(flags, &mut r)?,
            8 => Self::subscribe(flags, &mut r)?,
            9 => Self::suback(flags, &mut r)?,
            kind @ (12 | 13) => {
                if flags != 0 || !body.is_empty() {
                    return Err(DecodeError::InvalidFlags);
                }
                if kind == 12 {
                    Packet::PingReq
                } else {
                    Packet::PingResp
                }
            }
            14 => Self::disconnect(flags, &mut r)?,
            other => return Err(DecodeError::UnexpectedPacketType(other)),
        };

        Ok(Some((packet, total)))
    }

    fn connect(flags: u8, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        no_flags(flags)?;
        if r.string()? != "MQTT" {
            return Err(DecodeError::InvalidProtocolName);
        }
        let level = r.u8()?;
        if level != PROTOCOL_LEVEL_V5 {
            return Err(DecodeError::UnsupportedProtocolVersion(level));
        }

        let connect_flags = r.u8()?;
        if connect_flags & 0x01 != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        // The bridge never sends a will
        if connect_flags & 0x04 != 0 {
            return Err(DecodeError::MalformedPacket("will message not supported"));
        }

        let keep_alive = r.u16()?;
        let properties = Properties::read(r)?;
        let client_id = r.string()?.to_string();
        let username = if connect_flags & 0x80 != 0 {
            Some(r.string()?.to_string())
        } else {
            None
        };
        let password = if connect_flags & 0x40 != 0 {
            Some(Bytes::copy_from_slice(r.binary()?))
        } else {
            None
        };

        Ok(Packet::Connect(Box::new(Connect {
            client_id,
            clean_start: connect_flags & 0x02 != 0,
            keep_alive,
            username,
            password,
            properties,
        })))
    }

    fn connack(flags: u8, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        no_flags(flags)?;
        let ack_flags = r.u8()?;
        if ack_flags & 0xFE != 0 {
            return Err(DecodeError::MalformedPacket("reserved connack flags set"));
        }
        let reason_code = reason_code(r.u8()?)?;

        Ok(Packet::ConnAck(ConnAck {
            session_present: ack_flags & 0x01 != 0,
            reason_code,
            properties: trailing_properties(r)?,
        }))
    }

    fn publish(flags: u8, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        let qos = QoS::try_from((flags >> 1) & 0x03)?;
        let dup = flags & 0x08 != 0;
        if qos == QoS::AtMostOnce && dup {
            return Err(DecodeError::InvalidFlags);
        }

        let topic = r.string()?.to_string();
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            _ => match r.u16()? {
                0 => return Err(DecodeError::MalformedPacket("packet identifier cannot be 0")),
                id => Some(id),
            },
        };
        let properties = Properties::read(r)?;

        Ok(Packet::Publish(Publish {
            dup,
            qos,
            retain: flags & 0x01 != 0,
            topic,
            packet_id,
            payload: Bytes::copy_from_slice(r.rest()),
            properties,
        }))
    }

    fn puback(flags: u8, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        no_flags(flags)?;
        let packet_id = r.u16()?;
        let reason_code = if r.is_empty() {
            ReasonCode::Success
        } else {
            reason_code(r.u8()?)?
        };

        Ok(Packet::PubAck(PubAck {
            packet_id,
            reason_code,
            properties: trailing_properties(r)?,
        }))
    }

    fn subscribe(flags: u8, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        if flags != 0x02 {
            return Err(DecodeError::InvalidFlags);
        }
        let packet_id = r.u16()?;
        let properties = Properties::read(r)?;

        let mut subscriptions = Vec::new();
        while !r.is_empty() {
            let filter = r.string()?.to_string();
            let options = SubscriptionOptions::from_byte(r.u8()?)?;
            subscriptions.push(Subscription { filter, options });
        }
        if subscriptions.is_empty() {
            return Err(DecodeError::MalformedPacket("subscribe without filters"));
        }

        Ok(Packet::Subscribe(Subscribe {
            packet_id,
            subscriptions,
            properties,
        }))
    }

    fn suback(flags: u8, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        no_flags(flags)?;
        let packet_id = r.u16()?;
        let properties = Properties::read(r)?;
        let reason_codes = r
            .rest()
            .iter()
            .map(|b| reason_code(*b))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Packet::SubAck(SubAck {
            packet_id,
            reason_codes,
            properties,
        }))
    }

    fn disconnect(flags: u8, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        no_flags(flags)?;
        let reason_code = if r.is_empty() {
            ReasonCode::Success
        } else {
            reason_code(r.u8()?)?
        };

        Ok(Packet::Disconnect(Disconnect {
            reason_code,
            properties: trailing_properties(r)?,
        }))
    }
}
