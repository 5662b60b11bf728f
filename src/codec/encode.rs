//! MQTT v5.0 packet encoder
//!
//! Each variable header and payload is written to a scratch buffer first, so
//! the remaining length is simply the scratch length.

use bytes::{BufMut, BytesMut};

use super::{var_int_len, WireWrite};
use crate::protocol::{
    ConnAck, Connect, Disconnect, EncodeError, Packet, Properties, PubAck, Publish, QoS,
    ReasonCode, SubAck, Subscribe, PROTOCOL_LEVEL_V5,
};

/// Write the fixed header followed by `body`
fn frame(buf: &mut BytesMut, header: u8, body: &[u8]) -> Result<(), EncodeError> {
    let len = u32::try_from(body.len()).map_err(|_| EncodeError::PacketTooLarge)?;
    buf.reserve(1 + var_int_len(len) + body.len());
    buf.put_u8(header);
    buf.put_var_int(len)?;
    buf.put_slice(body);
    Ok(())
}

/// Success acknowledgments without properties use the short form
fn is_plain_success(reason_code: ReasonCode, properties: &Properties) -> bool {
    reason_code == ReasonCode::Success && *properties == Properties::default()
}

/// MQTT v5.0 packet encoder
#[derive(Debug, Default, Clone, Copy)]
pub struct Encoder;

impl Encoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode a packet to the buffer
    pub fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let mut body = BytesMut::new();
        let header = match packet {
            Packet::Connect(p) => {
                Self::connect(p, &mut body)?;
                0x10
            }
            Packet::ConnAck(p) => {
                Self::connack(p, &mut body)?;
                0x20
            }
            Packet::Publish(p) => {
                Self::publish(p, &mut body)?;
                0x30 | (u8::from(p.dup) << 3) | ((p.qos as u8) << 1) | u8::from(p.retain)
            }
            Packet::PubAck(p) => {
                Self::puback(p, &mut body)?;
                0x40
            }
            // Fixed header flags are 0b0010
            Packet::Subscribe(p) => {
                Self::subscribe(p, &mut body)?;
                0x82
            }
            Packet::SubAck(p) => {
                Self::suback(p, &mut body)?;
                0x90
            }
            Packet::PingReq => 0xC0,
            Packet::PingResp => 0xD0,
            Packet::Disconnect(p) => {
                Self::disconnect(p, &mut body)?;
                0xE0
            }
        };
        frame(buf, header, &body)
    }

    fn connect(packet: &Connect, body: &mut BytesMut) -> Result<(), EncodeError> {
        body.put_string("MQTT")?;
        body.put_u8(PROTOCOL_LEVEL_V5);

        let mut flags = 0u8;
        if packet.clean_start {
            flags |= 0x02;
        }
        if packet.password.is_some() {
            flags |= 0x40;
        }
        if packet.username.is_some() {
            flags |= 0x80;
        }
        body.put_u8(flags);
        body.put_u16(packet.keep_alive);

        packet.properties.write(body)?;
        body.put_string(&packet.client_id)?;
        if let Some(username) = &packet.username {
            body.put_string(username)?;
        }
        if let Some(password) = &packet.password {
            body.put_binary(password)?;
        }
        Ok(())
    }

    fn connack(packet: &ConnAck, body: &mut BytesMut) -> Result<(), EncodeError> {
        body.put_u8(u8::from(packet.session_present));
        body.put_u8(packet.reason_code as u8);
        packet.properties.write(body)
    }

    fn publish(packet: &Publish, body: &mut BytesMut) -> Result<(), EncodeError> {
        body.put_string(&packet.topic)?;
        if packet.qos != QoS::AtMostOnce {
            body.put_u16(packet.packet_id.unwrap_or(0));
        }
        packet.properties.write(body)?;
        body.put_slice(&packet.payload);
        Ok(())
    }

    fn puback(packet: &PubAck, body: &mut BytesMut) -> Result<(), EncodeError> {
        body.put_u16(packet.packet_id);
        if is_plain_success(packet.reason_code, &packet.properties) {
            return Ok(());
        }
        body.put_u8(packet.reason_code as u8);
        packet.properties.write(body)
    }

    fn subscribe(packet: &Subscribe, body: &mut BytesMut) -> Result<(), EncodeError> {
        body.put_u16(packet.packet_id);
        packet.properties.write(body)?;
        for sub in &packet.subscriptions {
            body.put_string(&sub.filter)?;
            body.put_u8(sub.options.to_byte());
        }
        Ok(())
    }

    fn suback(packet: &SubAck, body: &mut BytesMut) -> Result<(), EncodeError> {
        body.put_u16(packet.packet_id);
        packet.properties.write(body)?;
        body.extend(packet.reason_codes.iter().map(|code| *code as u8));
        Ok(())
    }

    fn disconnect(packet: &Disconnect, body: &mut BytesMut) -> Result<(), EncodeError> {
        if is_plain_success(packet.reason_code, &packet.properties) {
            return Ok(());
        }
        body.put_u8(packet.reason_code as u8);
        packet.properties.write(body)
    }
}
