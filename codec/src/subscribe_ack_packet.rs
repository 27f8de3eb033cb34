// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, QoS,
};

/// Per-filter result in a SUBACK packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeAck {
    /// Subscription accepted with the granted maximum QoS.
    QoS(QoS),

    /// Subscription refused, return code 0x80.
    Failed,
}

impl From<SubscribeAck> for u8 {
    fn from(ack: SubscribeAck) -> Self {
        match ack {
            SubscribeAck::QoS(qos) => qos as u8,
            SubscribeAck::Failed => 0x80,
        }
    }
}

impl TryFrom<u8> for SubscribeAck {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x80 => Ok(Self::Failed),
            v => Ok(Self::QoS(QoS::try_from(v)?)),
        }
    }
}

/// Sent by the Server to confirm receipt and processing of a SUBSCRIBE
/// packet; carries one return code per requested filter, in the same order
/// [MQTT-3.9.3-1].
///
/// ```txt
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Packet id             |
/// |                       |
/// +-----------------------+
/// | Ack 0                 |
/// +-----------------------+
/// | Ack 1                 |
/// +-----------------------+
/// | ...                   |
/// +-----------------------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeAckPacket {
    packet_id: PacketId,
    acks: Vec<SubscribeAck>,
}

impl SubscribeAckPacket {
    #[must_use]
    pub fn new(packet_id: PacketId, ack: SubscribeAck) -> Self {
        Self {
            packet_id,
            acks: vec![ack],
        }
    }

    #[must_use]
    pub const fn with_vec(packet_id: PacketId, acks: Vec<SubscribeAck>) -> Self {
        Self { packet_id, acks }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn acks(&self) -> &[SubscribeAck] {
        &self.acks
    }
}

impl DecodePacket for SubscribeAckPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::SubscribeAck {
            return Err(DecodeError::InvalidPacketType);
        }

        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }

        let remaining = fixed_header
            .remaining_length()
            .checked_sub(PacketId::bytes())
            .ok_or(DecodeError::InvalidRemainingLength)?;

        let mut acks = Vec::with_capacity(remaining);
        for _ in 0..remaining {
            acks.push(SubscribeAck::try_from(ba.read_byte()?)?);
        }

        if acks.is_empty() {
            return Err(DecodeError::EmptyPayload);
        }

        Ok(Self { packet_id, acks })
    }
}

impl EncodePacket for SubscribeAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let remaining_length = PacketId::bytes() + self.acks.len();
        let fixed_header = FixedHeader::new(PacketType::SubscribeAck, remaining_length)?;
        fixed_header.encode(buf)?;

        self.packet_id.encode(buf)?;
        for ack in &self.acks {
            buf.push(u8::from(*ack));
        }

        Ok(buf.len() - old_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let packet = SubscribeAckPacket::with_vec(
            PacketId::new(10),
            vec![
                SubscribeAck::QoS(QoS::AtLeastOnce),
                SubscribeAck::Failed,
                SubscribeAck::QoS(QoS::AtMostOnce),
            ],
        );
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x90, 0x05, 0x00, 0x0a, 0x01, 0x80, 0x00]);

        let mut ba = ByteArray::new(&buf);
        assert_eq!(SubscribeAckPacket::decode(&mut ba).unwrap(), packet);
    }

    #[test]
    fn test_reject_invalid_return_code() {
        let buf = [0x90, 0x03, 0x00, 0x0a, 0x03];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            SubscribeAckPacket::decode(&mut ba),
            Err(DecodeError::InvalidQoS)
        );
    }
}
