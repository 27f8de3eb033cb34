// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Control packet dispatch over the byte stream.

use crate::{
    ByteArray, ConnectAckPacket, ConnectPacket, DecodeError, DecodePacket, DisconnectPacket,
    EncodeError, EncodePacket, FixedHeader, PacketType, PingRequestPacket, PingResponsePacket,
    PublishAckPacket, PublishCompletePacket, PublishPacket, PublishReceivedPacket,
    PublishReleasePacket, SubscribeAckPacket, SubscribePacket, UnsubscribeAckPacket,
    UnsubscribePacket,
};

/// A decoded MQTT 3.1.1 control packet of any type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
}

impl Packet {
    /// Decode the first packet in `buf`, returning it together with the
    /// number of bytes it occupies.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Incomplete`] while `buf` does not yet hold a
    /// whole packet; the caller shall keep the buffered bytes and retry
    /// after the next network read. Any other error is a protocol error
    /// and fatal for the connection.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut ba = ByteArray::new(buf);
        let fixed_header = FixedHeader::decode(&mut ba)?;
        if ba.remaining_bytes() < fixed_header.remaining_length() {
            return Err(DecodeError::Incomplete);
        }
        let consumed = fixed_header.bytes() + fixed_header.remaining_length();

        // Bound the packet so trailing pipelined bytes never leak into the
        // payload of this one.
        let mut ba = ByteArray::new(&buf[..consumed]);
        let packet = match fixed_header.packet_type() {
            PacketType::Connect => Self::Connect(ConnectPacket::decode(&mut ba)?),
            PacketType::ConnectAck => Self::ConnectAck(ConnectAckPacket::decode(&mut ba)?),
            PacketType::Publish { .. } => Self::Publish(PublishPacket::decode(&mut ba)?),
            PacketType::PublishAck => Self::PublishAck(PublishAckPacket::decode(&mut ba)?),
            PacketType::PublishReceived => {
                Self::PublishReceived(PublishReceivedPacket::decode(&mut ba)?)
            }
            PacketType::PublishRelease => {
                Self::PublishRelease(PublishReleasePacket::decode(&mut ba)?)
            }
            PacketType::PublishComplete => {
                Self::PublishComplete(PublishCompletePacket::decode(&mut ba)?)
            }
            PacketType::Subscribe => Self::Subscribe(SubscribePacket::decode(&mut ba)?),
            PacketType::SubscribeAck => Self::SubscribeAck(SubscribeAckPacket::decode(&mut ba)?),
            PacketType::Unsubscribe => Self::Unsubscribe(UnsubscribePacket::decode(&mut ba)?),
            PacketType::UnsubscribeAck => {
                Self::UnsubscribeAck(UnsubscribeAckPacket::decode(&mut ba)?)
            }
            PacketType::PingRequest => Self::PingRequest(PingRequestPacket::decode(&mut ba)?),
            PacketType::PingResponse => Self::PingResponse(PingResponsePacket::decode(&mut ba)?),
            PacketType::Disconnect => Self::Disconnect(DisconnectPacket::decode(&mut ba)?),
        };

        Ok((packet, consumed))
    }

    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnectAck(_) => PacketType::ConnectAck,
            Self::Publish(p) => PacketType::Publish {
                dup: p.dup(),
                qos: p.qos(),
                retain: p.retain(),
            },
            Self::PublishAck(_) => PacketType::PublishAck,
            Self::PublishReceived(_) => PacketType::PublishReceived,
            Self::PublishRelease(_) => PacketType::PublishRelease,
            Self::PublishComplete(_) => PacketType::PublishComplete,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubscribeAck(_) => PacketType::SubscribeAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubscribeAck(_) => PacketType::UnsubscribeAck,
            Self::PingRequest(_) => PacketType::PingRequest,
            Self::PingResponse(_) => PacketType::PingResponse,
            Self::Disconnect(_) => PacketType::Disconnect,
        }
    }
}

impl EncodePacket for Packet {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        match self {
            Self::Connect(p) => p.encode(buf),
            Self::ConnectAck(p) => p.encode(buf),
            Self::Publish(p) => p.encode(buf),
            Self::PublishAck(p) => p.encode(buf),
            Self::PublishReceived(p) => p.encode(buf),
            Self::PublishRelease(p) => p.encode(buf),
            Self::PublishComplete(p) => p.encode(buf),
            Self::Subscribe(p) => p.encode(buf),
            Self::SubscribeAck(p) => p.encode(buf),
            Self::Unsubscribe(p) => p.encode(buf),
            Self::UnsubscribeAck(p) => p.encode(buf),
            Self::PingRequest(p) => p.encode(buf),
            Self::PingResponse(p) => p.encode(buf),
            Self::Disconnect(p) => p.encode(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PacketId, QoS};

    #[test]
    fn test_decode_reports_incomplete() {
        let mut packet = PublishPacket::new("a/b", QoS::AtMostOnce, b"payload").unwrap();
        let _ = packet.set_retain(false);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        // Every proper prefix of the packet is incomplete.
        for n in 0..buf.len() {
            assert_eq!(
                Packet::decode(&buf[..n]).unwrap_err(),
                DecodeError::Incomplete,
                "prefix of {n} bytes"
            );
        }

        let (decoded, consumed) = Packet::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, Packet::Publish(packet));
    }

    #[test]
    fn test_decode_pipelined_packets() {
        let mut buf = Vec::new();
        PingRequestPacket::new().encode(&mut buf).unwrap();
        let ack = PublishAckPacket::new(PacketId::new(5));
        ack.encode(&mut buf).unwrap();

        let (first, consumed) = Packet::decode(&buf).unwrap();
        assert_eq!(first, Packet::PingRequest(PingRequestPacket::new()));

        let (second, consumed2) = Packet::decode(&buf[consumed..]).unwrap();
        assert_eq!(second, Packet::PublishAck(ack));
        assert_eq!(consumed + consumed2, buf.len());
    }

    #[test]
    fn test_round_trip_all_types() {
        let mut publish = PublishPacket::new("t", QoS::AtLeastOnce, b"x").unwrap();
        publish.set_packet_id(PacketId::new(1));

        let packets = vec![
            Packet::Connect(ConnectPacket::new("c1").unwrap()),
            Packet::ConnectAck(ConnectAckPacket::default()),
            Packet::Publish(publish),
            Packet::PublishAck(PublishAckPacket::new(PacketId::new(1))),
            Packet::PublishReceived(PublishReceivedPacket::new(PacketId::new(1))),
            Packet::PublishRelease(PublishReleasePacket::new(PacketId::new(1))),
            Packet::PublishComplete(PublishCompletePacket::new(PacketId::new(1))),
            Packet::Subscribe(
                SubscribePacket::new("a/#", QoS::AtMostOnce, PacketId::new(2)).unwrap(),
            ),
            Packet::SubscribeAck(SubscribeAckPacket::new(
                PacketId::new(2),
                crate::SubscribeAck::QoS(QoS::AtMostOnce),
            )),
            Packet::Unsubscribe(UnsubscribePacket::new("a/#", PacketId::new(3)).unwrap()),
            Packet::UnsubscribeAck(UnsubscribeAckPacket::new(PacketId::new(3))),
            Packet::PingRequest(PingRequestPacket::new()),
            Packet::PingResponse(PingResponsePacket::new()),
            Packet::Disconnect(DisconnectPacket::new()),
        ];

        for packet in packets {
            let mut buf = Vec::new();
            packet.encode(&mut buf).unwrap();
            let (decoded, consumed) = Packet::decode(&buf).unwrap();
            assert_eq!(consumed, buf.len(), "{packet:?}");
            assert_eq!(decoded, packet);
        }
    }
}
