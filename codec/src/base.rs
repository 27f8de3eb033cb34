// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

use crate::{ByteArray, DecodeError, EncodeError};

/// Decode packet from byte stream.
pub trait DecodePacket: Sized {
    /// Decode a packet object from `ba`.
    ///
    /// # Errors
    ///
    /// Returns error if byte stream in `ba` is malformed or incomplete.
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError>;
}

/// Encode packet into byte stream.
pub trait EncodePacket {
    /// Encode packet into `buf` and return number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns error if packet contains invalid data.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;
}

/// Quality of service level of message delivery.
#[repr(u8)]
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum QoS {
    /// At most once delivery.
    #[default]
    #[serde(alias = "at_most_once")]
    AtMostOnce = 0,

    /// At least once delivery.
    #[serde(alias = "at_least_once")]
    AtLeastOnce = 1,

    /// Exactly once delivery.
    #[serde(alias = "exact_once")]
    ExactOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactOnce),
            _ => Err(DecodeError::InvalidQoS),
        }
    }
}

/// Packet identifier.
///
/// SUBSCRIBE, UNSUBSCRIBE, and PUBLISH (in cases where QoS > 0) Control Packets
/// MUST contain a non-zero 16-bit Packet Identifier [MQTT-2.3.1-1]. A zero value
/// is only ever used as the in-memory placeholder of a QoS 0 PUBLISH.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PacketId(u16);

impl PacketId {
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        2
    }
}

impl DecodePacket for PacketId {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let value = ba.read_u16()?;
        Ok(Self(value))
    }
}

impl EncodePacket for PacketId {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u16::<BigEndian>(self.0)?;
        Ok(Self::bytes())
    }
}

/// MQTT protocol name in CONNECT packet variable header.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol version level.
///
/// Only `3.1.1` (level 4) is accepted by this codec; other levels decode into
/// a distinguished error so the server can answer with the matching CONNACK
/// return code.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub enum ProtocolLevel {
    #[default]
    V311 = 4,
}

impl TryFrom<u8> for ProtocolLevel {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            4 => Ok(Self::V311),
            _ => Err(DecodeError::InvalidProtocolLevel),
        }
    }
}

impl EncodePacket for ProtocolLevel {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(*self as u8);
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_try_from() {
        assert_eq!(QoS::try_from(0), Ok(QoS::AtMostOnce));
        assert_eq!(QoS::try_from(2), Ok(QoS::ExactOnce));
        assert!(QoS::try_from(3).is_err());
    }

    #[test]
    fn test_packet_id_round_trip() {
        let id = PacketId::new(0x1234);
        let mut buf = Vec::new();
        assert_eq!(id.encode(&mut buf).unwrap(), 2);
        assert_eq!(&buf, &[0x12, 0x34]);

        let mut ba = ByteArray::new(&buf);
        assert_eq!(PacketId::decode(&mut ba).unwrap(), id);
    }
}
