// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use bytes::Bytes;
use std::convert::TryFrom;
use std::io::Write;

use crate::utils::validate_utf8_string;
use crate::{
    base::PROTOCOL_NAME, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket,
    FixedHeader, PacketType, ProtocolLevel, PubTopic, QoS,
};

/// Structure of the CONNECT packet:
///
/// ```txt
/// +--------------------------+
/// | Fixed header             |
/// |                          |
/// +--------------------------+
/// | Protocol name length     |
/// |                          |
/// +--------------------------+
/// | Protocol name ...        |
/// +--------------------------+
/// | Protocol level           |
/// +--------------------------+
/// | Connect flags            |
/// +--------------------------+
/// | Keep alive               |
/// |                          |
/// +--------------------------+
/// | Client id length         |
/// |                          |
/// +--------------------------+
/// | Client id string ...     |
/// +--------------------------+
/// | Will topic length        |
/// |                          |
/// +--------------------------+
/// | Will topic string ...    |
/// +--------------------------+
/// | Will message length      |
/// |                          |
/// +--------------------------+
/// | Will message bytes ...   |
/// +--------------------------+
/// | Username length          |
/// |                          |
/// +--------------------------+
/// | Username string ...      |
/// +--------------------------+
/// | Password length          |
/// |                          |
/// +--------------------------+
/// | Password bytes ...       |
/// +--------------------------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectPacket {
    /// Connection keep-alive interval in seconds. Zero disables the
    /// mechanism.
    keep_alive: u16,

    /// If set, the server discards any previous session state of this
    /// client id and the session lasts only as long as the network
    /// connection.
    clean_session: bool,

    /// Will message is the message the server publishes on behalf of the
    /// client when the connection closes without a DISCONNECT packet.
    will: bool,

    /// QoS used when publishing the will message.
    will_qos: QoS,

    /// Whether the will message is published with the RETAIN flag.
    will_retain: bool,

    will_topic: Option<PubTopic>,
    will_message: Bytes,

    has_username: bool,
    has_password: bool,

    /// Client identifier, the key of durable session state on the server.
    client_id: String,

    username: String,
    password: Bytes,
}

impl Default for ConnectPacket {
    fn default() -> Self {
        Self {
            keep_alive: 60,
            clean_session: true,
            will: false,
            will_qos: QoS::AtMostOnce,
            will_retain: false,
            will_topic: None,
            will_message: Bytes::new(),
            has_username: false,
            has_password: false,
            client_id: String::new(),
            username: String::new(),
            password: Bytes::new(),
        }
    }
}

impl ConnectPacket {
    /// Create a connect packet with `client_id`.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` contains forbidden characters.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        validate_utf8_string(client_id)?;
        Ok(Self {
            client_id: client_id.to_string(),
            ..Self::default()
        })
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    /// Configure the will message.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` contains wildcards.
    pub fn set_will(
        &mut self,
        topic: &str,
        message: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<&mut Self, EncodeError> {
        self.will = true;
        self.will_topic = Some(PubTopic::new(topic)?);
        self.will_message = Bytes::copy_from_slice(message);
        self.will_qos = qos;
        self.will_retain = retain;
        Ok(self)
    }

    #[must_use]
    pub const fn will(&self) -> bool {
        self.will
    }

    #[must_use]
    pub const fn will_qos(&self) -> QoS {
        self.will_qos
    }

    #[must_use]
    pub const fn will_retain(&self) -> bool {
        self.will_retain
    }

    #[must_use]
    pub fn will_topic(&self) -> Option<&str> {
        self.will_topic.as_ref().map(AsRef::as_ref)
    }

    #[must_use]
    pub fn will_message(&self) -> &[u8] {
        &self.will_message
    }

    /// Update username.
    ///
    /// # Errors
    ///
    /// Returns error if `username` contains forbidden characters.
    pub fn set_username(&mut self, username: &str) -> Result<&mut Self, EncodeError> {
        validate_utf8_string(username)?;
        self.has_username = !username.is_empty();
        self.username = username.to_string();
        Ok(self)
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub const fn has_username(&self) -> bool {
        self.has_username
    }

    pub fn set_password(&mut self, password: &[u8]) -> &mut Self {
        self.has_password = !password.is_empty();
        self.password = Bytes::copy_from_slice(password);
        self
    }

    #[must_use]
    pub fn password(&self) -> &[u8] {
        &self.password
    }

    #[must_use]
    pub const fn has_password(&self) -> bool {
        self.has_password
    }

    /// Update client id.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` contains forbidden characters.
    pub fn set_client_id(&mut self, client_id: &str) -> Result<&mut Self, EncodeError> {
        validate_utf8_string(client_id)?;
        self.client_id = client_id.to_string();
        Ok(self)
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    const fn connect_flags(&self) -> u8 {
        let mut flags = 0;
        if self.clean_session {
            flags |= 0b0000_0010;
        }
        if self.will {
            flags |= 0b0000_0100;
            flags |= (self.will_qos as u8) << 3;
            if self.will_retain {
                flags |= 0b0010_0000;
            }
        }
        if self.has_password {
            flags |= 0b0100_0000;
        }
        if self.has_username {
            flags |= 0b1000_0000;
        }
        flags
    }

    fn remaining_length(&self) -> usize {
        let mut len = 2 + PROTOCOL_NAME.len() // protocol name
            + 1 // protocol level
            + 1 // connect flags
            + 2 // keep alive
            + 2 + self.client_id.len();
        if let Some(will_topic) = &self.will_topic {
            len += will_topic.bytes();
            len += 2 + self.will_message.len();
        }
        if self.has_username {
            len += 2 + self.username.len();
        }
        if self.has_password {
            len += 2 + self.password.len();
        }
        len
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        // The Server MUST respond to a CONNECT packet with an invalid
        // protocol name by closing the connection [MQTT-3.1.2-1].
        let protocol_name_len = ba.read_u16()?;
        let protocol_name = ba.read_string(usize::from(protocol_name_len))?;
        if protocol_name != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }

        ProtocolLevel::try_from(ba.read_byte()?)?;

        let connect_flags = ba.read_byte()?;
        // The Server MUST validate that the reserved flag in the CONNECT
        // packet is set to zero and disconnect the client if it is not
        // [MQTT-3.1.2-3].
        if connect_flags & 0b0000_0001 != 0 {
            return Err(DecodeError::InvalidConnectFlags);
        }
        let clean_session = connect_flags & 0b0000_0010 != 0;
        let will = connect_flags & 0b0000_0100 != 0;
        let will_qos = QoS::try_from((connect_flags & 0b0001_1000) >> 3)?;
        let will_retain = connect_flags & 0b0010_0000 != 0;
        let has_password = connect_flags & 0b0100_0000 != 0;
        let has_username = connect_flags & 0b1000_0000 != 0;

        // If the Will Flag is set to 0, Will QoS and Will Retain MUST be
        // zero [MQTT-3.1.2-11..15].
        if !will && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::InvalidConnectFlags);
        }

        // If the User Name Flag is set to 0, the Password Flag MUST be set
        // to 0 [MQTT-3.1.2-22].
        if !has_username && has_password {
            return Err(DecodeError::InvalidConnectFlags);
        }

        let keep_alive = ba.read_u16()?;

        let client_id_len = ba.read_u16()?;
        let client_id = ba.read_string(usize::from(client_id_len))?;

        let (will_topic, will_message) = if will {
            let topic = PubTopic::decode(ba)?;
            let msg_len = ba.read_u16()?;
            let msg = Bytes::copy_from_slice(ba.read_bytes(usize::from(msg_len))?);
            (Some(topic), msg)
        } else {
            (None, Bytes::new())
        };

        let username = if has_username {
            let len = ba.read_u16()?;
            ba.read_string(usize::from(len))?
        } else {
            String::new()
        };

        let password = if has_password {
            let len = ba.read_u16()?;
            Bytes::copy_from_slice(ba.read_bytes(usize::from(len))?)
        } else {
            Bytes::new()
        };

        Ok(Self {
            keep_alive,
            clean_session,
            will,
            will_qos,
            will_retain,
            will_topic,
            will_message,
            has_username,
            has_password,
            client_id,
            username,
            password,
        })
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = FixedHeader::new(PacketType::Connect, self.remaining_length())?;
        fixed_header.encode(buf)?;

        // Variable header.
        #[allow(clippy::cast_possible_truncation)]
        buf.write_u16::<BigEndian>(PROTOCOL_NAME.len() as u16)?;
        buf.write_all(PROTOCOL_NAME.as_bytes())?;
        ProtocolLevel::V311.encode(buf)?;
        buf.push(self.connect_flags());
        buf.write_u16::<BigEndian>(self.keep_alive)?;

        // Payload.
        #[allow(clippy::cast_possible_truncation)]
        buf.write_u16::<BigEndian>(self.client_id.len() as u16)?;
        buf.write_all(self.client_id.as_bytes())?;

        if let Some(will_topic) = &self.will_topic {
            will_topic.encode(buf)?;
            #[allow(clippy::cast_possible_truncation)]
            buf.write_u16::<BigEndian>(self.will_message.len() as u16)?;
            buf.write_all(&self.will_message)?;
        }

        if self.has_username {
            #[allow(clippy::cast_possible_truncation)]
            buf.write_u16::<BigEndian>(self.username.len() as u16)?;
            buf.write_all(self.username.as_bytes())?;
        }

        if self.has_password {
            #[allow(clippy::cast_possible_truncation)]
            buf.write_u16::<BigEndian>(self.password.len() as u16)?;
            buf.write_all(&self.password)?;
        }

        Ok(buf.len() - old_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_minimal() {
        let packet = ConnectPacket::new("sensor-1").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert!(decoded.clean_session());
        assert_eq!(decoded.client_id(), "sensor-1");
    }

    #[test]
    fn test_round_trip_full() {
        let mut packet = ConnectPacket::new("sensor-2").unwrap();
        packet
            .set_clean_session(false)
            .set_keep_alive(30)
            .set_will("last/will", b"bye", QoS::AtLeastOnce, true)
            .unwrap()
            .set_username("alice")
            .unwrap()
            .set_password(b"secret");

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.will_topic(), Some("last/will"));
        assert_eq!(decoded.will_message(), b"bye");
        assert_eq!(decoded.will_qos(), QoS::AtLeastOnce);
        assert!(decoded.will_retain());
        assert_eq!(decoded.username(), "alice");
        assert_eq!(decoded.password(), b"secret");
    }

    #[test]
    fn test_reject_bad_protocol_name() {
        let packet = ConnectPacket::new("c1").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        // Patch protocol name "MQTT" -> "MQTX".
        buf[7] = b'X';

        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidProtocolName)
        );
    }

    #[test]
    fn test_reject_bad_protocol_level() {
        let packet = ConnectPacket::new("c1").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        // Patch protocol level 4 -> 3.
        buf[8] = 3;

        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidProtocolLevel)
        );
    }

    #[test]
    fn test_reject_reserved_flag() {
        let packet = ConnectPacket::new("c1").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        // Set the reserved bit of connect flags.
        buf[9] |= 0b0000_0001;

        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidConnectFlags)
        );
    }

    #[test]
    fn test_empty_client_id_is_decodable() {
        let packet = ConnectPacket::new("").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert!(decoded.client_id().is_empty());
    }
}
