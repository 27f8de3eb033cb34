// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType,
};

/// Sent from the Client to the Server to signal liveness in the absence of
/// other control packets and to probe the connection.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PingRequestPacket {}

impl PingRequestPacket {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }
}

impl DecodePacket for PingRequestPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::PingRequest {
            return Err(DecodeError::InvalidPacketType);
        }
        if fixed_header.remaining_length() != 0 {
            return Err(DecodeError::InvalidRemainingLength);
        }
        Ok(Self {})
    }
}

impl EncodePacket for PingRequestPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let fixed_header = FixedHeader::new(PacketType::PingRequest, 0)?;
        fixed_header.encode(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let packet = PingRequestPacket::new();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0xc0, 0x00]);

        let mut ba = ByteArray::new(&buf);
        assert_eq!(PingRequestPacket::decode(&mut ba).unwrap(), packet);
    }

    #[test]
    fn test_reject_nonzero_remaining_length() {
        let buf = [0xc0, 0x01, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PingRequestPacket::decode(&mut ba),
            Err(DecodeError::InvalidRemainingLength)
        );
    }
}
