// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt;
use std::io;

use crate::byte_array::ByteArrayError;
use crate::topic::TopicError;
use crate::utils::StringError;
use crate::var_int::VarIntError;

/// Errors returned while decoding a byte stream into packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Byte stream does not yet contain a whole packet.
    ///
    /// Callers shall keep already buffered bytes and retry once more bytes
    /// have been read from the network.
    Incomplete,

    /// Packet type value in fixed header is unknown.
    InvalidPacketType,

    /// Reserved flag bits in fixed header carry an unexpected value.
    InvalidPacketFlags,

    /// Remaining length field does not match real packet length.
    InvalidRemainingLength,

    /// Variable length integer exceeds 4 bytes or maximum value.
    InvalidVarInt,

    /// Protocol name must be "MQTT".
    InvalidProtocolName,

    /// Protocol level is not `3.1.1`.
    InvalidProtocolLevel,

    /// Packet id must be non-zero for QoS > 0 flows.
    InvalidPacketId,

    /// QoS value is out of range.
    InvalidQoS,

    /// Client id is empty or contains invalid characters.
    InvalidClientId,

    /// String is not well-formed UTF-8 or contains forbidden code points.
    InvalidString,

    /// Topic name or topic filter violates wildcard rules.
    InvalidTopic,

    /// Connect flags violate the reserved-bit or will/credential coupling
    /// rules.
    InvalidConnectFlags,

    /// Packet carries no payload where one is required, e.g. a SUBSCRIBE
    /// without topic filters.
    EmptyPayload,

    /// Length of data exceeds its limitation.
    TooManyData,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for DecodeError {}

impl From<ByteArrayError> for DecodeError {
    fn from(e: ByteArrayError) -> Self {
        match e {
            // Reads running off the end of the buffer mean the packet has not
            // fully arrived yet.
            ByteArrayError::OutOfRange => Self::Incomplete,
            ByteArrayError::InvalidString(_) => Self::InvalidString,
        }
    }
}

impl From<StringError> for DecodeError {
    fn from(_e: StringError) -> Self {
        Self::InvalidString
    }
}

impl From<TopicError> for DecodeError {
    fn from(_e: TopicError) -> Self {
        Self::InvalidTopic
    }
}

impl From<VarIntError> for DecodeError {
    fn from(_e: VarIntError) -> Self {
        Self::InvalidVarInt
    }
}

/// Errors returned while encoding packets into a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    IoError,

    /// Packet is too large to be encoded.
    InvalidVarInt,

    /// Flags of this packet object are inconsistent, e.g. DUP set on a
    /// QoS 0 publish.
    InvalidPacketType,

    /// Packet id must be non-zero for QoS > 0 flows.
    InvalidPacketId,

    /// String contains forbidden code points or is too long.
    InvalidString,

    /// Topic name or topic filter violates wildcard rules.
    InvalidTopic,

    /// Length of data exceeds its limitation.
    TooManyData,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for EncodeError {}

impl From<io::Error> for EncodeError {
    fn from(_e: io::Error) -> Self {
        Self::IoError
    }
}

impl From<StringError> for EncodeError {
    fn from(_e: StringError) -> Self {
        Self::InvalidString
    }
}

impl From<TopicError> for EncodeError {
    fn from(_e: TopicError) -> Self {
        Self::InvalidTopic
    }
}

impl From<VarIntError> for EncodeError {
    fn from(_e: VarIntError) -> Self {
        Self::InvalidVarInt
    }
}
