// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic names, topic filters and the wildcard matcher.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use crate::utils::validate_utf8_string;
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, QoS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicError {
    EmptyTopic,
    TooManyData,
    InvalidChar,
    ContainsWildcard,
}

/// One level of a parsed topic filter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum FilterPart {
    /// Normal level, matched literally.
    Normal(String),

    /// Empty level; topics must carry an empty level at the same position.
    Empty,

    /// `+`, matches exactly one non-empty level.
    SingleWildcard,

    /// `#`, matches any number of remaining levels including none. Must be
    /// the last level of the filter.
    MultiWildcard,
}

impl FilterPart {
    fn parse(s: &str) -> Result<Self, TopicError> {
        match s {
            "" => Ok(Self::Empty),
            "+" => Ok(Self::SingleWildcard),
            "#" => Ok(Self::MultiWildcard),
            _ => {
                if s.contains(['#', '+']) {
                    Err(TopicError::ContainsWildcard)
                } else {
                    Ok(Self::Normal(s.to_string()))
                }
            }
        }
    }
}

/// A parsed topic filter, possibly containing wildcards.
#[derive(Debug, Default, Clone, Eq, PartialOrd, Ord, Hash)]
pub struct TopicFilter {
    filter: String,
    parts: Vec<FilterPart>,
}

impl PartialEq for TopicFilter {
    fn eq(&self, other: &Self) -> bool {
        self.filter.eq(&other.filter)
    }
}

impl TopicFilter {
    /// Parse a topic filter string.
    ///
    /// # Errors
    ///
    /// Returns error if `s` is empty, too long, or misplaces a wildcard.
    pub fn parse(s: &str) -> Result<Self, TopicError> {
        validate_sub_topic(s)?;
        let parts = s
            .split('/')
            .map(FilterPart::parse)
            .collect::<Result<Vec<_>, TopicError>>()?;
        Ok(Self {
            filter: s.to_string(),
            parts,
        })
    }

    /// Whether this filter contains `+` or `#` wildcards.
    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, FilterPart::SingleWildcard | FilterPart::MultiWildcard))
    }

    /// Match a concrete topic name against this filter.
    ///
    /// Topics beginning with `$` do not match filters whose first level is a
    /// wildcard, so that a `#` subscription does not receive `$SYS` traffic.
    #[must_use]
    pub fn is_match(&self, topic: &str) -> bool {
        if topic.starts_with('$')
            && matches!(
                self.parts.first(),
                Some(FilterPart::SingleWildcard | FilterPart::MultiWildcard)
            )
        {
            return false;
        }

        let mut levels = topic.split('/');
        let mut parts = self.parts.iter();
        loop {
            match (parts.next(), levels.next()) {
                (Some(FilterPart::MultiWildcard), _) => return true,
                (Some(FilterPart::SingleWildcard), Some(level)) => {
                    if level.is_empty() {
                        return false;
                    }
                }
                (Some(FilterPart::Normal(part)), Some(level)) => {
                    if part != level {
                        return false;
                    }
                }
                (Some(FilterPart::Empty), Some(level)) => {
                    if !level.is_empty() {
                        return false;
                    }
                }
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.filter.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
    }
}

/// Validate topic filter.
///
/// Rules are defined in MQTT chapter 4.7, Topic Names and Topic Filters.
///
/// # Errors
///
/// Returns error if `topic` is empty, exceeds 64KiB, or misplaces a
/// wildcard character.
pub fn validate_sub_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::EmptyTopic);
    }
    if topic.len() > usize::from(u16::MAX) {
        return Err(TopicError::TooManyData);
    }
    if topic == "#" {
        return Ok(());
    }

    let bytes = topic.as_bytes();
    for (index, b) in bytes.iter().enumerate() {
        if b == &b'#' {
            // Must occupy an entire level.
            if index > 0 && bytes[index - 1] != b'/' {
                return Err(TopicError::InvalidChar);
            }

            // Must be the last level of the filter.
            if index != bytes.len() - 1 {
                return Err(TopicError::InvalidChar);
            }
        } else if b == &b'+' {
            // Must occupy an entire level.
            if index > 0 && bytes[index - 1] != b'/' {
                return Err(TopicError::InvalidChar);
            }
            if index + 1 < bytes.len() && bytes[index + 1] != b'/' {
                return Err(TopicError::InvalidChar);
            }
        }
    }

    Ok(())
}

/// Check that a topic name contains no wildcard characters.
///
/// # Errors
///
/// Returns error if `topic` is empty, exceeds 64KiB, or contains `+`/`#`.
pub fn validate_pub_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::EmptyTopic);
    }
    if topic.len() > usize::from(u16::MAX) {
        return Err(TopicError::TooManyData);
    }

    if topic.bytes().any(|c| c == b'+' || c == b'#') {
        Err(TopicError::ContainsWildcard)
    } else {
        Ok(())
    }
}

/// Topic name of a PUBLISH packet; wildcards are not allowed.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PubTopic(String);

impl PubTopic {
    /// # Errors
    ///
    /// Returns error if `topic` is empty or contains wildcards.
    pub fn new(topic: &str) -> Result<Self, TopicError> {
        validate_pub_topic(topic)?;
        Ok(Self(topic.to_string()))
    }

    /// Byte length in packet, including the two length-prefix bytes.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for PubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let s = ba.read_string(usize::from(len))?;
        validate_pub_topic(&s)?;
        Ok(Self(s))
    }
}

impl EncodePacket for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        validate_utf8_string(&self.0)?;
        #[allow(clippy::cast_possible_truncation)]
        buf.write_u16::<BigEndian>(self.0.len() as u16)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(2 + self.0.len())
    }
}

/// Topic filter as carried by SUBSCRIBE and UNSUBSCRIBE packets.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubTopic(String);

impl SubTopic {
    /// # Errors
    ///
    /// Returns error if `topic` is not a valid filter.
    pub fn new(topic: &str) -> Result<Self, TopicError> {
        validate_sub_topic(topic)?;
        Ok(Self(topic.to_string()))
    }

    /// Byte length in packet, including the two length-prefix bytes.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl AsRef<str> for SubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for SubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let s = ba.read_string(usize::from(len))?;
        validate_sub_topic(&s)?;
        Ok(Self(s))
    }
}

impl EncodePacket for SubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        validate_utf8_string(&self.0)?;
        #[allow(clippy::cast_possible_truncation)]
        buf.write_u16::<BigEndian>(self.0.len() as u16)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(2 + self.0.len())
    }
}

/// Parsed topic filter paired with the granted QoS of its subscription.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscribePattern {
    topic: TopicFilter,

    /// Maximum QoS level the server may use when publishing to this
    /// subscriber.
    qos: QoS,
}

impl SubscribePattern {
    /// # Errors
    ///
    /// Returns error if `topic` is not a valid filter.
    pub fn parse(topic: &str, qos: QoS) -> Result<Self, TopicError> {
        let topic = TopicFilter::parse(topic)?;
        Ok(Self { topic, qos })
    }

    #[must_use]
    pub const fn new(topic: TopicFilter, qos: QoS) -> Self {
        Self { topic, qos }
    }

    #[must_use]
    pub const fn topic(&self) -> &TopicFilter {
        &self.topic
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sub_topic() {
        assert!(validate_sub_topic("sport/tennis/player/#").is_ok());
        assert!(validate_sub_topic("#").is_ok());
        assert!(validate_sub_topic("+").is_ok());
        assert!(validate_sub_topic("+/tennis/#").is_ok());
        assert!(validate_sub_topic("sport/+/player1").is_ok());

        assert!(validate_sub_topic("sport/tennis/player#").is_err());
        assert!(validate_sub_topic("sport/#/player/ranking").is_err());
        assert!(validate_sub_topic("sport+").is_err());
        assert!(validate_sub_topic("sport/+x/player1").is_err());
        assert!(validate_sub_topic("").is_err());
    }

    #[test]
    fn test_validate_pub_topic() {
        assert!(validate_pub_topic("sport/tennis/player/ranking").is_ok());
        assert!(validate_pub_topic("sport/tennis/player/#").is_err());
        assert!(validate_pub_topic("").is_err());
    }

    #[test]
    fn test_single_wildcard_match() {
        let filter = TopicFilter::parse("a/+/c").unwrap();
        assert!(filter.is_match("a/x/c"));
        assert!(filter.is_match("a/y/c"));
        assert!(!filter.is_match("a/c"));
        assert!(!filter.is_match("a/x/y/c"));
        assert!(!filter.is_match("x/a/c"));
    }

    #[test]
    fn test_multi_wildcard_match() {
        let filter = TopicFilter::parse("a/#").unwrap();
        assert!(filter.is_match("a"));
        assert!(filter.is_match("a/b"));
        assert!(filter.is_match("a/b/c"));
        assert!(!filter.is_match("b"));
    }

    #[test]
    fn test_dollar_topics() {
        let any = TopicFilter::parse("#").unwrap();
        assert!(!any.is_match("$SYS/uptime"));
        assert!(any.is_match("normal/topic"));

        let plus = TopicFilter::parse("+/monitor").unwrap();
        assert!(!plus.is_match("$SYS/monitor"));

        let sys = TopicFilter::parse("$SYS/#").unwrap();
        assert!(sys.is_match("$SYS/x"));
    }

    #[test]
    fn test_empty_level_match() {
        let filter = TopicFilter::parse("a//c").unwrap();
        assert!(filter.is_match("a//c"));
        assert!(!filter.is_match("a/b/c"));

        // `+` requires a non-empty level.
        let plus = TopicFilter::parse("a/+/c").unwrap();
        assert!(!plus.is_match("a//c"));
    }

    #[test]
    fn test_exact_match() {
        let filter = TopicFilter::parse("sport/tennis").unwrap();
        assert!(!filter.has_wildcard());
        assert!(filter.is_match("sport/tennis"));
        assert!(!filter.is_match("sport/tennis/player"));
        assert!(!filter.is_match("sport"));
    }
}
