// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Per-domain retained message store.

use codec::{PublishPacket, TopicFilter};
use std::collections::HashMap;

/// Last retained message per topic. A retained publish with an empty
/// payload clears the slot instead of storing.
#[derive(Debug, Default)]
pub struct RetainStore {
    messages: HashMap<String, PublishPacket>,
}

impl RetainStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a retained publish: replace the slot, or clear it for an
    /// empty payload.
    pub fn apply(&mut self, packet: &PublishPacket) {
        if packet.message().is_empty() {
            self.messages.remove(packet.topic());
        } else {
            self.messages
                .insert(packet.topic().to_string(), packet.clone());
        }
    }

    /// All retained messages matching a new subscription's filter.
    #[must_use]
    pub fn matches(&self, filter: &TopicFilter) -> Vec<&PublishPacket> {
        self.messages
            .values()
            .filter(|packet| filter.is_match(packet.topic()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;

    fn retained(topic: &str, payload: &[u8]) -> PublishPacket {
        let mut packet = PublishPacket::new(topic, QoS::AtMostOnce, payload).unwrap();
        packet.set_retain(true);
        packet
    }

    #[test]
    fn test_last_value_wins() {
        let mut store = RetainStore::new();
        store.apply(&retained("room/temp", b"21C"));
        store.apply(&retained("room/temp", b"22C"));

        let filter = TopicFilter::parse("room/+").unwrap();
        let matches = store.matches(&filter);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].message(), b"22C");
    }

    #[test]
    fn test_empty_payload_clears_slot() {
        let mut store = RetainStore::new();
        store.apply(&retained("room/temp", b"21C"));
        store.apply(&retained("room/temp", b""));

        let filter = TopicFilter::parse("room/+").unwrap();
        assert!(store.matches(&filter).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_match_scope() {
        let mut store = RetainStore::new();
        store.apply(&retained("room/temp", b"21C"));
        store.apply(&retained("garden/temp", b"15C"));

        let filter = TopicFilter::parse("room/#").unwrap();
        let matches = store.matches(&filter);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].topic(), "room/temp");
    }
}
