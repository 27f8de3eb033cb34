// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Per-domain subscription index.
//!
//! Filters without wildcards live in an exact topic map; filters with `+`
//! or `#` live in a parsed wildcard list. Subscriptions are keyed by client
//! id so durable subscriptions keep matching while their client is
//! offline.

use codec::{QoS, SubscribePattern, TopicFilter};
use std::collections::HashMap;

/// Subscription index of one domain.
#[derive(Debug, Default)]
pub struct SubIndex {
    /// topic -> client id -> granted QoS, for filters without wildcards.
    exact: HashMap<String, HashMap<String, QoS>>,

    /// client id -> filter -> parsed pattern, for wildcard filters.
    wildcard: HashMap<String, HashMap<String, SubscribePattern>>,

    /// client id -> filter -> granted QoS, covering both kinds; used for
    /// enumeration, replacement and cleanup.
    by_client: HashMap<String, HashMap<String, QoS>>,
}

impl SubIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a subscription. Subscribing the same filter again
    /// only updates the granted QoS [MQTT-3.8.4-3].
    pub fn subscribe(&mut self, client_id: &str, pattern: SubscribePattern) {
        let filter = pattern.topic().filter().to_string();
        self.by_client
            .entry(client_id.to_string())
            .or_default()
            .insert(filter.clone(), pattern.qos());

        if pattern.topic().has_wildcard() {
            self.wildcard
                .entry(client_id.to_string())
                .or_default()
                .insert(filter, pattern);
        } else {
            self.exact
                .entry(filter)
                .or_default()
                .insert(client_id.to_string(), pattern.qos());
        }
    }

    /// Remove one subscription; removing an absent filter is a no-op.
    pub fn unsubscribe(&mut self, client_id: &str, filter: &str) {
        if let Some(filters) = self.by_client.get_mut(client_id) {
            filters.remove(filter);
            if filters.is_empty() {
                self.by_client.remove(client_id);
            }
        }

        if let Some(subscribers) = self.exact.get_mut(filter) {
            subscribers.remove(client_id);
            if subscribers.is_empty() {
                self.exact.remove(filter);
            }
        }
        if let Some(patterns) = self.wildcard.get_mut(client_id) {
            patterns.remove(filter);
            if patterns.is_empty() {
                self.wildcard.remove(client_id);
            }
        }
    }

    /// Drop every subscription of a client, e.g. when a clean session
    /// ends.
    pub fn remove_client(&mut self, client_id: &str) {
        if let Some(filters) = self.by_client.remove(client_id) {
            for filter in filters.keys() {
                if let Some(subscribers) = self.exact.get_mut(filter) {
                    subscribers.remove(client_id);
                    if subscribers.is_empty() {
                        self.exact.remove(filter);
                    }
                }
            }
        }
        self.wildcard.remove(client_id);
    }

    /// All subscriptions of one client, sorted by filter.
    #[must_use]
    pub fn client_subscriptions(&self, client_id: &str) -> Vec<(String, QoS)> {
        let mut subs: Vec<(String, QoS)> = self
            .by_client
            .get(client_id)
            .map(|filters| {
                filters
                    .iter()
                    .map(|(filter, qos)| (filter.clone(), *qos))
                    .collect()
            })
            .unwrap_or_default();
        subs.sort();
        subs
    }

    /// Match a concrete topic, returning each subscribed client at most
    /// once with the highest granted QoS among its matching filters.
    #[must_use]
    pub fn match_topic(&self, topic: &str) -> Vec<(String, QoS)> {
        let mut matches: HashMap<&str, QoS> = HashMap::new();

        if let Some(subscribers) = self.exact.get(topic) {
            for (client_id, qos) in subscribers {
                matches
                    .entry(client_id)
                    .and_modify(|granted| *granted = (*granted).max(*qos))
                    .or_insert(*qos);
            }
        }

        for (client_id, patterns) in &self.wildcard {
            for pattern in patterns.values() {
                if pattern.topic().is_match(topic) {
                    matches
                        .entry(client_id)
                        .and_modify(|granted| *granted = (*granted).max(pattern.qos()))
                        .or_insert(pattern.qos());
                }
            }
        }

        matches
            .into_iter()
            .map(|(client_id, qos)| (client_id.to_string(), qos))
            .collect()
    }

    /// Whether this client holds any subscription.
    #[must_use]
    pub fn has_client(&self, client_id: &str) -> bool {
        self.by_client.contains_key(client_id)
    }
}

/// Parse a filter into a pattern, convenience for callers holding strings.
///
/// # Errors
///
/// Returns error if `filter` is invalid.
pub fn parse_pattern(filter: &str, qos: QoS) -> Result<SubscribePattern, codec::TopicError> {
    Ok(SubscribePattern::new(TopicFilter::parse(filter)?, qos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscribe(index: &mut SubIndex, client: &str, filter: &str, qos: QoS) {
        index.subscribe(client, parse_pattern(filter, qos).unwrap());
    }

    #[test]
    fn test_exact_and_wildcard_match() {
        let mut index = SubIndex::new();
        subscribe(&mut index, "a", "sport/tennis", QoS::AtMostOnce);
        subscribe(&mut index, "b", "sport/#", QoS::AtLeastOnce);
        subscribe(&mut index, "c", "sport/+", QoS::ExactOnce);

        let mut matches = index.match_topic("sport/tennis");
        matches.sort();
        assert_eq!(
            matches,
            vec![
                ("a".to_string(), QoS::AtMostOnce),
                ("b".to_string(), QoS::AtLeastOnce),
                ("c".to_string(), QoS::ExactOnce),
            ]
        );

        let matches = index.match_topic("sport/tennis/player1");
        assert_eq!(matches, vec![("b".to_string(), QoS::AtLeastOnce)]);
    }

    #[test]
    fn test_overlapping_filters_dedupe_to_max_qos() {
        let mut index = SubIndex::new();
        subscribe(&mut index, "a", "sport/#", QoS::AtMostOnce);
        subscribe(&mut index, "a", "sport/+", QoS::ExactOnce);

        let matches = index.match_topic("sport/tennis");
        assert_eq!(matches, vec![("a".to_string(), QoS::ExactOnce)]);
    }

    #[test]
    fn test_resubscribe_updates_qos() {
        let mut index = SubIndex::new();
        subscribe(&mut index, "a", "sport/tennis", QoS::AtMostOnce);
        subscribe(&mut index, "a", "sport/tennis", QoS::ExactOnce);

        assert_eq!(
            index.client_subscriptions("a"),
            vec![("sport/tennis".to_string(), QoS::ExactOnce)]
        );
        assert_eq!(
            index.match_topic("sport/tennis"),
            vec![("a".to_string(), QoS::ExactOnce)]
        );
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let mut index = SubIndex::new();
        subscribe(&mut index, "a", "x/#", QoS::AtMostOnce);
        index.unsubscribe("a", "x/#");
        index.unsubscribe("a", "x/#");
        assert!(index.match_topic("x/y").is_empty());
        assert!(!index.has_client("a"));
    }

    #[test]
    fn test_remove_client() {
        let mut index = SubIndex::new();
        subscribe(&mut index, "a", "x/#", QoS::AtMostOnce);
        subscribe(&mut index, "a", "exact/topic", QoS::AtMostOnce);
        subscribe(&mut index, "b", "exact/topic", QoS::AtLeastOnce);

        index.remove_client("a");
        assert!(index.match_topic("x/y").is_empty());
        assert_eq!(
            index.match_topic("exact/topic"),
            vec![("b".to_string(), QoS::AtLeastOnce)]
        );
    }

    #[test]
    fn test_dollar_topics_hidden_from_wildcards() {
        let mut index = SubIndex::new();
        subscribe(&mut index, "a", "#", QoS::AtMostOnce);
        subscribe(&mut index, "b", "$SYS/#", QoS::AtMostOnce);

        let matches = index.match_topic("$SYS/uptime");
        assert_eq!(matches, vec![("b".to_string(), QoS::AtMostOnce)]);
    }
}
