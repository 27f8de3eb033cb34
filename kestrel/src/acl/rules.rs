// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Config driven rule table handler.

use codec::{PublishPacket, QoS, TopicFilter};

use super::{OnPublishHook, OnSubscribeHook, PublishDecision, SubscribeDecision};
use crate::config::{AclAction, AclRule};

#[derive(Debug, Clone)]
struct ParsedRule {
    filter: TopicFilter,
    publish: bool,
    subscribe: bool,
    max_qos: QoS,
    on_deny: AclAction,
}

/// Rule table from the domain config; first matching rule decides, later
/// rules and the domain default never see the topic.
#[derive(Debug, Clone, Default)]
pub struct RuleTableHook {
    rules: Vec<ParsedRule>,
}

impl RuleTableHook {
    /// Build from config rules; invalid filters were already refused by
    /// config validation and are skipped here.
    #[must_use]
    pub fn new(rules: &[AclRule]) -> Self {
        let rules = rules
            .iter()
            .filter_map(|rule| {
                let filter = TopicFilter::parse(rule.filter()).ok()?;
                Some(ParsedRule {
                    filter,
                    publish: rule.publish(),
                    subscribe: rule.subscribe(),
                    max_qos: rule.max_qos(),
                    on_deny: rule.on_deny(),
                })
            })
            .collect();
        Self { rules }
    }

    fn deny_decision(action: AclAction) -> PublishDecision {
        match action {
            // `allow` makes no sense as a deny action; treat it as the
            // silent drop.
            AclAction::Allow | AclAction::Discard => PublishDecision::Discard,
            AclAction::Close => PublishDecision::ConnClose,
        }
    }
}

impl OnPublishHook for RuleTableHook {
    fn on_publish(&self, _client_id: &str, packet: &PublishPacket) -> PublishDecision {
        for rule in &self.rules {
            if rule.filter.is_match(packet.topic()) {
                if rule.publish && packet.qos() <= rule.max_qos {
                    return PublishDecision::Ok;
                }
                return Self::deny_decision(rule.on_deny);
            }
        }
        PublishDecision::Dunno
    }
}

impl OnSubscribeHook for RuleTableHook {
    fn on_subscribe(
        &self,
        _client_id: &str,
        filter: &str,
        requested_qos: QoS,
    ) -> SubscribeDecision {
        for rule in &self.rules {
            // The subscription filter is evaluated as a literal topic
            // string against the rule pattern.
            if rule.filter.is_match(filter) || rule.filter.filter() == filter {
                if rule.subscribe {
                    return SubscribeDecision::Grant(requested_qos.min(rule.max_qos));
                }
                return SubscribeDecision::Reject;
            }
        }
        SubscribeDecision::Dunno
    }
}
