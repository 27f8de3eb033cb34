// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Authorization app: the on-publish and on-subscribe handler pipelines.

use codec::{PublishPacket, QoS, SubscribePacket};
use std::collections::HashMap;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{AclToListenerCmd, ListenerToAclCmd, PublishVerdict};
use crate::config::{self, AclAction};
use crate::error::Error;
use crate::types::{DomainId, ListenerId, SessionGid};

mod rules;

pub use rules::RuleTableHook;

/// Verdict of one on-publish handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishDecision {
    /// Allow and stop the pipeline.
    Ok,

    /// Drop the message silently for this publish.
    Discard,

    /// Close the publishing connection.
    ConnClose,

    /// No opinion; ask the next handler.
    Dunno,
}

/// Verdict of one on-subscribe handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeDecision {
    /// Allow the subscription, capping its granted QoS.
    Grant(QoS),

    /// Refuse the filter with return code 0x80.
    Reject,

    /// No opinion; ask the next handler.
    Dunno,
}

/// One stage of the on-publish pipeline.
pub trait OnPublishHook: Send + Sync + std::fmt::Debug {
    fn on_publish(&self, client_id: &str, packet: &PublishPacket) -> PublishDecision;
}

/// One stage of the on-subscribe pipeline.
pub trait OnSubscribeHook: Send + Sync + std::fmt::Debug {
    fn on_subscribe(&self, client_id: &str, filter: &str, requested_qos: QoS)
        -> SubscribeDecision;
}

/// Handler pipelines plus the default policy of one domain.
#[derive(Debug)]
struct DomainAcl {
    publish_hooks: Vec<Box<dyn OnPublishHook>>,
    subscribe_hooks: Vec<Box<dyn OnSubscribeHook>>,
    default_action: AclAction,
}

impl DomainAcl {
    fn new(domain: &config::Domain) -> Self {
        let mut publish_hooks: Vec<Box<dyn OnPublishHook>> = Vec::new();
        let mut subscribe_hooks: Vec<Box<dyn OnSubscribeHook>> = Vec::new();
        if !domain.acl().is_empty() {
            let hook = RuleTableHook::new(domain.acl());
            publish_hooks.push(Box::new(hook.clone()));
            subscribe_hooks.push(Box::new(hook));
        }
        Self {
            publish_hooks,
            subscribe_hooks,
            default_action: domain.acl_default(),
        }
    }

    /// Run the on-publish pipeline; the first non-`Dunno` verdict wins and
    /// the configured default applies when every handler abstains.
    fn check_publish(&self, client_id: &str, packet: &PublishPacket) -> PublishVerdict {
        for hook in &self.publish_hooks {
            match hook.on_publish(client_id, packet) {
                PublishDecision::Ok => return PublishVerdict::Allow,
                PublishDecision::Discard => return PublishVerdict::Discard,
                PublishDecision::ConnClose => return PublishVerdict::CloseConnection,
                PublishDecision::Dunno => {}
            }
        }
        match self.default_action {
            AclAction::Allow => PublishVerdict::Allow,
            AclAction::Discard => PublishVerdict::Discard,
            AclAction::Close => PublishVerdict::CloseConnection,
        }
    }

    /// Granted QoS cap per filter; `None` marks a refused filter.
    fn check_subscribe(&self, client_id: &str, packet: &SubscribePacket) -> Vec<Option<QoS>> {
        packet
            .topics()
            .iter()
            .map(|topic| {
                for hook in &self.subscribe_hooks {
                    match hook.on_subscribe(client_id, topic.topic(), topic.qos()) {
                        SubscribeDecision::Grant(qos) => return Some(qos),
                        SubscribeDecision::Reject => return None,
                        SubscribeDecision::Dunno => {}
                    }
                }
                match self.default_action {
                    AclAction::Allow => Some(QoS::ExactOnce),
                    AclAction::Discard | AclAction::Close => None,
                }
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct AclApp {
    domains: Vec<DomainAcl>,

    listener_senders: HashMap<ListenerId, Sender<AclToListenerCmd>>,
    listener_receiver: Receiver<ListenerToAclCmd>,
}

impl AclApp {
    #[must_use]
    pub fn new(
        domains: &[config::Domain],
        listener_senders: Vec<(ListenerId, Sender<AclToListenerCmd>)>,
        listener_receiver: Receiver<ListenerToAclCmd>,
    ) -> Self {
        Self {
            domains: domains.iter().map(DomainAcl::new).collect(),
            listener_senders: listener_senders.into_iter().collect(),
            listener_receiver,
        }
    }

    pub async fn run_loop(&mut self) {
        while let Some(cmd) = self.listener_receiver.recv().await {
            if let Err(err) = self.handle_listener_cmd(cmd).await {
                log::error!("acl: listener cmd failed: {err}");
            }
        }
    }

    async fn handle_listener_cmd(&mut self, cmd: ListenerToAclCmd) -> Result<(), Error> {
        match cmd {
            ListenerToAclCmd::Publish(gid, domain_id, client_id, packet, is_will) => {
                let verdict = self
                    .domain(domain_id)
                    .map_or(PublishVerdict::Discard, |domain| {
                        domain.check_publish(&client_id, &packet)
                    });
                self.reply(
                    gid,
                    AclToListenerCmd::PublishResult(gid, domain_id, packet, verdict, is_will),
                )
                .await
            }
            ListenerToAclCmd::Subscribe(gid, domain_id, client_id, packet) => {
                let grants = self.domain(domain_id).map_or_else(
                    || vec![None; packet.topics().len()],
                    |domain| domain.check_subscribe(&client_id, &packet),
                );
                self.reply(gid, AclToListenerCmd::SubscribeResult(gid, packet, grants))
                    .await
            }
        }
    }

    fn domain(&self, domain_id: DomainId) -> Option<&DomainAcl> {
        self.domains.get(domain_id as usize)
    }

    async fn reply(&self, gid: SessionGid, cmd: AclToListenerCmd) -> Result<(), Error> {
        if let Some(sender) = self.listener_senders.get(&gid.listener_id()) {
            sender.send(cmd).await.map_err(Into::into)
        } else {
            Err(Error::session_error(gid.session_id()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain_config(content: &str) -> config::Domain {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn test_publish_denied_by_rule() {
        let domain = domain_config(
            r#"
name = "d"
acl_default = "allow"

[[acl]]
filter = "admin/#"
publish = false
"#,
        );
        let acl = DomainAcl::new(&domain);

        let denied = PublishPacket::new("admin/secret", QoS::AtMostOnce, b"x").unwrap();
        assert_eq!(acl.check_publish("c1", &denied), PublishVerdict::Discard);

        let allowed = PublishPacket::new("public/info", QoS::AtMostOnce, b"x").unwrap();
        assert_eq!(acl.check_publish("c1", &allowed), PublishVerdict::Allow);
    }

    #[test]
    fn test_publish_close_on_deny() {
        let domain = domain_config(
            r#"
name = "d"

[[acl]]
filter = "admin/#"
publish = false
on_deny = "close"
"#,
        );
        let acl = DomainAcl::new(&domain);
        let packet = PublishPacket::new("admin/secret", QoS::AtMostOnce, b"x").unwrap();
        assert_eq!(
            acl.check_publish("c1", &packet),
            PublishVerdict::CloseConnection
        );
    }

    #[test]
    fn test_default_policy_applies_when_no_rule_matches() {
        let domain = domain_config(
            r#"
name = "d"
acl_default = "discard"

[[acl]]
filter = "known/#"
"#,
        );
        let acl = DomainAcl::new(&domain);
        let packet = PublishPacket::new("other/topic", QoS::AtMostOnce, b"x").unwrap();
        assert_eq!(acl.check_publish("c1", &packet), PublishVerdict::Discard);
    }

    #[test]
    fn test_subscribe_qos_cap_and_reject() {
        let domain = domain_config(
            r#"
name = "d"

[[acl]]
filter = "telemetry/#"
max_qos = "at_least_once"

[[acl]]
filter = "admin/#"
subscribe = false
"#,
        );
        let acl = DomainAcl::new(&domain);

        let packet = codec::SubscribePacket::with_topics(
            codec::PacketId::new(1),
            vec![
                codec::SubscribeTopic::new("telemetry/+", QoS::ExactOnce).unwrap(),
                codec::SubscribeTopic::new("admin/#", QoS::AtMostOnce).unwrap(),
                codec::SubscribeTopic::new("other", QoS::ExactOnce).unwrap(),
            ],
        );
        let grants = acl.check_subscribe("c1", &packet);
        assert_eq!(
            grants,
            vec![Some(QoS::AtLeastOnce), None, Some(QoS::ExactOnce)]
        );
    }
}
