// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Administrative topics answered directly to the publisher instead of
//! being routed to subscribers.

use codec::{PublishPacket, QoS};

use super::{DomainCore, SessionCtx};

pub const GET_SERVER_NAME: &str = "myqtt/admin/get-server-name";
pub const GET_CLIENT_IDENTIFIER: &str = "myqtt/admin/get-client-identifier";
pub const GET_CONN_USER: &str = "myqtt/admin/get-conn-user";
pub const GET_QUEUED_MSGS: &str = "myqtt/admin/get-queued-msgs";
pub const GET_SUBSCRIPTIONS: &str = "myqtt/my-status/get-subscriptions";

/// Whether a topic belongs to the administrative namespaces.
#[must_use]
pub fn is_admin_topic(topic: &str) -> bool {
    topic.starts_with("myqtt/admin/") || topic.starts_with("myqtt/my-status/")
}

impl DomainCore {
    /// Build the reply of an administrative publish, or `None` for
    /// unknown administrative topics.
    pub(super) fn admin_reply(&self, ctx: &SessionCtx, topic: &str) -> Option<PublishPacket> {
        let payload: String = match topic {
            GET_SERVER_NAME => self.config.name().to_string(),
            GET_CLIENT_IDENTIFIER => ctx.client_id.clone(),
            GET_CONN_USER => ctx.username.clone().unwrap_or_default(),
            GET_QUEUED_MSGS => self.storage.queued_count(&ctx.client_id).to_string(),
            GET_SUBSCRIPTIONS => {
                let subs = self.sub_index.client_subscriptions(&ctx.client_id);
                subs.iter()
                    .map(|(filter, qos)| format!("{filter}:{}", *qos as u8))
                    .collect::<Vec<String>>()
                    .join("\n")
            }
            _ => return None,
        };

        match PublishPacket::new(topic, QoS::AtMostOnce, payload.as_bytes()) {
            Ok(packet) => Some(packet),
            Err(err) => {
                log::error!("admin: failed to build reply for {topic}: {err:?}");
                None
            }
        }
    }
}
