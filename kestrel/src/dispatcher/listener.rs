// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Listener cmd handlers: session lifecycle, routing and QoS flows.

use chrono::Local;
use codec::{
    ConnectAckPacket, ConnectReturnCode, PacketId, PublishPacket, QoS, SubscribeAck,
    SubscribeAckPacket, SubscribePacket, UnsubscribeAckPacket, UnsubscribePacket,
};

use super::admin;
use super::sub_index::parse_pattern;
use super::{Dispatcher, DomainCore, OutboundEngine, OutboundState, SessionCtx};
use crate::commands::{
    Admission, DispatcherToListenerCmd, ListenerToDispatcherCmd, WillMessage,
};
use crate::error::Error;
use crate::storage::StoredWill;
use crate::types::{DomainId, SessionGid};

type OutCmds = Vec<(SessionGid, DispatcherToListenerCmd)>;

impl Dispatcher {
    pub(super) async fn handle_listener_cmd(
        &mut self,
        cmd: ListenerToDispatcherCmd,
    ) -> Result<(), Error> {
        match cmd {
            ListenerToDispatcherCmd::SessionConnected(gid, admission, will) => {
                self.on_session_connected(gid, admission, will).await
            }
            ListenerToDispatcherCmd::Subscribe(gid, packet, grants) => {
                self.on_subscribe(gid, packet, &grants).await
            }
            ListenerToDispatcherCmd::Unsubscribe(gid, packet) => {
                self.on_unsubscribe(gid, &packet).await
            }
            ListenerToDispatcherCmd::Publish(gid, packet) => self.on_publish(gid, packet).await,
            ListenerToDispatcherCmd::PublishWill(domain_id, packet) => {
                self.on_publish_will(domain_id, &packet).await
            }
            ListenerToDispatcherCmd::PublishAcked(gid, packet_id) => {
                self.on_publish_acked(gid, packet_id).await
            }
            ListenerToDispatcherCmd::PublishReceived(gid, packet_id) => {
                self.on_publish_received(gid, packet_id).await
            }
            ListenerToDispatcherCmd::PublishCompleted(gid, packet_id) => {
                self.on_publish_completed(gid, packet_id).await
            }
            ListenerToDispatcherCmd::SessionDisconnected(gid) => {
                self.on_session_disconnected(gid);
                Ok(())
            }
        }
    }

    async fn on_session_connected(
        &mut self,
        gid: SessionGid,
        admission: Admission,
        will: Option<WillMessage>,
    ) -> Result<(), Error> {
        let mut out: OutCmds = Vec::new();
        let Some(core) = self.domains.get_mut(admission.domain_id as usize) else {
            log::error!("dispatcher: unknown domain {}", admission.domain_id);
            return Ok(());
        };
        let client_id = admission.client_id.clone();

        // Enforce the domain connection limit on admission.
        let conn_limit = core.config.conn_limit();
        if conn_limit > 0
            && core.live.len() >= conn_limit
            && !core.live.contains_key(&client_id)
        {
            let ack = ConnectAckPacket::new(false, ConnectReturnCode::ServerUnavailable);
            out.push((gid, DispatcherToListenerCmd::ConnectAck(gid.session_id(), ack)));
            self.post_all(out).await;
            return Ok(());
        }

        // A live connection with the same client id is disconnected before
        // the new one is admitted [MQTT-3.1.4-2].
        if let Some(old_gid) = core.live.get(&client_id).copied() {
            if core.config.drop_conn_same_client_id() {
                log::info!(
                    "dispatcher: dropping old connection of {client_id} in {}",
                    core.config.name()
                );
                self.sessions.remove(&old_gid);
                out.push((
                    old_gid,
                    DispatcherToListenerCmd::Disconnect(old_gid.session_id()),
                ));
            } else {
                let ack = ConnectAckPacket::new(false, ConnectReturnCode::IdentifierRejected);
                out.push((gid, DispatcherToListenerCmd::ConnectAck(gid.session_id(), ack)));
                self.post_all(out).await;
                return Ok(());
            }
        }

        let core = self
            .domains
            .get_mut(admission.domain_id as usize)
            .expect("domain checked above");

        let session_present = if admission.clean_session {
            // A clean session starts from nothing: any stored state of
            // this client id is removed [MQTT-3.1.2-6].
            if let Err(err) = core.storage.purge(&client_id) {
                log::error!("dispatcher: failed to purge session state: {err}");
            }
            core.sub_index.remove_client(&client_id);
            core.durable.remove(&client_id);
            core.engines.insert(client_id.clone(), OutboundEngine::new());
            false
        } else {
            let session_present = core.storage.session_exists(&client_id);
            if let Err(err) = core.storage.init(&client_id) {
                log::error!("dispatcher: failed to init session storage: {err}");
            }

            // Recover stored subscriptions into the index.
            match core.storage.subscriptions(&client_id) {
                Ok(subs) => {
                    for (filter, qos) in subs {
                        match parse_pattern(&filter, qos) {
                            Ok(pattern) => core.sub_index.subscribe(&client_id, pattern),
                            Err(err) => log::warn!(
                                "dispatcher: dropping stored subscription {filter:?}: {err:?}"
                            ),
                        }
                    }
                }
                Err(err) => log::error!("dispatcher: failed to load subscriptions: {err}"),
            }

            match &will {
                Some(will) => {
                    let stored = StoredWill {
                        topic: will.topic.clone(),
                        message: will.message.clone(),
                        qos: will.qos,
                        retain: will.retain,
                    };
                    if let Err(err) = core.storage.store_will(&client_id, &stored) {
                        log::error!("dispatcher: failed to store will: {err}");
                    }
                }
                None => core.storage.clear_will(&client_id),
            }

            core.durable.insert(client_id.clone());
            let locked = core.storage.locked_pkgids(&client_id);
            core.engines
                .insert(client_id.clone(), OutboundEngine::with_reserved(locked));
            session_present
        };

        core.live.insert(client_id.clone(), gid);
        core.offline_next_id.remove(&client_id);
        self.sessions.insert(
            gid,
            SessionCtx {
                domain_id: admission.domain_id,
                client_id: client_id.clone(),
                username: admission.username.clone(),
                clean_session: admission.clean_session,
            },
        );

        let ack = ConnectAckPacket::new(session_present, ConnectReturnCode::Accepted);
        out.push((gid, DispatcherToListenerCmd::ConnectAck(gid.session_id(), ack)));

        // Replay the offline queue in stored order after the CONNACK.
        if !admission.clean_session {
            let core = self
                .domains
                .get_mut(admission.domain_id as usize)
                .expect("domain checked above");
            Self::resume_queued(core, gid, &client_id, &mut out);
        }

        self.post_all(out).await;
        Ok(())
    }

    /// Re-send stored messages of a resumed durable session: full publishes
    /// with DUP set, or the pending PUBREL of flows that already saw
    /// PUBREC.
    fn resume_queued(core: &mut DomainCore, gid: SessionGid, client_id: &str, out: &mut OutCmds) {
        let queued = match core.storage.queued_messages(client_id) {
            Ok(queued) => queued,
            Err(err) => {
                log::error!("dispatcher: failed to load queued messages: {err}");
                return;
            }
        };

        for entry in queued {
            let mut packet = match PublishPacket::new(&entry.topic, entry.qos, &entry.payload) {
                Ok(packet) => packet,
                Err(err) => {
                    log::warn!(
                        "dispatcher: dropping stored message with invalid topic: {err:?}"
                    );
                    let _ = core.storage.release_msg(&entry.handle);
                    continue;
                }
            };

            if entry.qos == QoS::AtMostOnce {
                // QoS 0 entries are delivered once and forgotten.
                out.push((
                    gid,
                    DispatcherToListenerCmd::Publish(gid.session_id(), packet),
                ));
                let _ = core.storage.release_msg(&entry.handle);
                continue;
            }

            packet.set_packet_id(entry.packet_id);
            let state = if entry.released {
                OutboundState::Received
            } else {
                OutboundState::Sent
            };
            if let Some(engine) = core.engines.get_mut(client_id) {
                engine.begin(entry.packet_id, packet.clone(), Some(entry.handle), state);
            }

            if entry.released {
                out.push((
                    gid,
                    DispatcherToListenerCmd::PublishRelease(gid.session_id(), entry.packet_id),
                ));
            } else {
                let _ = packet.set_dup(true);
                out.push((
                    gid,
                    DispatcherToListenerCmd::Publish(gid.session_id(), packet),
                ));
            }
        }
    }

    async fn on_subscribe(
        &mut self,
        gid: SessionGid,
        packet: SubscribePacket,
        grants: &[Option<QoS>],
    ) -> Result<(), Error> {
        let Some(ctx) = self.sessions.get(&gid).cloned() else {
            return Ok(());
        };
        let Some(core) = self.domain_mut(ctx.domain_id) else {
            return Ok(());
        };

        let mut out: OutCmds = Vec::new();
        let mut acks = Vec::with_capacity(packet.topics().len());
        let mut retained = Vec::new();

        for (index, topic) in packet.topics().iter().enumerate() {
            let Some(cap) = grants.get(index).copied().flatten() else {
                acks.push(SubscribeAck::Failed);
                continue;
            };
            let granted = topic.qos().min(cap);

            let pattern = match parse_pattern(topic.topic(), granted) {
                Ok(pattern) => pattern,
                Err(err) => {
                    log::warn!(
                        "dispatcher: invalid subscribe filter {:?}: {err:?}",
                        topic.topic()
                    );
                    acks.push(SubscribeAck::Failed);
                    continue;
                }
            };

            // Wildcard subscriptions may be administratively refused per
            // domain; the filter is answered with the failure code.
            if core.config.disable_wildcard_support() && pattern.topic().has_wildcard() {
                acks.push(SubscribeAck::Failed);
                continue;
            }

            for message in core.retain.matches(pattern.topic()) {
                retained.push((message.clone(), granted.min(message.qos())));
            }

            core.sub_index.subscribe(&ctx.client_id, pattern);
            if !ctx.clean_session {
                if let Err(err) = core.storage.subscribe(&ctx.client_id, topic.topic(), granted)
                {
                    log::error!("dispatcher: failed to persist subscription: {err}");
                }
            }
            acks.push(SubscribeAck::QoS(granted));
        }

        let ack_packet = SubscribeAckPacket::with_vec(packet.packet_id(), acks);
        out.push((
            gid,
            DispatcherToListenerCmd::SubscribeAck(gid.session_id(), ack_packet),
        ));

        // Retained messages are replayed to the new subscriber with the
        // RETAIN flag set [MQTT-3.3.1-8].
        for (message, deliver_qos) in retained {
            if let Some((target_gid, outgoing)) =
                core.deliver(&ctx.client_id, &message, deliver_qos, true)
            {
                out.push((
                    target_gid,
                    DispatcherToListenerCmd::Publish(target_gid.session_id(), outgoing),
                ));
            }
        }

        self.post_all(out).await;
        Ok(())
    }

    async fn on_unsubscribe(
        &mut self,
        gid: SessionGid,
        packet: &UnsubscribePacket,
    ) -> Result<(), Error> {
        let Some(ctx) = self.sessions.get(&gid).cloned() else {
            return Ok(());
        };
        let Some(core) = self.domain_mut(ctx.domain_id) else {
            return Ok(());
        };

        for topic in packet.topics() {
            core.sub_index.unsubscribe(&ctx.client_id, topic.as_ref());
            if !ctx.clean_session {
                if let Err(err) = core.storage.unsubscribe(&ctx.client_id, topic.as_ref()) {
                    log::error!("dispatcher: failed to remove stored subscription: {err}");
                }
            }
        }

        let ack_packet = UnsubscribeAckPacket::new(packet.packet_id());
        self.post(
            gid,
            DispatcherToListenerCmd::UnsubscribeAck(gid.session_id(), ack_packet),
        )
        .await
    }

    async fn on_publish(&mut self, gid: SessionGid, packet: PublishPacket) -> Result<(), Error> {
        let Some(ctx) = self.sessions.get(&gid).cloned() else {
            return Ok(());
        };
        let mut out: OutCmds = Vec::new();
        let ack = DispatcherToListenerCmd::PublishAck(
            gid.session_id(),
            packet.packet_id(),
            packet.qos(),
            true,
        );

        let Some(core) = self.domain_mut(ctx.domain_id) else {
            return Ok(());
        };

        // Administrative topics are answered directly to the publisher and
        // never routed.
        if admin::is_admin_topic(packet.topic()) {
            if let Some(reply) = core.admin_reply(&ctx, packet.topic()) {
                out.push((gid, DispatcherToListenerCmd::Publish(gid.session_id(), reply)));
            }
            out.push((gid, ack));
            self.post_all(out).await;
            return Ok(());
        }

        // Oversize and over-quota publishes are dropped; the publisher
        // still gets its positive acknowledgement [MQTT-3.3.5-2].
        let size_limit = core.config.message_size_limit();
        if size_limit > 0 && packet.message().len() > size_limit {
            log::warn!(
                "dispatcher: dropping oversize publish of {} bytes in {}",
                packet.message().len(),
                core.config.name()
            );
            out.push((gid, ack));
            self.post_all(out).await;
            return Ok(());
        }

        let today = Local::now().date_naive();
        core.quota.roll(today);
        if !core
            .quota
            .check(core.config.day_message_quota(), core.config.month_message_quota())
        {
            log::warn!(
                "dispatcher: message quota exceeded in {}, dropping publish",
                core.config.name()
            );
            out.push((gid, ack));
            self.post_all(out).await;
            return Ok(());
        }
        core.quota.record(today);

        Self::route(core, &packet, &mut out);

        out.push((gid, ack));
        self.post_all(out).await;
        Ok(())
    }

    async fn on_publish_will(
        &mut self,
        domain_id: DomainId,
        packet: &PublishPacket,
    ) -> Result<(), Error> {
        let Some(core) = self.domain_mut(domain_id) else {
            return Ok(());
        };
        let mut out: OutCmds = Vec::new();

        let today = Local::now().date_naive();
        core.quota.roll(today);
        if !core
            .quota
            .check(core.config.day_message_quota(), core.config.month_message_quota())
        {
            log::warn!(
                "dispatcher: message quota exceeded in {}, dropping will",
                core.config.name()
            );
            return Ok(());
        }
        core.quota.record(today);

        Self::route(core, packet, &mut out);
        self.post_all(out).await;
        Ok(())
    }

    /// Retained handling plus fan-out to every matching subscriber at
    /// `min(publish QoS, granted QoS)`.
    fn route(core: &mut DomainCore, packet: &PublishPacket, out: &mut OutCmds) {
        if packet.retain() {
            core.retain.apply(packet);
        }

        for (client_id, granted) in core.sub_index.match_topic(packet.topic()) {
            let deliver_qos = packet.qos().min(granted);
            // The RETAIN flag is cleared on messages forwarded to existing
            // subscriptions [MQTT-3.3.1-9].
            if let Some((target_gid, outgoing)) =
                core.deliver(&client_id, packet, deliver_qos, false)
            {
                out.push((
                    target_gid,
                    DispatcherToListenerCmd::Publish(target_gid.session_id(), outgoing),
                ));
            }
        }
    }

    async fn on_publish_acked(&mut self, gid: SessionGid, packet_id: PacketId) -> Result<(), Error> {
        let Some(ctx) = self.sessions.get(&gid).cloned() else {
            return Ok(());
        };
        let Some(core) = self.domain_mut(ctx.domain_id) else {
            return Ok(());
        };
        let Some(engine) = core.engines.get_mut(&ctx.client_id) else {
            return Ok(());
        };

        if let Some(inflight) = engine.on_acked(packet_id) {
            if let Some(handle) = inflight.handle {
                let _ = core.storage.release_msg(&handle);
                core.storage.release_pkgid(&ctx.client_id, packet_id);
            }
        } else {
            log::warn!(
                "dispatcher: PUBACK for unknown packet id {} from {}",
                packet_id.value(),
                ctx.client_id
            );
        }
        Ok(())
    }

    async fn on_publish_received(
        &mut self,
        gid: SessionGid,
        packet_id: PacketId,
    ) -> Result<(), Error> {
        let Some(ctx) = self.sessions.get(&gid).cloned() else {
            return Ok(());
        };
        let Some(core) = self.domain_mut(ctx.domain_id) else {
            return Ok(());
        };
        let Some(engine) = core.engines.get_mut(&ctx.client_id) else {
            return Ok(());
        };

        if !engine.on_received(packet_id) {
            log::warn!(
                "dispatcher: PUBREC for unknown packet id {} from {}",
                packet_id.value(),
                ctx.client_id
            );
            return Ok(());
        }
        if let Some(inflight) = engine.get(packet_id) {
            if let Some(handle) = &inflight.handle {
                // The stored entry stays until PUBCOMP; only its state
                // advances so a reconnect re-sends PUBREL, not the message.
                if let Err(err) = core.storage.mark_msg_released(handle) {
                    log::error!("dispatcher: failed to mark stored message: {err}");
                }
            }
        }

        self.post(
            gid,
            DispatcherToListenerCmd::PublishRelease(gid.session_id(), packet_id),
        )
        .await
    }

    async fn on_publish_completed(
        &mut self,
        gid: SessionGid,
        packet_id: PacketId,
    ) -> Result<(), Error> {
        let Some(ctx) = self.sessions.get(&gid).cloned() else {
            return Ok(());
        };
        let Some(core) = self.domain_mut(ctx.domain_id) else {
            return Ok(());
        };
        let Some(engine) = core.engines.get_mut(&ctx.client_id) else {
            return Ok(());
        };

        if let Some(inflight) = engine.on_completed(packet_id) {
            if let Some(handle) = inflight.handle {
                let _ = core.storage.release_msg(&handle);
                core.storage.release_pkgid(&ctx.client_id, packet_id);
            }
        }
        Ok(())
    }

    fn on_session_disconnected(&mut self, gid: SessionGid) {
        let Some(ctx) = self.sessions.remove(&gid) else {
            return;
        };
        let Some(core) = self.domain_mut(ctx.domain_id) else {
            return;
        };

        // On takeover the client id already maps to the successor; leave
        // its state alone.
        if core.live.get(&ctx.client_id) != Some(&gid) {
            return;
        }
        core.live.remove(&ctx.client_id);
        core.engines.remove(&ctx.client_id);
        core.offline_next_id.remove(&ctx.client_id);

        if ctx.clean_session {
            core.sub_index.remove_client(&ctx.client_id);
            core.durable.remove(&ctx.client_id);
            if let Err(err) = core.storage.purge(&ctx.client_id) {
                log::error!("dispatcher: failed to purge clean session: {err}");
            }
        } else {
            // The will either got published on the way here or is void;
            // the stored copy is no longer needed.
            core.storage.clear_will(&ctx.client_id);
        }
    }
}
