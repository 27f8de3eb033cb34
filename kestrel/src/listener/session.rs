// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Session cmd handlers.

use codec::{ConnectPacket, PublishPacket, SubscribePacket, UnsubscribePacket};

use super::Listener;
use crate::commands::{
    ListenerToAclCmd, ListenerToAuthCmd, ListenerToDispatcherCmd, ListenerToSessionCmd,
    SessionToListenerCmd, WillMessage,
};
use crate::error::Error;
use crate::types::{SessionGid, SessionId};

impl Listener {
    pub(super) fn next_session_id(&mut self) -> SessionId {
        self.current_session_id += 1;
        self.current_session_id
    }

    pub(super) async fn handle_session_cmd(
        &mut self,
        cmd: SessionToListenerCmd,
    ) -> Result<(), Error> {
        match cmd {
            SessionToListenerCmd::Connect(session_id, packet, server_name) => {
                self.on_session_connect(session_id, packet, server_name).await
            }
            SessionToListenerCmd::Publish(session_id, packet) => {
                self.on_session_publish(session_id, packet).await
            }
            SessionToListenerCmd::PublishAcked(session_id, packet_id) => {
                let gid = SessionGid::new(self.id, session_id);
                self.dispatcher_sender
                    .send(ListenerToDispatcherCmd::PublishAcked(gid, packet_id))
                    .await
                    .map_err(Into::into)
            }
            SessionToListenerCmd::PublishReceived(session_id, packet_id) => {
                let gid = SessionGid::new(self.id, session_id);
                self.dispatcher_sender
                    .send(ListenerToDispatcherCmd::PublishReceived(gid, packet_id))
                    .await
                    .map_err(Into::into)
            }
            SessionToListenerCmd::PublishCompleted(session_id, packet_id) => {
                let gid = SessionGid::new(self.id, session_id);
                self.dispatcher_sender
                    .send(ListenerToDispatcherCmd::PublishCompleted(gid, packet_id))
                    .await
                    .map_err(Into::into)
            }
            SessionToListenerCmd::Subscribe(session_id, packet) => {
                self.on_session_subscribe(session_id, packet).await
            }
            SessionToListenerCmd::Unsubscribe(session_id, packet) => {
                self.on_session_unsubscribe(session_id, packet).await
            }
            SessionToListenerCmd::Disconnect(session_id, clean, will) => {
                self.on_session_disconnect(session_id, clean, will).await
            }
        }
    }

    async fn on_session_connect(
        &mut self,
        session_id: SessionId,
        packet: ConnectPacket,
        server_name: Option<String>,
    ) -> Result<(), Error> {
        // Park the will so the dispatcher can persist it for durable
        // sessions once the connection is admitted.
        let will = packet.will_topic().map(|topic| WillMessage {
            topic: topic.to_string(),
            message: packet.will_message().to_vec(),
            qos: packet.will_qos(),
            retain: packet.will_retain(),
        });
        self.pending_wills.insert(session_id, will);

        self.auth_sender
            .send(ListenerToAuthCmd::RequestAuth(
                SessionGid::new(self.id, session_id),
                packet,
                server_name,
            ))
            .await
            .map_err(Into::into)
    }

    async fn on_session_publish(
        &mut self,
        session_id: SessionId,
        packet: PublishPacket,
    ) -> Result<(), Error> {
        let Some(info) = self.session_infos.get(&session_id) else {
            log::warn!("listener {}: publish from unknown session {session_id}", self.id);
            return Ok(());
        };
        let cmd = ListenerToAclCmd::Publish(
            SessionGid::new(self.id, session_id),
            info.domain_id,
            info.client_id.clone(),
            packet,
            false,
        );
        self.acl_sender.send(cmd).await.map_err(Into::into)
    }

    async fn on_session_subscribe(
        &mut self,
        session_id: SessionId,
        packet: SubscribePacket,
    ) -> Result<(), Error> {
        let Some(info) = self.session_infos.get(&session_id) else {
            log::warn!(
                "listener {}: subscribe from unknown session {session_id}",
                self.id
            );
            return Ok(());
        };
        let cmd = ListenerToAclCmd::Subscribe(
            SessionGid::new(self.id, session_id),
            info.domain_id,
            info.client_id.clone(),
            packet,
        );
        self.acl_sender.send(cmd).await.map_err(Into::into)
    }

    async fn on_session_unsubscribe(
        &mut self,
        session_id: SessionId,
        packet: UnsubscribePacket,
    ) -> Result<(), Error> {
        // No ACL check on unsubscribe.
        self.dispatcher_sender
            .send(ListenerToDispatcherCmd::Unsubscribe(
                SessionGid::new(self.id, session_id),
                packet,
            ))
            .await
            .map_err(Into::into)
    }

    async fn on_session_disconnect(
        &mut self,
        session_id: SessionId,
        clean: bool,
        will: Option<WillMessage>,
    ) -> Result<(), Error> {
        self.session_senders.remove(&session_id);
        self.pending_wills.remove(&session_id);
        let info = self.session_infos.remove(&session_id);

        let Some(info) = info else {
            // Session never completed its CONNECT.
            return Ok(());
        };
        let gid = SessionGid::new(self.id, session_id);

        // Route the will through the on-publish pipeline before the
        // dispatcher forgets this session, as if the client had sent it.
        if !clean {
            if let Some(will) = will {
                match will_packet(&will) {
                    Ok(packet) => {
                        let cmd = ListenerToAclCmd::Publish(
                            gid,
                            info.domain_id,
                            info.client_id.clone(),
                            packet,
                            true,
                        );
                        self.acl_sender.send(cmd).await?;
                    }
                    Err(err) => {
                        log::error!(
                            "listener {}: invalid will topic from {}: {err}",
                            self.id,
                            info.client_id
                        );
                    }
                }
            }
        }

        self.dispatcher_sender
            .send(ListenerToDispatcherCmd::SessionDisconnected(gid))
            .await
            .map_err(Into::into)
    }

    /// Send a command to a session pipeline.
    pub(super) async fn send_session_cmd(
        &mut self,
        session_id: SessionId,
        cmd: ListenerToSessionCmd,
    ) -> Result<(), Error> {
        if let Some(session_sender) = self.session_senders.get(&session_id) {
            session_sender.send(cmd).await.map_err(Into::into)
        } else {
            Err(Error::session_error(session_id))
        }
    }
}

/// Build the PUBLISH packet of a will message.
fn will_packet(will: &WillMessage) -> Result<PublishPacket, Error> {
    let mut packet = PublishPacket::new(&will.topic, will.qos, &will.message)?;
    packet.set_retain(will.retain);
    Ok(packet)
}
