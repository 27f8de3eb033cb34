// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Acl cmd handlers.

use super::Listener;
use crate::commands::{
    AclToListenerCmd, ListenerToDispatcherCmd, ListenerToSessionCmd, PublishVerdict,
};
use crate::error::Error;

impl Listener {
    pub(super) async fn handle_acl_cmd(&mut self, cmd: AclToListenerCmd) -> Result<(), Error> {
        match cmd {
            AclToListenerCmd::PublishResult(gid, domain_id, packet, verdict, is_will) => {
                let session_id = gid.session_id();
                if is_will {
                    // The dead session cannot be acknowledged or closed;
                    // only an allowed will proceeds.
                    if verdict == PublishVerdict::Allow {
                        self.dispatcher_sender
                            .send(ListenerToDispatcherCmd::PublishWill(domain_id, packet))
                            .await?;
                    } else {
                        log::info!("listener {}: will publish denied by acl", self.id);
                    }
                    return Ok(());
                }

                match verdict {
                    PublishVerdict::Allow => self
                        .dispatcher_sender
                        .send(ListenerToDispatcherCmd::Publish(gid, packet))
                        .await
                        .map_err(Into::into),
                    PublishVerdict::Discard => {
                        // Positive acknowledgement without delivery
                        // [MQTT-3.3.5-2].
                        let cmd = ListenerToSessionCmd::PublishAck(
                            packet.packet_id(),
                            packet.qos(),
                            true,
                        );
                        self.send_session_cmd(session_id, cmd).await
                    }
                    PublishVerdict::CloseConnection => {
                        self.send_session_cmd(session_id, ListenerToSessionCmd::Disconnect)
                            .await
                    }
                }
            }
            AclToListenerCmd::SubscribeResult(gid, packet, grants) => self
                .dispatcher_sender
                .send(ListenerToDispatcherCmd::Subscribe(gid, packet, grants))
                .await
                .map_err(Into::into),
        }
    }
}
