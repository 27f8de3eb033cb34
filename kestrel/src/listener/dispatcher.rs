// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Dispatcher cmd handlers; each is relayed to the target session pipeline.

use super::Listener;
use crate::commands::{DispatcherToListenerCmd, ListenerToSessionCmd};
use crate::error::Error;

impl Listener {
    pub(super) async fn handle_dispatcher_cmd(
        &mut self,
        cmd: DispatcherToListenerCmd,
    ) -> Result<(), Error> {
        match cmd {
            DispatcherToListenerCmd::ConnectAck(session_id, packet) => {
                self.send_session_cmd(session_id, ListenerToSessionCmd::ConnectAck(packet))
                    .await
            }
            DispatcherToListenerCmd::Publish(session_id, packet) => {
                self.send_session_cmd(session_id, ListenerToSessionCmd::Publish(packet))
                    .await
            }
            DispatcherToListenerCmd::PublishAck(session_id, packet_id, qos, accepted) => {
                self.send_session_cmd(
                    session_id,
                    ListenerToSessionCmd::PublishAck(packet_id, qos, accepted),
                )
                .await
            }
            DispatcherToListenerCmd::PublishRelease(session_id, packet_id) => {
                self.send_session_cmd(session_id, ListenerToSessionCmd::PublishRelease(packet_id))
                    .await
            }
            DispatcherToListenerCmd::SubscribeAck(session_id, packet) => {
                self.send_session_cmd(session_id, ListenerToSessionCmd::SubscribeAck(packet))
                    .await
            }
            DispatcherToListenerCmd::UnsubscribeAck(session_id, packet) => {
                self.send_session_cmd(session_id, ListenerToSessionCmd::UnsubscribeAck(packet))
                    .await
            }
            DispatcherToListenerCmd::Disconnect(session_id) => {
                self.send_session_cmd(session_id, ListenerToSessionCmd::Disconnect)
                    .await
            }
        }
    }
}
