// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Auth cmd handlers.

use codec::ConnectAckPacket;

use super::{Listener, SessionInfo};
use crate::commands::{
    AuthResult, AuthToListenerCmd, ListenerToDispatcherCmd, ListenerToSessionCmd,
};
use crate::error::Error;
use crate::types::SessionGid;

impl Listener {
    pub(super) async fn handle_auth_cmd(&mut self, cmd: AuthToListenerCmd) -> Result<(), Error> {
        match cmd {
            AuthToListenerCmd::ResponseAuth(gid, result) => {
                self.on_auth_response(gid, result).await
            }
        }
    }

    async fn on_auth_response(
        &mut self,
        gid: SessionGid,
        result: AuthResult,
    ) -> Result<(), Error> {
        let session_id = gid.session_id();
        match result {
            AuthResult::Accepted(admission) => {
                self.session_infos.insert(
                    session_id,
                    SessionInfo {
                        domain_id: admission.domain_id,
                        client_id: admission.client_id.clone(),
                    },
                );
                let will = self.pending_wills.remove(&session_id).flatten();
                // The CONNACK is produced by the dispatcher once admission
                // checks and session recovery are done.
                self.dispatcher_sender
                    .send(ListenerToDispatcherCmd::SessionConnected(
                        gid, admission, will,
                    ))
                    .await
                    .map_err(Into::into)
            }
            AuthResult::Rejected(return_code) => {
                self.pending_wills.remove(&session_id);
                let ack_packet = ConnectAckPacket::new(false, return_code);
                self.send_session_cmd(session_id, ListenerToSessionCmd::ConnectAck(ack_packet))
                    .await
            }
        }
    }
}
