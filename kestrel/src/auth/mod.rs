// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Authentication app: domain selection plus credential checks for every
//! CONNECT.

use codec::ConnectPacket;
use std::collections::HashMap;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{AuthToListenerCmd, ListenerToAuthCmd};
use crate::domain::DomainRegistry;
use crate::error::Error;
use crate::types::{ListenerId, SessionGid};

pub mod backend;
pub mod file_auth;
pub mod passwd;

#[derive(Debug)]
pub struct AuthApp {
    registry: DomainRegistry,

    listener_senders: HashMap<ListenerId, Sender<AuthToListenerCmd>>,
    listener_receiver: Receiver<ListenerToAuthCmd>,
}

impl AuthApp {
    #[must_use]
    pub fn new(
        registry: DomainRegistry,
        listener_senders: Vec<(ListenerId, Sender<AuthToListenerCmd>)>,
        listener_receiver: Receiver<ListenerToAuthCmd>,
    ) -> Self {
        Self {
            registry,
            listener_senders: listener_senders.into_iter().collect(),
            listener_receiver,
        }
    }

    pub async fn run_loop(&mut self) {
        while let Some(cmd) = self.listener_receiver.recv().await {
            if let Err(err) = self.handle_listener_cmd(cmd).await {
                log::error!("auth: listener cmd failed: {err}");
            }
        }
    }

    async fn handle_listener_cmd(&mut self, cmd: ListenerToAuthCmd) -> Result<(), Error> {
        match cmd {
            ListenerToAuthCmd::RequestAuth(gid, packet, server_name) => {
                self.on_request_auth(gid, &packet, server_name.as_deref())
                    .await
            }
        }
    }

    async fn on_request_auth(
        &mut self,
        gid: SessionGid,
        packet: &ConnectPacket,
        server_name: Option<&str>,
    ) -> Result<(), Error> {
        let username = packet.has_username().then(|| packet.username());
        let result = self.registry.select(
            packet.client_id(),
            username,
            packet.password(),
            server_name,
            packet.clean_session(),
        );

        if let Some(sender) = self.listener_senders.get(&gid.listener_id()) {
            sender
                .send(AuthToListenerCmd::ResponseAuth(gid, result))
                .await
                .map_err(Into::into)
        } else {
            Err(Error::session_error(gid.session_id()))
        }
    }
}
