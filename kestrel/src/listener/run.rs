// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Handles commands and new connections.

use tokio::sync::mpsc;

use super::{Listener, CHANNEL_CAPACITY};
use crate::session::{Session, SessionConfig};
use crate::stream::Stream;

impl Listener {
    /// # Panics
    ///
    /// Raises panic if channel receivers were already taken.
    pub async fn run_loop(&mut self) -> ! {
        // Take ownership of mpsc receivers or else tokio select will raise
        // borrow errors.
        let mut session_receiver = self
            .session_receiver
            .take()
            .expect("Invalid session receiver");
        let mut dispatcher_receiver = self
            .dispatcher_receiver
            .take()
            .expect("Invalid dispatcher receiver");
        let mut auth_receiver = self.auth_receiver.take().expect("Invalid auth receiver");
        let mut acl_receiver = self.acl_receiver.take().expect("Invalid acl receiver");

        loop {
            tokio::select! {
                accepted = self.accept() => {
                    match accepted {
                        Ok((stream, server_name)) => self.new_connection(stream, server_name).await,
                        Err(err) => log::error!("listener {}: accept failed: {err}", self.id),
                    }
                },

                Some(cmd) = session_receiver.recv() => {
                    if let Err(err) = self.handle_session_cmd(cmd).await {
                        log::error!("listener {}: session cmd failed: {err}", self.id);
                    }
                },

                Some(cmd) = dispatcher_receiver.recv() => {
                    if let Err(err) = self.handle_dispatcher_cmd(cmd).await {
                        log::error!("listener {}: dispatcher cmd failed: {err}", self.id);
                    }
                },

                Some(cmd) = auth_receiver.recv() => {
                    if let Err(err) = self.handle_auth_cmd(cmd).await {
                        log::error!("listener {}: auth cmd failed: {err}", self.id);
                    }
                },

                Some(cmd) = acl_receiver.recv() => {
                    if let Err(err) = self.handle_acl_cmd(cmd).await {
                        log::error!("listener {}: acl cmd failed: {err}", self.id);
                    }
                },
            }
        }
    }

    async fn new_connection(&mut self, stream: Stream, server_name: Option<String>) {
        let maximum_connections = self.config.maximum_connections();
        if maximum_connections > 0 && self.session_senders.len() >= maximum_connections {
            log::warn!(
                "listener {}: connection limit {} reached, dropping new connection",
                self.id,
                maximum_connections
            );
            drop(stream);
            return;
        }

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let session_id = self.next_session_id();
        self.session_senders.insert(session_id, sender);

        let mut session_config = SessionConfig::new();
        session_config
            .set_keep_alive(self.config.keep_alive())
            .set_connect_timeout(self.config.connect_timeout())
            .set_allow_empty_client_id(self.config.allow_empty_client_id())
            .set_maximum_inflight_messages(self.config.maximum_inflight_messages());

        let session = Session::new(
            session_id,
            session_config,
            stream,
            server_name,
            self.session_sender.clone(),
            receiver,
        );
        tokio::spawn(session.run_loop());
    }
}
