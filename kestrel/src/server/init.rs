// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Wire the channels between listeners, auth, acl and the dispatcher, and
//! spawn every task.

use std::time::Duration;
use tokio::sync::mpsc;

use super::ServerContext;
use crate::acl::AclApp;
use crate::auth::AuthApp;
use crate::commands::SystemToDispatcherCmd;
use crate::config;
use crate::dispatcher::Dispatcher;
use crate::domain::DomainRegistry;
use crate::error::Error;
use crate::listener::Listener;
use crate::types::ListenerId;

const CHANNEL_CAPACITY: usize = 16;

impl ServerContext {
    /// Start every module and run until interrupted.
    ///
    /// # Errors
    ///
    /// Returns error if a listener fails to bind or a domain fails to
    /// load.
    pub async fn run(&mut self) -> Result<(), Error> {
        log::info!("ServerContext::run()");

        // Domains default to one anonymous catch-all.
        let domain_configs: Vec<config::Domain> = if self.config.domains().is_empty() {
            vec![config::Domain::fallback()]
        } else {
            self.config.domains().to_vec()
        };

        let (listeners_to_dispatcher_sender, listeners_to_dispatcher_receiver) =
            mpsc::channel(CHANNEL_CAPACITY);
        let mut dispatcher_to_listener_senders = Vec::new();
        let (listeners_to_auth_sender, listeners_to_auth_receiver) =
            mpsc::channel(CHANNEL_CAPACITY);
        let mut auth_to_listener_senders = Vec::new();
        let (listeners_to_acl_sender, listeners_to_acl_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let mut acl_to_listener_senders = Vec::new();
        let (system_sender, system_receiver) = mpsc::channel(CHANNEL_CAPACITY);

        // Listener per configured socket.
        let mut listener_objs = Vec::new();
        for (listener_id, listener_config) in (0 as ListenerId..).zip(self.config.listeners().iter())
        {
            let (dispatcher_to_listener_sender, dispatcher_to_listener_receiver) =
                mpsc::channel(CHANNEL_CAPACITY);
            dispatcher_to_listener_senders.push((listener_id, dispatcher_to_listener_sender));

            let (auth_to_listener_sender, auth_to_listener_receiver) =
                mpsc::channel(CHANNEL_CAPACITY);
            auth_to_listener_senders.push((listener_id, auth_to_listener_sender));

            let (acl_to_listener_sender, acl_to_listener_receiver) =
                mpsc::channel(CHANNEL_CAPACITY);
            acl_to_listener_senders.push((listener_id, acl_to_listener_sender));

            let listener = Listener::bind(
                listener_id,
                listener_config.clone(),
                // dispatcher module
                listeners_to_dispatcher_sender.clone(),
                dispatcher_to_listener_receiver,
                // auth module
                listeners_to_auth_sender.clone(),
                auth_to_listener_receiver,
                // acl module
                listeners_to_acl_sender.clone(),
                acl_to_listener_receiver,
            )
            .await?;
            listener_objs.push(listener);
        }

        for mut listener in listener_objs {
            tokio::spawn(async move {
                listener.run_loop().await;
            });
        }

        // Auth module owns the domain registry.
        let registry = DomainRegistry::new(&domain_configs)?;
        let mut auth_app = AuthApp::new(registry, auth_to_listener_senders, listeners_to_auth_receiver);
        tokio::spawn(async move {
            auth_app.run_loop().await;
        });

        // Acl module.
        let mut acl_app = AclApp::new(
            &domain_configs,
            acl_to_listener_senders,
            listeners_to_acl_receiver,
        );
        tokio::spawn(async move {
            acl_app.run_loop().await;
        });

        // Dispatcher module.
        let mut dispatcher = Dispatcher::new(
            &domain_configs,
            self.config.storage(),
            dispatcher_to_listener_senders,
            listeners_to_dispatcher_receiver,
            system_receiver,
        )?;
        let dispatcher_handle = tokio::spawn(async move {
            dispatcher.run_loop().await;
        });

        // Housekeeping ticker.
        let tick_sender = system_sender.clone();
        let sys_interval = self.config.general().sys_interval();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(Duration::from_secs(sys_interval));
            // The first tick fires immediately.
            timer.tick().await;
            loop {
                timer.tick().await;
                if tick_sender.send(SystemToDispatcherCmd::Tick).await.is_err() {
                    break;
                }
            }
        });

        tokio::signal::ctrl_c().await?;
        log::info!("Got interrupt signal, shutting down");
        let _ = system_sender.send(SystemToDispatcherCmd::Exit).await;
        let _ = dispatcher_handle.await;
        Ok(())
    }
}
