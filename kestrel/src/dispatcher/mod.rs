// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Message router: one routing core per domain.

use chrono::Local;
use codec::{PacketId, PublishPacket, QoS};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{
    DispatcherToListenerCmd, ListenerToDispatcherCmd, SystemToDispatcherCmd,
};
use crate::config;
use crate::error::Error;
use crate::storage::Storage;
use crate::types::{DomainId, ListenerId, SessionGid};

pub mod admin;
mod listener;
pub mod qos;
pub mod quota;
pub mod retain;
pub mod sub_index;

use qos::{OutboundEngine, OutboundState};
use quota::QuotaTracker;
use retain::RetainStore;
use sub_index::SubIndex;

/// Routing facts of one admitted session.
#[derive(Debug, Clone)]
pub(crate) struct SessionCtx {
    domain_id: DomainId,
    client_id: String,
    username: Option<String>,
    clean_session: bool,
}

/// Subscription, retained, storage and QoS state of a single domain.
/// Nothing in here is ever shared across domains.
#[derive(Debug)]
pub(crate) struct DomainCore {
    config: config::Domain,
    storage: Storage,
    sub_index: SubIndex,
    retain: RetainStore,

    /// Live connections of this domain.
    live: HashMap<String, SessionGid>,

    /// Clients whose session state is durable (`clean_session=false`).
    durable: HashSet<String>,

    /// Outbound QoS engines of live clients.
    engines: HashMap<String, OutboundEngine>,

    /// Packet id cursor for enqueueing to offline durable clients.
    offline_next_id: HashMap<String, u16>,

    quota: QuotaTracker,
}

impl DomainCore {
    fn new(domain_config: config::Domain, storage_config: &config::Storage) -> Result<Self, Error> {
        let root = storage_config.path().join(domain_config.storage_path());
        let storage = Storage::new(&root, storage_config.bucket_count())?;
        let quota = QuotaTracker::load(&root, Local::now().date_naive());
        Ok(Self {
            config: domain_config,
            storage,
            sub_index: SubIndex::new(),
            retain: RetainStore::new(),
            live: HashMap::new(),
            durable: HashSet::new(),
            engines: HashMap::new(),
            offline_next_id: HashMap::new(),
            quota,
        })
    }

    /// Reserve a packet id for a message queued to an offline client.
    fn alloc_offline_pkgid(&mut self, client_id: &str) -> Option<PacketId> {
        let next = self.offline_next_id.entry(client_id.to_string()).or_insert_with(|| {
            self.storage
                .locked_pkgids(client_id)
                .into_iter()
                .max()
                .map_or(0, |max| max % u16::MAX)
        });

        for _ in 0..u16::MAX {
            *next = if *next == u16::MAX { 1 } else { *next + 1 };
            let candidate = PacketId::new(*next);
            if self.storage.lock_pkgid(client_id, candidate).is_ok() {
                return Some(candidate);
            }
        }
        None
    }

    /// Whether one more message fits the client's storage limits.
    fn storage_has_room(&self, client_id: &str) -> bool {
        let messages_limit = self.config.storage_messages_limit();
        if messages_limit > 0 && self.storage.queued_count(client_id) >= messages_limit {
            return false;
        }
        let quota_limit = self.config.storage_quota_limit();
        if quota_limit > 0 && self.storage.queued_bytes(client_id) >= quota_limit as u64 {
            return false;
        }
        true
    }

    /// Deliver one message to one subscriber, either now (returning the
    /// target session and the packet to send) or into its offline queue
    /// (returning `None`).
    fn deliver(
        &mut self,
        client_id: &str,
        source: &PublishPacket,
        deliver_qos: QoS,
        retain_flag: bool,
    ) -> Option<(SessionGid, PublishPacket)> {
        let mut packet = source.clone();
        packet.set_retain(retain_flag);
        packet.set_qos(deliver_qos);
        // Forwarded publishes are fresh deliveries.
        let _ = packet.set_dup(false);

        if let Some(gid) = self.live.get(client_id).copied() {
            if deliver_qos == QoS::AtMostOnce {
                return Some((gid, packet));
            }

            let engine = self.engines.entry(client_id.to_string()).or_default();
            let Some(packet_id) = engine.alloc_id() else {
                log::error!("dispatcher: no free packet id for {client_id}, dropping message");
                return None;
            };
            packet.set_packet_id(packet_id);

            let handle = if self.durable.contains(client_id) {
                if let Err(err) = self.storage.lock_pkgid(client_id, packet_id) {
                    log::error!("dispatcher: failed to lock packet id: {err}");
                }
                match self.storage.store_msg(
                    client_id,
                    packet_id,
                    deliver_qos,
                    packet.topic(),
                    packet.message(),
                ) {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        log::error!("dispatcher: failed to persist in-flight message: {err}");
                        None
                    }
                }
            } else {
                None
            };

            let engine = self.engines.get_mut(client_id).expect("engine exists");
            engine.begin(packet_id, packet.clone(), handle, OutboundState::Sent);
            return Some((gid, packet));
        }

        // Offline client: only durable sessions keep their subscriptions,
        // so reaching here means the message goes to the offline queue.
        if !self.storage_has_room(client_id) {
            log::warn!(
                "dispatcher: storage limit reached for {client_id}, dropping queued message"
            );
            return None;
        }

        let packet_id = if deliver_qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            match self.alloc_offline_pkgid(client_id) {
                Some(packet_id) => packet_id,
                None => {
                    log::error!("dispatcher: no free stored packet id for {client_id}");
                    return None;
                }
            }
        };
        if let Err(err) = self.storage.store_msg(
            client_id,
            packet_id,
            deliver_qos,
            packet.topic(),
            packet.message(),
        ) {
            log::error!("dispatcher: failed to enqueue offline message: {err}");
            if deliver_qos != QoS::AtMostOnce {
                self.storage.release_pkgid(client_id, packet_id);
            }
        }
        None
    }
}

/// The router task. Owns every domain core and talks to listeners through
/// command channels.
#[derive(Debug)]
pub struct Dispatcher {
    domains: Vec<DomainCore>,
    sessions: HashMap<SessionGid, SessionCtx>,

    listener_senders: HashMap<ListenerId, Sender<DispatcherToListenerCmd>>,
    listener_receiver: Receiver<ListenerToDispatcherCmd>,

    system_receiver: Receiver<SystemToDispatcherCmd>,
}

impl Dispatcher {
    /// Build one routing core per configured domain.
    ///
    /// # Errors
    ///
    /// Returns error if a domain storage root cannot be prepared.
    pub fn new(
        domain_configs: &[config::Domain],
        storage_config: &config::Storage,
        listener_senders: Vec<(ListenerId, Sender<DispatcherToListenerCmd>)>,
        listener_receiver: Receiver<ListenerToDispatcherCmd>,
        system_receiver: Receiver<SystemToDispatcherCmd>,
    ) -> Result<Self, Error> {
        let mut domains = Vec::with_capacity(domain_configs.len());
        for domain_config in domain_configs {
            domains.push(DomainCore::new(domain_config.clone(), storage_config)?);
        }
        Ok(Self {
            domains,
            sessions: HashMap::new(),
            listener_senders: listener_senders.into_iter().collect(),
            listener_receiver,
            system_receiver,
        })
    }

    pub async fn run_loop(&mut self) {
        loop {
            tokio::select! {
                Some(cmd) = self.listener_receiver.recv() => {
                    if let Err(err) = self.handle_listener_cmd(cmd).await {
                        log::error!("dispatcher: listener cmd failed: {err}");
                    }
                }
                Some(cmd) = self.system_receiver.recv() => {
                    match cmd {
                        SystemToDispatcherCmd::Tick => self.on_tick(),
                        SystemToDispatcherCmd::Exit => {
                            log::info!("dispatcher: exiting");
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    }

    /// Periodic housekeeping: quota day/month roll over.
    fn on_tick(&mut self) {
        let today = Local::now().date_naive();
        for core in &mut self.domains {
            if core.quota.roll(today) {
                log::info!("dispatcher: rolled quota counters of {}", core.config.name());
            }
            core.quota.tick(today);
        }
    }

    fn domain_mut(&mut self, domain_id: DomainId) -> Option<&mut DomainCore> {
        self.domains.get_mut(domain_id as usize)
    }

    /// Send one command to the listener owning `gid`.
    async fn post(&self, gid: SessionGid, cmd: DispatcherToListenerCmd) -> Result<(), Error> {
        if let Some(sender) = self.listener_senders.get(&gid.listener_id()) {
            sender.send(cmd).await.map_err(Into::into)
        } else {
            Err(Error::session_error(gid.session_id()))
        }
    }

    /// Flush a batch of outgoing commands, logging failures.
    async fn post_all(&self, out: Vec<(SessionGid, DispatcherToListenerCmd)>) {
        for (gid, cmd) in out {
            if let Err(err) = self.post(gid, cmd).await {
                log::error!("dispatcher: failed to post cmd: {err}");
            }
        }
    }
}
