// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::HashMap;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{
    AclToListenerCmd, AuthToListenerCmd, DispatcherToListenerCmd, ListenerToAclCmd,
    ListenerToAuthCmd, ListenerToDispatcherCmd, ListenerToSessionCmd, SessionToListenerCmd,
    WillMessage,
};
use crate::config;
use crate::types::{DomainId, ListenerId, SessionId};

mod acl;
mod auth;
mod dispatcher;
mod init;
mod protocol;
mod run;
mod session;

use protocol::Protocol;

const CHANNEL_CAPACITY: usize = 16;

/// Identity of a session once its CONNECT has been admitted to a domain.
#[derive(Debug, Clone)]
struct SessionInfo {
    domain_id: DomainId,
    client_id: String,
}

/// One bound server socket plus the routing state of its sessions.
pub struct Listener {
    id: ListenerId,
    protocol: Protocol,
    config: config::Listener,
    current_session_id: SessionId,

    session_senders: HashMap<SessionId, Sender<ListenerToSessionCmd>>,

    /// Filled once auth accepted the session.
    session_infos: HashMap<SessionId, SessionInfo>,

    /// Will messages parked between CONNECT and admission, so the
    /// dispatcher can persist them for durable sessions.
    pending_wills: HashMap<SessionId, Option<WillMessage>>,

    session_sender: Sender<SessionToListenerCmd>,
    session_receiver: Option<Receiver<SessionToListenerCmd>>,

    dispatcher_sender: Sender<ListenerToDispatcherCmd>,
    dispatcher_receiver: Option<Receiver<DispatcherToListenerCmd>>,

    auth_sender: Sender<ListenerToAuthCmd>,
    auth_receiver: Option<Receiver<AuthToListenerCmd>>,

    acl_sender: Sender<ListenerToAclCmd>,
    acl_receiver: Option<Receiver<AclToListenerCmd>>,
}
