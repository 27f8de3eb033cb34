// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Command enums exchanged between the long running tasks.

use codec::{
    ConnectAckPacket, ConnectPacket, ConnectReturnCode, PacketId, PublishPacket, QoS,
    SubscribeAckPacket, SubscribePacket, UnsubscribeAckPacket, UnsubscribePacket,
};

use crate::types::{DomainId, SessionGid, SessionId};

/// Will message captured from a CONNECT packet, published by the broker when
/// the connection closes without a DISCONNECT packet.
#[derive(Debug, Clone)]
pub struct WillMessage {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Identity of an admitted connection inside its domain.
#[derive(Debug, Clone)]
pub struct Admission {
    pub domain_id: DomainId,

    /// Client id with any `@server-name` indication stripped; synthesised
    /// ids keep their generated value.
    pub client_id: String,

    pub username: Option<String>,
    pub clean_session: bool,
}

/// Outcome of domain selection plus authentication for one CONNECT.
#[derive(Debug, Clone)]
pub enum AuthResult {
    Accepted(Admission),
    Rejected(ConnectReturnCode),
}

/// Resolved verdict of the on-publish pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishVerdict {
    /// Deliver the message.
    Allow,

    /// Positively acknowledge but do not deliver.
    Discard,

    /// Close the publishing connection.
    CloseConnection,
}

#[derive(Debug, Clone)]
pub enum SessionToListenerCmd {
    /// Connect packet and the transport level server name, if any.
    Connect(SessionId, ConnectPacket, Option<String>),

    Publish(SessionId, PublishPacket),

    /// Peer acknowledged one of our QoS 1 publishes.
    PublishAcked(SessionId, PacketId),

    /// Peer confirmed reception of one of our QoS 2 publishes.
    PublishReceived(SessionId, PacketId),

    /// Peer completed the QoS 2 flow of one of our publishes.
    PublishCompleted(SessionId, PacketId),

    Subscribe(SessionId, SubscribePacket),
    Unsubscribe(SessionId, UnsubscribePacket),

    /// Session ended; `clean` is true when the peer sent DISCONNECT.
    /// The will message is present only for abnormal closes.
    Disconnect(SessionId, bool, Option<WillMessage>),
}

#[derive(Debug, Clone)]
pub enum ListenerToSessionCmd {
    ConnectAck(ConnectAckPacket),

    /// Outbound application message for the peer.
    Publish(PublishPacket),

    /// Acknowledge an inbound publish: reply PUBACK or PUBREC depending on
    /// QoS. When `accepted` is false the connection is closed instead
    /// [MQTT-3.3.5-2].
    PublishAck(PacketId, QoS, bool),

    /// Send a PUBREL packet for an outbound QoS 2 flow.
    PublishRelease(PacketId),

    SubscribeAck(SubscribeAckPacket),
    UnsubscribeAck(UnsubscribeAckPacket),

    Disconnect,
}

#[derive(Debug, Clone)]
pub enum ListenerToAuthCmd {
    /// Select a domain and authenticate this CONNECT. The third field is
    /// the transport server name (TLS SNI or WebSocket Host header).
    RequestAuth(SessionGid, ConnectPacket, Option<String>),
}

#[derive(Debug, Clone)]
pub enum AuthToListenerCmd {
    ResponseAuth(SessionGid, AuthResult),
}

#[derive(Debug, Clone)]
pub enum ListenerToAclCmd {
    /// Publish permission check; the last flag marks will messages.
    Publish(SessionGid, DomainId, String, PublishPacket, bool),

    /// Subscribe permission check.
    Subscribe(SessionGid, DomainId, String, SubscribePacket),
}

#[derive(Debug, Clone)]
pub enum AclToListenerCmd {
    PublishResult(SessionGid, DomainId, PublishPacket, PublishVerdict, bool),

    /// Granted QoS cap per requested filter; `None` marks a denied filter.
    SubscribeResult(SessionGid, SubscribePacket, Vec<Option<QoS>>),
}

#[derive(Debug, Clone)]
pub enum ListenerToDispatcherCmd {
    /// An authenticated connection joined its domain.
    SessionConnected(SessionGid, Admission, Option<WillMessage>),

    /// Subscribe request that already passed the ACL check; the third field
    /// is the per-filter QoS cap from the ACL.
    Subscribe(SessionGid, SubscribePacket, Vec<Option<QoS>>),

    Unsubscribe(SessionGid, UnsubscribePacket),

    /// Publish that already passed the ACL check.
    Publish(SessionGid, PublishPacket),

    /// Will publish of a dead connection, routed within its domain.
    PublishWill(DomainId, PublishPacket),

    PublishAcked(SessionGid, PacketId),
    PublishReceived(SessionGid, PacketId),
    PublishCompleted(SessionGid, PacketId),

    SessionDisconnected(SessionGid),
}

#[derive(Debug, Clone)]
pub enum DispatcherToListenerCmd {
    ConnectAck(SessionId, ConnectAckPacket),
    Publish(SessionId, PublishPacket),
    PublishAck(SessionId, PacketId, QoS, bool),
    PublishRelease(SessionId, PacketId),
    SubscribeAck(SessionId, SubscribeAckPacket),
    UnsubscribeAck(SessionId, UnsubscribeAckPacket),
    Disconnect(SessionId),
}

#[derive(Debug, Clone)]
pub enum SystemToDispatcherCmd {
    /// Periodic tick driving quota roll over and the idle reaper.
    Tick,

    /// Server is shutting down.
    Exit,
}
