// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{EncodePacket, PacketId};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{ListenerToSessionCmd, SessionToListenerCmd, WillMessage};
use crate::error::{Error, ErrorKind};
use crate::stream::Stream;
use crate::types::SessionId;

mod client;
mod config;
mod listener;

pub use config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Stream accepted, CONNECT not yet seen.
    AwaitingConnect,

    /// CONNECT forwarded, waiting for the broker's verdict.
    Connecting,

    Connected,
    Disconnecting,
    Disconnected,
}

/// One accepted client connection.
///
/// The session task is the only reader and the only writer of its stream;
/// outbound packets from other components arrive as commands through the
/// listener and are serialised here.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    stream: Stream,

    /// Server name from the transport handshake (TLS SNI or WebSocket
    /// `Host` header), used for domain selection.
    server_name: Option<String>,

    status: Status,
    client_id: String,
    clean_session: bool,

    /// Keep alive seconds negotiated in CONNECT; zero disables the check.
    keep_alive: u16,

    will: Option<WillMessage>,

    /// Peer sent DISCONNECT; suppresses the will message.
    clean_close: bool,

    /// Undecoded bytes carried across network reads.
    pending: Vec<u8>,

    /// Packet ids of inbound QoS 2 publishes whose flow has not completed;
    /// duplicates of these are acknowledged without redelivery.
    pub_recv_ids: HashSet<PacketId>,

    created_at: Instant,
    last_recv: Instant,

    sender: Sender<SessionToListenerCmd>,
    receiver: Receiver<ListenerToSessionCmd>,
}

impl Session {
    #[must_use]
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        stream: Stream,
        server_name: Option<String>,
        sender: Sender<SessionToListenerCmd>,
        receiver: Receiver<ListenerToSessionCmd>,
    ) -> Self {
        let keep_alive = config.keep_alive();
        Self {
            id,
            config,
            stream,
            server_name,

            status: Status::AwaitingConnect,
            client_id: String::new(),
            clean_session: true,
            keep_alive,

            will: None,
            clean_close: false,

            pending: Vec::new(),
            pub_recv_ids: HashSet::new(),

            created_at: Instant::now(),
            last_recv: Instant::now(),

            sender,
            receiver,
        }
    }

    pub async fn run_loop(mut self) {
        let mut buf = Vec::with_capacity(4096);
        let mut timer = tokio::time::interval(Duration::from_secs(1));

        loop {
            if self.status == Status::Disconnected {
                break;
            }

            tokio::select! {
                read_ret = self.stream.read_buf(&mut buf) => {
                    match read_ret {
                        Ok(0) => {
                            log::info!("session {}: stream closed by peer", self.id);
                            break;
                        }
                        Ok(_n_recv) => {
                            self.pending.extend_from_slice(&buf);
                            buf.clear();
                            if let Err(err) = self.handle_pending_packets().await {
                                log::error!("session {}: {err}", self.id);
                                break;
                            }
                        }
                        Err(err) => {
                            log::info!("session {}: read failed: {err}", self.id);
                            break;
                        }
                    }
                }

                Some(cmd) = self.receiver.recv() => {
                    if let Err(err) = self.handle_listener_cmd(cmd).await {
                        log::error!("session {}: listener cmd failed: {err}", self.id);
                        break;
                    }
                }

                _ = timer.tick() => {
                    if self.deadline_exceeded() {
                        break;
                    }
                }
            }
        }

        self.status = Status::Disconnected;
        let will = if self.clean_close {
            None
        } else {
            self.will.take()
        };
        if let Err(err) = self
            .sender
            .send(SessionToListenerCmd::Disconnect(
                self.id,
                self.clean_close,
                will,
            ))
            .await
        {
            log::error!(
                "session {}: failed to send disconnect cmd, err: {err}",
                self.id
            );
        }
    }

    /// Check the pre-CONNECT timeout and the keep alive deadline.
    fn deadline_exceeded(&self) -> bool {
        match self.status {
            Status::AwaitingConnect | Status::Connecting => {
                // If the Server does not receive a CONNECT packet within a
                // reasonable amount of time after the network connection is
                // established, the Server SHOULD close the connection.
                self.config.connect_timeout() > 0
                    && self.created_at.elapsed().as_secs() >= u64::from(self.config.connect_timeout())
            }
            Status::Connected | Status::Disconnecting => {
                // From [MQTT-3.1.2-24]: with a non-zero Keep Alive, the
                // Server MUST disconnect a client it hears nothing from for
                // one and a half times the keep alive interval.
                if self.keep_alive == 0 {
                    return false;
                }
                let grace = u64::from(self.keep_alive)
                    .saturating_mul(3)
                    .saturating_add(1)
                    / 2;
                if self.last_recv.elapsed().as_secs() >= grace {
                    log::warn!(
                        "session {}: keep alive deadline reached, dropping connection",
                        self.id
                    );
                    return true;
                }
                false
            }
            Status::Disconnected => false,
        }
    }

    /// Reset activity timestamp whenever a packet is received.
    fn reset_instant(&mut self) {
        self.last_recv = Instant::now();
    }

    async fn send<P: EncodePacket>(&mut self, packet: P) -> Result<(), Error> {
        // After the session reached Disconnected no more control packets
        // may be sent on this network connection [MQTT-3.14.4-2].
        if self.status == Status::Disconnected {
            return Err(Error::new(
                ErrorKind::SendError,
                "session: cannot send packet on disconnected stream",
            ));
        }

        let mut buf = Vec::new();
        packet.encode(&mut buf)?;
        self.stream.write(&buf).await.map(drop)
    }
}
