// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Handles packets arriving from the peer.

use codec::{
    utils::random_client_id, ConnectAckPacket, ConnectPacket, ConnectReturnCode, DecodeError,
    Packet, PacketId, PublishCompletePacket, PublishPacket, PublishReceivedPacket, PingResponsePacket,
    QoS, SubscribePacket, UnsubscribePacket,
};

use super::{Session, Status};
use crate::commands::{SessionToListenerCmd, WillMessage};
use crate::error::{Error, ErrorKind};

impl Session {
    /// Decode and dispatch every whole packet in the pending buffer,
    /// keeping any trailing partial packet for the next network read.
    pub(super) async fn handle_pending_packets(&mut self) -> Result<(), Error> {
        let mut offset = 0;
        loop {
            match Packet::decode(&self.pending[offset..]) {
                Ok((packet, consumed)) => {
                    offset += consumed;
                    self.reset_instant();
                    self.handle_client_packet(packet).await?;
                    if self.status == Status::Disconnected {
                        break;
                    }
                }
                Err(DecodeError::Incomplete) => break,
                Err(err) => {
                    self.pending.clear();
                    return self.on_malformed_packet(err).await;
                }
            }
        }
        self.pending.drain(..offset);
        Ok(())
    }

    /// Protocol errors are fatal: close the connection without further
    /// replies. The one exception is an unacceptable protocol level in
    /// CONNECT, which gets its CONNACK return code first [MQTT-3.1.2-2].
    async fn on_malformed_packet(&mut self, err: DecodeError) -> Result<(), Error> {
        if err == DecodeError::InvalidProtocolLevel && self.status == Status::AwaitingConnect {
            let ack_packet = ConnectAckPacket::new(false, ConnectReturnCode::UnacceptedProtocol);
            let _ = self.send(ack_packet).await;
        }
        self.status = Status::Disconnected;
        Err(Error::from_string(
            ErrorKind::ProtocolError,
            format!("session: malformed packet from peer: {err:?}"),
        ))
    }

    async fn handle_client_packet(&mut self, packet: Packet) -> Result<(), Error> {
        if self.status == Status::AwaitingConnect {
            // The first packet sent from the Client to the Server MUST be a
            // CONNECT packet [MQTT-3.1.0-1].
            return match packet {
                Packet::Connect(p) => self.on_client_connect(p).await,
                _ => {
                    self.status = Status::Disconnected;
                    Err(Error::new(
                        ErrorKind::ProtocolError,
                        "session: first packet is not CONNECT",
                    ))
                }
            };
        }

        match packet {
            // A Client can only send the CONNECT packet once over a network
            // connection [MQTT-3.1.0-2].
            Packet::Connect(_) => {
                self.status = Status::Disconnected;
                Err(Error::new(
                    ErrorKind::ProtocolError,
                    "session: duplicated CONNECT packet",
                ))
            }
            Packet::PingRequest(_) => self.send(PingResponsePacket::new()).await,
            Packet::Publish(p) => self.on_client_publish(p).await,
            Packet::PublishAck(p) => {
                self.sender
                    .send(SessionToListenerCmd::PublishAcked(self.id, p.packet_id()))
                    .await
                    .map_err(Into::into)
            }
            Packet::PublishReceived(p) => {
                self.sender
                    .send(SessionToListenerCmd::PublishReceived(self.id, p.packet_id()))
                    .await
                    .map_err(Into::into)
            }
            Packet::PublishRelease(p) => self.on_client_publish_release(p.packet_id()).await,
            Packet::PublishComplete(p) => {
                self.sender
                    .send(SessionToListenerCmd::PublishCompleted(
                        self.id,
                        p.packet_id(),
                    ))
                    .await
                    .map_err(Into::into)
            }
            Packet::Subscribe(p) => self.on_client_subscribe(p).await,
            Packet::Unsubscribe(p) => self.on_client_unsubscribe(p).await,
            Packet::Disconnect(_) => {
                // On DISCONNECT the Server MUST discard any Will message
                // without publishing it [MQTT-3.14.4-3].
                self.clean_close = true;
                self.will = None;
                self.status = Status::Disconnected;
                Ok(())
            }
            Packet::ConnectAck(_)
            | Packet::SubscribeAck(_)
            | Packet::UnsubscribeAck(_)
            | Packet::PingResponse(_) => {
                self.status = Status::Disconnected;
                Err(Error::new(
                    ErrorKind::ProtocolError,
                    "session: got server-to-client packet from peer",
                ))
            }
        }
    }

    async fn on_client_connect(&mut self, mut packet: ConnectPacket) -> Result<(), Error> {
        if packet.client_id().is_empty() {
            // A zero byte client id is only acceptable together with
            // `clean_session=1`; the broker then assigns a unique id
            // [MQTT-3.1.3-7].
            if packet.clean_session() && self.config.allow_empty_client_id() {
                let client_id = random_client_id();
                packet
                    .set_client_id(&client_id)
                    .map_err(|err| Error::from_string(ErrorKind::ProtocolError, format!("{err:?}")))?;
            } else {
                let ack_packet =
                    ConnectAckPacket::new(false, ConnectReturnCode::IdentifierRejected);
                self.send(ack_packet).await?;
                self.status = Status::Disconnected;
                return Ok(());
            }
        }

        self.client_id = packet.client_id().to_string();
        self.clean_session = packet.clean_session();
        if packet.keep_alive() > 0 {
            self.keep_alive = packet.keep_alive();
        }
        self.will = if packet.will() {
            packet.will_topic().map(|topic| WillMessage {
                topic: topic.to_string(),
                message: packet.will_message().to_vec(),
                qos: packet.will_qos(),
                retain: packet.will_retain(),
            })
        } else {
            None
        };

        self.status = Status::Connecting;
        self.sender
            .send(SessionToListenerCmd::Connect(
                self.id,
                packet,
                self.server_name.clone(),
            ))
            .await
            .map_err(Into::into)
    }

    async fn on_client_publish(&mut self, packet: PublishPacket) -> Result<(), Error> {
        if self.status != Status::Connected {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "session: PUBLISH before CONNECT completed",
            ));
        }

        if packet.qos() == QoS::ExactOnce {
            if self.pub_recv_ids.contains(&packet.packet_id()) {
                // Re-delivery of a flow that is still open: acknowledge
                // again without handing the message to the router.
                let ack_packet = PublishReceivedPacket::new(packet.packet_id());
                return self.send(ack_packet).await;
            }
            if self.pub_recv_ids.len() >= self.config.maximum_inflight_messages() {
                log::error!(
                    "session {}: too many unacknowledged QoS 2 messages, dropping connection",
                    self.id
                );
                self.status = Status::Disconnected;
                return Ok(());
            }
            self.pub_recv_ids.insert(packet.packet_id());
        }

        self.sender
            .send(SessionToListenerCmd::Publish(self.id, packet))
            .await
            .map_err(Into::into)
    }

    /// PUBREL releases the inbound QoS 2 lock and elicits PUBCOMP.
    async fn on_client_publish_release(&mut self, packet_id: PacketId) -> Result<(), Error> {
        self.pub_recv_ids.remove(&packet_id);
        self.send(PublishCompletePacket::new(packet_id)).await
    }

    async fn on_client_subscribe(&mut self, packet: SubscribePacket) -> Result<(), Error> {
        if self.status != Status::Connected {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "session: SUBSCRIBE before CONNECT completed",
            ));
        }
        self.sender
            .send(SessionToListenerCmd::Subscribe(self.id, packet))
            .await
            .map_err(Into::into)
    }

    async fn on_client_unsubscribe(&mut self, packet: UnsubscribePacket) -> Result<(), Error> {
        if self.status != Status::Connected {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "session: UNSUBSCRIBE before CONNECT completed",
            ));
        }
        self.sender
            .send(SessionToListenerCmd::Unsubscribe(self.id, packet))
            .await
            .map_err(Into::into)
    }
}
