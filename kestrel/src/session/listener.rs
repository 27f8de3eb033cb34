// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Handles commands from the listener.

use codec::{
    ConnectAckPacket, ConnectReturnCode, PacketId, PublishAckPacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, QoS, SubscribeAckPacket,
};

use super::{Session, Status};
use crate::commands::ListenerToSessionCmd;
use crate::error::Error;

impl Session {
    pub(super) async fn handle_listener_cmd(
        &mut self,
        cmd: ListenerToSessionCmd,
    ) -> Result<(), Error> {
        match cmd {
            ListenerToSessionCmd::ConnectAck(packet) => self.on_listener_connect_ack(packet).await,
            ListenerToSessionCmd::Publish(packet) => self.on_listener_publish(packet).await,
            ListenerToSessionCmd::PublishAck(packet_id, qos, accepted) => {
                self.on_listener_publish_ack(packet_id, qos, accepted).await
            }
            ListenerToSessionCmd::PublishRelease(packet_id) => {
                self.send(PublishReleasePacket::new(packet_id)).await
            }
            ListenerToSessionCmd::SubscribeAck(packet) => {
                self.on_listener_subscribe_ack(packet).await
            }
            ListenerToSessionCmd::UnsubscribeAck(packet) => self.send(packet).await,
            ListenerToSessionCmd::Disconnect => {
                // Takeover or administrative kick; the peer did not send
                // DISCONNECT, so the will message stays armed.
                self.status = Status::Disconnected;
                Ok(())
            }
        }
    }

    async fn on_listener_connect_ack(&mut self, packet: ConnectAckPacket) -> Result<(), Error> {
        // Send the CONNACK first, then update status.
        let return_code = packet.return_code();
        self.send(packet).await?;

        // If a server sends a CONNACK packet containing a non-zero return
        // code it MUST then close the network connection [MQTT-3.2.2-5].
        self.status = match return_code {
            ConnectReturnCode::Accepted => Status::Connected,
            _ => Status::Disconnected,
        };
        Ok(())
    }

    async fn on_listener_publish(&mut self, packet: PublishPacket) -> Result<(), Error> {
        self.send(packet).await
    }

    /// Acknowledge an inbound publish after the router handled it.
    async fn on_listener_publish_ack(
        &mut self,
        packet_id: PacketId,
        qos: QoS,
        accepted: bool,
    ) -> Result<(), Error> {
        // If a Server does not authorize a PUBLISH it has no way of
        // informing the client; it MUST either make a positive
        // acknowledgement or close the connection [MQTT-3.3.5-2].
        if !accepted {
            self.status = Status::Disconnected;
            return Ok(());
        }

        match qos {
            QoS::AtMostOnce => Ok(()),
            QoS::AtLeastOnce => self.send(PublishAckPacket::new(packet_id)).await,
            QoS::ExactOnce => self.send(PublishReceivedPacket::new(packet_id)).await,
        }
    }

    async fn on_listener_subscribe_ack(
        &mut self,
        packet: SubscribeAckPacket,
    ) -> Result<(), Error> {
        // When the Server receives a SUBSCRIBE packet it MUST respond with
        // a SUBACK packet carrying the same packet identifier
        // [MQTT-3.8.4-1], [MQTT-3.8.4-2].
        self.send(packet).await
    }
}
