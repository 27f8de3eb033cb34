// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{
    ConnectPacket, ConnectReturnCode, DecodeError, DisconnectPacket, EncodePacket, Packet,
    PacketId, PingRequestPacket, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, QoS, SubscribeAck, SubscribePacket,
    UnsubscribePacket,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::connect_options::ConnectOptions;
use crate::error::{Error, ErrorKind};
use crate::status::StreamStatus;
use crate::stream::Stream;

/// Client side state of an outbound QoS 2 publish.
#[derive(Debug)]
struct Qos2Flow {
    packet: PublishPacket,

    /// PUBREC seen and PUBREL sent; waiting for PUBCOMP.
    released: bool,
}

/// Asynchronous MQTT 3.1.1 client.
///
/// The client owns its stream; every call that touches the network takes
/// `&mut self`, so packets are serialised by construction.
pub struct AsyncClient {
    connect_options: ConnectOptions,
    stream: Stream,
    status: StreamStatus,
    session_present: bool,

    packet_id: u16,

    /// Undecoded bytes carried across reads.
    pending: Vec<u8>,

    /// Application messages decoded while waiting for something else.
    inbox: VecDeque<PublishPacket>,

    subscribing_packets: HashMap<PacketId, SubscribePacket>,
    subscribe_results: HashMap<PacketId, Vec<SubscribeAck>>,
    unsubscribing_packets: HashMap<PacketId, UnsubscribePacket>,
    publishing_qos1_packets: HashMap<PacketId, PublishPacket>,
    publishing_qos2_packets: HashMap<PacketId, Qos2Flow>,

    /// Inbound QoS 2 packet ids whose flow has not seen PUBREL yet;
    /// duplicates are acknowledged without a second delivery.
    pub_recv_ids: HashSet<PacketId>,

    last_comm: Instant,
}

impl AsyncClient {
    /// Connect the transport, perform the MQTT handshake and return the
    /// connected client.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails, the broker refuses the
    /// CONNECT, or no CONNACK arrives within the connect timeout.
    pub async fn connect(connect_options: ConnectOptions) -> Result<Self, Error> {
        let stream = Stream::connect(&connect_options).await?;
        let mut client = Self {
            connect_options,
            stream,
            status: StreamStatus::Connecting,
            session_present: false,
            packet_id: 0,
            pending: Vec::new(),
            inbox: VecDeque::new(),
            subscribing_packets: HashMap::new(),
            subscribe_results: HashMap::new(),
            unsubscribing_packets: HashMap::new(),
            publishing_qos1_packets: HashMap::new(),
            publishing_qos2_packets: HashMap::new(),
            pub_recv_ids: HashSet::new(),
            last_comm: Instant::now(),
        };

        let mut conn_packet = ConnectPacket::new(client.connect_options.client_id())?;
        conn_packet.set_clean_session(client.connect_options.clean_session());
        #[allow(clippy::cast_possible_truncation)]
        conn_packet.set_keep_alive(client.connect_options.keep_alive().as_secs().min(65535) as u16);
        if let Some(username) = client.connect_options.username() {
            conn_packet.set_username(username)?;
        }
        if let Some(password) = client.connect_options.password() {
            conn_packet.set_password(password);
        }
        if let Some(will) = client.connect_options.will() {
            conn_packet.set_will(&will.topic, &will.message, will.qos, will.retain)?;
        }
        client.send(conn_packet).await?;

        let deadline = Instant::now() + client.connect_options.connect_timeout();
        while client.status == StreamStatus::Connecting {
            client.process_or_read(Some(deadline)).await?;
        }

        if client.status == StreamStatus::Connected {
            Ok(client)
        } else {
            Err(Error::new(
                ErrorKind::ConnectRejected,
                "Broker refused the connection",
            ))
        }
    }

    #[must_use]
    pub const fn status(&self) -> StreamStatus {
        self.status
    }

    /// Whether the broker resumed a stored session for our client id.
    #[must_use]
    pub const fn session_present(&self) -> bool {
        self.session_present
    }

    #[must_use]
    pub const fn connect_options(&self) -> &ConnectOptions {
        &self.connect_options
    }

    /// Publish an application message.
    ///
    /// Returns the allocated packet id for QoS 1/2 flows; QoS 0 messages
    /// have no id and no acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns error if the client is not connected or the send fails.
    pub async fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        payload: &[u8],
    ) -> Result<PacketId, Error> {
        self.publish_with(topic, qos, payload, false).await
    }

    /// Publish an application message, optionally asking the broker to
    /// retain it. An empty retained payload clears the stored message of
    /// the topic.
    ///
    /// # Errors
    ///
    /// Returns error if the client is not connected or the send fails.
    pub async fn publish_with(
        &mut self,
        topic: &str,
        qos: QoS,
        payload: &[u8],
        retain: bool,
    ) -> Result<PacketId, Error> {
        self.check_connected()?;

        let mut packet = PublishPacket::new(topic, qos, payload)?;
        packet.set_retain(retain);
        let packet_id = match qos {
            QoS::AtMostOnce => PacketId::new(0),
            QoS::AtLeastOnce => {
                let packet_id = self.next_packet_id();
                packet.set_packet_id(packet_id);
                self.publishing_qos1_packets
                    .insert(packet_id, packet.clone());
                packet_id
            }
            QoS::ExactOnce => {
                let packet_id = self.next_packet_id();
                packet.set_packet_id(packet_id);
                self.publishing_qos2_packets.insert(
                    packet_id,
                    Qos2Flow {
                        packet: packet.clone(),
                        released: false,
                    },
                );
                packet_id
            }
        };
        self.send(packet).await?;
        Ok(packet_id)
    }

    /// Whether the terminal acknowledgement of a publish is still
    /// outstanding.
    #[must_use]
    pub fn publish_inflight(&self, packet_id: PacketId) -> bool {
        self.publishing_qos1_packets.contains_key(&packet_id)
            || self.publishing_qos2_packets.contains_key(&packet_id)
    }

    /// Wait until the terminal acknowledgement of `packet_id` arrives.
    ///
    /// # Errors
    ///
    /// Returns a `TimeoutError` if `timeout` elapses first; the in-flight
    /// entry stays registered so the flow can finish later.
    pub async fn wait_publish(
        &mut self,
        packet_id: PacketId,
        timeout: Duration,
    ) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        while self.publish_inflight(packet_id) {
            self.process_or_read(Some(deadline)).await?;
        }
        Ok(())
    }

    /// Subscribe to one topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if the client is not connected or the send fails.
    pub async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<PacketId, Error> {
        self.check_connected()?;
        let packet_id = self.next_packet_id();
        let packet = SubscribePacket::new(topic, qos, packet_id)?;
        self.subscribing_packets.insert(packet_id, packet.clone());
        self.send(packet).await?;
        Ok(packet_id)
    }

    /// Wait for the SUBACK of a subscribe request and return the granted
    /// result per filter.
    ///
    /// # Errors
    ///
    /// Returns a `TimeoutError` if `timeout` elapses first.
    pub async fn wait_subscribe(
        &mut self,
        packet_id: PacketId,
        timeout: Duration,
    ) -> Result<Vec<SubscribeAck>, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(results) = self.subscribe_results.remove(&packet_id) {
                return Ok(results);
            }
            self.process_or_read(Some(deadline)).await?;
        }
    }

    /// Remove one subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the client is not connected or the send fails.
    pub async fn unsubscribe(&mut self, topic: &str) -> Result<PacketId, Error> {
        self.check_connected()?;
        let packet_id = self.next_packet_id();
        let packet = UnsubscribePacket::new(topic, packet_id)?;
        self.unsubscribing_packets.insert(packet_id, packet.clone());
        self.send(packet).await?;
        Ok(packet_id)
    }

    /// Send a PINGREQ probe.
    ///
    /// # Errors
    ///
    /// Returns error if the send fails.
    pub async fn ping(&mut self) -> Result<(), Error> {
        self.check_connected()?;
        self.send(PingRequestPacket::new()).await
    }

    /// Cleanly end the session; the broker discards the will message.
    ///
    /// # Errors
    ///
    /// Returns error if the send fails.
    pub async fn disconnect(&mut self) -> Result<(), Error> {
        if self.status == StreamStatus::Connected {
            self.status = StreamStatus::Disconnecting;
            self.send(DisconnectPacket::new()).await?;
        }
        self.status = StreamStatus::Disconnected;
        Ok(())
    }

    /// Wait for the next application message, driving acknowledgements and
    /// the keep alive probe on the way.
    ///
    /// # Errors
    ///
    /// Returns error if the stream fails or the peer closes it.
    pub async fn next_message(&mut self) -> Result<PublishPacket, Error> {
        loop {
            if let Some(message) = self.inbox.pop_front() {
                return Ok(message);
            }

            let keep_alive = self.connect_options.keep_alive();
            if !keep_alive.is_zero() && self.last_comm.elapsed() >= keep_alive {
                self.ping().await?;
            }

            let ping_deadline = if keep_alive.is_zero() {
                None
            } else {
                Some(self.last_comm + keep_alive)
            };
            match self.process_or_read(ping_deadline).await {
                Ok(()) => {}
                // The keep alive deadline just means it is time to ping.
                Err(err) if err.kind() == ErrorKind::TimeoutError => {}
                Err(err) => return Err(err),
            }
        }
    }

    fn check_connected(&self) -> Result<(), Error> {
        if self.status == StreamStatus::Connected {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::InvalidState,
                "Client is not connected",
            ))
        }
    }

    fn next_packet_id(&mut self) -> PacketId {
        // Non-zero, wrapping at the 16 bit boundary; skip ids still in
        // flight.
        for _ in 0..u16::MAX {
            self.packet_id = if self.packet_id == u16::MAX {
                1
            } else {
                self.packet_id + 1
            };
            let candidate = PacketId::new(self.packet_id);
            if !self.publish_inflight(candidate)
                && !self.subscribing_packets.contains_key(&candidate)
                && !self.unsubscribing_packets.contains_key(&candidate)
            {
                return candidate;
            }
        }
        PacketId::new(self.packet_id)
    }

    async fn send<P: EncodePacket>(&mut self, packet: P) -> Result<(), Error> {
        let mut buf = Vec::new();
        packet.encode(&mut buf)?;
        self.stream.write(&buf).await?;
        self.last_comm = Instant::now();
        Ok(())
    }

    /// Handle every whole packet in the buffer; read more bytes if none is
    /// complete. `deadline` bounds the read and maps to a timeout error.
    async fn process_or_read(&mut self, deadline: Option<Instant>) -> Result<(), Error> {
        loop {
            match Packet::decode(&self.pending) {
                Ok((packet, consumed)) => {
                    self.pending.drain(..consumed);
                    self.handle_packet(packet).await?;
                    return Ok(());
                }
                Err(DecodeError::Incomplete) => {}
                Err(err) => {
                    self.status = StreamStatus::Disconnected;
                    return Err(err.into());
                }
            }

            let mut buf = Vec::with_capacity(4096);
            let n_recv = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.stream.read_buf(&mut buf)).await {
                        Ok(result) => result?,
                        Err(_elapsed) => {
                            return Err(Error::new(ErrorKind::TimeoutError, "Read timed out"));
                        }
                    }
                }
                None => self.stream.read_buf(&mut buf).await?,
            };
            if n_recv == 0 {
                self.status = StreamStatus::Disconnected;
                return Err(Error::new(
                    ErrorKind::SocketError,
                    "Stream closed by broker",
                ));
            }
            self.pending.extend_from_slice(&buf);
        }
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<(), Error> {
        match packet {
            Packet::ConnectAck(ack) => {
                if self.status != StreamStatus::Connecting {
                    log::warn!("client: unexpected CONNACK");
                    return Ok(());
                }
                if ack.return_code() == ConnectReturnCode::Accepted {
                    self.session_present = ack.session_present();
                    self.status = StreamStatus::Connected;
                } else {
                    log::warn!("client: connect refused: {:?}", ack.return_code());
                    self.status = StreamStatus::ConnectFailed;
                }
                Ok(())
            }
            Packet::Publish(publish) => self.on_message(publish).await,
            Packet::PublishAck(ack) => {
                if self.publishing_qos1_packets.remove(&ack.packet_id()).is_none() {
                    log::warn!(
                        "client: PUBACK for unknown packet id {}",
                        ack.packet_id().value()
                    );
                }
                Ok(())
            }
            Packet::PublishReceived(received) => {
                let packet_id = received.packet_id();
                match self.publishing_qos2_packets.get_mut(&packet_id) {
                    Some(flow) => {
                        flow.released = true;
                        self.send(PublishReleasePacket::new(packet_id)).await
                    }
                    None => {
                        log::warn!("client: PUBREC for unknown packet id {}", packet_id.value());
                        Ok(())
                    }
                }
            }
            Packet::PublishComplete(complete) => {
                if self
                    .publishing_qos2_packets
                    .remove(&complete.packet_id())
                    .is_none()
                {
                    log::warn!(
                        "client: PUBCOMP for unknown packet id {}",
                        complete.packet_id().value()
                    );
                }
                Ok(())
            }
            Packet::PublishRelease(release) => {
                self.pub_recv_ids.remove(&release.packet_id());
                self.send(PublishCompletePacket::new(release.packet_id()))
                    .await
            }
            Packet::SubscribeAck(ack) => {
                match self.subscribing_packets.remove(&ack.packet_id()) {
                    Some(request) => {
                        for (topic, result) in request.topics().iter().zip(ack.acks()) {
                            log::info!(
                                "client: subscription {:?} -> {result:?}",
                                topic.topic()
                            );
                        }
                        self.subscribe_results
                            .insert(ack.packet_id(), ack.acks().to_vec());
                    }
                    None => log::warn!(
                        "client: SUBACK for unknown packet id {}",
                        ack.packet_id().value()
                    ),
                }
                Ok(())
            }
            Packet::UnsubscribeAck(ack) => {
                self.unsubscribing_packets.remove(&ack.packet_id());
                Ok(())
            }
            Packet::PingResponse(_) => Ok(()),
            packet => {
                log::warn!("client: unexpected packet {:?}", packet.packet_type());
                Ok(())
            }
        }
    }

    /// Inbound application message: acknowledge per QoS and queue it for
    /// [`Self::next_message`].
    async fn on_message(&mut self, publish: PublishPacket) -> Result<(), Error> {
        match publish.qos() {
            QoS::AtMostOnce => {
                self.inbox.push_back(publish);
            }
            QoS::AtLeastOnce => {
                let packet_id = publish.packet_id();
                self.inbox.push_back(publish);
                self.send(PublishAckPacket::new(packet_id)).await?;
            }
            QoS::ExactOnce => {
                let packet_id = publish.packet_id();
                // Duplicate of an open flow: acknowledge again without a
                // second delivery.
                if self.pub_recv_ids.insert(packet_id) {
                    self.inbox.push_back(publish);
                }
                self.send(PublishReceivedPacket::new(packet_id)).await?;
            }
        }
        Ok(())
    }
}
