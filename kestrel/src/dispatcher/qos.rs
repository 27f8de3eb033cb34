// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Outbound QoS 1/2 state machines and the per-client packet id pool.

use codec::{PacketId, PublishPacket};
use std::collections::{HashMap, HashSet};

use crate::storage::MsgHandle;

/// Delivery state of one outbound message.
///
/// QoS 1 finishes at the first acknowledgement; QoS 2 walks
/// `Sent -> Received -> (PUBREL sent) -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    /// PUBLISH written, terminal ack outstanding.
    Sent,

    /// PUBREC seen, PUBCOMP outstanding.
    Received,
}

/// One in-flight outbound message.
#[derive(Debug)]
pub struct Inflight {
    pub packet: PublishPacket,
    pub state: OutboundState,

    /// Durable sessions keep a storage entry until the terminal ack.
    pub handle: Option<MsgHandle>,
}

/// Packet id allocator plus in-flight table of one client.
///
/// Ids run from 1 to 65535; ids locked in storage by a resumed durable
/// session are skipped until their flow finishes.
#[derive(Debug, Default)]
pub struct OutboundEngine {
    cursor: u16,
    inflight: HashMap<u16, Inflight>,

    /// Ids reserved on disk for flows recovered from storage.
    reserved: HashSet<u16>,
}

impl OutboundEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine of a resumed durable session, skipping ids still locked in
    /// storage.
    #[must_use]
    pub fn with_reserved(reserved: HashSet<u16>) -> Self {
        Self {
            cursor: 0,
            inflight: HashMap::new(),
            reserved,
        }
    }

    /// Number of unacknowledged messages.
    #[must_use]
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Allocate the next free packet id, or `None` when all 65535 ids are
    /// taken.
    pub fn alloc_id(&mut self) -> Option<PacketId> {
        for _ in 0..u16::MAX {
            self.cursor = if self.cursor == u16::MAX {
                1
            } else {
                self.cursor + 1
            };
            if !self.inflight.contains_key(&self.cursor) && !self.reserved.contains(&self.cursor) {
                return Some(PacketId::new(self.cursor));
            }
        }
        None
    }

    /// Register an outbound message as sent.
    pub fn begin(
        &mut self,
        packet_id: PacketId,
        packet: PublishPacket,
        handle: Option<MsgHandle>,
        state: OutboundState,
    ) {
        self.reserved.insert(packet_id.value());
        self.inflight.insert(
            packet_id.value(),
            Inflight {
                packet,
                state,
                handle,
            },
        );
    }

    /// Terminal PUBACK of a QoS 1 flow; frees the id.
    pub fn on_acked(&mut self, packet_id: PacketId) -> Option<Inflight> {
        self.reserved.remove(&packet_id.value());
        self.inflight.remove(&packet_id.value())
    }

    /// PUBREC of a QoS 2 flow; the id stays taken until PUBCOMP. Returns
    /// false for unknown ids.
    pub fn on_received(&mut self, packet_id: PacketId) -> bool {
        match self.inflight.get_mut(&packet_id.value()) {
            Some(inflight) => {
                inflight.state = OutboundState::Received;
                true
            }
            None => false,
        }
    }

    /// Terminal PUBCOMP of a QoS 2 flow; frees the id.
    pub fn on_completed(&mut self, packet_id: PacketId) -> Option<Inflight> {
        self.reserved.remove(&packet_id.value());
        self.inflight.remove(&packet_id.value())
    }

    #[must_use]
    pub fn get(&self, packet_id: PacketId) -> Option<&Inflight> {
        self.inflight.get(&packet_id.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;

    fn packet(id: u16) -> PublishPacket {
        let mut packet = PublishPacket::new("t", QoS::AtLeastOnce, b"x").unwrap();
        packet.set_packet_id(PacketId::new(id));
        packet
    }

    #[test]
    fn test_alloc_skips_inflight() {
        let mut engine = OutboundEngine::new();
        let first = engine.alloc_id().unwrap();
        assert_eq!(first.value(), 1);
        engine.begin(first, packet(1), None, OutboundState::Sent);

        let second = engine.alloc_id().unwrap();
        assert_eq!(second.value(), 2);

        engine.on_acked(first);
        // Freed ids become available again once the cursor wraps.
        let mut seen = false;
        for _ in 0..u16::MAX {
            let id = engine.alloc_id().unwrap();
            if id.value() == 1 {
                seen = true;
                break;
            }
            engine.begin(id, packet(id.value()), None, OutboundState::Sent);
        }
        assert!(seen);
    }

    #[test]
    fn test_alloc_skips_reserved() {
        let mut engine = OutboundEngine::with_reserved([1, 2, 3].into_iter().collect());
        assert_eq!(engine.alloc_id().unwrap().value(), 4);
    }

    #[test]
    fn test_qos2_flow() {
        let mut engine = OutboundEngine::new();
        let id = engine.alloc_id().unwrap();
        engine.begin(id, packet(id.value()), None, OutboundState::Sent);

        assert!(engine.on_received(id));
        assert_eq!(engine.get(id).unwrap().state, OutboundState::Received);
        // Unknown ids are refused.
        assert!(!engine.on_received(PacketId::new(9999)));

        let done = engine.on_completed(id).unwrap();
        assert_eq!(done.state, OutboundState::Received);
        assert_eq!(engine.inflight_count(), 0);
    }

    #[test]
    fn test_exhaustion() {
        let mut engine = OutboundEngine::new();
        for _ in 0..u16::MAX {
            let id = engine.alloc_id().unwrap();
            engine.begin(id, packet(id.value()), None, OutboundState::Sent);
        }
        assert_eq!(engine.inflight_count(), usize::from(u16::MAX));
        assert!(engine.alloc_id().is_none());
    }
}
