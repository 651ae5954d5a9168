//! Duplicate suppression for the flood relay.
//!
//! A packet's fingerprint is "{senderHex}-{timestamp}-{type}". Presence in
//! the cache means the packet was already processed and relayed; the relay
//! drops it without dispatching. The cache is a FIFO ring: when full, the
//! oldest fingerprint is evicted. Eviction can only cause an old packet to
//! be processed again, never a wrongful drop of a fresh one.

use std::collections::{HashSet, VecDeque};

use weft_core::wire::{PacketType, PeerId};

/// Minimum capacity the protocol requires.
pub const MIN_CAPACITY: usize = 1024;

pub struct DedupCache {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupCache {
    /// Capacities below the protocol floor are raised to it.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// The fingerprint a packet is deduplicated on.
    pub fn fingerprint(sender: &PeerId, timestamp_ms: u64, packet_type: PacketType) -> String {
        format!("{}-{}-{}", sender.to_hex(), timestamp_ms, u8::from(packet_type))
    }

    /// Record a fingerprint. Returns true when it was fresh; false means
    /// the packet was already processed within the retention window.
    pub fn check_and_insert(&mut self, fingerprint: String) -> bool {
        if self.seen.contains(&fingerprint) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(fingerprint.clone());
        self.order.push_back(fingerprint);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
