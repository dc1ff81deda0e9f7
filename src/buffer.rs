//! Bounded newest-first buffer for received telemetry packets.
//!
//! Pure data structure, no I/O. The element at index 0 is always the most
//! recently *arrived* packet; order is defined purely by insertion, never by
//! sorting on the packet timestamp (the timestamp comes from the remote
//! device clock and may be skewed or out of order).

use std::collections::VecDeque;

use crate::models::Packet;

// ---

/// Fixed-capacity packet buffer with front insertion and tail eviction.
///
/// All operations are total: `push` evicts the oldest element once the
/// capacity is exceeded, `clear` and `snapshot` never fail.
#[derive(Debug)]
pub struct PacketBuffer {
    // ---
    packets: VecDeque<Packet>,
    limit: usize,
}

impl PacketBuffer {
    /// Create an empty buffer holding at most `limit` packets.
    pub fn new(limit: usize) -> Self {
        PacketBuffer {
            packets: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Insert a packet at the front, evicting the tail when over capacity.
    ///
    /// The new sequence is visible to all readers as soon as this returns.
    pub fn push(&mut self, packet: Packet) {
        // ---
        self.packets.push_front(packet);
        while self.packets.len() > self.limit {
            self.packets.pop_back();
        }
    }

    /// Drop all buffered packets.
    pub fn clear(&mut self) {
        self.packets.clear();
    }

    /// The current ordered sequence, newest first.
    pub fn snapshot(&self) -> Vec<Packet> {
        self.packets.iter().cloned().collect()
    }

    /// The most recently arrived packet, if any.
    pub fn head(&self) -> Option<&Packet> {
        self.packets.front()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// The immutable capacity this buffer was created with.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn packet(msg_id: u64, timestamp: i64) -> Packet {
        // ---
        Packet {
            temperature: 22.0,
            msg_id,
            timestamp,
            interval: None,
        }
    }

    #[test]
    fn test_newest_is_always_front() {
        // ---
        let mut buf = PacketBuffer::new(5);

        for i in 0..5 {
            buf.push(packet(i, 1000 + i as i64));
            assert_eq!(buf.head().unwrap().msg_id, i);
        }
    }

    #[test]
    fn test_length_never_exceeds_limit() {
        // ---
        let mut buf = PacketBuffer::new(3);

        for i in 0..10 {
            buf.push(packet(i, 1000));
            assert!(buf.len() <= 3);
        }

        // Oldest entries were evicted from the tail
        let ids: Vec<u64> = buf.snapshot().iter().map(|p| p.msg_id).collect();
        assert_eq!(ids, vec![9, 8, 7]);
    }

    #[test]
    fn test_arrival_order_wins_over_timestamps() {
        // ---
        let mut buf = PacketBuffer::new(4);

        // Second packet carries an *older* device timestamp but arrived later,
        // so it must still be the head.
        buf.push(packet(1, 5000));
        buf.push(packet(2, 1000));

        assert_eq!(buf.head().unwrap().msg_id, 2);
        let ts: Vec<i64> = buf.snapshot().iter().map(|p| p.timestamp).collect();
        assert_eq!(ts, vec![1000, 5000]);
    }

    #[test]
    fn test_clear_empties_buffer() {
        // ---
        let mut buf = PacketBuffer::new(3);
        buf.push(packet(1, 1000));
        buf.push(packet(2, 2000));

        buf.clear();

        assert!(buf.is_empty());
        assert_eq!(buf.head(), None);
        assert_eq!(buf.limit(), 3);
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        // ---
        let mut buf = PacketBuffer::new(3);
        buf.push(packet(1, 1000));

        let a = buf.snapshot();
        let b = buf.snapshot();
        assert_eq!(a, b);
        assert_eq!(buf.len(), 1);
    }
}
