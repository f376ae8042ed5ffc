//! Keyframe-aware packet ring buffer
//!
//! A channel's publisher appends packets here and every viewer reads them back by
//! sequence number. Slots are addressed by `sequence % capacity`, so a viewer that
//! holds a sequence older than [`RingBuffer::oldest_sequence`] knows its data is gone.
//!
//! When the slot holding the most recent keyframe is overwritten before a newer keyframe
//! arrives, that keyframe is pinned outside the ring. Late joiners can therefore always
//! start decoding once at least one keyframe has been published.

use super::packet::Packet;

/// Bounded circular store of the last `capacity` packets
#[derive(Debug)]
pub struct RingBuffer {
    slots: Vec<Option<Packet>>,
    /// Number of occupied slots
    len: usize,
    /// Sequence of the oldest packet in `slots` (meaningless when empty)
    oldest: u64,
    /// Sequence of the newest packet (0 when nothing has been appended)
    newest: u64,
    /// Total payload bytes held in `slots`
    bytes: usize,
    /// Sequence of the latest keyframe appended since the last clear
    latest_keyframe: Option<u64>,
    /// Latest keyframe, kept after its slot was overwritten
    pinned_keyframe: Option<Packet>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            len: 0,
            oldest: 0,
            newest: 0,
            bytes: 0,
            latest_keyframe: None,
            pinned_keyframe: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Payload bytes currently buffered
    pub fn size(&self) -> usize {
        self.bytes
    }

    /// Append a packet, overwriting the oldest slot when full
    ///
    /// Sequences must be contiguous; the channel assigns them.
    pub fn append(&mut self, packet: Packet) {
        debug_assert!(self.len == 0 || packet.sequence == self.newest + 1);

        let seq = packet.sequence;
        let idx = self.slot(seq);

        if self.len == 0 {
            self.oldest = seq;
        }

        if self.len == self.capacity() {
            if let Some(evicted) = self.slots[idx].take() {
                self.bytes -= evicted.size();
                if self.latest_keyframe == Some(evicted.sequence) {
                    self.pinned_keyframe = Some(evicted);
                }
            }
            self.oldest += 1;
        } else {
            self.len += 1;
        }

        if packet.is_keyframe {
            self.latest_keyframe = Some(seq);
            self.pinned_keyframe = None;
        }

        self.bytes += packet.size();
        self.newest = seq;
        self.slots[idx] = Some(packet);
    }

    /// Oldest sequence still held in the ring
    pub fn oldest_sequence(&self) -> Option<u64> {
        (self.len > 0).then_some(self.oldest)
    }

    /// Newest sequence appended
    pub fn newest_sequence(&self) -> Option<u64> {
        (self.len > 0).then_some(self.newest)
    }

    /// Most recent keyframe, either still in the ring or pinned
    pub fn latest_keyframe_sequence(&self) -> Option<u64> {
        self.latest_keyframe
    }

    /// First keyframe at or after `from` that is still in the ring
    pub fn next_keyframe_from(&self, from: u64) -> Option<u64> {
        if self.len == 0 {
            return None;
        }
        (from.max(self.oldest)..=self.newest).find(|&seq| {
            self.get(seq)
                .map(|p| p.is_keyframe)
                .unwrap_or(false)
        })
    }

    /// Look up a retained packet by sequence
    pub fn get(&self, seq: u64) -> Option<&Packet> {
        if self.len > 0 && seq >= self.oldest && seq <= self.newest {
            return self.slots[self.slot(seq)].as_ref();
        }
        self.pinned_keyframe.as_ref().filter(|p| p.sequence == seq)
    }

    /// Drop every packet, including the pinned keyframe
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.len = 0;
        self.oldest = 0;
        self.newest = 0;
        self.bytes = 0;
        self.latest_keyframe = None;
        self.pinned_keyframe = None;
    }

    fn slot(&self, seq: u64) -> usize {
        (seq % self.slots.len() as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn packet(seq: u64, is_keyframe: bool) -> Packet {
        let mut p = Packet::video(seq as u32 * 33, is_keyframe, Bytes::from(vec![0u8; 10]));
        p.sequence = seq;
        p
    }

    fn fill(ring: &mut RingBuffer, range: std::ops::RangeInclusive<u64>, keyframes: &[u64]) {
        for seq in range {
            ring.append(packet(seq, keyframes.contains(&seq)));
        }
    }

    #[test]
    fn test_empty() {
        let ring = RingBuffer::new(4);
        assert!(ring.is_empty());
        assert_eq!(ring.oldest_sequence(), None);
        assert_eq!(ring.newest_sequence(), None);
        assert_eq!(ring.latest_keyframe_sequence(), None);
        assert!(ring.get(1).is_none());
    }

    #[test]
    fn test_append_within_capacity() {
        let mut ring = RingBuffer::new(4);
        fill(&mut ring, 1..=3, &[1]);

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.oldest_sequence(), Some(1));
        assert_eq!(ring.newest_sequence(), Some(3));
        assert_eq!(ring.get(2).map(|p| p.sequence), Some(2));
        assert_eq!(ring.size(), 30);
    }

    #[test]
    fn test_overwrites_oldest() {
        let mut ring = RingBuffer::new(3);
        fill(&mut ring, 1..=5, &[]);

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.oldest_sequence(), Some(3));
        assert_eq!(ring.newest_sequence(), Some(5));
        assert!(ring.get(2).is_none());
        assert_eq!(ring.get(3).map(|p| p.sequence), Some(3));
        assert_eq!(ring.size(), 30);
    }

    #[test]
    fn test_latest_keyframe() {
        let mut ring = RingBuffer::new(8);
        fill(&mut ring, 1..=6, &[1, 4]);
        assert_eq!(ring.latest_keyframe_sequence(), Some(4));
    }

    #[test]
    fn test_keyframe_pinned_when_evicted() {
        let mut ring = RingBuffer::new(3);
        fill(&mut ring, 1..=5, &[1]);

        // Slot for seq 1 was overwritten but it is still the latest keyframe
        assert_eq!(ring.oldest_sequence(), Some(3));
        assert_eq!(ring.latest_keyframe_sequence(), Some(1));
        assert!(ring.get(1).unwrap().is_keyframe);
        assert!(ring.get(2).is_none());
    }

    #[test]
    fn test_new_keyframe_releases_pin() {
        let mut ring = RingBuffer::new(3);
        fill(&mut ring, 1..=5, &[1, 5]);

        assert_eq!(ring.latest_keyframe_sequence(), Some(5));
        assert!(ring.get(1).is_none());
    }

    #[test]
    fn test_older_keyframe_not_pinned() {
        let mut ring = RingBuffer::new(3);
        fill(&mut ring, 1..=4, &[1, 2]);

        // seq 1 evicted, but 2 is newer and still held
        assert!(ring.get(1).is_none());
        assert_eq!(ring.latest_keyframe_sequence(), Some(2));
    }

    #[test]
    fn test_next_keyframe_from() {
        let mut ring = RingBuffer::new(4);
        fill(&mut ring, 1..=8, &[2, 7]);

        assert_eq!(ring.oldest_sequence(), Some(5));
        assert_eq!(ring.next_keyframe_from(1), Some(7));
        assert_eq!(ring.next_keyframe_from(7), Some(7));
        assert_eq!(ring.next_keyframe_from(8), None);
    }

    #[test]
    fn test_clear() {
        let mut ring = RingBuffer::new(2);
        fill(&mut ring, 1..=3, &[1]);
        ring.clear();

        assert!(ring.is_empty());
        assert_eq!(ring.size(), 0);
        assert_eq!(ring.latest_keyframe_sequence(), None);

        // Sequences restart after a clear
        ring.append(packet(1, true));
        assert_eq!(ring.oldest_sequence(), Some(1));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut ring = RingBuffer::new(0);
        fill(&mut ring, 1..=2, &[]);
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.oldest_sequence(), Some(2));
    }
}
