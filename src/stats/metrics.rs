//! Per-session counters

use std::time::{Duration, Instant};

use crate::media::Packet;

/// Counters for one publisher or viewer session
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub started_at: Instant,
    /// Packets read (publisher) or written (viewer)
    pub packets: u64,
    pub bytes: u64,
    pub keyframes: u64,
    /// Packets a viewer lost to backpressure
    pub skipped_packets: u64,
    /// Number of separate skip events
    pub discontinuities: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            packets: 0,
            bytes: 0,
            keyframes: 0,
            skipped_packets: 0,
            discontinuities: 0,
        }
    }

    pub fn on_packet(&mut self, packet: &Packet) {
        self.packets += 1;
        self.bytes += packet.size() as u64;
        if packet.is_keyframe {
            self.keyframes += 1;
        }
    }

    pub fn on_skip(&mut self, skipped: u64) {
        self.skipped_packets += skipped;
        self.discontinuities += 1;
    }

    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Average bitrate in bits per second over the whole session
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration().as_secs();
        if secs > 0 {
            (self.bytes * 8) / secs
        } else {
            0
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}
