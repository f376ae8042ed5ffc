//! Relay configuration

use crate::error::{Error, Result};

/// Default number of packets retained per channel
///
/// At 30 fps video plus ~45 audio frames per second this covers a little over
/// ten seconds, which spans the keyframe interval of common encoder presets.
pub const DEFAULT_RING_CAPACITY: usize = 1024;

/// Configuration shared by every channel in a registry
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Packets retained per channel before the oldest is overwritten
    pub ring_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

impl RelayConfig {
    /// Set the per-channel ring capacity
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity == 0 {
            return Err(Error::Config("ring_capacity must be at least 1".into()));
        }
        Ok(())
    }
}
