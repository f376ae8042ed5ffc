//! Channel registry implementation
//!
//! Maps channel names to channels. Channels are created on first use and discarded
//! once idle with no session holding a reference.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

use super::channel::{Channel, ChannelStats};
use super::config::RelayConfig;

struct RegistryEntry {
    channel: Arc<Channel>,
    refs: usize,
}

/// Process-wide channel map
///
/// The map lock is separate from every channel's own lock, and is always taken first.
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, RegistryEntry>>,
    config: RelayConfig,
}

impl ChannelRegistry {
    /// Create a registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    pub fn with_config(config: RelayConfig) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Look up or create a channel and take a reference to it
    ///
    /// Concurrent calls for the same name get the same channel. The reference is
    /// released when the returned guard drops.
    pub fn get_or_create(self: &Arc<Self>, name: &str) -> ChannelRef {
        let mut channels = self.channels.lock();

        let entry = channels.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(channel = %name, "Channel created");
            RegistryEntry {
                channel: Arc::new(Channel::new(name, self.config.ring_capacity)),
                refs: 0,
            }
        });
        entry.refs += 1;

        ChannelRef {
            registry: Arc::clone(self),
            channel: Arc::clone(&entry.channel),
        }
    }

    /// Drop one reference to `name`
    ///
    /// The channel is discarded when no references remain and it is idle. Prefer letting
    /// a [`ChannelRef`] drop; calling this as well releases twice.
    pub fn release(&self, name: &str) {
        let mut channels = self.channels.lock();

        let Some(entry) = channels.get_mut(name) else {
            tracing::warn!(channel = %name, "Release of unknown channel");
            return;
        };

        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 && entry.channel.is_idle() {
            if let Some(entry) = channels.remove(name) {
                entry.channel.close();
                tracing::debug!(channel = %name, "Channel discarded");
            }
        }
    }

    /// Look up a channel without taking a reference
    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels
            .lock()
            .get(name)
            .map(|entry| Arc::clone(&entry.channel))
    }

    /// Number of references currently held on `name`
    pub fn ref_count(&self, name: &str) -> usize {
        self.channels
            .lock()
            .get(name)
            .map(|entry| entry.refs)
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Snapshot every known channel
    pub fn stats(&self) -> Vec<ChannelStats> {
        let channels: Vec<Arc<Channel>> = self
            .channels
            .lock()
            .values()
            .map(|entry| Arc::clone(&entry.channel))
            .collect();

        channels.iter().map(|channel| channel.stats()).collect()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A counted reference to a registry channel
///
/// Derefs to [`Channel`]. Dropping it releases the reference.
pub struct ChannelRef {
    registry: Arc<ChannelRegistry>,
    channel: Arc<Channel>,
}

impl ChannelRef {
    /// Shared handle to the channel itself
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }
}

impl Deref for ChannelRef {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl Drop for ChannelRef {
    fn drop(&mut self) {
        self.registry.release(self.channel.name());
    }
}

impl std::fmt::Debug for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ChannelRef").field(&self.channel).finish()
    }
}
