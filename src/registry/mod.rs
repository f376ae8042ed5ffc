//! Channel registry and per-channel fan-out
//!
//! The registry maps channel names to [`Channel`]s. Each channel has one publisher
//! writing into a ring buffer and any number of viewers reading it back through
//! independent cursors.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<ChannelRegistry>
//!                     ┌─────────────────────────┐
//!                     │ channels: HashMap<Name, │
//!                     │   Channel {             │
//!                     │     ring: RingBuffer,   │
//!                     │     headers, generation │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!   [IngestSession]         [ViewerSession]         [ViewerSession]
//!   publish_packet()        read_next(cursor)       read_next(cursor)
//!         │                       │                       │
//!         └──► ring.append() ──► Notify ──► write_packet() ──► TCP
//! ```
//!
//! # Backpressure
//!
//! Publishers never wait for viewers. A viewer that falls behind the ring's oldest
//! packet is moved forward to the next keyframe and told how many packets it lost.
//!
//! # Zero-Copy Design
//!
//! Payloads are `bytes::Bytes`; handing a packet to a viewer clones a reference count,
//! not the media data.

pub mod channel;
pub mod config;
pub mod error;
pub mod store;

pub use channel::{
    BlockingPolicy, Channel, ChannelState, ChannelStats, PublishToken, ReadEvent, Skipped,
    ViewerCursor,
};
pub use config::RelayConfig;
pub use error::RelayError;
pub use store::{ChannelRef, ChannelRegistry};
