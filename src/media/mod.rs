//! Media handling for the relay
//!
//! This module provides:
//! - FLV tag framing and classification
//! - Packet and header set types shared by publishers and viewers
//! - The keyframe-aware ring buffer behind every channel

pub mod flv;
pub mod packet;
pub mod ring;

pub use flv::{FlvFileHeader, FlvTag, FlvTagType};
pub use packet::{HeaderSet, Packet, TrackHeader, TrackKind};
pub use ring::RingBuffer;
