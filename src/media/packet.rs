//! Relay packet and header types
//!
//! These are the units that flow from an ingest session through a channel to viewers.
//! Payloads are `Bytes`, so every viewer shares the publisher's allocation.

use bytes::Bytes;

use super::flv::{FlvTag, FlvTagType};

/// Track a packet or header belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
    /// Script data (onMetaData and friends)
    Data,
}

impl TrackKind {
    pub(crate) fn from_tag_type(tag_type: FlvTagType) -> Self {
        match tag_type {
            FlvTagType::Video => TrackKind::Video,
            FlvTagType::Audio => TrackKind::Audio,
            FlvTagType::Script => TrackKind::Data,
        }
    }

    pub(crate) fn tag_type(&self) -> FlvTagType {
        match self {
            TrackKind::Video => FlvTagType::Video,
            TrackKind::Audio => FlvTagType::Audio,
            TrackKind::Data => FlvTagType::Script,
        }
    }
}

/// Codec parameters for one track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackHeader {
    pub kind: TrackKind,
    /// Opaque codec configuration (e.g. AVCDecoderConfigurationRecord tag body)
    pub data: Bytes,
}

impl TrackHeader {
    pub fn new(kind: TrackKind, data: Bytes) -> Self {
        Self { kind, data }
    }

    pub(crate) fn from_flv_tag(tag: &FlvTag) -> Self {
        Self::new(TrackKind::from_tag_type(tag.tag_type), tag.data.clone())
    }

    pub(crate) fn to_flv_tag(&self) -> FlvTag {
        FlvTag::new(self.kind.tag_type(), 0, self.data.clone())
    }
}

/// Ordered per-track codec parameters, fixed for one publish generation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    tracks: Vec<TrackHeader>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a track header, keeping arrival order
    ///
    /// A repeated header for the same track kind replaces the earlier one in place.
    pub fn push(&mut self, header: TrackHeader) {
        match self.tracks.iter_mut().find(|t| t.kind == header.kind) {
            Some(existing) => *existing = header,
            None => self.tracks.push(header),
        }
    }

    pub fn tracks(&self) -> &[TrackHeader] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Video)
    }

    pub fn has_audio(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Audio)
    }
}

impl FromIterator<TrackHeader> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = TrackHeader>>(iter: I) -> Self {
        let mut set = HeaderSet::new();
        for header in iter {
            set.push(header);
        }
        set
    }
}

/// A published media packet
///
/// `sequence` is zero until the channel accepts the packet and stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence: u64,
    pub track: TrackKind,
    /// Presentation timestamp in milliseconds
    pub timestamp: u32,
    pub is_keyframe: bool,
    pub data: Bytes,
}

impl Packet {
    /// Create an unsequenced packet
    pub fn new(track: TrackKind, timestamp: u32, is_keyframe: bool, data: Bytes) -> Self {
        Self {
            sequence: 0,
            track,
            timestamp,
            is_keyframe,
            data,
        }
    }

    pub fn video(timestamp: u32, is_keyframe: bool, data: Bytes) -> Self {
        Self::new(TrackKind::Video, timestamp, is_keyframe, data)
    }

    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self::new(TrackKind::Audio, timestamp, false, data)
    }

    /// Convert from an FLV tag
    ///
    /// When the stream carries no video, every audio frame is treated as a join point.
    pub(crate) fn from_flv_tag(tag: FlvTag, audio_only: bool) -> Self {
        let is_keyframe = match tag.tag_type {
            FlvTagType::Video => tag.is_keyframe(),
            FlvTagType::Audio => audio_only,
            FlvTagType::Script => false,
        };
        Self::new(
            TrackKind::from_tag_type(tag.tag_type),
            tag.timestamp,
            is_keyframe,
            tag.data,
        )
    }

    pub(crate) fn to_flv_tag(&self) -> FlvTag {
        FlvTag::new(self.track.tag_type(), self.timestamp, self.data.clone())
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_set_replaces_same_kind() {
        let mut set = HeaderSet::new();
        set.push(TrackHeader::new(TrackKind::Video, Bytes::from_static(&[0x17, 0x00, 0x01])));
        set.push(TrackHeader::new(TrackKind::Audio, Bytes::from_static(&[0xAF, 0x00])));
        set.push(TrackHeader::new(TrackKind::Video, Bytes::from_static(&[0x17, 0x00, 0x02])));

        assert_eq!(set.len(), 2);
        assert_eq!(set.tracks()[0].kind, TrackKind::Video);
        assert_eq!(set.tracks()[0].data.as_ref(), &[0x17, 0x00, 0x02]);
        assert!(set.has_video());
        assert!(set.has_audio());
    }

    #[test]
    fn test_packet_from_video_tag() {
        let tag = FlvTag::video(40, Bytes::from_static(&[0x17, 0x01, 0x00]));
        let packet = Packet::from_flv_tag(tag, false);

        assert_eq!(packet.track, TrackKind::Video);
        assert_eq!(packet.timestamp, 40);
        assert!(packet.is_keyframe);
        assert_eq!(packet.sequence, 0);
    }

    #[test]
    fn test_audio_keyframe_only_without_video() {
        let tag = FlvTag::audio(10, Bytes::from_static(&[0xAF, 0x01]));
        assert!(!Packet::from_flv_tag(tag.clone(), false).is_keyframe);
        assert!(Packet::from_flv_tag(tag, true).is_keyframe);
    }

    #[test]
    fn test_packet_tag_round_trip_keeps_type() {
        let packet = Packet::audio(99, Bytes::from_static(&[0xAF, 0x01, 0x21]));
        let tag = packet.to_flv_tag();
        assert_eq!(tag.tag_type, FlvTagType::Audio);
        assert_eq!(tag.timestamp, 99);
    }
}
