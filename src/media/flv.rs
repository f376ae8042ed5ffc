//! FLV tag framing
//!
//! Publishers and viewers speak a plain FLV byte stream after the request line.
//! The relay only looks at the first byte or two of each tag body to classify it;
//! codec payloads are passed through untouched.
//!
//! File header and tag layout:
//! ```text
//! +-----+---------+-------+------------+------------------+
//! | FLV | Ver(1)  | Flags | Offset(4)  | PrevTagSize0(4)  |
//! +-----+---------+-------+------------+------------------+
//!
//! +---------+-------------+----------------+-------------+---------+-------------+
//! | Type(1) | DataSize(3) | TS(3) TSExt(1) | StreamID(3) | Data(N) | PrevSize(4) |
//! +---------+-------------+----------------+-------------+---------+-------------+
//! ```
//!
//! Video tag bodies start with `FrameType(4 bits) | CodecID(4 bits)`, audio tag bodies
//! with `SoundFormat(4 bits) | rate/size/type(4 bits)`.

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the FLV file header, excluding PreviousTagSize0
pub const FILE_HEADER_SIZE: usize = 9;

/// Size of a tag header
pub const TAG_HEADER_SIZE: usize = 11;

const FLAG_AUDIO: u8 = 0x04;
const FLAG_VIDEO: u8 = 0x01;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    pub fn from_byte(b: u8) -> Option<Self> {
        // Upper bits carry the filter/reserved flags
        match b & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::Script => 18,
        }
    }
}

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    Keyframe = 1,
    InterFrame = 2,
    DisposableInterFrame = 3,
    /// Reserved for server use
    GeneratedKeyframe = 4,
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe
        )
    }
}

/// Video codec ID (lower 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263 = 2,
    ScreenVideo = 3,
    Vp6 = 4,
    Vp6Alpha = 5,
    ScreenVideoV2 = 6,
    Avc = 7,
    Hevc = 12,
    Av1 = 13,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            12 => Some(VideoCodec::Hevc),
            13 => Some(VideoCodec::Av1),
            _ => None,
        }
    }

    /// Codecs whose first tag carries a decoder configuration record
    fn has_config_record(&self) -> bool {
        matches!(self, VideoCodec::Avc | VideoCodec::Hevc | VideoCodec::Av1)
    }
}

/// Audio format (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    LinearPcmPlatform = 0,
    Adpcm = 1,
    Mp3 = 2,
    LinearPcmLe = 3,
    Nellymoser16kMono = 4,
    Nellymoser8kMono = 5,
    Nellymoser = 6,
    G711ALaw = 7,
    G711MuLaw = 8,
    Aac = 10,
    Speex = 11,
    Mp38k = 14,
    DeviceSpecific = 15,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            4 => Some(AudioFormat::Nellymoser16kMono),
            5 => Some(AudioFormat::Nellymoser8kMono),
            6 => Some(AudioFormat::Nellymoser),
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            14 => Some(AudioFormat::Mp38k),
            15 => Some(AudioFormat::DeviceSpecific),
            _ => None,
        }
    }
}

/// FLV file header flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlvFileHeader {
    pub has_audio: bool,
    pub has_video: bool,
}

impl FlvFileHeader {
    /// Parse the 9-byte file header
    ///
    /// Returns the header and the data offset it declares. `None` if the signature is wrong.
    pub fn parse(buf: &[u8; FILE_HEADER_SIZE]) -> Option<(Self, u32)> {
        if &buf[0..3] != b"FLV" {
            return None;
        }
        let flags = buf[4];
        let offset = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
        if (offset as usize) < FILE_HEADER_SIZE {
            return None;
        }
        let header = Self {
            has_audio: flags & FLAG_AUDIO != 0,
            has_video: flags & FLAG_VIDEO != 0,
        };
        Some((header, offset))
    }

    /// Encode the file header followed by PreviousTagSize0
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0;
        if self.has_audio {
            flags |= FLAG_AUDIO;
        }
        if self.has_video {
            flags |= FLAG_VIDEO;
        }
        buf.put_slice(b"FLV");
        buf.put_u8(1);
        buf.put_u8(flags);
        buf.put_u32(FILE_HEADER_SIZE as u32);
        buf.put_u32(0);
    }
}

/// Decoded tag header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlvTagHeader {
    /// `None` for tag types the relay does not carry
    pub tag_type: Option<FlvTagType>,
    pub data_size: u32,
    pub timestamp: u32,
}

impl FlvTagHeader {
    pub fn parse(buf: &[u8; TAG_HEADER_SIZE]) -> Self {
        let data_size = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[7], buf[4], buf[5], buf[6]]);
        Self {
            tag_type: FlvTagType::from_byte(buf[0]),
            data_size,
            timestamp,
        }
    }
}

/// Parsed FLV tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Raw tag body (including codec headers)
    pub data: Bytes,
}

impl FlvTag {
    pub fn new(tag_type: FlvTagType, timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type,
            timestamp,
            data,
        }
    }

    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Video, timestamp, data)
    }

    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Audio, timestamp, data)
    }

    pub fn script(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Script, timestamp, data)
    }

    pub fn is_video(&self) -> bool {
        self.tag_type == FlvTagType::Video
    }

    pub fn is_audio(&self) -> bool {
        self.tag_type == FlvTagType::Audio
    }

    pub fn is_script(&self) -> bool {
        self.tag_type == FlvTagType::Script
    }

    pub fn video_frame_type(&self) -> Option<VideoFrameType> {
        if self.is_video() && !self.data.is_empty() {
            VideoFrameType::from_byte(self.data[0])
        } else {
            None
        }
    }

    pub fn video_codec(&self) -> Option<VideoCodec> {
        if self.is_video() && !self.data.is_empty() {
            VideoCodec::from_byte(self.data[0])
        } else {
            None
        }
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        if self.is_audio() && !self.data.is_empty() {
            AudioFormat::from_byte(self.data[0])
        } else {
            None
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.video_frame_type()
            .map(|ft| ft.is_keyframe())
            .unwrap_or(false)
    }

    /// Video decoder configuration record (AVC/HEVC/AV1, packet type 0)
    pub fn is_video_sequence_header(&self) -> bool {
        if self.is_video() && self.data.len() >= 2 {
            VideoCodec::from_byte(self.data[0])
                .map(|c| c.has_config_record())
                .unwrap_or(false)
                && self.data[1] == 0
        } else {
            false
        }
    }

    /// AAC AudioSpecificConfig (packet type 0)
    pub fn is_aac_sequence_header(&self) -> bool {
        if self.is_audio() && self.data.len() >= 2 {
            let format = AudioFormat::from_byte(self.data[0]);
            format == Some(AudioFormat::Aac) && self.data[1] == 0
        } else {
            false
        }
    }

    /// Whether this tag belongs in a stream's header set rather than its packet flow
    pub fn is_header(&self) -> bool {
        self.is_script() || self.is_video_sequence_header() || self.is_aac_sequence_header()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Encode the tag header, body and trailing PreviousTagSize
    pub fn encode(&self, buf: &mut BytesMut) {
        let size = self.data.len() as u32;
        let ts = self.timestamp.to_be_bytes();
        buf.reserve(TAG_HEADER_SIZE + self.data.len() + 4);
        buf.put_u8(self.tag_type.to_byte());
        buf.put_slice(&size.to_be_bytes()[1..]);
        buf.put_slice(&ts[1..]);
        buf.put_u8(ts[0]);
        buf.put_slice(&[0, 0, 0]);
        buf.put_slice(&self.data);
        buf.put_u32(TAG_HEADER_SIZE as u32 + size);
    }
}

/// Script tag body announcing a gap in the outgoing stream
///
/// AMF0: string "onDiscontinuity" followed by the number of skipped packets.
pub fn discontinuity_body(skipped: u64) -> Bytes {
    const NAME: &[u8] = b"onDiscontinuity";
    let mut buf = BytesMut::with_capacity(3 + NAME.len() + 9);
    buf.put_u8(0x02);
    buf.put_u16(NAME.len() as u16);
    buf.put_slice(NAME);
    buf.put_u8(0x00);
    buf.put_f64(skipped as f64);
    buf.freeze()
}
