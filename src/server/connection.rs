//! Connection framing
//!
//! A client opens with one request line, then speaks FLV:
//!
//! ```text
//! PUBLISH <channel> [publish-key]\n   then FLV file header + tags   (client -> server)
//! PLAY <channel>\n                    then FLV file header + tags   (server -> client)
//! ```
//!
//! Refused requests get `ERROR <reason>\n` and the connection is closed.

use std::io;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Error, Result};
use crate::media::flv::{
    discontinuity_body, FlvFileHeader, FlvTag, FlvTagHeader, FILE_HEADER_SIZE, TAG_HEADER_SIZE,
};
use crate::media::{HeaderSet, Packet, TrackHeader};
use crate::registry::{RelayError, Skipped};

/// Longest accepted request line, newline included
pub const MAX_REQUEST_LINE: usize = 1024;

/// Longest accepted channel name
pub const MAX_CHANNEL_NAME: usize = 128;

/// Header tags accepted before the first media tag
const MAX_HEADER_TAGS: usize = 16;

/// Largest FLV data offset accepted in a publisher's file header
const MAX_FILE_HEADER_OFFSET: u32 = 1024;

/// What a client asked for in its request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Publish {
        channel: String,
        key: Option<String>,
    },
    Play {
        channel: String,
    },
}

impl Request {
    /// Parse a request line (trailing newline optional)
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_ascii_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| Error::InvalidRequest("empty request".into()))?;
        let channel = parts
            .next()
            .ok_or_else(|| Error::InvalidRequest("missing channel name".into()))?;
        validate_channel_name(channel)?;

        let request = if verb.eq_ignore_ascii_case("PUBLISH") {
            Request::Publish {
                channel: channel.to_string(),
                key: parts.next().map(str::to_string),
            }
        } else if verb.eq_ignore_ascii_case("PLAY") {
            Request::Play {
                channel: channel.to_string(),
            }
        } else {
            return Err(Error::InvalidRequest(format!("unknown command {}", verb)));
        };

        if parts.next().is_some() {
            return Err(Error::InvalidRequest("unexpected trailing arguments".into()));
        }
        Ok(request)
    }

    pub fn channel(&self) -> &str {
        match self {
            Request::Publish { channel, .. } | Request::Play { channel } => channel,
        }
    }

    pub fn is_publish(&self) -> bool {
        matches!(self, Request::Publish { .. })
    }
}

fn validate_channel_name(name: &str) -> Result<()> {
    if name.len() > MAX_CHANNEL_NAME {
        return Err(Error::InvalidRequest("channel name too long".into()));
    }
    let valid = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if !valid {
        return Err(Error::InvalidRequest(format!(
            "invalid channel name {:?}",
            name
        )));
    }
    Ok(())
}

/// A client connection as seen by a session
///
/// Publisher sessions use the read half, viewer sessions the write half.
#[async_trait]
pub trait MediaConnection: Send {
    /// Read the publisher's codec configuration
    ///
    /// Fails with [`RelayError::HeaderNegotiationFailed`] if no header arrives before
    /// the first media packet.
    async fn negotiate_header(&mut self) -> Result<HeaderSet>;

    /// Next packet from the publisher, `None` on a clean end of stream
    async fn read_packet(&mut self) -> Result<Option<Packet>>;

    async fn write_header(&mut self, headers: &HeaderSet) -> Result<()>;

    async fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Tell the viewer that packets were dropped before the next one
    async fn write_discontinuity(&mut self, skipped: Skipped) -> Result<()>;

    /// Refuse the request with a reason the peer can read
    async fn reject(&mut self, reason: &str) -> Result<()>;

    /// Resolves once the peer hangs up
    async fn closed(&mut self) {
        std::future::pending::<()>().await
    }

    async fn close(&mut self) -> Result<()>;
}

/// [`MediaConnection`] speaking the request line plus FLV over any byte stream
pub struct FlvConnection<S> {
    stream: BufReader<S>,
    /// First media tag, read while collecting headers
    pending: Option<FlvTag>,
    /// Stream carries no video track
    audio_only: bool,
    write_buf: BytesMut,
    /// Timestamp of the last tag written, reused for discontinuity markers
    last_timestamp: u32,
}

impl<S> FlvConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            pending: None,
            audio_only: false,
            write_buf: BytesMut::with_capacity(64 * 1024),
            last_timestamp: 0,
        }
    }

    /// Read and parse the request line
    pub async fn read_request(&mut self) -> Result<Request> {
        let mut line = Vec::with_capacity(64);
        let n = (&mut self.stream)
            .take(MAX_REQUEST_LINE as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        if line.last() != Some(&b'\n') {
            return Err(Error::InvalidRequest(
                "request line too long or unterminated".into(),
            ));
        }

        let line = std::str::from_utf8(&line)
            .map_err(|_| Error::InvalidRequest("request line is not UTF-8".into()))?;
        Request::parse(line)
    }

    /// Read one tag, skipping tag types the relay does not carry
    async fn read_tag(&mut self) -> Result<Option<FlvTag>> {
        loop {
            let mut head = [0u8; TAG_HEADER_SIZE];
            if self.stream.read(&mut head[..1]).await? == 0 {
                return Ok(None);
            }
            self.stream.read_exact(&mut head[1..]).await?;
            let header = FlvTagHeader::parse(&head);

            let mut body = BytesMut::zeroed(header.data_size as usize);
            self.stream.read_exact(&mut body).await?;
            let mut prev_tag_size = [0u8; 4];
            self.stream.read_exact(&mut prev_tag_size).await?;

            match header.tag_type {
                Some(tag_type) => {
                    return Ok(Some(FlvTag::new(tag_type, header.timestamp, body.freeze())))
                }
                None => tracing::trace!(tag = head[0], "Skipping unknown FLV tag"),
            }
        }
    }

    async fn flush_buf(&mut self) -> Result<()> {
        self.stream.write_all(&self.write_buf).await?;
        self.write_buf.clear();
        self.stream.flush().await?;
        Ok(())
    }
}

fn negotiation_failed(reason: &str) -> Error {
    RelayError::HeaderNegotiationFailed(reason.to_string()).into()
}

#[async_trait]
impl<S> MediaConnection for FlvConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn negotiate_header(&mut self) -> Result<HeaderSet> {
        let mut head = [0u8; FILE_HEADER_SIZE];
        self.stream.read_exact(&mut head).await?;
        let (_, offset) =
            FlvFileHeader::parse(&head).ok_or_else(|| negotiation_failed("missing FLV signature"))?;
        if offset > MAX_FILE_HEADER_OFFSET {
            return Err(negotiation_failed("FLV header offset out of range"));
        }

        // Header extension bytes, then PreviousTagSize0
        let skip = (offset as usize - FILE_HEADER_SIZE) as u64 + 4;
        let skipped = tokio::io::copy(&mut (&mut self.stream).take(skip), &mut tokio::io::sink())
            .await?;
        if skipped != skip {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        let mut headers = HeaderSet::new();
        for _ in 0..MAX_HEADER_TAGS {
            match self.read_tag().await? {
                None => return Err(negotiation_failed("stream ended before first media tag")),
                Some(tag) if tag.is_header() => headers.push(TrackHeader::from_flv_tag(&tag)),
                Some(tag) => {
                    self.pending = Some(tag);
                    break;
                }
            }
        }

        if self.pending.is_none() {
            return Err(negotiation_failed("too many header tags"));
        }
        if headers.is_empty() {
            return Err(negotiation_failed("no codec configuration before media"));
        }

        self.audio_only = !headers.has_video();
        tracing::debug!(
            tracks = headers.len(),
            audio_only = self.audio_only,
            "Header negotiated"
        );
        Ok(headers)
    }

    async fn read_packet(&mut self) -> Result<Option<Packet>> {
        let tag = match self.pending.take() {
            Some(tag) => tag,
            None => match self.read_tag().await? {
                Some(tag) => tag,
                None => return Ok(None),
            },
        };
        Ok(Some(Packet::from_flv_tag(tag, self.audio_only)))
    }

    async fn write_header(&mut self, headers: &HeaderSet) -> Result<()> {
        FlvFileHeader {
            has_audio: headers.has_audio(),
            has_video: headers.has_video(),
        }
        .encode(&mut self.write_buf);
        for track in headers.tracks() {
            track.to_flv_tag().encode(&mut self.write_buf);
        }
        self.flush_buf().await
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        packet.to_flv_tag().encode(&mut self.write_buf);
        self.last_timestamp = packet.timestamp;
        self.flush_buf().await
    }

    async fn write_discontinuity(&mut self, skipped: Skipped) -> Result<()> {
        FlvTag::script(self.last_timestamp, discontinuity_body(skipped.0)).encode(&mut self.write_buf);
        self.flush_buf().await
    }

    async fn reject(&mut self, reason: &str) -> Result<()> {
        let line = format!("ERROR {}\n", reason.replace('\n', " "));
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn closed(&mut self) {
        let mut scratch = [0u8; 512];
        loop {
            match self.stream.read(&mut scratch).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::io::duplex;
    use tokio_test::io::Builder;

    use super::*;
    use crate::media::TrackKind;

    const AVC_CONFIG: &[u8] = &[0x17, 0x00, 0x00, 0x00, 0x00, 0x01, 0x64];
    const AAC_CONFIG: &[u8] = &[0xAF, 0x00, 0x12, 0x10];
    const KEYFRAME: &[u8] = &[0x17, 0x01, 0x00, 0x00, 0x00, 0xAA];
    const INTERFRAME: &[u8] = &[0x27, 0x01, 0x00, 0x00, 0x00, 0xBB];
    const AAC_FRAME: &[u8] = &[0xAF, 0x01, 0x21];

    fn flv_bytes(tags: &[FlvTag]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        FlvFileHeader {
            has_audio: true,
            has_video: true,
        }
        .encode(&mut buf);
        for tag in tags {
            tag.encode(&mut buf);
        }
        buf.to_vec()
    }

    /// Connection whose peer already sent `bytes` and hung up
    async fn connection_with(bytes: Vec<u8>) -> FlvConnection<tokio::io::DuplexStream> {
        let (mut client, server) = duplex(64 * 1024);
        client.write_all(&bytes).await.unwrap();
        drop(client);
        FlvConnection::new(server)
    }

    #[test]
    fn test_parse_publish() {
        let request = Request::parse("PUBLISH alice secret\n").unwrap();
        assert_eq!(
            request,
            Request::Publish {
                channel: "alice".into(),
                key: Some("secret".into()),
            }
        );
        assert!(request.is_publish());
        assert_eq!(request.channel(), "alice");
    }

    #[test]
    fn test_parse_publish_without_key() {
        let request = Request::parse("publish alice\r\n").unwrap();
        assert_eq!(
            request,
            Request::Publish {
                channel: "alice".into(),
                key: None,
            }
        );
    }

    #[test]
    fn test_parse_play() {
        let request = Request::parse("PLAY demo-1.hd\n").unwrap();
        assert_eq!(
            request,
            Request::Play {
                channel: "demo-1.hd".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        for line in [
            "",
            "PLAY",
            "STOP demo",
            "PLAY ../etc",
            "PLAY demo extra",
            "PUBLISH demo key extra",
        ] {
            assert!(
                matches!(Request::parse(line), Err(Error::InvalidRequest(_))),
                "accepted {:?}",
                line
            );
        }

        let long = format!("PLAY {}", "a".repeat(MAX_CHANNEL_NAME + 1));
        assert!(Request::parse(&long).is_err());
    }

    #[tokio::test]
    async fn test_read_request() {
        let mock = Builder::new().read(b"PLAY demo\n").build();
        let mut conn = FlvConnection::new(mock);

        let request = conn.read_request().await.unwrap();
        assert_eq!(request.channel(), "demo");
    }

    #[tokio::test]
    async fn test_read_request_too_long() {
        let mock = Builder::new().read(&[b'a'; 2000]).build();
        let mut conn = FlvConnection::new(mock);

        let result = conn.read_request().await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_read_request_eof() {
        let mut conn = connection_with(Vec::new()).await;
        let result = conn.read_request().await;
        assert!(matches!(result, Err(ref e) if e.is_benign()));
    }

    #[tokio::test]
    async fn test_negotiate_then_read_packets() {
        let bytes = flv_bytes(&[
            FlvTag::script(0, Bytes::from_static(&[0x02, 0x00, 0x0A])),
            FlvTag::video(0, Bytes::from_static(AVC_CONFIG)),
            FlvTag::audio(0, Bytes::from_static(AAC_CONFIG)),
            FlvTag::video(0, Bytes::from_static(KEYFRAME)),
            FlvTag::audio(10, Bytes::from_static(AAC_FRAME)),
            FlvTag::video(33, Bytes::from_static(INTERFRAME)),
        ]);
        let mut conn = connection_with(bytes).await;

        let headers = conn.negotiate_header().await.unwrap();
        assert_eq!(headers.len(), 3);
        assert!(headers.has_video());
        assert!(headers.has_audio());

        let first = conn.read_packet().await.unwrap().unwrap();
        assert_eq!(first.track, TrackKind::Video);
        assert!(first.is_keyframe);
        assert_eq!(first.data, Bytes::from_static(KEYFRAME));

        let audio = conn.read_packet().await.unwrap().unwrap();
        assert_eq!(audio.track, TrackKind::Audio);
        assert!(!audio.is_keyframe);
        assert_eq!(audio.timestamp, 10);

        let inter = conn.read_packet().await.unwrap().unwrap();
        assert!(!inter.is_keyframe);
        assert_eq!(inter.timestamp, 33);

        assert!(conn.read_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_audio_only_frames_are_keyframes() {
        let bytes = flv_bytes(&[
            FlvTag::audio(0, Bytes::from_static(AAC_CONFIG)),
            FlvTag::audio(0, Bytes::from_static(AAC_FRAME)),
        ]);
        let mut conn = connection_with(bytes).await;

        let headers = conn.negotiate_header().await.unwrap();
        assert!(!headers.has_video());

        let packet = conn.read_packet().await.unwrap().unwrap();
        assert!(packet.is_keyframe);
    }

    #[tokio::test]
    async fn test_negotiate_requires_signature() {
        let mut conn = connection_with(b"GARBAGE!!\0\0\0\0".to_vec()).await;
        let result = conn.negotiate_header().await;
        assert!(matches!(
            result,
            Err(Error::Relay(RelayError::HeaderNegotiationFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_negotiate_requires_headers() {
        let bytes = flv_bytes(&[FlvTag::video(0, Bytes::from_static(KEYFRAME))]);
        let mut conn = connection_with(bytes).await;

        let result = conn.negotiate_header().await;
        assert!(matches!(
            result,
            Err(Error::Relay(RelayError::HeaderNegotiationFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_negotiate_fails_without_media() {
        let bytes = flv_bytes(&[FlvTag::video(0, Bytes::from_static(AVC_CONFIG))]);
        let mut conn = connection_with(bytes).await;

        let result = conn.negotiate_header().await;
        assert!(matches!(
            result,
            Err(Error::Relay(RelayError::HeaderNegotiationFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_write_header_bytes() {
        let headers: HeaderSet = [TrackHeader::new(
            TrackKind::Audio,
            Bytes::from_static(AAC_CONFIG),
        )]
        .into_iter()
        .collect();

        let mut expected = BytesMut::new();
        FlvFileHeader {
            has_audio: true,
            has_video: false,
        }
        .encode(&mut expected);
        FlvTag::audio(0, Bytes::from_static(AAC_CONFIG)).encode(&mut expected);

        let mock = Builder::new().write(&expected).build();
        let mut conn = FlvConnection::new(mock);
        conn.write_header(&headers).await.unwrap();
    }

    #[tokio::test]
    async fn test_discontinuity_uses_last_timestamp() {
        let packet = Packet::audio(500, Bytes::from_static(AAC_FRAME));

        let mut expected = BytesMut::new();
        FlvTag::audio(500, Bytes::from_static(AAC_FRAME)).encode(&mut expected);
        FlvTag::script(500, discontinuity_body(7)).encode(&mut expected);

        let mock = Builder::new().write(&expected).build();
        let mut conn = FlvConnection::new(mock);
        conn.write_packet(&packet).await.unwrap();
        conn.write_discontinuity(Skipped(7)).await.unwrap();
    }

    #[tokio::test]
    async fn test_reject_writes_error_line() {
        let mock = Builder::new().write(b"ERROR channel not live\n").build();
        let mut conn = FlvConnection::new(mock);
        conn.reject("channel not live").await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_resolves_on_hangup() {
        let (client, server) = duplex(1024);
        let mut conn = FlvConnection::new(server);
        drop(client);

        tokio::time::timeout(std::time::Duration::from_secs(1), conn.closed())
            .await
            .unwrap();
    }
}
