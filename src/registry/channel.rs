//! Channel state machine
//!
//! A channel owns one ring buffer, the header set of the current publish, and the
//! bookkeeping for attached viewers.
//!
//! ```text
//!            begin_publish                 begin_publish (preempt)
//!   Idle ──────────────────► Live ◄──────────────────────┐
//!    ▲                         │ └──────────────────────────┘
//!    └──────── end_publish ────┘
//!    │
//!    └── registry discards (no refs) ──► Closed
//! ```
//!
//! Every publish starts a new generation. A [`PublishToken`] is only valid for the
//! generation it was issued in; once another publisher takes over, the old token's
//! writes fail with [`RelayError::StaleGeneration`] and its preemption signal fires.
//!
//! An ended generation keeps its ring until the next publish. Its viewers drain what is
//! still retained and then see end-of-stream; new viewers are refused straight away.
//!
//! All mutable state sits behind one mutex that is never held across an await point.
//! Viewers waiting for data park on a [`Notify`] that every publish, end and preemption
//! wakes.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::media::{HeaderSet, Packet, RingBuffer};

use super::error::RelayError;

/// Lifecycle state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No publisher
    Idle,
    /// A publisher holds the current generation
    Live,
    /// Discarded by the registry
    Closed,
}

/// Write capability for one publish generation
#[derive(Debug, Clone)]
pub struct PublishToken {
    generation: u64,
    preempted: CancellationToken,
}

impl PublishToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Resolves once another publisher has taken over this generation
    pub async fn preempted(&self) {
        self.preempted.cancelled().await
    }

    pub fn is_preempted(&self) -> bool {
        self.preempted.is_cancelled()
    }
}

/// A viewer's read position
#[derive(Debug)]
pub struct ViewerCursor {
    id: u64,
    generation: u64,
    /// Next sequence to deliver
    next: u64,
    /// Drop packets until a keyframe shows up
    awaiting_keyframe: bool,
    /// Packets lost since the last delivery
    skipped: u64,
    /// Whether anything has been delivered yet
    delivered: bool,
}

impl ViewerCursor {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Sequence this cursor will read next
    pub fn next_sequence(&self) -> u64 {
        self.next
    }
}

/// Number of packets a viewer lost to backpressure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Skipped(pub u64);

/// Outcome of [`Channel::read_next`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// Next packet, with a skip indicator if data was lost before it
    Packet {
        packet: Packet,
        skipped: Option<Skipped>,
    },
    /// The generation this cursor belongs to is over
    EndOfStream,
    /// Nothing new yet (non-blocking read or timeout elapsed)
    WouldBlock,
}

/// How [`Channel::read_next`] behaves when no packet is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingPolicy {
    NonBlocking,
    Block,
    Timeout(Duration),
}

/// Point-in-time view of a channel
#[derive(Debug, Clone)]
pub struct ChannelStats {
    pub name: String,
    pub state: ChannelState,
    pub generation: u64,
    pub viewer_count: usize,
    pub buffered_packets: usize,
    pub buffered_bytes: usize,
    pub oldest_sequence: Option<u64>,
    pub newest_sequence: Option<u64>,
    pub latest_keyframe: Option<u64>,
    /// Time since the current generation went live
    pub live_for: Option<Duration>,
}

struct ChannelInner {
    state: ChannelState,
    /// Last generation issued
    generation: u64,
    headers: Option<HeaderSet>,
    ring: RingBuffer,
    next_sequence: u64,
    viewers: HashSet<u64>,
    next_viewer_id: u64,
    preempt: CancellationToken,
    live_since: Option<Instant>,
    /// Last sequence of a generation that ended normally
    ended_at: Option<u64>,
}

/// A named live broadcast
pub struct Channel {
    name: String,
    inner: Mutex<ChannelInner>,
    notify: Notify,
}

impl Channel {
    /// Create an idle channel retaining up to `ring_capacity` packets
    pub fn new(name: impl Into<String>, ring_capacity: usize) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(ChannelInner {
                state: ChannelState::Idle,
                generation: 0,
                headers: None,
                ring: RingBuffer::new(ring_capacity),
                next_sequence: 1,
                viewers: HashSet::new(),
                next_viewer_id: 1,
                preempt: CancellationToken::new(),
                live_since: None,
                ended_at: None,
            }),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChannelState {
        self.inner.lock().state
    }

    pub fn is_idle(&self) -> bool {
        self.state() == ChannelState::Idle
    }

    /// Current (or last) generation number
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn viewer_count(&self) -> usize {
        self.inner.lock().viewers.len()
    }

    /// Header set of the live generation
    pub fn headers(&self) -> Option<HeaderSet> {
        self.inner.lock().headers.clone()
    }

    /// Start a new publish generation
    ///
    /// A live publisher is preempted: its token goes stale, its preemption signal fires,
    /// and viewers of its generation see end-of-stream.
    pub fn begin_publish(&self, headers: HeaderSet) -> Result<PublishToken, RelayError> {
        if headers.is_empty() {
            return Err(RelayError::HeaderNegotiationFailed(format!(
                "{}: empty header set",
                self.name
            )));
        }

        let (token, preempted) = {
            let mut inner = self.inner.lock();
            if inner.state == ChannelState::Closed {
                return Err(RelayError::ChannelClosed(self.name.clone()));
            }

            let preempted = (inner.state == ChannelState::Live).then_some(inner.generation);
            inner.preempt.cancel();

            inner.generation += 1;
            inner.preempt = CancellationToken::new();
            inner.state = ChannelState::Live;
            inner.headers = Some(headers);
            inner.ring.clear();
            inner.next_sequence = 1;
            inner.live_since = Some(Instant::now());
            inner.ended_at = None;

            let token = PublishToken {
                generation: inner.generation,
                preempted: inner.preempt.clone(),
            };
            (token, preempted)
        };

        self.notify.notify_waiters();

        match preempted {
            Some(old) => tracing::info!(
                channel = %self.name,
                old_generation = old,
                generation = token.generation,
                "Publisher preempted"
            ),
            None => tracing::info!(
                channel = %self.name,
                generation = token.generation,
                "Channel live"
            ),
        }

        Ok(token)
    }

    /// Append a packet to the live generation
    ///
    /// Returns the sequence number assigned. Never waits on viewers.
    pub fn publish_packet(
        &self,
        token: &PublishToken,
        mut packet: Packet,
    ) -> Result<u64, RelayError> {
        let seq = {
            let mut inner = self.inner.lock();
            if inner.state != ChannelState::Live || inner.generation != token.generation {
                return Err(RelayError::StaleGeneration);
            }
            let seq = inner.next_sequence;
            inner.next_sequence += 1;
            packet.sequence = seq;
            inner.ring.append(packet);
            seq
        };

        self.notify.notify_waiters();
        Ok(seq)
    }

    /// End the publish generation held by `token`
    ///
    /// Returns false (and changes nothing) if that generation was already superseded.
    /// Packets already published stay readable by the generation's viewers.
    pub fn end_publish(&self, token: &PublishToken) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state != ChannelState::Live || inner.generation != token.generation {
                return false;
            }
            inner.state = ChannelState::Idle;
            inner.headers = None;
            inner.live_since = None;
            inner.ended_at = Some(inner.next_sequence - 1);
            inner.preempt.cancel();
        }

        self.notify.notify_waiters();
        tracing::info!(
            channel = %self.name,
            generation = token.generation,
            "Channel idle"
        );
        true
    }

    /// Attach a viewer to the live generation
    ///
    /// The cursor starts at the latest retained keyframe. Without one, it starts after
    /// the newest packet and waits for the first keyframe.
    pub fn attach_viewer(&self) -> Result<(HeaderSet, ViewerCursor), RelayError> {
        let mut inner = self.inner.lock();
        let headers = match (&inner.state, &inner.headers) {
            (ChannelState::Live, Some(headers)) => headers.clone(),
            _ => return Err(RelayError::ChannelNotLive(self.name.clone())),
        };

        let id = inner.next_viewer_id;
        inner.next_viewer_id += 1;
        inner.viewers.insert(id);

        let keyframe = inner.ring.latest_keyframe_sequence();
        let cursor = ViewerCursor {
            id,
            generation: inner.generation,
            next: keyframe.unwrap_or(inner.next_sequence),
            awaiting_keyframe: keyframe.is_none(),
            skipped: 0,
            delivered: false,
        };

        tracing::info!(
            channel = %self.name,
            viewer = id,
            generation = cursor.generation,
            start = cursor.next,
            viewers = inner.viewers.len(),
            "Viewer attached"
        );

        Ok((headers, cursor))
    }

    /// Remove a viewer; safe to call more than once
    pub fn detach_viewer(&self, cursor: &ViewerCursor) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.viewers.remove(&cursor.id);
        if removed {
            tracing::info!(
                channel = %self.name,
                viewer = cursor.id,
                viewers = inner.viewers.len(),
                "Viewer detached"
            );
        }
        removed
    }

    /// Read the next packet for `cursor`
    ///
    /// A cursor whose position was overwritten jumps to the next retained keyframe (or
    /// the next keyframe to arrive), and the packet it lands on carries a [`Skipped`].
    pub async fn read_next(&self, cursor: &mut ViewerCursor, policy: BlockingPolicy) -> ReadEvent {
        let deadline = match policy {
            BlockingPolicy::Timeout(d) => Some(tokio::time::Instant::now() + d),
            _ => None,
        };

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a publish between the check and the await
            // still wakes us
            notified.as_mut().enable();

            match self.poll_next(cursor) {
                ReadEvent::WouldBlock => {}
                event => return event,
            }

            match (policy, deadline) {
                (BlockingPolicy::NonBlocking, _) => return ReadEvent::WouldBlock,
                (BlockingPolicy::Timeout(_), Some(deadline)) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return ReadEvent::WouldBlock;
                    }
                }
                _ => notified.await,
            }
        }
    }

    fn poll_next(&self, cursor: &mut ViewerCursor) -> ReadEvent {
        let inner = self.inner.lock();
        if inner.generation != cursor.generation || !inner.viewers.contains(&cursor.id) {
            return ReadEvent::EndOfStream;
        }

        // Past the end of a finished generation nothing more will arrive
        let last = match (inner.state, inner.ended_at) {
            (ChannelState::Live, _) => None,
            (ChannelState::Idle, Some(last)) => Some(last),
            _ => return ReadEvent::EndOfStream,
        };

        let ring = &inner.ring;
        loop {
            if last.is_some_and(|last| cursor.next > last) {
                return ReadEvent::EndOfStream;
            }

            if let Some(oldest) = ring.oldest_sequence() {
                if cursor.next < oldest && ring.get(cursor.next).is_none() {
                    let target = ring.next_keyframe_from(cursor.next);
                    let resume = target.unwrap_or(inner.next_sequence);
                    tracing::debug!(
                        channel = %self.name,
                        viewer = cursor.id,
                        from = cursor.next,
                        to = resume,
                        "Viewer fell behind, skipping"
                    );
                    cursor.skipped += resume - cursor.next;
                    cursor.next = resume;
                    cursor.awaiting_keyframe = target.is_none();
                }
            }

            let Some(packet) = ring.get(cursor.next) else {
                if last.is_some() {
                    return ReadEvent::EndOfStream;
                }
                return ReadEvent::WouldBlock;
            };

            if cursor.awaiting_keyframe && !packet.is_keyframe {
                cursor.skipped += 1;
                cursor.next += 1;
                continue;
            }

            let skipped = (cursor.delivered && cursor.skipped > 0).then_some(Skipped(cursor.skipped));
            cursor.awaiting_keyframe = false;
            cursor.skipped = 0;
            cursor.delivered = true;
            cursor.next += 1;

            return ReadEvent::Packet {
                packet: packet.clone(),
                skipped,
            };
        }
    }

    /// Snapshot of the channel's state
    pub fn stats(&self) -> ChannelStats {
        let inner = self.inner.lock();
        ChannelStats {
            name: self.name.clone(),
            state: inner.state,
            generation: inner.generation,
            viewer_count: inner.viewers.len(),
            buffered_packets: inner.ring.len(),
            buffered_bytes: inner.ring.size(),
            oldest_sequence: inner.ring.oldest_sequence(),
            newest_sequence: inner.ring.newest_sequence(),
            latest_keyframe: inner.ring.latest_keyframe_sequence(),
            live_for: inner.live_since.map(|t| t.elapsed()),
        }
    }

    /// Mark the channel discarded; only an idle channel can be closed
    pub(super) fn close(&self) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state != ChannelState::Idle {
                return false;
            }
            inner.state = ChannelState::Closed;
            inner.viewers.clear();
            inner.ring.clear();
            inner.ended_at = None;
        }
        self.notify.notify_waiters();
        true
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
