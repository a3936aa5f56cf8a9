//! Per-session telemetry buffers.
//!
//! Each channel keeps an in-memory list of completed events plus the index of
//! the next batch to write. Taking batches swaps the lists out, so events
//! appended while a flush is in flight land in fresh buffers and go to the
//! next batch.

use std::collections::BTreeMap;

use reelproto::{Channel, ConsoleEvent, DomEvent, NetworkEvent, SessionId};
use serde::{Deserialize, Serialize};

use crate::keys::batch_key;

/// A completed telemetry record on any channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryEvent {
    Network(NetworkEvent),
    Console(ConsoleEvent),
    Dom(DomEvent),
}

impl TelemetryEvent {
    pub fn channel(&self) -> Channel {
        match self {
            TelemetryEvent::Network(_) => Channel::Network,
            TelemetryEvent::Console(_) => Channel::Console,
            TelemetryEvent::Dom(_) => Channel::Dom,
        }
    }

    pub fn video_offset(&self) -> i64 {
        match self {
            TelemetryEvent::Network(e) => e.video_offset,
            TelemetryEvent::Console(e) => e.video_offset,
            TelemetryEvent::Dom(e) => e.video_offset,
        }
    }
}

impl From<NetworkEvent> for TelemetryEvent {
    fn from(event: NetworkEvent) -> Self {
        TelemetryEvent::Network(event)
    }
}

impl From<ConsoleEvent> for TelemetryEvent {
    fn from(event: ConsoleEvent) -> Self {
        TelemetryEvent::Console(event)
    }
}

impl From<DomEvent> for TelemetryEvent {
    fn from(event: DomEvent) -> Self {
        TelemetryEvent::Dom(event)
    }
}

/// Events taken from one channel, bound to the batch index they will be
/// written under.
#[derive(Debug, Clone)]
pub struct Batch {
    pub session_id: SessionId,
    pub channel: Channel,
    pub batch_index: u64,
    pub events: Vec<TelemetryEvent>,
}

impl Batch {
    pub fn key(&self) -> String {
        batch_key(&self.session_id, self.channel, self.batch_index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Default)]
struct ChannelBuffer {
    events: Vec<TelemetryEvent>,
    next_index: u64,
}

/// Buffers for every channel of one session.
#[derive(Debug)]
pub struct TelemetryBuffers {
    channels: BTreeMap<Channel, ChannelBuffer>,
}

impl Default for TelemetryBuffers {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryBuffers {
    pub fn new() -> Self {
        let channels = Channel::ALL
            .iter()
            .map(|c| (*c, ChannelBuffer::default()))
            .collect();
        Self { channels }
    }

    /// Append an event to its channel. Returns the channel's buffered length.
    pub fn push(&mut self, event: TelemetryEvent) -> usize {
        let buffer = self.channel_mut(event.channel());
        buffer.events.push(event);
        buffer.events.len()
    }

    /// Buffered events on `channel`.
    pub fn len(&self, channel: Channel) -> usize {
        self.channels.get(&channel).map_or(0, |b| b.events.len())
    }

    pub fn total_len(&self) -> usize {
        self.channels.values().map(|b| b.events.len()).sum()
    }

    /// Whether any channel has reached `threshold`.
    pub fn any_at(&self, threshold: usize) -> bool {
        self.channels.values().any(|b| b.events.len() >= threshold)
    }

    /// Number of batches handed out so far per channel.
    pub fn batch_counts(&self) -> BTreeMap<Channel, u64> {
        self.channels
            .iter()
            .map(|(c, b)| (*c, b.next_index))
            .collect()
    }

    /// Swap out every non-empty channel, assigning each the next batch index.
    pub fn take_batches(&mut self, session_id: &SessionId) -> Vec<Batch> {
        let mut batches = Vec::new();
        for (channel, buffer) in self.channels.iter_mut() {
            if buffer.events.is_empty() {
                continue;
            }
            let events = std::mem::take(&mut buffer.events);
            batches.push(Batch {
                session_id: session_id.clone(),
                channel: *channel,
                batch_index: buffer.next_index,
                events,
            });
            buffer.next_index += 1;
        }
        batches
    }

    /// Put a batch that failed to write back at the front of its channel.
    ///
    /// The channel's next index rolls back to the failed batch's index, so the
    /// retry reuses it and no gap appears in the sequence. Only valid when no
    /// later batch for the channel was handed out, which the single-flight
    /// rule guarantees.
    pub fn restore(&mut self, batch: Batch) {
        let buffer = self.channel_mut(batch.channel);
        let mut events = batch.events;
        events.append(&mut buffer.events);
        buffer.events = events;
        buffer.next_index = batch.batch_index;
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut ChannelBuffer {
        self.channels.entry(channel).or_default()
    }
}
