//! Message ingestion pipeline: the only writer of the [`MessageLog`].

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::client::MessageTags;
use crate::envelope::{EventEnvelope, RelayEvent};
use crate::event::{ChatMessage, normalize_message};
use crate::lifecycle::LifecycleStatus;
use crate::log::MessageLog;

pub struct Pipeline {
    log: MessageLog,
    events: broadcast::Sender<EventEnvelope>,
    next_seq: u64,
}

impl Pipeline {
    /// `capacity` bounds how far a slow presentation subscriber may lag
    /// before it starts missing envelopes. The log itself is unaffected.
    pub fn new(log: MessageLog, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            log,
            events,
            next_seq: 0,
        }
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    pub(crate) fn sender(&self) -> broadcast::Sender<EventEnvelope> {
        self.events.clone()
    }

    /// Normalize one inbound message, append it, and notify subscribers.
    pub fn ingest(
        &mut self,
        channel: &str,
        tags: MessageTags,
        text: &str,
        is_self: bool,
    ) -> Arc<ChatMessage> {
        let draft = normalize_message(channel, tags, text, is_self);
        let msg = self
            .log
            .append(draft, chrono::Utc::now().timestamp_millis());
        tracing::trace!(channel = %msg.channel, seq = msg.seq, is_self, "Message ingested");
        self.emit(RelayEvent::Message((*msg).clone()));
        msg
    }

    pub fn publish_status(&mut self, status: &LifecycleStatus) {
        self.emit(RelayEvent::Status(status.clone()));
    }

    fn emit(&mut self, event: RelayEvent) {
        self.next_seq += 1;
        // No subscribers is fine: the log and the status watch still hold the data.
        let _ = self.events.send(EventEnvelope::new(self.next_seq, event));
    }
}
