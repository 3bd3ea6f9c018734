//! Append-only message log with per-channel views.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::channel::normalize_channel;
use crate::event::{ChatMessage, MessageDraft};

#[derive(Default)]
struct LogInner {
    messages: VecDeque<Arc<ChatMessage>>,
    next_seq: u64,
    /// 0 = unbounded.
    max_messages: usize,
}

/// Ordered sequence of every ingested message.
///
/// Cloning shares the same log. Only the pipeline appends; readers take
/// snapshots or lazy per-channel views.
#[derive(Clone, Default)]
pub struct MessageLog {
    inner: Arc<RwLock<LogInner>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log that keeps only the newest `max_messages` entries (0 = all).
    pub fn bounded(max_messages: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LogInner {
                max_messages,
                ..LogInner::default()
            })),
        }
    }

    pub(crate) fn append(&self, draft: MessageDraft, received_at: i64) -> Arc<ChatMessage> {
        let mut inner = self.inner.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let msg = Arc::new(draft.into_message(seq, received_at));
        inner.messages.push_back(Arc::clone(&msg));
        if inner.max_messages > 0 {
            while inner.messages.len() > inner.max_messages {
                inner.messages.pop_front();
            }
        }
        msg
    }

    /// Snapshot of the whole log in arrival order.
    pub fn all(&self) -> Vec<Arc<ChatMessage>> {
        self.inner.read().messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().messages.is_empty()
    }

    /// View of the messages for one channel. `"Foo"` and `"#foo"` give the
    /// same view.
    pub fn for_channel(&self, name: &str) -> ChannelView {
        ChannelView {
            log: self.clone(),
            channel: normalize_channel(name),
        }
    }
}

/// Per-channel projection of the log, recomputed on every [`iter`](Self::iter).
#[derive(Clone)]
pub struct ChannelView {
    log: MessageLog,
    channel: String,
}

impl ChannelView {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Start a fresh scan over the log.
    ///
    /// The scan is bounded by the log length at call time, so messages
    /// appended mid-iteration show up on the next call rather than this one.
    pub fn iter(&self) -> ChannelIter {
        let end_seq = self.log.inner.read().next_seq;
        ChannelIter {
            log: self.log.clone(),
            channel: self.channel.clone(),
            cursor: 0,
            end_seq,
        }
    }

    pub fn to_vec(&self) -> Vec<Arc<ChatMessage>> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &'a ChannelView {
    type Item = Arc<ChatMessage>;
    type IntoIter = ChannelIter;

    fn into_iter(self) -> ChannelIter {
        self.iter()
    }
}

/// Lazy iterator behind [`ChannelView::iter`]; holds the lock only inside `next`.
pub struct ChannelIter {
    log: MessageLog,
    channel: String,
    /// Next sequence number to consider.
    cursor: u64,
    end_seq: u64,
}

impl Iterator for ChannelIter {
    type Item = Arc<ChatMessage>;

    fn next(&mut self) -> Option<Arc<ChatMessage>> {
        if self.cursor >= self.end_seq {
            return None;
        }
        let inner = self.log.inner.read();
        let front_seq = inner.messages.front()?.seq;
        let start = self.cursor.saturating_sub(front_seq) as usize;
        for msg in inner.messages.iter().skip(start) {
            if msg.seq >= self.end_seq {
                break;
            }
            if msg.channel == self.channel {
                self.cursor = msg.seq + 1;
                return Some(Arc::clone(msg));
            }
        }
        self.cursor = self.end_seq;
        None
    }
}
