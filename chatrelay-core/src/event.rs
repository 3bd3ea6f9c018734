//! Protocol event → canonical message record conversion.

use std::collections::HashMap;

use serde::Serialize;

use crate::channel::normalize_channel;
use crate::client::MessageTags;

/// Display name used when the service sends neither a display name nor a login.
const UNKNOWN_SENDER: &str = "unknown";

/// CTCP framing for `/me` actions: `\x01ACTION <body>\x01`.
const ACTION_PREFIX: &str = "\x01ACTION ";

/// A chat message as stored in the log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Log-assigned ordering key; strictly increasing in arrival order.
    pub seq: u64,
    /// Normalized channel name.
    pub channel: String,
    pub display_name: String,
    pub username: Option<String>,
    pub color: Option<String>,
    pub text: String,
    /// Echo of a message this client sent.
    pub is_self: bool,
    /// `/me` action; `text` holds the unwrapped action body.
    pub is_action: bool,
    /// Tags without a dedicated field.
    pub tags: HashMap<String, String>,
    /// UTC milliseconds at ingestion.
    pub received_at: i64,
}

/// A normalized message that has not been assigned its place in the log yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub channel: String,
    pub display_name: String,
    pub username: Option<String>,
    pub color: Option<String>,
    pub text: String,
    pub is_self: bool,
    pub is_action: bool,
    pub tags: HashMap<String, String>,
}

impl MessageDraft {
    pub(crate) fn into_message(self, seq: u64, received_at: i64) -> ChatMessage {
        ChatMessage {
            seq,
            channel: self.channel,
            display_name: self.display_name,
            username: self.username,
            color: self.color,
            text: self.text,
            is_self: self.is_self,
            is_action: self.is_action,
            tags: self.tags,
            received_at,
        }
    }
}

/// Normalize an inbound `message` event. Nothing is dropped: self-echoes
/// are kept and only flagged.
pub fn normalize_message(channel: &str, tags: MessageTags, text: &str, is_self: bool) -> MessageDraft {
    let (text, is_action) = match text
        .strip_prefix(ACTION_PREFIX)
        .and_then(|body| body.strip_suffix('\x01'))
    {
        Some(body) => (body.to_string(), true),
        None => (text.to_string(), false),
    };
    let username = tags.username.filter(|u| !u.is_empty());
    let display_name = tags
        .display_name
        .filter(|d| !d.trim().is_empty())
        .or_else(|| username.clone())
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
    MessageDraft {
        channel: normalize_channel(channel),
        display_name,
        username,
        color: tags.color.filter(|c| !c.is_empty()),
        text,
        is_self,
        is_action,
        tags: tags.extra,
    }
}
