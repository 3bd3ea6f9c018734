//! The chat protocol client capability consumed by the lifecycle manager.
//!
//! The wire protocol lives behind [`ChatClient`]. A [`ClientFactory`] builds
//! one client per connection attempt together with the receiver its events
//! arrive on; the manager never reuses a client across configs.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::channel::ConnectionConfig;

/// Per-message metadata reported by the chat service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageTags {
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub username: Option<String>,
    /// Every other tag, passed through untouched.
    pub extra: HashMap<String, String>,
}

impl MessageTags {
    /// Split a raw IRCv3 tag map into the well-known fields and the rest.
    pub fn from_irc(mut tags: HashMap<String, String>) -> Self {
        let display_name = tags.remove("display-name");
        let color = tags.remove("color");
        let username = tags.remove("username").or_else(|| tags.remove("login"));
        Self {
            display_name,
            color,
            username,
            extra: tags,
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// Events a protocol client emits while it is alive.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection established and ready to receive.
    Connected,
    /// Connection closed. A reason containing "closed" means the close was
    /// requested locally.
    Disconnected { reason: String },
    /// A chat message in one of the joined channels.
    Message {
        channel: String,
        tags: MessageTags,
        text: String,
        is_self: bool,
    },
}

/// A live connection to the chat service.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Open the connection and join the configured channels.
    async fn connect(&self) -> Result<()>;

    /// Close the connection. Called at most once per client, during teardown.
    async fn disconnect(&self) -> Result<()>;

    /// Send `text` to `channel` (a normalized channel name).
    async fn send(&self, channel: &str, text: &str) -> Result<()>;
}

/// Builds a fresh client for a config.
///
/// The returned receiver carries that client's events; dropping it detaches
/// every listener the manager had on the client.
pub trait ClientFactory: Send + Sync + 'static {
    fn build(&self, config: &ConnectionConfig) -> (Arc<dyn ChatClient>, mpsc::Receiver<ClientEvent>);
}

impl<F> ClientFactory for F
where
    F: Fn(&ConnectionConfig) -> (Arc<dyn ChatClient>, mpsc::Receiver<ClientEvent>)
        + Send
        + Sync
        + 'static,
{
    fn build(&self, config: &ConnectionConfig) -> (Arc<dyn ChatClient>, mpsc::Receiver<ClientEvent>) {
        self(config)
    }
}
