//! Connection lifecycle and message ingestion core for a multi-channel chat
//! relay client.
//!
//! The presentation layer feeds channel-set and credential changes into a
//! [`RelayHandle`], reads the [`MessageLog`] and the lifecycle status, and
//! sends messages through the handle. The wire protocol is supplied by the
//! embedding application as a [`ClientFactory`].

pub mod channel;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod log;
pub mod pipeline;

pub use channel::{ChannelEntry, ConnectionConfig, Credentials, Identity, normalize_channel};
pub use client::{ChatClient, ClientEvent, ClientFactory, MessageTags};
pub use config::RelayConfig;
pub use envelope::{EventEnvelope, RelayEvent};
pub use error::RelayError;
pub use event::ChatMessage;
pub use lifecycle::{ConnectionState, LifecycleStatus, RelayHandle, RelayManager, spawn};
pub use log::{ChannelView, MessageLog};
pub use pipeline::Pipeline;
