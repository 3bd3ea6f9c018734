//! Channel-name normalization and connection-config derivation.
//!
//! Every comparison or storage of a channel name goes through
//! [`normalize_channel`]: the lifecycle manager uses it to decide whether a
//! reconnect is needed, the pipeline uses it to tag stored messages, and the
//! log uses it to filter per-channel views.

use std::collections::BTreeSet;

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

/// Prefix the chat service expects in front of an OAuth token used as a password.
const OAUTH_PREFIX: &str = "oauth:";

/// Normalize a channel name: trim, strip one leading `#`, lower-case.
pub fn normalize_channel(name: &str) -> String {
    let trimmed = name.trim();
    trimmed.strip_prefix('#').unwrap_or(trimmed).to_lowercase()
}

/// One entry of the user's channel set, as the channel list UI stores it.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
}

impl ChannelEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Username/token pair from the credential store.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub token: Secret<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: Secret::new(token.into()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Identity the protocol client logs in with.
#[derive(Clone)]
pub struct Identity {
    username: String,
    token: Secret<String>,
}

impl Identity {
    /// Build an identity, or `None` when either half is blank.
    pub fn new(username: &str, token: &str) -> Option<Self> {
        let username = username.trim();
        let token = token.trim();
        if username.is_empty() || token.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            token: Secret::new(token.to_string()),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Token in the `oauth:<token>` form used as the login password.
    pub fn password(&self) -> String {
        let token = self.token.expose_secret();
        if token.starts_with(OAUTH_PREFIX) {
            token.clone()
        } else {
            format!("{OAUTH_PREFIX}{token}")
        }
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.username.eq_ignore_ascii_case(&other.username)
            && self.token.expose_secret() == other.token.expose_secret()
    }
}

impl Eq for Identity {}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("username", &self.username)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Everything a protocol client needs to be built: which channels to join
/// and who to log in as.
///
/// Channels are kept normalized and de-duplicated in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    channels: Vec<String>,
    identity: Option<Identity>,
}

impl ConnectionConfig {
    pub fn new<I, S>(channels: I, identity: Option<Identity>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        let channels = channels
            .into_iter()
            .map(|c| normalize_channel(c.as_ref()))
            .filter(|c| !c.is_empty() && seen.insert(c.clone()))
            .collect();
        Self { channels, identity }
    }

    /// Derive the config from the channel set and credential store.
    ///
    /// This is the only place a config is built from user state, so the
    /// "should I reconnect" comparison and the "what do I reconnect with"
    /// rebuild always see the same value.
    pub fn derive(channels: &[ChannelEntry], credentials: Option<&Credentials>) -> Self {
        let identity =
            credentials.and_then(|c| Identity::new(&c.username, c.token.expose_secret()));
        Self::new(channels.iter().map(|c| c.name.as_str()), identity)
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Order-insensitive channel set equality plus identity equality.
    pub fn equivalent(&self, other: &Self) -> bool {
        let ours: BTreeSet<&str> = self.channels.iter().map(String::as_str).collect();
        let theirs: BTreeSet<&str> = other.channels.iter().map(String::as_str).collect();
        ours == theirs && self.identity == other.identity
    }
}
