//! Errors surfaced by the relay core.

/// Error taxonomy for connection and send failures.
///
/// Connectivity failures (`ConnectFailure`, `UnexpectedDisconnect`) are
/// retried by the lifecycle manager and only reach callers as the status
/// string; `RetriesExhausted` is the terminal form. Send-side errors are
/// returned directly to the caller and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The protocol client rejected `connect`.
    #[error("{0}")]
    ConnectFailure(String),
    /// A live connection dropped for a reason other than a local close.
    #[error("Disconnected: {0}")]
    UnexpectedDisconnect(String),
    /// The retry cap was reached without a successful connect.
    #[error("Gave up after {attempts} failed connection attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    /// The protocol client rejected an outbound message.
    #[error("Failed to send message: {0}")]
    SendFailure(String),
    /// Send attempted with no live connection.
    #[error("Not connected to chat")]
    NotConnected,
    /// Send attempted with blank text.
    #[error("Message is empty")]
    EmptyMessage,
    /// The lifecycle manager task is gone.
    #[error("Relay manager is not running")]
    ManagerClosed,
    /// Invalid relay configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}
