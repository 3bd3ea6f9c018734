//! The live client together with the listeners attached to it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::ConnectionConfig;
use crate::client::{ChatClient, ClientEvent, ClientFactory};

/// Messages fed back into the manager loop, tagged with the generation of
/// the subscription that produced them.
pub(crate) enum Internal {
    Event {
        generation: u64,
        event: ClientEvent,
    },
    ConnectResult {
        generation: u64,
        result: Result<(), String>,
    },
    SendResult {
        generation: u64,
        result: Result<(), String>,
        reply: tokio::sync::oneshot::Sender<Result<(), crate::error::RelayError>>,
    },
    /// The torn-down client of `generation` finished closing (or timed out).
    Drained { generation: u64 },
}

/// Reason reported when a client's event stream ends without a disconnect event.
pub(crate) const STREAM_ENDED: &str = "event stream ended";

/// One client instance and its event pump.
///
/// Detaching the pump and discarding the client happen in one place
/// ([`teardown`](Self::teardown), or `Drop` on any other exit path), so a
/// client can never outlive its listeners or vice versa.
pub(crate) struct Subscription {
    generation: u64,
    client: Arc<dyn ChatClient>,
    pump: JoinHandle<()>,
    connecting: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Build a client for `config` and start forwarding its events.
    pub(crate) fn attach(
        generation: u64,
        config: &ConnectionConfig,
        factory: &dyn ClientFactory,
        sink: mpsc::Sender<Internal>,
    ) -> Self {
        let (client, mut events) = factory.build(config);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if sink.send(Internal::Event { generation, event }).await.is_err() {
                    return;
                }
            }
            tracing::debug!(generation, "Client event stream ended");
            let event = ClientEvent::Disconnected {
                reason: STREAM_ENDED.to_string(),
            };
            let _ = sink.send(Internal::Event { generation, event }).await;
        });
        tracing::debug!(generation, channels = ?config.channels(), "Subscription attached");
        Self {
            generation,
            client,
            pump,
            connecting: None,
        }
    }

    /// Kick off `connect` without blocking the caller; the result comes
    /// back through `sink` as [`Internal::ConnectResult`].
    pub(crate) fn start_connect(&mut self, sink: mpsc::Sender<Internal>) {
        let client = Arc::clone(&self.client);
        let generation = self.generation;
        self.connecting = Some(tokio::spawn(async move {
            let result = client.connect().await.map_err(|e| format!("{e:#}"));
            let _ = sink.send(Internal::ConnectResult { generation, result }).await;
        }));
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn client(&self) -> Arc<dyn ChatClient> {
        Arc::clone(&self.client)
    }

    fn detach(&mut self) {
        self.pump.abort();
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
    }

    /// Detach listeners now and close the client in the background.
    ///
    /// `sink` receives [`Internal::Drained`] once `disconnect` returns or
    /// `timeout` elapses. Disconnect errors are logged and swallowed.
    pub(crate) fn teardown(mut self, timeout: Duration, sink: mpsc::Sender<Internal>) {
        self.detach();
        let generation = self.generation;
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, client.disconnect()).await {
                Ok(Ok(())) => tracing::debug!(generation, "Client disconnected"),
                Ok(Err(e)) => {
                    tracing::warn!(generation, error = %e, "Disconnect failed during teardown")
                }
                Err(_) => tracing::warn!(
                    generation,
                    timeout_secs = timeout.as_secs(),
                    "Disconnect timed out during teardown"
                ),
            }
            let _ = sink.send(Internal::Drained { generation }).await;
        });
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
