//! Command dispatch daemon.
//!
//! One daemon owns one control connection. Inbound frames are handled one at a
//! time through a `max = 1` [`Semaphore`]: each frame queues for the lock in
//! arrival order, runs its handler, sends its envelope, then releases. Responses
//! therefore leave in the order frames arrived, even when a handler suspends.
//!
//! A handler that never finishes stalls every later frame. There is no
//! per-command timeout.
//!
//! Lifecycle: `Disconnected -> Connecting -> Connected -> Closed`. Closing
//! purges the queue, gives the in-flight handler `shutdown_grace`, then aborts it.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;

use crate::bridge::protocol::{CommandFrame, Envelope, decode_frame};
use crate::bridge::transport::{self, Connection, FrameSink, TransportError};
use crate::config::{ConfigError, DaemonConfig};
use crate::handlers::Registry;
use crate::semaphore::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl DaemonState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Everything a dispatch needs, built once per daemon.
pub struct DaemonContext {
    config: DaemonConfig,
    semaphore: Semaphore,
    registry: Registry,
}

impl DaemonContext {
    pub fn new(config: DaemonConfig, registry: Registry) -> Self {
        Self {
            config,
            semaphore: Semaphore::mutex("dispatch"),
            registry,
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn semaphore(&self) -> &Semaphore {
        &self.semaphore
    }

    /// Turn one inbound text record into its response envelope.
    ///
    /// Returns `None` only for a malformed frame with no recoverable id.
    /// Callers are expected to hold the dispatch lock.
    pub async fn dispatch(&self, text: &str) -> Option<Envelope> {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                let Some(id) = e.id.clone() else {
                    tracing::warn!(error = %e, "Dropping malformed frame");
                    return None;
                };
                tracing::warn!(%id, error = %e, "Rejecting malformed frame");
                return Some(Envelope::failure(e.to_string()).with_id(Some(id)));
            }
        };

        let CommandFrame { name, payload, id } = frame;
        let kind = match self.registry.resolve(&name) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!(%name, "No handler for command");
                return Some(Envelope::failure(e.to_string()).with_id(id));
            }
        };

        tracing::debug!(command = %kind, id = ?id, "Dispatching command");
        let envelope = match self.registry.execute(kind, payload).await {
            Ok(result) => Envelope::success(result),
            Err(e) => {
                tracing::warn!(command = %kind, id = ?id, error = %e, "Command failed");
                Envelope::failure(e.to_string())
            }
        };
        Some(envelope.with_id(id))
    }
}

pub struct Daemon {
    context: Arc<DaemonContext>,
    state: watch::Sender<DaemonState>,
}

impl Daemon {
    pub fn new(config: DaemonConfig, registry: Registry) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state, _) = watch::channel(DaemonState::Disconnected);
        Ok(Self {
            context: Arc::new(DaemonContext::new(config, registry)),
            state,
        })
    }

    pub fn context(&self) -> &DaemonContext {
        &self.context
    }

    pub fn state(&self) -> DaemonState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DaemonState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: DaemonState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = ?prev, to = ?next, "Daemon state changed");
        }
    }

    /// Connect to the configured endpoint and serve until it closes.
    pub async fn run(&self) -> Result<(), TransportError> {
        self.set_state(DaemonState::Connecting);
        let keepalive = self.spawn_keepalive();

        let url = &self.context.config.url;
        tracing::info!(server = %self.context.config.server, %url, "Connecting");
        let connection = match transport::connect(url).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!(%url, error = %e, "Failed to connect");
                self.set_state(DaemonState::Closed);
                let _ = keepalive.await;
                return Err(e);
            }
        };

        self.serve_connection(connection).await;
        let _ = keepalive.await;
        Ok(())
    }

    /// Serve an already-open connection until it closes.
    pub async fn serve(&self, connection: Connection) {
        let keepalive = self.spawn_keepalive();
        self.serve_connection(connection).await;
        let _ = keepalive.await;
    }

    async fn serve_connection(&self, connection: Connection) {
        let Connection { mut frames, sink } = connection;
        let sink = Arc::new(Mutex::new(sink));
        let mut tasks = JoinSet::new();

        self.set_state(DaemonState::Connected);
        tracing::info!(server = %self.context.config.server, "Daemon connected");

        while let Some(frame) = frames.next().await {
            let text = match frame {
                Ok(text) => text,
                Err(TransportError::InvalidUtf8) => {
                    tracing::warn!("Ignoring non-UTF-8 frame");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Control connection failed");
                    break;
                }
            };
            tracing::trace!(len = text.len(), "Frame received");

            // Queue for the lock now so grant order is arrival order.
            let acquire = self.context.semaphore.acquire();
            let context = Arc::clone(&self.context);
            let sink = Arc::clone(&sink);
            tasks.spawn(async move {
                let lock = match acquire.await {
                    Ok(lock) => lock,
                    Err(e) => {
                        tracing::debug!(error = %e, "Queued frame cancelled");
                        return;
                    }
                };
                if let Some(envelope) = context.dispatch(&text).await {
                    send_envelope(&sink, &envelope).await;
                }
                lock.release();
            });

            while let Some(result) = tasks.try_join_next() {
                log_task_result(result);
            }
        }

        self.set_state(DaemonState::Closed);
        self.shutdown(tasks).await;
        tracing::info!(server = %self.context.config.server, "Daemon exiting");
    }

    async fn shutdown(&self, mut tasks: JoinSet<()>) {
        self.context.semaphore.purge();

        let grace = self.context.config.shutdown_grace;
        let drain = async {
            while let Some(result) = tasks.join_next().await {
                log_task_result(result);
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!(grace = ?grace, "In-flight command did not finish, aborting");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    fn spawn_keepalive(&self) -> tokio::task::JoinHandle<()> {
        keepalive(self.context.config.keepalive_interval, self.state.subscribe())
    }
}

fn keepalive(
    interval: Duration,
    mut state: watch::Receiver<DaemonState>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            if state.borrow_and_update().is_terminal() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => tracing::trace!("Keep-alive"),
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

async fn send_envelope(sink: &Mutex<FrameSink>, envelope: &Envelope) {
    let text = match serde_json::to_string(envelope) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode envelope");
            return;
        }
    };
    if let Err(e) = sink.lock().await.send(text).await {
        tracing::warn!(id = ?envelope.id, error = %e, "Failed to send response");
    }
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result
        && e.is_panic()
    {
        tracing::error!(error = %e, "Command task panicked");
    }
}
