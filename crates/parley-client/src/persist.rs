//! Best-effort, non-blocking write-through to the state store.
//!
//! Mutations enqueue records on an unbounded channel and return immediately.
//! A background task coalesces whatever is queued (last value per key wins),
//! writes it in one `set`, logs failures and announces the batch with a
//! `save` event.

use std::sync::Arc;

use parley_store::{KeyValueStore, Records};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::events::{EventBus, StateEvent};

enum PersistCommand {
    Write(Records),
    Flush(oneshot::Sender<()>),
}

/// Sender side of the writer task.
#[derive(Clone)]
pub(crate) struct PersistHandle {
    tx: mpsc::UnboundedSender<PersistCommand>,
}

impl PersistHandle {
    /// Spawn the writer on the current tokio runtime.
    pub(crate) fn spawn(store: Arc<dyn KeyValueStore>, events: EventBus) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(store, events, rx));
        Self { tx }
    }

    pub(crate) fn write(&self, records: Records) {
        if records.is_empty() {
            return;
        }
        if self.tx.send(PersistCommand::Write(records)).is_err() {
            warn!("State writer has stopped, dropping write");
        }
    }

    /// Resolves once every write queued before this call has been attempted.
    pub(crate) async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(PersistCommand::Flush(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

async fn writer_loop(
    store: Arc<dyn KeyValueStore>,
    events: EventBus,
    mut rx: mpsc::UnboundedReceiver<PersistCommand>,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = Records::new();
        let mut waiters = Vec::new();

        let mut next = Some(first);
        while let Some(command) = next {
            match command {
                PersistCommand::Write(records) => batch.extend(records),
                PersistCommand::Flush(ack) => waiters.push(ack),
            }
            next = rx.try_recv().ok();
        }

        if !batch.is_empty() {
            let keys: Vec<String> = batch.keys().cloned().collect();
            match store.set(batch).await {
                Ok(()) => {
                    debug!(keys = ?keys, "Persisted state keys");
                    events.emit(StateEvent::Save { keys });
                }
                Err(e) => {
                    warn!(error = %e, keys = ?keys, "Failed to persist state keys");
                }
            }
        }

        for ack in waiters {
            let _ = ack.send(());
        }
    }

    debug!("State writer stopped");
}
