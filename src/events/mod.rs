//! Sync lifecycle events.
//!
//! Events are emitted best-effort over an mpsc channel; the orchestrator
//! never blocks or fails on event delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Events emitted over the lifetime of a reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    RunStarted {
        run_id: Uuid,
        locations: u64,
        timestamp: DateTime<Utc>,
    },
    LocationSkipped {
        run_id: Uuid,
        location_id: String,
        reason: String,
    },
    LocationSynced {
        run_id: Uuid,
        location_id: String,
        matched_pairs: u64,
        errors: u64,
    },
    LocationFailed {
        run_id: Uuid,
        location_id: String,
        error: String,
    },
    RunCompleted {
        run_id: Uuid,
        locations_synced: u64,
        matched_pairs: u64,
        errors: u64,
        promotions_purged: u64,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<SyncEvent>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<SyncEvent>) -> Self {
        Self { sender }
    }

    /// Sends an event; the error is informational only.
    pub async fn send(&self, event: SyncEvent) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|err| format!("Failed to send event: {err}"))
    }
}

/// Creates an event channel with the given buffer capacity.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<SyncEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains events into structured logs. Spawn this alongside the
/// orchestrator; it ends when every sender is dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<SyncEvent>) {
    while let Some(event) = receiver.recv().await {
        info!(event = ?event, "sync event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_round_trip_through_channel() {
        let (sender, mut receiver) = channel(4);
        let run_id = Uuid::new_v4();
        sender
            .send(SyncEvent::RunStarted {
                run_id,
                locations: 2,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        drop(sender);

        match receiver.recv().await {
            Some(SyncEvent::RunStarted {
                run_id: received, ..
            }) => assert_eq!(received, run_id),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(receiver.recv().await.is_none());
    }
}
