//! Event types and broadcast bus
//!
//! Job lifecycle and progress events are broadcast via `EventBus` and can be
//! serialized for SSE transmission. Polling the job status remains the
//! authoritative contract; events are a convenience for push clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kind of background operation running against a batch
///
/// Together with the batch id this forms the key of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Discover files (or releases) and create candidate items
    Scan,
    /// Match items against the local catalog
    MatchLocal,
    /// Match items against the external catalog
    MatchExternal,
    /// Commit queued items into the permanent catalog
    Process,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Scan => "scan",
            OperationKind::MatchLocal => "match_local",
            OperationKind::MatchExternal => "match_external",
            OperationKind::Process => "process",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scan" => Ok(OperationKind::Scan),
            "match_local" => Ok(OperationKind::MatchLocal),
            "match_external" => Ok(OperationKind::MatchExternal),
            "process" => Ok(OperationKind::Process),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown operation kind: {}",
                other
            ))),
        }
    }
}

/// Events emitted by the ingest service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IngestEvent {
    /// A batch was created and its scan job submitted
    BatchCreated {
        batch_id: Uuid,
        scope: String,
        timestamp: DateTime<Utc>,
    },

    /// A batch and its items were deleted
    BatchDeleted {
        batch_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A job left the queue and began processing
    JobStarted {
        batch_id: Uuid,
        kind: OperationKind,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// A job finished one work item
    JobProgress {
        batch_id: Uuid,
        kind: OperationKind,
        current: usize,
        total: usize,
        errors: usize,
    },

    /// A job observed its pause flag and stopped advancing
    JobPaused {
        batch_id: Uuid,
        kind: OperationKind,
        current: usize,
        total: usize,
    },

    /// A paused job continued
    JobResumed {
        batch_id: Uuid,
        kind: OperationKind,
        current: usize,
        total: usize,
    },

    /// A job processed every work item; its record is gone after this
    JobCompleted {
        batch_id: Uuid,
        kind: OperationKind,
        current: usize,
        total: usize,
        errors: usize,
        timestamp: DateTime<Utc>,
    },

    /// A job stopped on a job-level error
    JobFailed {
        batch_id: Uuid,
        kind: OperationKind,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl IngestEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            IngestEvent::BatchCreated { .. } => "BatchCreated",
            IngestEvent::BatchDeleted { .. } => "BatchDeleted",
            IngestEvent::JobStarted { .. } => "JobStarted",
            IngestEvent::JobProgress { .. } => "JobProgress",
            IngestEvent::JobPaused { .. } => "JobPaused",
            IngestEvent::JobResumed { .. } => "JobResumed",
            IngestEvent::JobCompleted { .. } => "JobCompleted",
            IngestEvent::JobFailed { .. } => "JobFailed",
        }
    }

    /// Batch the event refers to
    pub fn batch_id(&self) -> Uuid {
        match self {
            IngestEvent::BatchCreated { batch_id, .. }
            | IngestEvent::BatchDeleted { batch_id, .. }
            | IngestEvent::JobStarted { batch_id, .. }
            | IngestEvent::JobProgress { batch_id, .. }
            | IngestEvent::JobPaused { batch_id, .. }
            | IngestEvent::JobResumed { batch_id, .. }
            | IngestEvent::JobCompleted { batch_id, .. }
            | IngestEvent::JobFailed { batch_id, .. } => *batch_id,
        }
    }
}

/// Broadcast bus for `IngestEvent`s
///
/// Cloning the bus clones the sender; all clones feed the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: IngestEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kind_round_trip_names() {
        for kind in [
            OperationKind::Scan,
            OperationKind::MatchLocal,
            OperationKind::MatchExternal,
            OperationKind::Process,
        ] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_string(&kind).unwrap(),
                format!("\"{}\"", kind.as_str())
            );
        }
        assert!("rescan".parse::<OperationKind>().is_err());
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let batch_id = Uuid::new_v4();

        bus.emit_lossy(IngestEvent::JobProgress {
            batch_id,
            kind: OperationKind::Scan,
            current: 1,
            total: 3,
            errors: 0,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "JobProgress");
        assert_eq!(event.batch_id(), batch_id);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "JobProgress");
        assert_eq!(json["kind"], "scan");
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit_lossy(IngestEvent::BatchDeleted {
            batch_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        });
    }
}
