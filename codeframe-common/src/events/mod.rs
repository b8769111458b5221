//! Event types for codeframe progress broadcasting
//!
//! Provides the shared event definitions and the EventBus used by the
//! engine to publish generation lifecycle changes (consumed by the SSE
//! endpoint).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Codeframe event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CodeframeEvent {
    /// Generation created and cluster jobs enqueued
    GenerationStarted {
        generation_id: Uuid,
        category_id: i64,
        n_clusters: usize,
        n_answers: usize,
        timestamp: DateTime<Utc>,
    },

    /// One cluster produced its theme/code nodes
    ClusterJobCompleted {
        generation_id: Uuid,
        cluster_id: i64,
        nodes_created: usize,
        /// Terminal jobs so far (completed + failed)
        finished: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// One cluster exhausted its retries
    ClusterJobFailed {
        generation_id: Uuid,
        cluster_id: i64,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Every cluster job reached a terminal state
    GenerationCompleted {
        generation_id: Uuid,
        n_completed: usize,
        n_failed: usize,
        mece_score: Option<f64>,
        timestamp: DateTime<Utc>,
    },

    /// Generation could not be started or was aborted
    ///
    /// `generation_id` is None when the failure happened before the
    /// generation record was created.
    GenerationFailed {
        generation_id: Option<Uuid>,
        category_id: i64,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Generation cancelled by a reviewer
    GenerationCancelled {
        generation_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Reviewer edited the hierarchy
    HierarchyEdited {
        generation_id: Uuid,
        node_id: Uuid,
        action: String,
        timestamp: DateTime<Utc>,
    },

    /// Finished codeframe assigned onto the answer corpus
    CodeframeApplied {
        generation_id: Uuid,
        total_answers: usize,
        assigned: usize,
        pending: usize,
        timestamp: DateTime<Utc>,
    },
}

impl CodeframeEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            CodeframeEvent::GenerationStarted { .. } => "GenerationStarted",
            CodeframeEvent::ClusterJobCompleted { .. } => "ClusterJobCompleted",
            CodeframeEvent::ClusterJobFailed { .. } => "ClusterJobFailed",
            CodeframeEvent::GenerationCompleted { .. } => "GenerationCompleted",
            CodeframeEvent::GenerationFailed { .. } => "GenerationFailed",
            CodeframeEvent::GenerationCancelled { .. } => "GenerationCancelled",
            CodeframeEvent::HierarchyEdited { .. } => "HierarchyEdited",
            CodeframeEvent::CodeframeApplied { .. } => "CodeframeApplied",
        }
    }

    /// Generation this event belongs to, if any
    pub fn generation_id(&self) -> Option<Uuid> {
        match self {
            CodeframeEvent::GenerationStarted { generation_id, .. }
            | CodeframeEvent::ClusterJobCompleted { generation_id, .. }
            | CodeframeEvent::ClusterJobFailed { generation_id, .. }
            | CodeframeEvent::GenerationCompleted { generation_id, .. }
            | CodeframeEvent::GenerationCancelled { generation_id, .. }
            | CodeframeEvent::HierarchyEdited { generation_id, .. }
            | CodeframeEvent::CodeframeApplied { generation_id, .. } => Some(*generation_id),
            CodeframeEvent::GenerationFailed { generation_id, .. } => *generation_id,
        }
    }
}

/// Broadcast bus for CodeframeEvent
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CodeframeEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CodeframeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CodeframeEvent,
    ) -> Result<usize, broadcast::error::SendError<CodeframeEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CodeframeEvent) {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = CodeframeEvent::GenerationCancelled {
            generation_id: Uuid::nil(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "GenerationCancelled");
        assert_eq!(event.event_type(), "GenerationCancelled");
        assert_eq!(event.generation_id(), Some(Uuid::nil()));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);
        let event = CodeframeEvent::GenerationFailed {
            generation_id: None,
            category_id: 1,
            error: "clustering timed out".to_string(),
            timestamp: Utc::now(),
        };

        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 10);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.emit_lossy(CodeframeEvent::CodeframeApplied {
            generation_id: Uuid::nil(),
            total_answers: 12,
            assigned: 9,
            pending: 3,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            CodeframeEvent::CodeframeApplied { assigned, pending, .. } => {
                assert_eq!(assigned, 9);
                assert_eq!(pending, 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
