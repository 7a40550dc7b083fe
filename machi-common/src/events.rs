//! Event types for the machi event system
//!
//! Provides shared event definitions and the EventBus used to observe report
//! pipeline progress.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Report pipeline state
///
/// Progression: Pending → Fetching → Scoring → Ranking → Rendering → Completed.
/// `Failed` and `Cancelled` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    /// Request accepted, nothing started
    Pending,
    /// Upstream fetch fan-out in progress
    Fetching,
    /// Normalizing observations into scores
    Scoring,
    /// Ordering municipalities
    Ranking,
    /// Producing chart markup and narratives
    Rendering,
    /// Report produced
    Completed,
    /// Run aborted by a non-partial failure
    Failed,
    /// Run cancelled by the caller
    Cancelled,
}

impl PipelineState {
    /// Check if state is terminal (no further transitions)
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled
        )
    }

    /// Next state on the happy path, `None` for terminal states
    pub fn next(self) -> Option<PipelineState> {
        match self {
            PipelineState::Pending => Some(PipelineState::Fetching),
            PipelineState::Fetching => Some(PipelineState::Scoring),
            PipelineState::Scoring => Some(PipelineState::Ranking),
            PipelineState::Ranking => Some(PipelineState::Rendering),
            PipelineState::Rendering => Some(PipelineState::Completed),
            PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled => None,
        }
    }

    /// Whether `target` is reachable in one step from `self`
    pub fn can_transition_to(self, target: PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match target {
            PipelineState::Failed | PipelineState::Cancelled => true,
            other => self.next() == Some(other),
        }
    }
}

/// machi event types
///
/// Events are broadcast via EventBus and serialize with a `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MachiEvent {
    /// Pipeline run moved between states
    PipelineStateChanged {
        run_id: Uuid,
        old_state: PipelineState,
        new_state: PipelineState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One upstream fetch failed and was downgraded to a data gap
    FetchFailed {
        run_id: Uuid,
        municipality_code: String,
        /// Dataset name, or "real_estate"
        source: String,
        retryable: bool,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pipeline run produced a report
    PipelineCompleted {
        run_id: Uuid,
        /// Municipalities with an overall score
        ranked: usize,
        /// Municipalities requested
        requested: usize,
        /// Categories with no data for any municipality
        unavailable_categories: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast bus for MachiEvent
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MachiEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// ```
    /// use machi_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MachiEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: MachiEvent,
    ) -> Result<usize, broadcast::error::SendError<MachiEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MachiEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
