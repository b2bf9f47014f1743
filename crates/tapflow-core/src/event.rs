//! Engine events and the coordinate feed.

use crate::engine::{EngineState, RunMode};
use crate::overlay::ConfirmationPanel;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// Why a session ended in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// A step cannot run as stored, e.g. a tap with no recorded position.
    Configuration,
    /// A step kept failing until the retry ceiling was exceeded.
    Exhausted,
    /// The confirmation panel could not be shown.
    Overlay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    StateChanged {
        old: EngineState,
        new: EngineState,
    },
    SessionStarted {
        session_id: u64,
        mode: RunMode,
        total_steps: usize,
    },
    AwaitingConfirmation {
        session_id: u64,
        panel: ConfirmationPanel,
    },
    StepStarted {
        session_id: u64,
        index: usize,
        step_id: String,
    },
    StepCompleted {
        session_id: u64,
        index: usize,
        step_id: String,
    },
    Retrying {
        session_id: u64,
        step_id: String,
        attempt: u32,
        reason: String,
    },
    /// Short human-readable progress message.
    Tip {
        message: String,
    },
    SessionCompleted {
        session_id: u64,
        mode: RunMode,
    },
    SessionFailed {
        session_id: u64,
        kind: FailureKind,
        message: String,
    },
    SessionCancelled {
        session_id: u64,
    },
    RecordHandoff {
        session_id: u64,
        step_id: String,
    },
}

/// Broadcast bus for [`EngineEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: EngineEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::trace!("No subscribers for event: {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A position captured by the recorder and already persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateRecorded {
    pub step_id: String,
    pub x_percent: f32,
    pub y_percent: f32,
    pub recorded_at: OffsetDateTime,
}

/// Notifies whoever is listening that a step position changed.
#[derive(Clone)]
pub struct CoordinateFeed {
    sender: broadcast::Sender<CoordinateRecorded>,
}

impl CoordinateFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    pub fn publish(&self, recorded: CoordinateRecorded) {
        if self.sender.send(recorded).is_err() {
            tracing::trace!("No listeners for recorded coordinate");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinateRecorded> {
        self.sender.subscribe()
    }
}

impl Default for CoordinateFeed {
    fn default() -> Self {
        Self::new()
    }
}
