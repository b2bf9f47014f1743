//! tapflow-core: step model + scheduling for guided UI automation.
//!
//! Design goal: keep this crate UI-agnostic and platform-agnostic.
//! The observed UI tree, gesture injection, clipboard and overlay rendering are
//! collaborators behind traits; desktop adapters live in `tapflow-platform`.

mod config;
mod engine;
mod event;
mod gesture;
mod locator;
mod overlay;
mod recorder;
mod storage;

#[cfg(test)]
mod testing;

pub use config::{load_config, EngineConfig, LocatorConfig, RecorderConfig, TapflowConfig};
pub use engine::{
    CompletionHook, Engine, EngineHandle, EngineServices, EngineState, RunMode, SessionRequest,
};
pub use event::{CoordinateFeed, CoordinateRecorded, EngineEvent, EventBus, FailureKind};
pub use gesture::{
    percent_to_pixel, pixel_to_percent, Clipboard, ClipboardError, Display, DisplaySize,
    GestureDispatcher, TapOutcome,
};
pub use locator::{
    Ancestors, Descendants, LookupFailure, Node, NodeLocator, Rect, SelectionStrategy, UiNode,
    UiTree,
};
pub use overlay::{
    describe_step, CapturePrompt, ConfirmationPanel, Layer, LayerKind, OverlayController,
    OverlayError, OverlayRenderer,
};
pub use recorder::{
    CaptureOutcome, CoordinateRecorder, RecordLauncher, RecordTarget, RecorderEvent,
    RecorderState,
};
pub use storage::{
    default_flow, get_app_data_dir, JsonFileStore, MemoryStore, StepStore, StorageError,
    StorageResult,
};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// One action in the automation script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StepRecord", into = "StepRecord")]
pub struct FlowStep {
    /// Stable identifier, unique within a step list.
    pub id: String,
    /// Human-readable name shown on the confirmation panel.
    pub label: String,
    /// Whether a human may retarget this step.
    pub editable: bool,
    /// Wait inserted after the step completes.
    pub delay_ms: u64,
    /// Guidance shown to the human.
    pub hint: String,
    pub action: StepAction,
}

impl FlowStep {
    pub fn new(id: impl Into<String>, label: impl Into<String>, action: StepAction) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            editable: false,
            delay_ms: DEFAULT_DELAY_MS,
            hint: String::new(),
            action,
        }
    }

    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }

    pub fn delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }

    /// Recorded position of a `Tap`/`Paste` step.
    pub fn position(&self) -> Option<ScreenPercent> {
        match &self.action {
            StepAction::Tap { position } | StepAction::Paste { position } => *position,
            _ => None,
        }
    }

    /// Whether this step can be taught a screen position.
    pub fn accepts_position(&self) -> bool {
        matches!(self.action, StepAction::Tap { .. } | StepAction::Paste { .. })
    }
}

/// Delay used when a persisted record omits `delayMs`.
pub const DEFAULT_DELAY_MS: u64 = 1500;

/// What a step does, with only the fields that kind uses.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Open the target app. Satisfied by the caller before a session starts.
    Launch,
    /// Tap a recorded screen position.
    Tap { position: Option<ScreenPercent> },
    /// Tap the paste affordance; the value is already on the clipboard.
    Paste { position: Option<ScreenPercent> },
    /// Find a node by text and click it.
    FindAndTap { find_text: Option<String> },
    /// Wait for the step's own delay.
    Delay,
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Launch => StepKind::Launch,
            Self::Tap { .. } => StepKind::Tap,
            Self::Paste { .. } => StepKind::Paste,
            Self::FindAndTap { .. } => StepKind::FindAndTap,
            Self::Delay => StepKind::Delay,
        }
    }
}

/// Fieldless step discriminant, as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    #[serde(rename = "LAUNCH")]
    Launch,
    #[serde(rename = "TAP")]
    Tap,
    #[serde(rename = "PASTE")]
    Paste,
    #[serde(rename = "FIND_TAP")]
    FindAndTap,
    #[serde(rename = "DELAY")]
    Delay,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Launch => "launch",
            Self::Tap => "tap",
            Self::Paste => "paste",
            Self::FindAndTap => "find-and-tap",
            Self::Delay => "delay",
        };
        f.write_str(name)
    }
}

/// Resolution-independent screen position, both axes in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPercent {
    pub x: f32,
    pub y: f32,
}

impl ScreenPercent {
    /// Build a position, clamping both axes into `[0, 1]`.
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
        }
    }
}

/// Flat persisted form of a step. Optional fields are omitted, never null.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepRecord {
    id: String,
    label: String,
    #[serde(rename = "type")]
    kind: StepKind,
    #[serde(default)]
    editable: bool,
    #[serde(default = "default_delay_ms")]
    delay_ms: u64,
    #[serde(default)]
    hint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x_percent: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y_percent: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    find_text: Option<String>,
}

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}

impl TryFrom<StepRecord> for FlowStep {
    type Error = String;

    fn try_from(record: StepRecord) -> Result<Self, Self::Error> {
        if record.id.trim().is_empty() {
            return Err("step id cannot be empty".into());
        }
        let position = match (record.x_percent, record.y_percent) {
            (Some(x), Some(y)) => {
                if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
                    return Err(format!("step {}: position out of range", record.id));
                }
                Some(ScreenPercent { x, y })
            }
            _ => None,
        };
        let action = match record.kind {
            StepKind::Launch => StepAction::Launch,
            StepKind::Tap => StepAction::Tap { position },
            StepKind::Paste => StepAction::Paste { position },
            StepKind::FindAndTap => StepAction::FindAndTap {
                find_text: record.find_text,
            },
            StepKind::Delay => StepAction::Delay,
        };
        Ok(Self {
            id: record.id,
            label: record.label,
            editable: record.editable,
            delay_ms: record.delay_ms,
            hint: record.hint,
            action,
        })
    }
}

impl From<FlowStep> for StepRecord {
    fn from(step: FlowStep) -> Self {
        let kind = step.kind();
        let position = step.position();
        let find_text = match step.action {
            StepAction::FindAndTap { find_text } => find_text,
            _ => None,
        };
        Self {
            id: step.id,
            label: step.label,
            kind,
            editable: step.editable,
            delay_ms: step.delay_ms,
            hint: step.hint,
            x_percent: position.map(|p| p.x),
            y_percent: position.map(|p| p.y),
            find_text,
        }
    }
}

/// Check the step-list invariant: non-empty, starts with `Launch`, unique ids.
pub fn validate_steps(steps: &[FlowStep]) -> Result<(), String> {
    let first = steps.first().ok_or("step list is empty")?;
    if first.kind() != StepKind::Launch {
        return Err(format!("first step {} is not a launch step", first.id));
    }
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.id.as_str()) {
            return Err(format!("duplicate step id {}", step.id));
        }
    }
    Ok(())
}
