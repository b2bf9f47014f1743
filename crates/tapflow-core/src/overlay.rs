//! Human-facing overlay layers: session mask, confirmation panel and the
//! recorder's capture layers.
//!
//! Rendering is done by an [`OverlayRenderer`] supplied by the host. The
//! [`OverlayController`] tracks which layers are up, keeps the confirmation
//! panel and the capture layers mutually exclusive, and makes removal
//! idempotent.

use crate::engine::RunMode;
use crate::{FlowStep, StepAction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("overlay window unavailable: {0}")]
    Unavailable(String),
}

/// Content of the per-step confirmation panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationPanel {
    pub session_id: u64,
    pub mode: RunMode,
    pub mode_label: String,
    /// Index of the step, counting the launch step as 0.
    pub step_index: usize,
    /// Steps after the launch step.
    pub step_total: usize,
    pub step_id: String,
    pub label: String,
    /// What confirming will do.
    pub description: String,
    pub hint: String,
    pub confirm_label: String,
    pub exit_label: String,
}

/// Arm phase of the recorder: a single "begin capture" affordance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturePrompt {
    pub step_id: String,
    pub label: String,
    pub message: String,
    pub begin_label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    /// Translucent full-screen mask shown while a session runs.
    Mask,
    Confirmation(ConfirmationPanel),
    CapturePrompt(CapturePrompt),
    /// Transparent full-screen touch catcher.
    CaptureSurface { step_id: String },
}

impl Layer {
    pub fn kind(&self) -> LayerKind {
        match self {
            Self::Mask => LayerKind::Mask,
            Self::Confirmation(_) => LayerKind::Confirmation,
            Self::CapturePrompt(_) => LayerKind::CapturePrompt,
            Self::CaptureSurface { .. } => LayerKind::CaptureSurface,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    Mask,
    Confirmation,
    CapturePrompt,
    CaptureSurface,
}

impl LayerKind {
    /// Layers that cannot be up at the same time as this one.
    fn excludes(self) -> &'static [LayerKind] {
        match self {
            Self::Mask => &[],
            Self::Confirmation => &[Self::CapturePrompt, Self::CaptureSurface],
            Self::CapturePrompt => &[Self::Confirmation, Self::CaptureSurface],
            Self::CaptureSurface => &[Self::Confirmation, Self::CapturePrompt],
        }
    }
}

/// Host-side drawing of overlay layers.
pub trait OverlayRenderer: Send + Sync {
    fn add(&self, layer: &Layer) -> Result<(), OverlayError>;
    fn remove(&self, kind: LayerKind) -> Result<(), OverlayError>;
}

pub struct OverlayController {
    renderer: Arc<dyn OverlayRenderer>,
    shown: Mutex<HashSet<LayerKind>>,
}

impl OverlayController {
    pub fn new(renderer: Arc<dyn OverlayRenderer>) -> Self {
        Self {
            renderer,
            shown: Mutex::new(HashSet::new()),
        }
    }

    /// Show a layer, replacing one of the same kind and dropping exclusive ones.
    pub fn show(&self, layer: Layer) -> Result<(), OverlayError> {
        let kind = layer.kind();
        for other in kind.excludes() {
            self.remove(*other);
        }
        self.remove(kind);
        self.renderer.add(&layer)?;
        self.shown.lock().unwrap().insert(kind);
        debug!(?kind, "overlay layer shown");
        Ok(())
    }

    /// Remove a layer. Absent layers and renderer failures are not errors.
    pub fn remove(&self, kind: LayerKind) {
        if !self.shown.lock().unwrap().remove(&kind) {
            return;
        }
        match self.renderer.remove(kind) {
            Ok(()) => debug!(?kind, "overlay layer removed"),
            Err(e) => warn!(?kind, error = %e, "Failed to remove overlay layer"),
        }
    }

    pub fn is_shown(&self, kind: LayerKind) -> bool {
        self.shown.lock().unwrap().contains(&kind)
    }
}

fn percent_label(value: f32) -> i32 {
    (value * 100.0) as i32
}

/// Human-readable description of what confirming `step` will do.
///
/// `dynamic_value` is the session's run-time value, `search_literal` the
/// resolved text a find step will look for.
pub fn describe_step(
    step: &FlowStep,
    is_record_target: bool,
    dynamic_value: Option<&str>,
    search_literal: Option<&str>,
) -> String {
    if is_record_target {
        return format!(
            "Will start recording: tap where \"{}\" is on screen",
            step.label
        );
    }
    match &step.action {
        StepAction::Tap { position } => match position {
            Some(p) => format!(
                "Will tap X:{}% Y:{}%",
                percent_label(p.x),
                percent_label(p.y)
            ),
            None => "Will tap the screen (no position recorded yet, record it first)".into(),
        },
        StepAction::Paste { position } => {
            let value = dynamic_value.unwrap_or("?");
            match position {
                Some(p) => format!(
                    "Will paste \"{}\" and tap X:{}% Y:{}%",
                    value,
                    percent_label(p.x),
                    percent_label(p.y)
                ),
                None => format!(
                    "Will paste \"{}\" (no position recorded yet, record it first)",
                    value
                ),
            }
        }
        StepAction::FindAndTap { .. } => format!(
            "Will search for and tap \"{}\"",
            search_literal.unwrap_or("?")
        ),
        StepAction::Launch => "Will launch the target app".into(),
        StepAction::Delay => format!("Will wait {} ms", step.delay_ms),
    }
}
