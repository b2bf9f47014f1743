//! Coordinate recorder: turns one human tap into a stored step position.
//!
//! Two phases so that the tap that opens the recorder never lands on the
//! capture surface: `Armed` shows a begin-capture prompt, `Capturing` shows a
//! transparent surface that takes the first press/release pair.

use crate::event::{CoordinateFeed, CoordinateRecorded};
use crate::gesture::{pixel_to_percent, Display};
use crate::overlay::{CapturePrompt, Layer, LayerKind, OverlayController};
use crate::storage::StepStore;
use crate::RecorderConfig;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Step whose position is about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTarget {
    pub step_id: String,
    pub label: String,
}

/// How the engine hands a session over to the recorder.
pub trait RecordLauncher: Send + Sync {
    fn launch(&self, target: RecordTarget);

    /// Drop any in-progress recording.
    fn abort(&self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderState {
    #[default]
    Idle,
    Armed,
    Capturing,
}

/// Classification of a press/release pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CaptureOutcome {
    /// Tap at the midpoint, in pixels.
    Tap { x: f32, y: f32 },
    Swipe,
}

impl CaptureOutcome {
    pub fn classify(press: (f32, f32), release: (f32, f32), slop: f32) -> Self {
        let dx = (release.0 - press.0).abs();
        let dy = (release.1 - press.1).abs();
        if dx <= slop && dy <= slop {
            Self::Tap {
                x: (press.0 + release.0) / 2.0,
                y: (press.1 + release.1) / 2.0,
            }
        } else {
            Self::Swipe
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    StateChanged {
        old: RecorderState,
        new: RecorderState,
    },
    Captured(CoordinateRecorded),
    /// Recording ended without storing anything.
    Discarded { step_id: String, reason: String },
}

#[derive(Debug)]
enum Phase {
    Idle,
    Armed(RecordTarget),
    Capturing {
        target: RecordTarget,
        press: Option<(f32, f32)>,
    },
}

impl Phase {
    fn state(&self) -> RecorderState {
        match self {
            Self::Idle => RecorderState::Idle,
            Self::Armed(_) => RecorderState::Armed,
            Self::Capturing { .. } => RecorderState::Capturing,
        }
    }
}

pub struct CoordinateRecorder {
    config: RecorderConfig,
    store: Arc<dyn StepStore>,
    overlay: Arc<OverlayController>,
    display: Arc<dyn Display>,
    feed: CoordinateFeed,
    phase: Mutex<Phase>,
}

impl CoordinateRecorder {
    pub fn new(
        config: RecorderConfig,
        store: Arc<dyn StepStore>,
        overlay: Arc<OverlayController>,
        display: Arc<dyn Display>,
        feed: CoordinateFeed,
    ) -> Self {
        Self {
            config,
            store,
            overlay,
            display,
            feed,
            phase: Mutex::new(Phase::Idle),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.phase.lock().unwrap().state()
    }

    pub fn feed(&self) -> &CoordinateFeed {
        &self.feed
    }

    /// Show the begin-capture prompt for `target`.
    pub fn arm(&self, target: RecordTarget) -> Option<RecorderEvent> {
        let mut phase = self.phase.lock().unwrap();
        let old = phase.state();
        let prompt = CapturePrompt {
            step_id: target.step_id.clone(),
            label: target.label.clone(),
            message: format!("Get \"{}\" on screen, then begin capture", target.label),
            begin_label: "Begin capture".into(),
        };
        if let Err(e) = self.overlay.show(Layer::CapturePrompt(prompt)) {
            warn!(step_id = %target.step_id, error = %e, "Failed to show capture prompt");
            *phase = Phase::Idle;
            return Some(RecorderEvent::Discarded {
                step_id: target.step_id,
                reason: e.to_string(),
            });
        }
        info!(step_id = %target.step_id, "Recorder armed");
        *phase = Phase::Armed(target);
        Some(RecorderEvent::StateChanged {
            old,
            new: RecorderState::Armed,
        })
    }

    /// Replace the prompt with the transparent capture surface.
    pub fn begin_capture(&self) -> Option<RecorderEvent> {
        let mut phase = self.phase.lock().unwrap();
        let Phase::Armed(target) = &*phase else {
            return None;
        };
        let target = target.clone();
        let surface = Layer::CaptureSurface {
            step_id: target.step_id.clone(),
        };
        if let Err(e) = self.overlay.show(surface) {
            warn!(step_id = %target.step_id, error = %e, "Failed to show capture surface");
            self.overlay.remove(LayerKind::CapturePrompt);
            *phase = Phase::Idle;
            return Some(RecorderEvent::Discarded {
                step_id: target.step_id,
                reason: e.to_string(),
            });
        }
        debug!(step_id = %target.step_id, "Capturing");
        *phase = Phase::Capturing {
            target,
            press: None,
        };
        Some(RecorderEvent::StateChanged {
            old: RecorderState::Armed,
            new: RecorderState::Capturing,
        })
    }

    pub fn pointer_down(&self, x: f32, y: f32) -> Option<RecorderEvent> {
        let mut phase = self.phase.lock().unwrap();
        if let Phase::Capturing { press, .. } = &mut *phase {
            if press.is_none() {
                *press = Some((x, y));
            }
        }
        None
    }

    /// Classify the pair and, for a tap, persist and publish the position.
    pub fn pointer_up(&self, x: f32, y: f32) -> Option<RecorderEvent> {
        let mut phase = self.phase.lock().unwrap();
        let Phase::Capturing {
            target,
            press: Some(press),
        } = &*phase
        else {
            return None;
        };
        let target = target.clone();
        let outcome = CaptureOutcome::classify(*press, (x, y), self.config.tap_slop_px);
        *phase = Phase::Idle;
        drop(phase);
        self.overlay.remove(LayerKind::CaptureSurface);

        let (px, py) = match outcome {
            CaptureOutcome::Tap { x, y } => (x, y),
            CaptureOutcome::Swipe => {
                debug!(step_id = %target.step_id, "Swipe on capture surface, recording cancelled");
                return Some(RecorderEvent::Discarded {
                    step_id: target.step_id,
                    reason: "swipe".into(),
                });
            }
        };

        let size = self.display.size();
        let x_percent = pixel_to_percent(px, size.width);
        let y_percent = pixel_to_percent(py, size.height);
        match self
            .store
            .update_step_position(&target.step_id, x_percent, y_percent)
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(step_id = %target.step_id, "No step takes this position, nothing stored");
                return Some(RecorderEvent::Discarded {
                    step_id: target.step_id,
                    reason: "step cannot hold a position".into(),
                });
            }
            Err(e) => {
                warn!(step_id = %target.step_id, error = %e, "Failed to store recorded position");
                return Some(RecorderEvent::Discarded {
                    step_id: target.step_id,
                    reason: e.to_string(),
                });
            }
        }

        let recorded = CoordinateRecorded {
            step_id: target.step_id,
            x_percent,
            y_percent,
            recorded_at: OffsetDateTime::now_utc(),
        };
        info!(
            step_id = %recorded.step_id,
            x_percent,
            y_percent,
            "Position recorded"
        );
        self.feed.publish(recorded.clone());
        Some(RecorderEvent::Captured(recorded))
    }

    /// Human abort while armed or capturing.
    pub fn cancel(&self) -> Option<RecorderEvent> {
        let mut phase = self.phase.lock().unwrap();
        let step_id = match std::mem::replace(&mut *phase, Phase::Idle) {
            Phase::Idle => return None,
            Phase::Armed(target) | Phase::Capturing { target, .. } => target.step_id,
        };
        drop(phase);
        self.overlay.remove(LayerKind::CapturePrompt);
        self.overlay.remove(LayerKind::CaptureSurface);
        info!(%step_id, "Recording cancelled");
        Some(RecorderEvent::Discarded {
            step_id,
            reason: "cancelled".into(),
        })
    }
}

impl RecordLauncher for CoordinateRecorder {
    fn launch(&self, target: RecordTarget) {
        self.arm(target);
    }

    fn abort(&self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDisplay, FakeRenderer};
    use crate::{MemoryStore, StepAction};

    fn recorder() -> (CoordinateRecorder, Arc<MemoryStore>, Arc<FakeRenderer>) {
        let store = Arc::new(MemoryStore::default());
        let renderer = Arc::new(FakeRenderer::default());
        let recorder = CoordinateRecorder::new(
            RecorderConfig::default(),
            store.clone(),
            Arc::new(OverlayController::new(renderer.clone())),
            Arc::new(FakeDisplay::new(1000, 2000)),
            CoordinateFeed::new(),
        );
        (recorder, store, renderer)
    }

    fn plus() -> RecordTarget {
        RecordTarget {
            step_id: "plus".into(),
            label: "Plus".into(),
        }
    }

    fn stored_position(store: &MemoryStore, id: &str) -> Option<(f32, f32)> {
        let step = store.load_steps().into_iter().find(|s| s.id == id)?;
        step.position().map(|p| (p.x, p.y))
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            CaptureOutcome::classify((100.0, 100.0), (115.0, 85.0), 15.0),
            CaptureOutcome::Tap { x: 107.5, y: 92.5 }
        );
        assert_eq!(
            CaptureOutcome::classify((100.0, 100.0), (116.0, 100.0), 15.0),
            CaptureOutcome::Swipe
        );
    }

    #[test]
    fn test_tap_is_stored_and_published() {
        let (recorder, store, renderer) = recorder();
        let mut feed = recorder.feed().subscribe();

        recorder.arm(plus());
        assert_eq!(recorder.state(), RecorderState::Armed);
        // input before begin_capture is ignored
        assert!(recorder.pointer_down(1.0, 1.0).is_none());
        assert!(recorder.pointer_up(1.0, 1.0).is_none());

        recorder.begin_capture();
        assert_eq!(renderer.visible(), [LayerKind::CaptureSurface]);
        recorder.pointer_down(495.0, 1000.0);
        let event = recorder.pointer_up(505.0, 1000.0);
        let Some(RecorderEvent::Captured(recorded)) = event else {
            panic!("expected capture, got {event:?}");
        };
        assert_eq!(recorded.x_percent, 0.5);
        assert_eq!(recorded.y_percent, 0.5);
        assert_eq!(stored_position(&store, "plus"), Some((0.5, 0.5)));
        assert_eq!(feed.try_recv().unwrap().step_id, "plus");
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert!(renderer.visible().is_empty());
    }

    #[test]
    fn test_swipe_cancels_silently() {
        let (recorder, store, renderer) = recorder();
        let mut feed = recorder.feed().subscribe();
        let before = stored_position(&store, "plus");

        recorder.arm(plus());
        recorder.begin_capture();
        recorder.pointer_down(100.0, 100.0);
        let event = recorder.pointer_up(400.0, 100.0);
        assert!(matches!(event, Some(RecorderEvent::Discarded { .. })));
        assert_eq!(stored_position(&store, "plus"), before);
        assert!(feed.try_recv().is_err());
        assert!(renderer.visible().is_empty());
    }

    #[test]
    fn test_cancel_and_abort() {
        let (recorder, _, renderer) = recorder();
        assert!(recorder.cancel().is_none());

        recorder.arm(plus());
        recorder.cancel();
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert!(renderer.visible().is_empty());

        recorder.launch(plus());
        recorder.begin_capture();
        recorder.abort();
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert!(renderer.visible().is_empty());
    }

    #[test]
    fn test_recording_non_positional_step_stores_nothing() {
        let (recorder, store, _) = recorder();
        let mut feed = recorder.feed().subscribe();
        recorder.arm(RecordTarget {
            step_id: "video_call".into(),
            label: "Video call".into(),
        });
        recorder.begin_capture();
        recorder.pointer_down(10.0, 10.0);
        let event = recorder.pointer_up(10.0, 10.0);
        assert!(matches!(
            event,
            Some(RecorderEvent::Discarded { ref step_id, .. }) if step_id == "video_call"
        ));
        let step = store
            .load_steps()
            .into_iter()
            .find(|s| s.id == "video_call")
            .unwrap();
        assert!(matches!(step.action, StepAction::FindAndTap { .. }));
        assert!(feed.try_recv().is_err());
        assert!(!store.is_configured());
    }

    #[test]
    fn test_recording_unknown_step_publishes_nothing() {
        let (recorder, store, renderer) = recorder();
        let mut feed = recorder.feed().subscribe();
        recorder.arm(RecordTarget {
            step_id: "ghost".into(),
            label: "Ghost".into(),
        });
        recorder.begin_capture();
        recorder.pointer_down(500.0, 500.0);
        let event = recorder.pointer_up(500.0, 500.0);
        assert!(matches!(event, Some(RecorderEvent::Discarded { .. })));
        assert!(feed.try_recv().is_err());
        assert!(!store.is_configured());
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert!(renderer.visible().is_empty());
    }
}
