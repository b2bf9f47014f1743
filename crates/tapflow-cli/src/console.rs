//! Overlay layers rendered as terminal output.

use tapflow_core::{Layer, LayerKind, OverlayError, OverlayRenderer};
use tracing::debug;

pub struct ConsoleOverlay;

impl OverlayRenderer for ConsoleOverlay {
    fn add(&self, layer: &Layer) -> Result<(), OverlayError> {
        match layer {
            Layer::Mask => {}
            Layer::Confirmation(panel) => {
                println!(
                    "{} Step {}/{}: {}",
                    panel.mode_label, panel.step_index, panel.step_total, panel.label
                );
                println!("  {}", panel.description);
                if !panel.hint.is_empty() {
                    println!("  Hint: {}", panel.hint);
                }
            }
            Layer::CapturePrompt(prompt) => {
                println!("Recording \"{}\"", prompt.label);
                println!("  {}", prompt.message);
                println!("  Press Enter to begin capture, or q and Enter to cancel.");
            }
            Layer::CaptureSurface { .. } => {
                println!("Capturing: tap (click) the position on screen.");
            }
        }
        debug!(kind = ?layer.kind(), "layer added");
        Ok(())
    }

    fn remove(&self, kind: LayerKind) -> Result<(), OverlayError> {
        debug!(?kind, "layer removed");
        Ok(())
    }
}
