//! rdev-based listener.

use super::PointerEvent;
use crossbeam_channel::{Receiver, Sender};
use rdev::{listen, Button, Event, EventType};
use tracing::{error, info, warn};

/// Tracks the pointer so button events can carry a position.
#[derive(Debug, Default)]
pub(super) struct PointerTracker {
    position: (f32, f32),
}

impl PointerTracker {
    pub(super) fn translate(&mut self, event_type: &EventType) -> Option<PointerEvent> {
        match event_type {
            EventType::MouseMove { x, y } => {
                self.position = (*x as f32, *y as f32);
                None
            }
            EventType::ButtonPress(Button::Left) => Some(PointerEvent::Down {
                x: self.position.0,
                y: self.position.1,
            }),
            EventType::ButtonRelease(Button::Left) => Some(PointerEvent::Up {
                x: self.position.0,
                y: self.position.1,
            }),
            _ => None,
        }
    }
}

/// Run the rdev listener on the current thread.
pub fn start_hook(event_tx: Sender<PointerEvent>, stop_rx: Receiver<()>) {
    info!("Pointer hook thread started (rdev)");
    let mut tracker = PointerTracker::default();
    let mut stopped = false;

    let callback = move |event: Event| {
        if stopped || stop_rx.try_recv().is_ok() {
            stopped = true;
            return;
        }
        if let Some(pointer) = tracker.translate(&event.event_type) {
            if let Err(e) = event_tx.try_send(pointer) {
                warn!("Failed to send pointer event: {}", e);
            }
        }
    };

    if let Err(error) = listen(callback) {
        error!(?error, "Pointer hook error");
    }

    info!("Pointer hook thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buttons_carry_last_position() {
        let mut tracker = PointerTracker::default();
        assert_eq!(
            tracker.translate(&EventType::MouseMove { x: 10.4, y: 20.0 }),
            None
        );
        assert_eq!(
            tracker.translate(&EventType::ButtonPress(Button::Left)),
            Some(PointerEvent::Down { x: 10.4, y: 20.0 })
        );
        tracker.translate(&EventType::MouseMove { x: 12.0, y: 21.0 });
        assert_eq!(
            tracker.translate(&EventType::ButtonRelease(Button::Left)),
            Some(PointerEvent::Up { x: 12.0, y: 21.0 })
        );
    }

    #[test]
    fn test_other_buttons_ignored() {
        let mut tracker = PointerTracker::default();
        assert_eq!(tracker.translate(&EventType::ButtonPress(Button::Right)), None);
        assert_eq!(
            tracker.translate(&EventType::Wheel {
                delta_x: 0,
                delta_y: 1
            }),
            None
        );
    }
}
