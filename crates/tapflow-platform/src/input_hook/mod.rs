//! Global pointer hook feeding the coordinate recorder.
//!
//! Only left-button presses and releases are reported, each with the last
//! pointer position seen by the hook.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tapflow_core::{CoordinateRecorder, RecorderEvent};

mod rdev_impl;

/// A pointer transition, in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down { x: f32, y: f32 },
    Up { x: f32, y: f32 },
}

impl PointerEvent {
    /// Hand the event to the recorder.
    pub fn feed(self, recorder: &CoordinateRecorder) -> Option<RecorderEvent> {
        match self {
            Self::Down { x, y } => recorder.pointer_down(x, y),
            Self::Up { x, y } => recorder.pointer_up(x, y),
        }
    }
}

/// Handle to the hook thread.
pub struct PointerHookHandle {
    event_rx: Receiver<PointerEvent>,
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl PointerHookHandle {
    /// Wait up to `timeout` for an event. `None` on timeout or when the hook
    /// is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PointerEvent> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Signal the hook to stop.
    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Check if the hook thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for PointerHookHandle {
    fn drop(&mut self) {
        self.stop();
        // rdev's listener never returns; leave the thread detached
        let _ = self.thread.take();
    }
}

/// Start listening for global pointer input.
pub fn start_pointer_hook() -> PointerHookHandle {
    let (event_tx, event_rx) = bounded(256);
    let (stop_tx, stop_rx) = bounded(1);

    let thread = thread::spawn(move || {
        rdev_impl::start_hook(event_tx, stop_rx);
    });

    PointerHookHandle {
        event_rx,
        stop_tx,
        thread: Some(thread),
    }
}
