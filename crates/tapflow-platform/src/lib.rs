//! tapflow-platform: desktop I/O boundary for tapflow.
//!
//! This crate provides:
//! - Display metrics via `enigo`
//! - A global pointer hook via `rdev`, feeding the coordinate recorder

mod display;
mod error;
mod input_hook;

pub use display::EnigoDisplay;
pub use error::{PlatformError, PlatformResult};
pub use input_hook::{start_pointer_hook, PointerEvent, PointerHookHandle};
