//! Gesture issuance boundary and screen-space conversions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a dispatched tap ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TapOutcome {
    Completed,
    Cancelled,
}

/// Issues synthetic taps at absolute pixel coordinates.
///
/// Stateless per call. Platform failures are reported as
/// [`TapOutcome::Cancelled`] so the engine retries them like any other
/// interrupted gesture.
#[async_trait]
pub trait GestureDispatcher: Send + Sync {
    async fn tap(&self, x: i32, y: i32) -> TapOutcome;
}

/// Current display dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl DisplaySize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

pub trait Display: Send + Sync {
    fn size(&self) -> DisplaySize;
}

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
}

/// Shared clipboard of the device. Written once per session.
pub trait Clipboard: Send + Sync {
    fn set_text(&self, text: &str) -> Result<(), ClipboardError>;

    fn clear(&self) -> Result<(), ClipboardError>;
}

/// Percent of a dimension to whole pixels, truncating.
pub fn percent_to_pixel(percent: f32, dimension: u32) -> i32 {
    (percent * dimension as f32) as i32
}

/// Pixel position to percent of a dimension.
pub fn pixel_to_percent(pixel: f32, dimension: u32) -> f32 {
    if dimension == 0 {
        return 0.0;
    }
    pixel / dimension as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_to_pixel_truncates() {
        assert_eq!(percent_to_pixel(0.85, 1080), 918);
        assert_eq!(percent_to_pixel(0.999, 100), 99);
        assert_eq!(percent_to_pixel(0.0, 1920), 0);
    }

    #[test]
    fn test_roundtrip_within_one_pixel() {
        for dimension in [1u32, 7, 720, 1080, 1920, 2400, 3200] {
            for step in 0..=100 {
                let p = step as f32 / 100.0;
                let px = percent_to_pixel(p, dimension);
                let back = pixel_to_percent(px as f32, dimension);
                let error_px = (back - p).abs() * dimension as f32;
                assert!(error_px < 1.001, "p={p} dim={dimension} error={error_px}");
            }
        }
    }

    #[test]
    fn test_zero_dimension() {
        assert_eq!(pixel_to_percent(12.0, 0), 0.0);
    }
}
