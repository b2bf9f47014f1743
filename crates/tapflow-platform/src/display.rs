//! Display metrics backed by `enigo`.

use crate::{PlatformError, PlatformResult};
use enigo::{Enigo, Mouse, Settings};
use std::sync::Mutex;
use tapflow_core::{Display, DisplaySize};
use tracing::warn;

/// Size of the main display as reported by `enigo`.
pub struct EnigoDisplay {
    enigo: Mutex<Enigo>,
    last_known: Mutex<DisplaySize>,
}

impl EnigoDisplay {
    pub fn new() -> PlatformResult<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| PlatformError::DisplayUnavailable(format!("failed to create Enigo: {e}")))?;
        let (width, height) = enigo
            .main_display()
            .map_err(|e| PlatformError::DisplayUnavailable(e.to_string()))?;
        Ok(Self {
            enigo: Mutex::new(enigo),
            last_known: Mutex::new(to_size(width, height)),
        })
    }
}

fn to_size(width: i32, height: i32) -> DisplaySize {
    DisplaySize::new(width.max(0) as u32, height.max(0) as u32)
}

impl Display for EnigoDisplay {
    fn size(&self) -> DisplaySize {
        let queried = self.enigo.lock().unwrap().main_display();
        let mut last_known = self.last_known.lock().unwrap();
        match queried {
            Ok((width, height)) => *last_known = to_size(width, height),
            Err(e) => warn!(error = %e, "Display query failed, using last known size"),
        }
        *last_known
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_display_size_clamps() {
        assert_eq!(to_size(-1, 1080), DisplaySize::new(0, 1080));
        assert_eq!(to_size(1920, 1080), DisplaySize::new(1920, 1080));
    }
}
