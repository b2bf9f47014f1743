//! Tunables for the engine, locator and recorder.
//!
//! Every field has a default so a partial YAML file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top-level configuration file layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapflowConfig {
    pub engine: EngineConfig,
    pub locator: LocatorConfig,
    pub recorder: RecorderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Consecutive failures tolerated on one step before the session fails.
    pub retry_ceiling: u32,
    /// Constant wait between attempts.
    pub retry_backoff_ms: u64,
    /// Publish a progress tip every N retries.
    pub retry_tip_every: u32,
    /// Retry count at which a failed text lookup reports what is on screen.
    pub diagnostic_retry: u32,
    /// Wait after a completed run before the post-completion hook fires.
    pub settle_delay_ms: u64,
    /// Wait after a completed run before the follow-up tip.
    pub follow_up_tip_delay_ms: u64,
    /// Ask a human before every step. `false` steps unattended.
    pub require_confirmation: bool,
    /// Step whose search literal is the session's dynamic value.
    pub contact_step_id: String,
    /// Header text separating the wanted section of the result list.
    pub section_header: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: 20,
            retry_backoff_ms: 1000,
            retry_tip_every: 5,
            diagnostic_retry: 5,
            settle_delay_ms: 3000,
            follow_up_tip_delay_ms: 5000,
            require_confirmation: true,
            contact_step_id: "select_contact".into(),
            // Literal header text in the target app's search results.
            section_header: Some("联系人".into()),
        }
    }
}

impl EngineConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn follow_up_tip_delay(&self) -> Duration {
        Duration::from_millis(self.follow_up_tip_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Ancestor bound when checking for an enclosing editable field.
    pub editable_field_depth: usize,
    /// Ancestor bound when looking for something clickable.
    pub clickable_ancestor_depth: usize,
    /// Element classes treated as editable text fields.
    pub editable_classes: Vec<String>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            editable_field_depth: 15,
            clickable_ancestor_depth: 10,
            editable_classes: vec!["android.widget.EditText".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Max movement per axis, in pixels, for a press/release pair to count as a tap.
    pub tap_slop_px: f32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self { tap_slop_px: 15.0 }
    }
}

fn read_config(path: &Path) -> Result<TapflowConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Load configuration from a YAML file.
/// Returns defaults if the file doesn't exist or is invalid.
pub fn load_config(path: impl AsRef<Path>) -> TapflowConfig {
    let path = path.as_ref();
    if !path.exists() {
        debug!(?path, "No config file found, using defaults");
        return TapflowConfig::default();
    }

    match read_config(path) {
        Ok(config) => {
            info!(?path, "Loaded config");
            config
        }
        Err(e) => {
            warn!(?path, error = %e, "Failed to load config, using defaults");
            TapflowConfig::default()
        }
    }
}
