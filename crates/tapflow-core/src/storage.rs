//! Step list storage and persistence.

use crate::{validate_steps, FlowStep, ScreenPercent, StepAction};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence contract for the ordered step list.
///
/// Implementors only move the serialized payload around; parsing, fallback to
/// the default flow and the read-modify-write helpers are shared.
pub trait StepStore: Send + Sync {
    /// Raw persisted payload, `None` if nothing was saved.
    fn read_raw(&self) -> StorageResult<Option<String>>;

    /// Replace the persisted payload as a whole.
    fn write_raw(&self, payload: &str) -> StorageResult<()>;

    /// Forget the persisted payload.
    fn clear_raw(&self) -> StorageResult<()>;

    fn load_test_contact(&self) -> String;

    fn save_test_contact(&self, name: &str) -> StorageResult<()>;

    /// Load the saved flow, or the default flow if absent or malformed.
    fn load_steps(&self) -> Vec<FlowStep> {
        let payload = match self.read_raw() {
            Ok(Some(payload)) => payload,
            Ok(None) => return default_flow(),
            Err(e) => {
                warn!(error = %e, "Failed to read step list, using default flow");
                return default_flow();
            }
        };
        match parse_steps(&payload) {
            Ok(steps) => steps,
            Err(reason) => {
                warn!(%reason, "Stored step list is malformed, using default flow");
                default_flow()
            }
        }
    }

    fn save_steps(&self, steps: &[FlowStep]) -> StorageResult<()> {
        let json = serde_json::to_string_pretty(steps)?;
        self.write_raw(&json)?;
        info!(count = steps.len(), "Saved step list");
        Ok(())
    }

    /// Set the position of a `Tap`/`Paste` step.
    ///
    /// Returns `false` without saving when `id` is unknown or names a step of
    /// another kind.
    fn update_step_position(
        &self,
        id: &str,
        x_percent: f32,
        y_percent: f32,
    ) -> StorageResult<bool> {
        let mut steps = self.load_steps();
        let Some(step) = steps.iter_mut().find(|s| s.id == id) else {
            debug!(id, "No step to update");
            return Ok(false);
        };
        let kind = step.kind();
        match &mut step.action {
            StepAction::Tap { position } | StepAction::Paste { position } => {
                *position = Some(ScreenPercent::new(x_percent, y_percent));
            }
            _ => {
                debug!(id, %kind, "Step does not take a position");
                return Ok(false);
            }
        }
        self.save_steps(&steps)?;
        Ok(true)
    }

    /// Set the search literal of a `FindAndTap` step. `false` when nothing
    /// was updated.
    fn update_step_find_text(&self, id: &str, text: &str) -> StorageResult<bool> {
        let mut steps = self.load_steps();
        let Some(step) = steps.iter_mut().find(|s| s.id == id) else {
            debug!(id, "No step to update");
            return Ok(false);
        };
        let kind = step.kind();
        let StepAction::FindAndTap { find_text } = &mut step.action else {
            debug!(id, %kind, "Step does not take a search text");
            return Ok(false);
        };
        *find_text = Some(text.to_string());
        self.save_steps(&steps)?;
        Ok(true)
    }

    fn reset_to_default(&self) -> StorageResult<()> {
        self.clear_raw()?;
        info!("Reset step list to default");
        Ok(())
    }

    fn is_configured(&self) -> bool {
        matches!(self.read_raw(), Ok(Some(_)))
    }
}

fn parse_steps(payload: &str) -> Result<Vec<FlowStep>, String> {
    let steps: Vec<FlowStep> = serde_json::from_str(payload).map_err(|e| e.to_string())?;
    validate_steps(&steps)?;
    Ok(steps)
}

/// The built-in eight step flow: open a chat by contact name and start a video call.
pub fn default_flow() -> Vec<FlowStep> {
    // find texts are literal UI strings of the target app
    vec![
        FlowStep::new("launch", "Open the app", StepAction::Launch)
            .delay_ms(3000)
            .hint("The app is started by the caller"),
        FlowStep::new(
            "search",
            "Tap the search button",
            StepAction::Tap {
                position: Some(ScreenPercent::new(0.85, 0.06)),
            },
        )
        .editable(true)
        .delay_ms(1500)
        .hint("Magnifier icon, top right of the home screen"),
        FlowStep::new(
            "paste",
            "Tap the keyboard paste suggestion",
            StepAction::Paste {
                position: Some(ScreenPercent::new(0.10, 0.70)),
            },
        )
        .editable(true)
        .delay_ms(1500)
        .hint("Clipboard suggestion above the keyboard"),
        FlowStep::new(
            "search_btn",
            "Tap the keyboard search key",
            StepAction::Tap {
                position: Some(ScreenPercent::new(0.90, 0.96)),
            },
        )
        .editable(true)
        .delay_ms(2000)
        .hint("Bottom right key of the keyboard"),
        FlowStep::new(
            "select_contact",
            "Tap the search result",
            StepAction::FindAndTap {
                find_text: Some(String::new()),
            },
        )
        .delay_ms(2000)
        .hint("Taps the first result matching the contact"),
        FlowStep::new(
            "plus",
            "Tap the + button",
            StepAction::Tap {
                position: Some(ScreenPercent::new(0.92, 0.94)),
            },
        )
        .editable(true)
        .delay_ms(1500)
        .hint("Bottom right of the chat screen"),
        FlowStep::new(
            "video_call",
            "Tap \"video call\"",
            StepAction::FindAndTap {
                find_text: Some("视频通话".into()),
            },
        )
        .editable(true)
        .delay_ms(1500)
        .hint("Entry in the feature panel"),
        FlowStep::new(
            "confirm",
            "Confirm the video call",
            StepAction::FindAndTap {
                find_text: Some("视频通话".into()),
            },
        )
        .editable(true)
        .delay_ms(1000)
        .hint("Button in the confirmation sheet"),
    ]
}

/// Get the app data directory for tapflow.
pub fn get_app_data_dir() -> PathBuf {
    let base = dirs_next::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("tapflow")
}

const FLOW_FILE: &str = "flow_steps.json";
const TEST_CONTACT_FILE: &str = "test_contact.txt";

/// File-backed store: one JSON document for the flow, one text file for the test contact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the per-user data directory.
    pub fn in_app_data_dir() -> Self {
        Self::new(get_app_data_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn flow_path(&self) -> PathBuf {
        self.dir.join(FLOW_FILE)
    }

    fn ensure_dir(&self) -> StorageResult<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
            info!(dir = ?self.dir, "Created data directory");
        }
        Ok(())
    }
}

impl StepStore for JsonFileStore {
    fn read_raw(&self) -> StorageResult<Option<String>> {
        let path = self.flow_path();
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        debug!(?path, "Loaded step list");
        Ok(Some(json))
    }

    fn write_raw(&self, payload: &str) -> StorageResult<()> {
        self.ensure_dir()?;
        let path = self.flow_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn clear_raw(&self) -> StorageResult<()> {
        let path = self.flow_path();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn load_test_contact(&self) -> String {
        fs::read_to_string(self.dir.join(TEST_CONTACT_FILE))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    fn save_test_contact(&self, name: &str) -> StorageResult<()> {
        self.ensure_dir()?;
        fs::write(self.dir.join(TEST_CONTACT_FILE), name)?;
        debug!(name, "Saved test contact");
        Ok(())
    }
}

/// In-memory store holding the same serialized payload as [`JsonFileStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    flow: Mutex<Option<String>>,
    test_contact: Mutex<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a step list.
    pub fn with_steps(steps: &[FlowStep]) -> StorageResult<Self> {
        let store = Self::new();
        store.save_steps(steps)?;
        Ok(store)
    }
}

impl StepStore for MemoryStore {
    fn read_raw(&self) -> StorageResult<Option<String>> {
        Ok(self.flow.lock().unwrap().clone())
    }

    fn write_raw(&self, payload: &str) -> StorageResult<()> {
        *self.flow.lock().unwrap() = Some(payload.to_string());
        Ok(())
    }

    fn clear_raw(&self) -> StorageResult<()> {
        *self.flow.lock().unwrap() = None;
        Ok(())
    }

    fn load_test_contact(&self) -> String {
        self.test_contact.lock().unwrap().clone()
    }

    fn save_test_contact(&self, name: &str) -> StorageResult<()> {
        *self.test_contact.lock().unwrap() = name.to_string();
        Ok(())
    }
}
