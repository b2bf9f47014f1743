//! Automation engine: one session at a time, driven by a single tokio task.
//!
//! Every input reaches the engine as an [`EngineCommand`] on one channel:
//! control calls from the [`EngineHandle`], expired timers and finished
//! gestures. Timers and gestures carry the id of the session that scheduled
//! them and are dropped if that session is gone. Teardown aborts every task a
//! session spawned.

use crate::event::{EngineEvent, EventBus, FailureKind};
use crate::gesture::{percent_to_pixel, Clipboard, Display, GestureDispatcher, TapOutcome};
use crate::locator::{LookupFailure, NodeLocator, SelectionStrategy, UiTree};
use crate::overlay::{describe_step, ConfirmationPanel, Layer, LayerKind, OverlayController};
use crate::recorder::{RecordLauncher, RecordTarget};
use crate::storage::StepStore;
use crate::{EngineConfig, FlowStep, LocatorConfig, ScreenPercent, StepAction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Engine state machine. A finished session returns to `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    #[default]
    Idle,
    Running {
        cursor: usize,
        awaiting_confirmation: bool,
    },
    /// Handing the session over to the coordinate recorder.
    RecordHandoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Run the whole flow.
    Execute,
    /// Run up to a target step, then record its position.
    Record,
}

impl RunMode {
    fn label(self) -> &'static str {
        match self {
            Self::Execute => "[Execute]",
            Self::Record => "[Record]",
        }
    }
}

/// Parameters of a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub mode: RunMode,
    /// Run-time value: pasted into search and used to pick the contact.
    pub dynamic_value: Option<String>,
    pub record_target: Option<String>,
}

impl SessionRequest {
    pub fn execute(dynamic_value: impl Into<String>) -> Self {
        Self {
            mode: RunMode::Execute,
            dynamic_value: Some(dynamic_value.into()),
            record_target: None,
        }
    }

    pub fn record(target_step_id: impl Into<String>, dynamic_value: Option<String>) -> Self {
        Self {
            mode: RunMode::Record,
            dynamic_value,
            record_target: Some(target_step_id.into()),
        }
    }
}

/// Invoked once, a settle delay after an execute session completes.
pub type CompletionHook = Arc<dyn Fn() + Send + Sync>;

/// Everything the engine talks to.
pub struct EngineServices {
    pub store: Arc<dyn StepStore>,
    pub tree: Arc<dyn UiTree>,
    pub gestures: Arc<dyn GestureDispatcher>,
    pub display: Arc<dyn Display>,
    pub clipboard: Arc<dyn Clipboard>,
    pub overlay: Arc<OverlayController>,
    pub recorder: Arc<dyn RecordLauncher>,
    pub on_complete: Option<CompletionHook>,
}

#[derive(Debug)]
enum EngineCommand {
    Start(SessionRequest),
    Cancel,
    Confirm,
    Exit,
    Timer {
        session_id: u64,
        continuation: Continuation,
    },
    GestureFinished {
        session_id: u64,
        outcome: TapOutcome,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum Continuation {
    ShowConfirmation,
    ProcessStep,
}

/// Why a step did not complete.
#[derive(Debug)]
enum StepFailure {
    /// The step cannot run as stored. Not retried.
    Configuration(String),
    /// Worth another attempt.
    Transient(String),
}

struct EngineSession {
    id: u64,
    mode: RunMode,
    steps: Vec<FlowStep>,
    cursor: usize,
    awaiting_confirmation: bool,
    record_target: Option<String>,
    retry_count: u32,
    dynamic_value: String,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineSession {
    fn current(&self) -> Option<&FlowStep> {
        self.steps.get(self.cursor)
    }

    fn is_record_target(&self, step: &FlowStep) -> bool {
        self.mode == RunMode::Record && self.record_target.as_deref() == Some(step.id.as_str())
    }

    fn dynamic(&self) -> Option<&str> {
        (!self.dynamic_value.is_empty()).then_some(self.dynamic_value.as_str())
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }
}

pub struct Engine {
    config: EngineConfig,
    locator: NodeLocator,
    services: EngineServices,
    events: EventBus,
    state_tx: watch::Sender<EngineState>,
    cmd_tx: mpsc::WeakUnboundedSender<EngineCommand>,
    cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
    session: Option<EngineSession>,
    next_session_id: u64,
}

impl Engine {
    /// Spawn the engine task on the current tokio runtime.
    pub fn spawn(
        config: EngineConfig,
        locator: LocatorConfig,
        services: EngineServices,
    ) -> EngineHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(EngineState::Idle);
        let events = EventBus::default();

        let engine = Engine {
            config,
            locator: NodeLocator::new(locator),
            services,
            events: events.clone(),
            state_tx,
            cmd_tx: cmd_tx.downgrade(),
            cmd_rx,
            session: None,
            next_session_id: 1,
        };
        tokio::spawn(engine.run());

        EngineHandle {
            cmd_tx,
            state_rx,
            events,
        }
    }

    async fn run(mut self) {
        info!("Engine started");
        while let Some(cmd) = self.cmd_rx.recv().await {
            if !self.handle(cmd) {
                break;
            }
        }
        self.teardown();
        info!("Engine stopped");
    }

    /// Returns `false` to stop the loop.
    fn handle(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Start(request) => self.start_session(request),
            EngineCommand::Cancel => self.end_by_request("Session cancelled"),
            EngineCommand::Exit => self.end_by_request("Exited"),
            EngineCommand::Confirm => self.confirm(),
            EngineCommand::Timer {
                session_id,
                continuation,
            } => {
                if !self.is_active(session_id) {
                    debug!(session_id, ?continuation, "Dropping stale timer");
                    return true;
                }
                match continuation {
                    Continuation::ShowConfirmation => self.show_confirmation(),
                    Continuation::ProcessStep => self.process_step(),
                }
            }
            EngineCommand::GestureFinished {
                session_id,
                outcome,
            } => {
                if !self.is_active(session_id) {
                    debug!(session_id, ?outcome, "Dropping stale gesture result");
                    return true;
                }
                match outcome {
                    TapOutcome::Completed => self.advance(),
                    TapOutcome::Cancelled => {
                        self.retry_or_fail(StepFailure::Transient("gesture cancelled".into()))
                    }
                }
            }
            EngineCommand::Shutdown => return false,
        }
        true
    }

    fn is_active(&self, session_id: u64) -> bool {
        self.session.as_ref().map(|s| s.id) == Some(session_id)
    }

    fn start_session(&mut self, request: SessionRequest) {
        if let Some(old) = &self.session {
            debug!(session_id = old.id, "Replacing active session");
        }
        self.teardown();
        self.services.recorder.abort();

        if let Err(e) = self.services.clipboard.clear() {
            warn!(error = %e, "Failed to clear clipboard");
        }
        let dynamic_value = request
            .dynamic_value
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if !dynamic_value.is_empty() {
            if let Err(e) = self.services.clipboard.set_text(&dynamic_value) {
                warn!(error = %e, "Failed to write clipboard");
            }
        }

        let session_id = self.next_session_id;
        self.next_session_id += 1;
        let steps = self.services.store.load_steps();

        // steps[1..end] run before the session ends or hands off
        let end = match request.mode {
            RunMode::Execute => steps.len(),
            RunMode::Record => match record_target_index(&steps, request.record_target.as_deref())
            {
                Ok(index) => index,
                Err(message) => {
                    self.reject(session_id, message);
                    return;
                }
            },
        };
        let preamble = steps.get(1..end).unwrap_or_default();

        if dynamic_value.is_empty() {
            if let Some(step) = preamble
                .iter()
                .find(|s| needs_dynamic_value(&self.config, s))
            {
                self.reject(
                    session_id,
                    format!("\"{}\" needs a contact name, none was given", step.label),
                );
                return;
            }
        }

        if request.mode == RunMode::Record && preamble.is_empty() {
            let target = steps[end].clone();
            info!(session_id, step_id = %target.id, "Nothing to run before the target");
            self.hand_off(session_id, target);
            return;
        }

        let first_delay = steps.first().map(|s| s.delay_ms).unwrap_or_default();
        let total_steps = steps.len();
        info!(session_id, mode = ?request.mode, total_steps, "Session started");
        self.session = Some(EngineSession {
            id: session_id,
            mode: request.mode,
            steps,
            cursor: 1,
            awaiting_confirmation: false,
            record_target: request.record_target,
            retry_count: 0,
            dynamic_value,
            tasks: Vec::new(),
        });

        if let Err(e) = self.services.overlay.show(Layer::Mask) {
            warn!(session_id, error = %e, "Failed to show session mask");
        }
        self.set_state(EngineState::Running {
            cursor: 1,
            awaiting_confirmation: false,
        });
        self.events.publish(EngineEvent::SessionStarted {
            session_id,
            mode: request.mode,
            total_steps,
        });
        self.schedule_next(first_delay);
    }

    fn confirm(&mut self) {
        let Some(session) = self.session.as_mut() else {
            debug!("Confirm without a session");
            return;
        };
        if !session.awaiting_confirmation {
            debug!(session_id = session.id, "Confirm while not awaiting confirmation");
            return;
        }
        session.awaiting_confirmation = false;
        let cursor = session.cursor;
        self.services.overlay.remove(LayerKind::Confirmation);
        self.set_state(EngineState::Running {
            cursor,
            awaiting_confirmation: false,
        });
        self.process_step();
    }

    fn end_by_request(&mut self, message: &str) {
        let Some(session_id) = self.session.as_ref().map(|s| s.id) else {
            return;
        };
        info!(session_id, "{message}");
        self.tip(message.to_string());
        self.events
            .publish(EngineEvent::SessionCancelled { session_id });
        self.teardown();
    }

    /// Refuse a session before anything runs.
    fn reject(&self, session_id: u64, message: String) {
        error!(session_id, %message, "Session not started");
        self.tip(format!("Failed: {message}"));
        self.events.publish(EngineEvent::SessionFailed {
            session_id,
            kind: FailureKind::Configuration,
            message,
        });
    }

    /// Next confirmation, or the step itself when running unattended.
    fn schedule_next(&mut self, delay_ms: u64) {
        let continuation = if self.config.require_confirmation {
            Continuation::ShowConfirmation
        } else {
            Continuation::ProcessStep
        };
        self.schedule(Duration::from_millis(delay_ms), continuation);
    }

    fn schedule(&mut self, delay: Duration, continuation: Continuation) {
        let tx = self.cmd_tx.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let session_id = session.id;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(EngineCommand::Timer {
                    session_id,
                    continuation,
                });
            }
        });
        session.track(task);
    }

    fn show_confirmation(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(step) = session.current() else {
            self.complete();
            return;
        };

        let search_literal = search_literal(&self.config, session, step);
        let is_record_target = session.is_record_target(step);
        let panel = ConfirmationPanel {
            session_id: session.id,
            mode: session.mode,
            mode_label: session.mode.label().into(),
            step_index: session.cursor,
            step_total: session.steps.len().saturating_sub(1),
            step_id: step.id.clone(),
            label: step.label.clone(),
            description: describe_step(
                step,
                is_record_target,
                session.dynamic(),
                search_literal.as_deref(),
            ),
            hint: step.hint.clone(),
            confirm_label: if is_record_target {
                "Start recording".into()
            } else {
                "Next".into()
            },
            exit_label: "Exit".into(),
        };
        session.awaiting_confirmation = true;
        let (session_id, cursor) = (session.id, session.cursor);

        if let Err(e) = self.services.overlay.show(Layer::Confirmation(panel.clone())) {
            self.fail(FailureKind::Overlay, format!("cannot show confirmation: {e}"));
            return;
        }
        debug!(session_id, cursor, step_id = %panel.step_id, "Awaiting confirmation");
        self.set_state(EngineState::Running {
            cursor,
            awaiting_confirmation: true,
        });
        self.events
            .publish(EngineEvent::AwaitingConfirmation { session_id, panel });
    }

    fn process_step(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let Some(step) = session.current().cloned() else {
            self.complete();
            return;
        };
        let (session_id, cursor) = (session.id, session.cursor);
        if session.retry_count == 0 {
            info!(session_id, cursor, step_id = %step.id, kind = %step.kind(), "Step started");
            self.events.publish(EngineEvent::StepStarted {
                session_id,
                index: cursor,
                step_id: step.id.clone(),
            });
        }

        if session.is_record_target(&step) {
            self.hand_off(session_id, step);
            return;
        }

        let result = match &step.action {
            StepAction::Launch | StepAction::Delay => Ok(true),
            StepAction::Tap { position } | StepAction::Paste { position } => match position {
                Some(position) => {
                    self.dispatch_tap(*position);
                    Ok(false)
                }
                None => Err(StepFailure::Configuration(format!(
                    "\"{}\" has no recorded position, record it first",
                    step.label
                ))),
            },
            StepAction::FindAndTap { .. } => self.find_and_tap(&step),
        };

        match result {
            Ok(true) => self.advance(),
            // completion arrives as a GestureFinished command
            Ok(false) => {}
            Err(failure) => self.retry_or_fail(failure),
        }
    }

    fn find_and_tap(&self, step: &FlowStep) -> Result<bool, StepFailure> {
        let Some(session) = self.session.as_ref() else {
            return Ok(false);
        };
        let literal = search_literal(&self.config, session, step).unwrap_or_default();
        let literal = literal.trim();
        if literal.is_empty() {
            return Err(StepFailure::Configuration(format!(
                "\"{}\" has no search text",
                step.label
            )));
        }

        let strategy = if step.id == self.config.contact_step_id {
            SelectionStrategy::Disambiguate {
                section_header: self.config.section_header.clone(),
            }
        } else {
            SelectionStrategy::First
        };

        match self
            .locator
            .locate(self.services.tree.as_ref(), literal, &strategy)
        {
            Ok(node) => {
                if node.perform_click() {
                    debug!(step_id = %step.id, literal, "Clicked");
                    self.tip(format!(
                        "Step {}/{}: {}",
                        session.cursor,
                        session.steps.len().saturating_sub(1),
                        step.label
                    ));
                    Ok(true)
                } else {
                    Err(StepFailure::Transient(format!(
                        "\"{literal}\" refused the click"
                    )))
                }
            }
            Err(failure) => {
                if matches!(failure, LookupFailure::NotFound(_))
                    && session.retry_count == self.config.diagnostic_retry
                {
                    self.report_visible_texts(literal);
                }
                Err(StepFailure::Transient(failure.to_string()))
            }
        }
    }

    fn report_visible_texts(&self, literal: &str) {
        let Some(root) = self.services.tree.root() else {
            return;
        };
        let texts = self.locator.visible_texts(&root, 8);
        self.tip(format!(
            "\"{literal}\" not found. On screen: {}",
            texts.join(", ")
        ));
    }

    fn dispatch_tap(&mut self, position: ScreenPercent) {
        let size = self.services.display.size();
        let x = percent_to_pixel(position.x, size.width);
        let y = percent_to_pixel(position.y, size.height);
        let gestures = self.services.gestures.clone();
        let tx = self.cmd_tx.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let session_id = session.id;
        debug!(session_id, x, y, "Dispatching tap");
        let task = tokio::spawn(async move {
            let outcome = gestures.tap(x, y).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(EngineCommand::GestureFinished {
                    session_id,
                    outcome,
                });
            }
        });
        session.track(task);
    }

    fn advance(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(finished) = session.current() else {
            self.complete();
            return;
        };
        let finished_delay = finished.delay_ms;
        let event = EngineEvent::StepCompleted {
            session_id: session.id,
            index: session.cursor,
            step_id: finished.id.clone(),
        };
        session.retry_count = 0;
        session.cursor += 1;
        let (cursor, done) = (session.cursor, session.cursor >= session.steps.len());
        self.events.publish(event);

        if done {
            self.complete();
            return;
        }
        self.set_state(EngineState::Running {
            cursor,
            awaiting_confirmation: false,
        });
        self.schedule_next(finished_delay);
    }

    fn complete(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let (session_id, mode) = (session.id, session.mode);
        info!(session_id, ?mode, "Session completed");
        match mode {
            RunMode::Execute => {
                self.tip("Flow finished".into());
                self.after_completion();
            }
            RunMode::Record => self.tip("Steps before the recording target are done".into()),
        }
        self.events
            .publish(EngineEvent::SessionCompleted { session_id, mode });
        self.teardown();
    }

    /// Settle-delay hook and follow-up tip. Not owned by the session.
    fn after_completion(&self) {
        if let Some(hook) = self.services.on_complete.clone() {
            let delay = self.config.settle_delay();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                hook();
            });
        }
        let events = self.events.clone();
        let delay = self.config.follow_up_tip_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events.publish(EngineEvent::Tip {
                message: "If no call started, check that the contact is reachable".into(),
            });
        });
    }

    fn retry_or_fail(&mut self, failure: StepFailure) {
        let reason = match failure {
            StepFailure::Configuration(message) => {
                self.fail(FailureKind::Configuration, message);
                return;
            }
            StepFailure::Transient(reason) => reason,
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.retry_count += 1;
        let attempt = session.retry_count;
        let session_id = session.id;
        let step_id = session.current().map(|s| s.id.clone()).unwrap_or_default();

        let ceiling = self.config.retry_ceiling;
        if attempt > ceiling {
            self.fail(
                FailureKind::Exhausted,
                format!("{reason} (gave up after {ceiling} retries)"),
            );
            return;
        }

        debug!(session_id, %step_id, attempt, %reason, "Retrying step");
        let every = self.config.retry_tip_every;
        if every > 0 && attempt % every == 0 {
            self.tip(format!("Retrying: {reason} ({attempt}/{ceiling})"));
        }
        self.events.publish(EngineEvent::Retrying {
            session_id,
            step_id,
            attempt,
            reason,
        });
        self.schedule(self.config.retry_backoff(), Continuation::ProcessStep);
    }

    fn fail(&mut self, kind: FailureKind, message: String) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let session_id = session.id;
        error!(session_id, ?kind, cursor = session.cursor, %message, "Session failed");
        self.tip(format!("Failed: {message}"));
        self.events.publish(EngineEvent::SessionFailed {
            session_id,
            kind,
            message,
        });
        self.teardown();
    }

    /// Stop here and let the recorder take over `step`.
    fn hand_off(&mut self, session_id: u64, step: FlowStep) {
        info!(session_id, step_id = %step.id, "Handing over to recorder");
        self.set_state(EngineState::RecordHandoff);
        self.tip(format!("Reached \"{}\", record its position", step.label));
        self.events.publish(EngineEvent::RecordHandoff {
            session_id,
            step_id: step.id.clone(),
        });
        self.teardown();
        self.services.recorder.launch(RecordTarget {
            step_id: step.id,
            label: step.label,
        });
    }

    /// Abort the session's tasks, drop its layers and return to `Idle`.
    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            for task in &session.tasks {
                task.abort();
            }
            debug!(session_id = session.id, "Session torn down");
        }
        self.services.overlay.remove(LayerKind::Confirmation);
        self.services.overlay.remove(LayerKind::Mask);
        self.set_state(EngineState::Idle);
    }

    fn set_state(&mut self, new: EngineState) {
        let old = *self.state_tx.borrow();
        if old == new {
            return;
        }
        self.state_tx.send_replace(new);
        debug!(?old, ?new, "Engine state changed");
        self.events.publish(EngineEvent::StateChanged { old, new });
    }

    fn tip(&self, message: String) {
        info!(tip = %message);
        self.events.publish(EngineEvent::Tip { message });
    }
}

/// Index of the step a record session stops at. Only steps that take a
/// screen position can be recorded.
fn record_target_index(steps: &[FlowStep], target: Option<&str>) -> Result<usize, String> {
    let target = target.unwrap_or_default();
    let Some(index) = steps.iter().position(|s| s.id == target) else {
        return Err(format!("unknown step to record: {target}"));
    };
    let step = &steps[index];
    if !step.accepts_position() {
        return Err(format!(
            "\"{}\" is a {} step and has no position to record",
            step.label,
            step.kind()
        ));
    }
    Ok(index)
}

/// Steps that cannot run without the run-time value.
fn needs_dynamic_value(config: &EngineConfig, step: &FlowStep) -> bool {
    match step.action {
        StepAction::Paste { .. } => true,
        StepAction::FindAndTap { .. } => step.id == config.contact_step_id,
        _ => false,
    }
}

/// Text a find step looks for: the dynamic value for the contact step,
/// the stored literal otherwise.
fn search_literal(config: &EngineConfig, session: &EngineSession, step: &FlowStep) -> Option<String> {
    match &step.action {
        StepAction::FindAndTap { find_text } => {
            if step.id == config.contact_step_id {
                Some(session.dynamic_value.clone())
            } else {
                find_text.clone()
            }
        }
        _ => None,
    }
}

/// Cloneable control surface of a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    state_rx: watch::Receiver<EngineState>,
    events: EventBus,
}

impl EngineHandle {
    fn send(&self, cmd: EngineCommand) {
        if let Err(e) = self.cmd_tx.send(cmd) {
            warn!("Failed to send command to engine: {}", e);
        }
    }

    /// Replaces any active session.
    pub fn start_session(&self, request: SessionRequest) {
        self.send(EngineCommand::Start(request));
    }

    pub fn start_execute_session(&self, dynamic_value: impl Into<String>) {
        self.start_session(SessionRequest::execute(dynamic_value));
    }

    pub fn start_record_session(
        &self,
        target_step_id: impl Into<String>,
        dynamic_value: Option<String>,
    ) {
        self.start_session(SessionRequest::record(target_step_id, dynamic_value));
    }

    /// Cancel from outside the session, e.g. the host app went away.
    pub fn cancel_session(&self) {
        self.send(EngineCommand::Cancel);
    }

    /// "Next" on the confirmation panel.
    pub fn confirm(&self) {
        self.send(EngineCommand::Confirm);
    }

    /// "Exit" on the confirmation panel.
    pub fn exit(&self) {
        self.send(EngineCommand::Exit);
    }

    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Tear down any session and stop the engine task.
    pub fn shutdown(&self) {
        self.send(EngineCommand::Shutdown);
    }
}
