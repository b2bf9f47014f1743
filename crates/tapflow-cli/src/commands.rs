//! Subcommand implementations.

use crate::console::ConsoleOverlay;
use anyhow::{bail, Context, Result};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tapflow_core::{
    CoordinateFeed, CoordinateRecorder, FlowStep, JsonFileStore, OverlayController,
    RecordTarget, RecorderEvent, RecorderState, StepAction, StepStore, TapflowConfig,
};
use tapflow_platform::{start_pointer_hook, EnigoDisplay};
use tracing::info;

fn find_step(store: &JsonFileStore, id: &str) -> Result<FlowStep> {
    store
        .load_steps()
        .into_iter()
        .find(|s| s.id == id)
        .with_context(|| format!("no step with id \"{id}\""))
}

fn describe_target(step: &FlowStep) -> String {
    match &step.action {
        StepAction::Tap { position } | StepAction::Paste { position } => match position {
            Some(p) => format!("X:{:.1}% Y:{:.1}%", p.x * 100.0, p.y * 100.0),
            None => "not recorded".into(),
        },
        StepAction::FindAndTap { find_text } => {
            format!("\"{}\"", find_text.as_deref().unwrap_or_default())
        }
        StepAction::Launch | StepAction::Delay => String::new(),
    }
}

pub fn steps(store: &JsonFileStore, config: &TapflowConfig, json: bool) -> Result<()> {
    let steps = store.load_steps();
    if json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
        return Ok(());
    }

    let source = if store.is_configured() { "saved" } else { "default" };
    println!("Flow ({source}, {} steps) in {}", steps.len(), store.dir().display());
    for (index, step) in steps.iter().enumerate() {
        let mut target = describe_target(step);
        if step.id == config.engine.contact_step_id {
            target = "<run-time value>".into();
        }
        println!(
            "{index:>2}  {:<16} {:<13} {:<40} {:<20} {} ms",
            step.id,
            step.kind().to_string(),
            step.label,
            target,
            step.delay_ms
        );
    }

    let contact = store.load_test_contact();
    if !contact.is_empty() {
        println!("Test contact: {contact}");
    }
    Ok(())
}

pub fn reset(store: &JsonFileStore) -> Result<()> {
    store.reset_to_default()?;
    println!("Flow reset to defaults");
    Ok(())
}

pub fn set_text(store: &JsonFileStore, config: &TapflowConfig, id: &str, text: &str) -> Result<()> {
    let step = find_step(store, id)?;
    if !matches!(step.action, StepAction::FindAndTap { .. }) {
        bail!("step \"{id}\" is a {} step and has no search text", step.kind());
    }
    if id == config.engine.contact_step_id {
        println!("Note: \"{id}\" searches for the run-time value; the stored text is unused");
    }
    if !store.update_step_find_text(id, text.trim())? {
        bail!("step \"{id}\" was not updated");
    }
    println!("Search text of \"{id}\" set to \"{}\"", text.trim());
    Ok(())
}

pub fn set_contact(store: &JsonFileStore, name: &str) -> Result<()> {
    store.save_test_contact(name.trim())?;
    println!("Test contact set to \"{}\"", name.trim());
    Ok(())
}

/// Record the screen position of one step with the desktop pointer.
pub fn record(store: Arc<JsonFileStore>, config: &TapflowConfig, id: &str) -> Result<()> {
    let step = find_step(&store, id)?;
    if !step.accepts_position() {
        bail!("step \"{id}\" is a {} step and has no screen position", step.kind());
    }

    let display = Arc::new(EnigoDisplay::new()?);
    let overlay = Arc::new(OverlayController::new(Arc::new(ConsoleOverlay)));
    let recorder = CoordinateRecorder::new(
        config.recorder.clone(),
        store.clone(),
        overlay,
        display,
        CoordinateFeed::new(),
    );

    recorder.arm(RecordTarget {
        step_id: step.id.clone(),
        label: step.label.clone(),
    });
    if recorder.state() != RecorderState::Armed {
        bail!("could not start recording \"{id}\"");
    }

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    if line.trim().eq_ignore_ascii_case("q") {
        recorder.cancel();
        println!("Recording cancelled");
        return Ok(());
    }

    let hook = start_pointer_hook();
    recorder.begin_capture();
    loop {
        let Some(pointer) = hook.recv_timeout(Duration::from_millis(200)) else {
            if !hook.is_running() {
                recorder.cancel();
                bail!("pointer hook stopped unexpectedly");
            }
            continue;
        };
        match pointer.feed(&recorder) {
            Some(RecorderEvent::Captured(recorded)) => {
                info!(step_id = %recorded.step_id, "Recorded");
                println!(
                    "Recorded \"{}\" at X:{:.1}% Y:{:.1}%",
                    recorded.step_id,
                    recorded.x_percent * 100.0,
                    recorded.y_percent * 100.0
                );
                break;
            }
            Some(RecorderEvent::Discarded { reason, .. }) => {
                println!("Nothing recorded ({reason})");
                break;
            }
            _ => {}
        }
    }
    hook.stop();
    Ok(())
}
