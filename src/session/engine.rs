//! Engine actor: the single owner of classifier state
//!
//! Input events, hotkey updates and capture requests all arrive on one
//! ordered channel, so every classifier mutation happens on this task.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::classifier::HotkeyClassifier;
use crate::events::{InputEvent, Trigger};
use crate::hotkey::{CaptureOutcome, CapturedKey, Hotkey};

/// Callback handed every trigger the classifier produces
pub type TriggerHandler = Arc<dyn Fn(Trigger) + Send + Sync>;

/// Messages processed by the engine task
#[derive(Debug)]
pub enum EngineMessage {
    /// An observed event and when the event source saw it
    Input(InputEvent, std::time::Instant),
    UpdateHotkey(Hotkey),
    /// Route the next key-down to this capture instead of the classifier
    Capture(oneshot::Sender<CaptureOutcome>),
    Shutdown,
}

pub struct Engine {
    classifier: HotkeyClassifier,
    on_trigger: TriggerHandler,
    capture: Option<oneshot::Sender<CaptureOutcome>>,
}

impl Engine {
    pub fn new(hotkey: Hotkey, on_trigger: TriggerHandler) -> Self {
        Self {
            classifier: HotkeyClassifier::new(hotkey),
            on_trigger,
            capture: None,
        }
    }

    /// Process messages until shutdown or until every sender is gone
    pub async fn run(mut self, mut rx: mpsc::Receiver<EngineMessage>) {
        info!(hotkey = %self.classifier.hotkey(), "hotkey engine started");

        loop {
            let deadline = self.classifier.next_deadline();

            tokio::select! {
                // Queued events may predate the deadline; they go first
                biased;

                message = rx.recv() => match message {
                    Some(EngineMessage::Shutdown) | None => break,
                    Some(message) => self.handle_message(message),
                },
                _ = sleep_until_deadline(deadline) => {
                    let on_trigger = &self.on_trigger;
                    self.classifier
                        .fire_due(Instant::now().into_std(), &mut |t| on_trigger(t));
                }
            }
        }

        info!("hotkey engine stopped");
    }

    fn handle_message(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::Input(event, seen_at) => self.handle_input(event, seen_at),
            EngineMessage::UpdateHotkey(hotkey) => {
                if self.classifier.is_modifier_down() {
                    debug!("hotkey changed mid-hold, dropping the hold");
                }
                self.classifier.update_hotkey(hotkey);
            }
            EngineMessage::Capture(reply) => {
                if self.capture.replace(reply).is_some() {
                    debug!("replacing an unfinished hotkey capture");
                }
                debug!("hotkey capture armed");
            }
            EngineMessage::Shutdown => {}
        }
    }

    fn handle_input(&mut self, event: InputEvent, seen_at: std::time::Instant) {
        if let InputEvent::KeyDown {
            key_code,
            flags,
            is_repeat: false,
        } = event
        {
            let on_trigger = &self.on_trigger;
            // A requester that timed out no longer owns the next key
            if let Some(reply) = self.capture.take().filter(|reply| !reply.is_closed()) {
                let outcome = CaptureOutcome::evaluate(&CapturedKey {
                    key_code,
                    flags,
                    characters: None,
                });
                debug!(?outcome, "hotkey capture finished");
                // The requester may have given up already
                let _ = reply.send(outcome);
                // The captured key still counts as use of a held bare modifier
                self.classifier.fire_due(seen_at, &mut |t| on_trigger(t));
                self.classifier.suppress_hold();
                return;
            }
        }

        let on_trigger = &self.on_trigger;
        self.classifier.handle(&event, seen_at, &mut |t| on_trigger(t));
    }
}

async fn sleep_until_deadline(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
