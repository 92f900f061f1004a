//! Event tap session
//!
//! Owns the event source and the engine task for one hotkey. The session is
//! the only thing that installs or removes the system interception, and the
//! only way configuration reaches the classifier.

mod engine;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::events::InputEvent;
use crate::hotkey::{CaptureOutcome, EventSource, Hotkey, PermissionGate};

use engine::{Engine, EngineMessage};

pub use engine::TriggerHandler;

/// Events buffered between the tap callback and the engine
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Handle an event source uses to forward what it observes
///
/// `forward` never blocks; it is called from inside the OS callback.
#[derive(Debug, Clone)]
pub struct InputSink {
    tx: mpsc::Sender<EngineMessage>,
}

impl InputSink {
    pub(crate) fn new(tx: mpsc::Sender<EngineMessage>) -> Self {
        Self { tx }
    }

    /// Stamp `event` with the time it was observed and queue it
    pub fn forward(&self, event: InputEvent) {
        let seen_at = tokio::time::Instant::now().into_std();
        match self.tx.try_send(EngineMessage::Input(event, seen_at)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("hotkey engine queue full, dropping event"),
            Err(TrySendError::Closed(_)) => debug!("hotkey engine gone, dropping event"),
        }
    }
}

/// A running hotkey session
pub struct EventTapSession {
    hotkey: Mutex<Hotkey>,
    source: Mutex<Box<dyn EventSource>>,
    permission: Arc<dyn PermissionGate>,
    engine_tx: mpsc::Sender<EngineMessage>,
}

impl EventTapSession {
    /// Create the session and spawn its engine task. Must be called from
    /// within a Tokio runtime. Nothing is installed until `start`.
    pub fn new(
        hotkey: Hotkey,
        source: Box<dyn EventSource>,
        permission: Arc<dyn PermissionGate>,
        on_trigger: TriggerHandler,
    ) -> Self {
        let (engine_tx, engine_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        tokio::spawn(Engine::new(hotkey.clone(), on_trigger).run(engine_rx));

        Self {
            hotkey: Mutex::new(hotkey),
            source: Mutex::new(source),
            permission,
            engine_tx,
        }
    }

    /// Install the interception if permission allows
    ///
    /// Returns false when permission is missing or the tap could not be
    /// created. Calling it while already listening is a no-op returning true.
    pub fn start(&self, prompt_for_permission: bool) -> bool {
        let authorized = if prompt_for_permission {
            self.permission.request_authorization()
        } else {
            self.permission.is_authorized()
        };

        if !authorized {
            info!(prompted = prompt_for_permission, "input monitoring not authorized");
            return false;
        }

        let mut source = self.source();
        if source.is_installed() {
            return true;
        }

        match source.install(InputSink::new(self.engine_tx.clone())) {
            Ok(()) => {
                info!(hotkey = %self.hotkey(), "hotkey session listening");
                true
            }
            Err(e) => {
                warn!(?e, "failed to install event tap");
                false
            }
        }
    }

    /// Remove the interception. Idempotent.
    pub fn stop(&self) {
        let mut source = self.source();
        if source.is_installed() {
            source.uninstall();
            info!("hotkey session stopped");
        }
    }

    /// Follow permission changes made outside the daemon: install once
    /// permission is granted, tear down when it is revoked
    pub fn sync_with_permission(&self) {
        let authorized = self.permission.is_authorized();
        let listening = self.is_listening();

        if authorized && !listening {
            debug!("accessibility permission available, starting session");
            if self.start(false) {
                info!("hotkey session started after permission grant");
            }
        } else if !authorized && listening {
            warn!("accessibility permission revoked, stopping hotkey session");
            self.stop();
        }
    }

    /// `start` on the blocking pool; installing waits on the listener thread
    pub async fn start_async(self: &Arc<Self>, prompt_for_permission: bool) -> bool {
        self.run_blocking(move |session| session.start(prompt_for_permission))
            .await
            .unwrap_or(false)
    }

    /// `stop` on the blocking pool; uninstalling joins the listener thread
    pub async fn stop_async(self: &Arc<Self>) {
        self.run_blocking(Self::stop).await;
    }

    pub async fn sync_with_permission_async(self: &Arc<Self>) {
        self.run_blocking(Self::sync_with_permission).await;
    }

    async fn run_blocking<T, F>(self: &Arc<Self>, f: F) -> Option<T>
    where
        F: FnOnce(&EventTapSession) -> T + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(self);
        match tokio::task::spawn_blocking(move || f(&session)).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(?e, "blocking session task failed");
                None
            }
        }
    }

    pub fn is_listening(&self) -> bool {
        self.source().is_installed()
    }

    pub fn is_authorized(&self) -> bool {
        self.permission.is_authorized()
    }

    pub fn hotkey(&self) -> Hotkey {
        self.hotkey.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Swap the active hotkey. The classifier resets on the engine task,
    /// after every event queued before this call.
    pub async fn update_hotkey(&self, hotkey: Hotkey) {
        *self.hotkey.lock().unwrap_or_else(PoisonError::into_inner) = hotkey.clone();

        info!(%hotkey, "hotkey updated");
        if self
            .engine_tx
            .send(EngineMessage::UpdateHotkey(hotkey))
            .await
            .is_err()
        {
            warn!("hotkey engine gone, update not applied");
        }
    }

    /// Route the next key press to a capture instead of the classifier
    ///
    /// The receiver errors if the session goes away or the capture is
    /// replaced by a newer one.
    pub async fn capture_next_key(&self) -> oneshot::Receiver<CaptureOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .engine_tx
            .send(EngineMessage::Capture(reply_tx))
            .await
            .is_err()
        {
            warn!("hotkey engine gone, capture not armed");
        }
        reply_rx
    }

    fn source(&self) -> MutexGuard<'_, Box<dyn EventSource>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EventTapSession {
    fn drop(&mut self) {
        // Tap first, so nothing calls into the engine after it is gone
        self.stop();
        let _ = self.engine_tx.try_send(EngineMessage::Shutdown);
    }
}
