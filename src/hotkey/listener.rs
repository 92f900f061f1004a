//! Global keyboard listener using macOS CGEventTap
//!
//! Installs a listen-only tap for flags-changed and key-down events on a
//! dedicated thread with its own CFRunLoop and forwards every observed
//! event to the hotkey engine. Other platforms get `UnsupportedSource`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::session::InputSink;

/// How long `install` waits for the listener thread to report back
const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Something that can observe system-wide keyboard events
pub trait EventSource: Send {
    /// Start forwarding events to `sink`
    fn install(&mut self, sink: InputSink) -> Result<(), TapError>;

    /// Stop forwarding and release the interception. Idempotent.
    fn uninstall(&mut self);

    fn is_installed(&self) -> bool;
}

/// Errors that can occur installing an event source
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to create run loop source for the event tap")]
    RunLoopSource,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("timed out waiting for the listener thread to start")]
    StartupTimeout,

    #[error("global event taps are not supported on this platform")]
    Unsupported,
}

/// CGEventTap-backed event source
#[derive(Debug, Default)]
pub struct TapListener {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TapListener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSource for TapListener {
    fn install(&mut self, sink: InputSink) -> Result<(), TapError> {
        if self.is_installed() {
            return Ok(());
        }
        // Reap a thread that exited on its own
        self.uninstall();

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), TapError>>();

        let handle = thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");

                if let Err(e) = run_event_loop(sink, Arc::clone(&running), ready_tx) {
                    error!(?e, "hotkey listener error");
                }

                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                TapError::ThreadSpawn(e.to_string())
            })?;

        self.thread = Some(handle);

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.uninstall();
                Err(e)
            }
            Err(_) => {
                self.uninstall();
                Err(TapError::StartupTimeout)
            }
        }
    }

    fn uninstall(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread.take() {
            // The run loop wakes at least every 100ms to check `running`
            if handle.join().is_err() {
                warn!("hotkey listener thread panicked");
            }
        }
    }

    fn is_installed(&self) -> bool {
        self.thread.is_some() && self.running.load(Ordering::SeqCst)
    }
}

impl Drop for TapListener {
    fn drop(&mut self) {
        self.uninstall();
    }
}

/// Run the CFRunLoop with the event tap until `running` is cleared
#[cfg(target_os = "macos")]
fn run_event_loop(
    sink: InputSink,
    running: Arc<AtomicBool>,
    ready_tx: std::sync::mpsc::Sender<Result<(), TapError>>,
) -> Result<(), TapError> {
    use std::cell::Cell;
    use std::rc::Rc;

    use core_foundation::base::TCFType;
    use core_foundation::mach_port::CFMachPortRef;
    use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
    use core_graphics::event::{
        CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement,
        CGEventTapProxy, CGEventType, EventField,
    };
    use tracing::debug;

    use crate::events::InputEvent;
    use crate::hotkey::ModifierFlags;

    #[link(name = "CoreGraphics", kind = "framework")]
    extern "C" {
        fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
    }

    // Filled in once the tap exists; the callback only runs on this thread
    let tap_port: Rc<Cell<CFMachPortRef>> = Rc::new(Cell::new(std::ptr::null_mut()));
    let callback_port = Rc::clone(&tap_port);

    // CGEventTap callback - must be fast and non-blocking
    let callback = move |_proxy: CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
          -> Option<CGEvent> {
        match event_type {
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                // Liveness first: turn the tap straight back on
                let port = callback_port.get();
                if !port.is_null() {
                    unsafe { CGEventTapEnable(port, true) };
                }
                warn!("event tap disabled by the system, re-enabled");
            }
            CGEventType::FlagsChanged => {
                let key_code =
                    event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16;
                sink.forward(InputEvent::FlagsChanged {
                    flags: ModifierFlags::from_cg_flags(event.get_flags()),
                    key_code,
                });
            }
            CGEventType::KeyDown => {
                let key_code =
                    event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16;
                let is_repeat =
                    event.get_integer_value_field(EventField::KEYBOARD_EVENT_AUTOREPEAT) != 0;
                sink.forward(InputEvent::KeyDown {
                    key_code,
                    flags: ModifierFlags::from_cg_flags(event.get_flags()),
                    is_repeat,
                });
            }
            _ => {}
        }
        // Listen-only taps ignore the return value
        None
    };

    let tap = match CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::FlagsChanged, CGEventType::KeyDown],
        callback,
    ) {
        Ok(tap) => tap,
        Err(()) => {
            error!("failed to create event tap - is Accessibility permission granted?");
            let _ = ready_tx.send(Err(TapError::EventTapCreation));
            return Ok(());
        }
    };

    let run_loop_source = match tap.mach_port.create_runloop_source(0) {
        Ok(source) => source,
        Err(()) => {
            let _ = ready_tx.send(Err(TapError::RunLoopSource));
            return Ok(());
        }
    };

    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }

    tap_port.set(tap.mach_port.as_concrete_TypeRef());
    tap.enable();

    info!("event tap created and enabled");
    let _ = ready_tx.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        // Run the loop for a short interval, then re-check `running`
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
        }
    }

    // The tap must be off before its port is released
    unsafe {
        CGEventTapEnable(tap.mach_port.as_concrete_TypeRef(), false);
        run_loop.remove_source(&run_loop_source, kCFRunLoopCommonModes);
    }
    tap_port.set(std::ptr::null_mut());
    drop(tap);
    debug!("event tap disabled and released");

    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn run_event_loop(
    _sink: InputSink,
    _running: Arc<AtomicBool>,
    ready_tx: std::sync::mpsc::Sender<Result<(), TapError>>,
) -> Result<(), TapError> {
    let _ = ready_tx.send(Err(TapError::Unsupported));
    Ok(())
}

/// Event source for platforms without a global tap
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSource;

impl EventSource for UnsupportedSource {
    fn install(&mut self, _sink: InputSink) -> Result<(), TapError> {
        Err(TapError::Unsupported)
    }

    fn uninstall(&mut self) {}

    fn is_installed(&self) -> bool {
        false
    }
}

/// The event source for the current platform
pub fn platform_source() -> Box<dyn EventSource> {
    if cfg!(target_os = "macos") {
        Box::new(TapListener::new())
    } else {
        Box::new(UnsupportedSource)
    }
}
