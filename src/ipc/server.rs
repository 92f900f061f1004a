//! Unix domain socket server for IPC
//!
//! Provides request-response communication for hotkey configuration and
//! pushes trigger notifications to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::Trigger;
use crate::hotkey::{CaptureOutcome, Hotkey};
use crate::session::EventTapSession;
use crate::settings::SettingsStore;

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_MESSAGE_LEN};

/// How long a capture request waits for a key press
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

/// Aborts the connection's reader task when the handler goes away
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    session: Arc<EventTapSession>,
    store: SettingsStore,
    triggers: broadcast::Sender<Trigger>,
    start_time: Instant,
    /// Serializes persist-then-apply so the file and the session agree
    update_lock: Mutex<()>,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        session: Arc<EventTapSession>,
        store: SettingsStore,
        triggers: broadcast::Sender<Trigger>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(ServerState {
            session,
            store,
            triggers,
            start_time: Instant::now(),
            update_lock: Mutex::new(()),
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    ///
    /// Requests are read on their own task so a partially read frame is
    /// never lost when a trigger push wins the select.
    async fn handle_client(stream: UnixStream, state: Arc<ServerState>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let (request_tx, mut request_rx) = mpsc::channel(8);
        let _reader_task = AbortOnDrop(tokio::spawn(async move {
            if let Err(e) = Self::read_requests(reader, request_tx).await {
                warn!(?e, "client read error");
            }
        }));

        let mut triggers: Option<broadcast::Receiver<Trigger>> = None;

        loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some(request) = request else {
                        debug!("client disconnected");
                        return Ok(());
                    };

                    let response = match request {
                        Ok(request) => {
                            debug!(?request, "received request");
                            let (response, subscribe) = Self::process_request(request, &state).await;
                            if subscribe && triggers.is_none() {
                                triggers = Some(state.triggers.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            response
                        }
                        Err(message) => Response::error("bad_request", message),
                    };

                    Self::send_message(&mut writer, &response).await?;
                }
                trigger = Self::next_trigger(&mut triggers) => match trigger {
                    Ok(trigger) => {
                        let notification = Notification::Trigger { trigger };
                        Self::send_message(&mut writer, &notification).await?;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "subscriber lagging, triggers dropped");
                    }
                    Err(RecvError::Closed) => triggers = None,
                },
            }
        }
    }

    /// Forward parsed requests until EOF; parse failures are passed on as
    /// messages so the client gets an error response
    async fn read_requests<R: AsyncRead + Unpin>(
        mut reader: R,
        requests: mpsc::Sender<std::result::Result<Request, String>>,
    ) -> Result<()> {
        while let Some(body) = Self::read_frame(&mut reader).await? {
            let request = serde_json::from_slice(&body).map_err(|e| e.to_string());
            if requests.send(request).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Read one length-prefixed frame, or None on a clean disconnect
    async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
        // Read message length (4-byte little-endian)
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_LEN {
            bail!("message too large ({len} bytes), disconnecting");
        }

        // Read message body
        let mut msg_buf = vec![0u8; len];
        reader.read_exact(&mut msg_buf).await?;
        Ok(Some(msg_buf))
    }

    /// Send a length-prefixed JSON message
    async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        T: serde::Serialize,
    {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    async fn next_trigger(
        triggers: &mut Option<broadcast::Receiver<Trigger>>,
    ) -> std::result::Result<Trigger, RecvError> {
        match triggers {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, state: &ServerState) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let status = DaemonStatus::new(
                    &state.session.hotkey(),
                    state.session.is_listening(),
                    state.session.is_authorized(),
                    state.start_time.elapsed().as_secs(),
                );
                (Response::Status(status), false)
            }

            Request::GetHotkey => (Response::hotkey(&state.session.hotkey()), false),

            Request::SetHotkey { hotkey } => match Hotkey::try_from_stored(hotkey.clone()) {
                Some(hotkey) => (Self::apply_hotkey(hotkey, state).await, false),
                None => (
                    Response::error("invalid_hotkey", format!("not a usable hotkey: {hotkey:?}")),
                    false,
                ),
            },

            Request::ResetHotkey => (Self::apply_hotkey(Hotkey::default(), state).await, false),

            Request::CaptureHotkey => (Self::capture_hotkey(state).await, false),

            Request::RequestPermission => {
                let listening = state.session.start_async(true).await;
                let authorized = state.session.is_authorized();
                info!(authorized, listening, "permission requested via IPC");
                (Response::Permission { authorized, listening }, false)
            }

            Request::Subscribe => (Response::Subscribed, true),
        }
    }

    /// Persist a hotkey, then hand it to the running session
    async fn apply_hotkey(hotkey: Hotkey, state: &ServerState) -> Response {
        let _guard = state.update_lock.lock().await;
        hotkey.save(&state.store);
        state.session.update_hotkey(hotkey.clone()).await;
        Response::hotkey(&hotkey)
    }

    async fn capture_hotkey(state: &ServerState) -> Response {
        if !state.session.is_listening() {
            return Response::error(
                "not_listening",
                "cannot capture a hotkey while the event tap is not installed",
            );
        }

        let reply = state.session.capture_next_key().await;
        match tokio::time::timeout(CAPTURE_TIMEOUT, reply).await {
            Ok(Ok(CaptureOutcome::Captured(hotkey))) => Self::apply_hotkey(hotkey, state).await,
            Ok(Ok(CaptureOutcome::Cancelled)) => Response::CaptureCancelled,
            Ok(Err(_)) => Response::error("capture_aborted", "capture was superseded"),
            Err(_) => Response::error("capture_timeout", "no key pressed in time"),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::{BareKey, PermissionGate, UnsupportedSource};

    struct Granted(bool);

    impl PermissionGate for Granted {
        fn is_authorized(&self) -> bool {
            self.0
        }

        fn request_authorization(&self) -> bool {
            self.0
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        server: Arc<Server>,
        store: SettingsStore,
        triggers: broadcast::Sender<Trigger>,
        socket_path: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("daemon.sock");
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let (triggers, _) = broadcast::channel(16);

        let session = Arc::new(EventTapSession::new(
            Hotkey::default(),
            Box::new(UnsupportedSource),
            Arc::new(Granted(false)),
            Arc::new(|_: Trigger| {}),
        ));
        let server = Arc::new(
            Server::new(&socket_path, session, store.clone(), triggers.clone()).unwrap(),
        );

        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run().await });

        Fixture {
            _dir: dir,
            server,
            store,
            triggers,
            socket_path,
        }
    }

    async fn send(stream: &mut UnixStream, json: &str) {
        stream
            .write_all(&(json.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(json.as_bytes()).await.unwrap();
    }

    async fn recv(stream: &mut UnixStream) -> serde_json::Value {
        let body = Server::read_frame(stream).await.unwrap().unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn roundtrip(stream: &mut UnixStream, json: &str) -> serde_json::Value {
        send(stream, json).await;
        recv(stream).await
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let fx = fixture();
        let mut client = UnixStream::connect(&fx.socket_path).await.unwrap();

        let pong = roundtrip(&mut client, r#"{"type":"ping"}"#).await;
        assert_eq!(pong["type"], "pong");

        let status = roundtrip(&mut client, r#"{"type":"get_status"}"#).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["hotkey"]["kind"], "globe");
        assert_eq!(status["listening"], false);
        assert_eq!(status["authorized"], false);
    }

    #[tokio::test]
    async fn test_set_hotkey_persists_and_applies() {
        let fx = fixture();
        let mut client = UnixStream::connect(&fx.socket_path).await.unwrap();

        let resp = roundtrip(
            &mut client,
            r#"{"type":"set_hotkey","hotkey":{"kind":"custom","keyCode":49,"modifiers":8,"keyLabel":"Space"}}"#,
        )
        .await;
        assert_eq!(resp["type"], "hotkey");
        assert_eq!(resp["label"], "⌃Space");

        let stored = fx.store.get("recordHotkey").unwrap().unwrap();
        assert_eq!(stored["keyCode"], 49);
        assert_eq!(Hotkey::load(&fx.store).to_string(), "⌃Space");

        let current = roundtrip(&mut client, r#"{"type":"get_hotkey"}"#).await;
        assert_eq!(current["hotkey"]["kind"], "custom");

        let reset = roundtrip(&mut client, r#"{"type":"reset_hotkey"}"#).await;
        assert_eq!(reset["hotkey"]["kind"], "globe");
        assert_eq!(Hotkey::load(&fx.store), Hotkey::Bare(BareKey::Function));
    }

    #[tokio::test]
    async fn test_invalid_requests_get_errors() {
        let fx = fixture();
        let mut client = UnixStream::connect(&fx.socket_path).await.unwrap();

        let resp = roundtrip(
            &mut client,
            r#"{"type":"set_hotkey","hotkey":{"kind":"custom","modifiers":1}}"#,
        )
        .await;
        assert_eq!(resp["code"], "invalid_hotkey");

        let resp = roundtrip(&mut client, r#"{"type":"launch_rockets"}"#).await;
        assert_eq!(resp["code"], "bad_request");

        // The connection survives bad input
        let pong = roundtrip(&mut client, r#"{"type":"ping"}"#).await;
        assert_eq!(pong["type"], "pong");
    }

    #[tokio::test]
    async fn test_capture_requires_listening() {
        let fx = fixture();
        let mut client = UnixStream::connect(&fx.socket_path).await.unwrap();

        let resp = roundtrip(&mut client, r#"{"type":"capture_hotkey"}"#).await;
        assert_eq!(resp["code"], "not_listening");

        let resp = roundtrip(&mut client, r#"{"type":"request_permission"}"#).await;
        assert_eq!(resp["type"], "permission");
        assert_eq!(resp["listening"], false);
    }

    #[tokio::test]
    async fn test_subscriber_receives_triggers() {
        let fx = fixture();
        let mut client = UnixStream::connect(&fx.socket_path).await.unwrap();

        let resp = roundtrip(&mut client, r#"{"type":"subscribe"}"#).await;
        assert_eq!(resp["type"], "subscribed");

        fx.triggers.send(Trigger::Pressed).unwrap();
        fx.triggers.send(Trigger::Released).unwrap();

        let first = recv(&mut client).await;
        assert_eq!(first["type"], "trigger");
        assert_eq!(first["trigger"], "pressed");
        assert_eq!(recv(&mut client).await["trigger"], "released");
    }

    #[tokio::test]
    async fn test_shutdown_removes_socket() {
        let fx = fixture();
        assert!(fx.socket_path.exists());
        fx.server.shutdown().await;
        assert!(!fx.socket_path.exists());
    }
}
