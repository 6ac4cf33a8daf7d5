//! Connection Supervisor: the three-state machine (Connected, Reconnecting,
//! Disconnected) that runs the heartbeat, classifies connection loss, and
//! re-establishes the CDP Client and page sessions after an abnormal close.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::time::Duration;

use crate::buffers::{ConsoleBuffer, NetworkBuffer, console, network};
use crate::cdp::{CdpClient, CdpConfig, CdpEvent, ReconnectConfig};
use crate::config::ResolvedDaemon;
use crate::connection::resolve_connection;
use crate::error::AppError;
use crate::session::SessionManager;

/// The three connection states named by the component design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Disconnected,
}

/// Compute the backoff delay for reconnect attempt `attempt` (1-based),
/// doubling from `initial` to a `max` cap, with up to ±10% jitter supplied
/// by the caller as a value in `[-0.1, 0.1]` (kept as a parameter so the
/// calculation stays deterministic and unit-testable).
#[must_use]
pub fn backoff_delay(attempt: u32, initial_ms: u64, max_ms: u64, jitter_fraction: f64) -> Duration {
    let doublings = attempt.saturating_sub(1).min(32);
    let base = initial_ms.saturating_mul(1u64 << doublings).min(max_ms);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let jittered = (base as f64 * (1.0 + jitter_fraction)).max(0.0) as u64;
    Duration::from_millis(jittered.min(max_ms))
}

/// Classify a WebSocket close code as abnormal (warrants reconnect) or clean
/// (warrants a Disconnected transition with no retry).
#[must_use]
pub fn is_abnormal_close(code: u16) -> bool {
    !matches!(code, 1000 | 1001)
}

/// Connection endpoint the Supervisor reconnects to.
#[derive(Debug, Clone)]
pub struct ReconnectTarget {
    pub host: String,
    pub port: Option<u16>,
    pub ws_url: Option<String>,
}

/// Drives the connection lifecycle: heartbeat, abnormal-close detection, and
/// reconnection with preserved Event Buffers and last active URL.
pub struct Supervisor {
    state: RwLock<ConnectionState>,
    client: RwLock<Option<CdpClient>>,
    sessions: Arc<Mutex<SessionManager>>,
    console: Arc<ConsoleBuffer>,
    network: Arc<NetworkBuffer>,
    config: ResolvedDaemon,
    target: ReconnectTarget,
    last_active_url: RwLock<Option<String>>,
    attempt: AtomicU32,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        sessions: Arc<Mutex<SessionManager>>,
        console: Arc<ConsoleBuffer>,
        network: Arc<NetworkBuffer>,
        config: ResolvedDaemon,
        target: ReconnectTarget,
    ) -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            client: RwLock::new(None),
            sessions,
            console,
            network,
            config,
            target,
            last_active_url: RwLock::new(None),
            attempt: AtomicU32::new(0),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    pub async fn note_active_url(&self, url: &str) {
        *self.last_active_url.write().await = Some(url.to_string());
    }

    /// Open the initial CDP Client, enable auto-attach, and wait briefly for
    /// at least one page session to attach before declaring Connected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::connection_lost` if the initial connection cannot
    /// be established.
    pub async fn connect(self: &Arc<Self>) -> Result<(), AppError> {
        let resolved = resolve_connection(
            &self.target.host,
            self.target.port,
            self.target.ws_url.as_deref(),
        )
        .await?;

        let (tx, rx) = oneshot::channel();
        let cdp_config = CdpConfig {
            reconnect: ReconnectConfig {
                max_retries: 0,
                ..ReconnectConfig::default()
            },
            ..CdpConfig::default()
        };
        let client = CdpClient::connect_with_notify(&resolved.ws_url, cdp_config, tx).await?;
        SessionManager::enable_auto_attach(&client).await?;

        *self.client.write().await = Some(client);
        self.attempt.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected).await;
        self.spawn_disconnect_watcher(rx);

        let guard = self.client.read().await;
        if let Some(client_ref) = guard.as_ref() {
            self.spawn_event_pumps(client_ref).await;
        }
        drop(guard);

        Ok(())
    }

    /// Subscribe to the CDP events that feed the Session Manager and Event
    /// Buffers, then hand each subscription off to its own forwarding task.
    /// Called once per [`Self::connect`] (including on reconnect), since
    /// subscriptions do not survive a CDP Client rebuild.
    async fn spawn_event_pumps(self: &Arc<Self>, client: &CdpClient) {
        macro_rules! sub {
            ($method:literal) => {
                match client.subscribe($method).await {
                    Ok(rx) => rx,
                    Err(e) => {
                        eprintln!("failed to subscribe to {}: {e}", $method);
                        return;
                    }
                }
            };
        }

        let attached = sub!("Target.attachedToTarget");
        let detached = sub!("Target.detachedFromTarget");
        let console_api = sub!("Runtime.consoleAPICalled");
        let exceptions = sub!("Runtime.exceptionThrown");
        let req_sent = sub!("Network.requestWillBeSent");
        let resp_received = sub!("Network.responseReceived");
        let data_received = sub!("Network.dataReceived");
        let load_finished = sub!("Network.loadingFinished");
        let load_failed = sub!("Network.loadingFailed");
        let load_event = sub!("Page.loadEventFired");
        let frame_navigated = sub!("Page.frameNavigated");

        self.spawn_target_attach_pump(attached);
        self.spawn_target_detach_pump(detached);
        self.spawn_console_pump(console_api, exceptions);
        self.spawn_network_pump(req_sent, resp_received, data_received, load_finished, load_failed);
        self.spawn_page_pump(load_event, frame_navigated);
    }

    fn spawn_target_attach_pump(self: &Arc<Self>, mut rx: mpsc::Receiver<CdpEvent>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let info = &event.params["targetInfo"];
                let target_id = info["targetId"].as_str().unwrap_or_default();
                let target_type = info["type"].as_str().unwrap_or_default();
                let url = info["url"].as_str().unwrap_or_default();
                let title = info["title"].as_str().unwrap_or_default();

                let guard = this.client.read().await;
                let Some(client) = guard.as_ref() else { continue };
                let mut sessions = this.sessions.lock().await;
                if let Err(e) = sessions.attach(client, target_id, target_type, url, title).await {
                    eprintln!("attach failed for target {target_id}: {e}");
                }
            }
        });
    }

    fn spawn_target_detach_pump(self: &Arc<Self>, mut rx: mpsc::Receiver<CdpEvent>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Some(session_id) = event.params["sessionId"].as_str() {
                    this.sessions.lock().await.detach(session_id);
                }
            }
        });
    }

    fn spawn_console_pump(
        self: &Arc<Self>,
        mut api_rx: mpsc::Receiver<CdpEvent>,
        mut exception_rx: mpsc::Receiver<CdpEvent>,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    Some(event) = api_rx.recv() => event,
                    Some(event) = exception_rx.recv() => event,
                    else => break,
                };
                let session_id = event.session_id.as_deref().unwrap_or_default();
                if let Some(entry) = console::entry_from_event(session_id, &event) {
                    this.console.push(entry);
                }
            }
        });
    }

    fn spawn_network_pump(
        self: &Arc<Self>,
        mut req_sent: mpsc::Receiver<CdpEvent>,
        mut resp_received: mpsc::Receiver<CdpEvent>,
        mut data_received: mpsc::Receiver<CdpEvent>,
        mut load_finished: mpsc::Receiver<CdpEvent>,
        mut load_failed: mpsc::Receiver<CdpEvent>,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = req_sent.recv() => this.apply_network_event(&event).await,
                    Some(event) = resp_received.recv() => this.apply_network_event(&event).await,
                    Some(event) = data_received.recv() => this.apply_network_event(&event).await,
                    Some(event) = load_finished.recv() => {
                        this.apply_network_event(&event).await;
                        this.spawn_body_fetch(event);
                    }
                    Some(event) = load_failed.recv() => this.apply_network_event(&event).await,
                    else => break,
                }
            }
        });
    }

    async fn apply_network_event(&self, event: &CdpEvent) {
        let session_id = event.session_id.as_deref().unwrap_or_default();
        network::apply_event(&self.network, session_id, event);

        if event.method == "Network.responseReceived" && event.params["type"] == "Document" {
            if let Some(status) = event.params["response"]["status"].as_u64() {
                #[allow(clippy::cast_possible_truncation)]
                self.sessions
                    .lock()
                    .await
                    .update_page(session_id, None, None, Some(status as u16));
            }
        }
    }

    /// Fetch and attach a completed request's response body, per the
    /// body-offload policy. Best-effort: failures are dropped, matching the
    /// event-handler discipline elsewhere in this component.
    fn spawn_body_fetch(self: &Arc<Self>, event: CdpEvent) {
        let Some(request_id) = event.params["requestId"].as_str().map(str::to_string) else {
            return;
        };
        let Some(session_id) = event.session_id else {
            return;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let sessions = this.sessions.lock().await;
            let Some(session) = sessions.session(&session_id) else {
                return;
            };
            let bodies_dir = this.bodies_dir();
            let _ = network::fetch_and_attach_body(
                session,
                &this.network,
                &request_id,
                this.config.body_inline_max_bytes,
                &bodies_dir,
            )
            .await;
        });
    }

    fn bodies_dir(&self) -> PathBuf {
        self.config
            .runtime_dir
            .clone()
            .or_else(|| crate::runtime_dir::runtime_dir().ok())
            .unwrap_or_else(std::env::temp_dir)
            .join("bodies")
    }

    fn spawn_page_pump(
        self: &Arc<Self>,
        mut load_event: mpsc::Receiver<CdpEvent>,
        mut frame_navigated: mpsc::Receiver<CdpEvent>,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = frame_navigated.recv() => {
                        let frame = &event.params["frame"];
                        if frame["parentId"].is_null() {
                            if let (Some(session_id), Some(url)) =
                                (event.session_id.as_deref(), frame["url"].as_str())
                            {
                                this.sessions.lock().await.update_page(session_id, Some(url), None, None);
                                this.note_active_url(url).await;
                            }
                        }
                    }
                    Some(event) = load_event.recv() => {
                        if let Some(session_id) = event.session_id {
                            if let Some(title) = this.evaluate_title(&session_id).await {
                                this.sessions.lock().await.update_page(&session_id, None, Some(&title), None);
                            }
                        }
                    }
                    else => break,
                }
            }
        });
    }

    async fn evaluate_title(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.lock().await;
        let session = sessions.session(session_id)?;
        let result = session
            .send_command(
                "Runtime.evaluate",
                Some(serde_json::json!({ "expression": "document.title", "returnByValue": true })),
            )
            .await
            .ok()?;
        result["result"]["value"].as_str().map(str::to_string)
    }

    fn spawn_disconnect_watcher(self: &Arc<Self>, rx: oneshot::Receiver<Option<u16>>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(close_code) = rx.await {
                if close_code.is_some_and(|code| !is_abnormal_close(code)) {
                    this.on_clean_close().await;
                } else {
                    this.on_abnormal_close().await;
                }
            }
        });
    }

    /// A clean close (1000/1001, e.g. the browser tab or window closed) never
    /// triggers reconnection: tear down sessions and go straight to
    /// Disconnected.
    async fn on_clean_close(self: &Arc<Self>) {
        *self.client.write().await = None;
        self.set_state(ConnectionState::Disconnected).await;
        self.sessions.lock().await.clear();
    }

    /// Spawn the heartbeat loop. Intended to be called once, right after
    /// [`Self::connect`] succeeds.
    pub fn spawn_heartbeat(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(this.config.heartbeat_interval_ms)).await;
                if this.state().await != ConnectionState::Connected {
                    continue;
                }

                let heartbeat = async {
                    let guard = this.client.read().await;
                    match guard.as_ref() {
                        Some(client) => client.send_command("Browser.getVersion", None).await,
                        None => Err(crate::cdp::CdpError::ConnectionClosed),
                    }
                };

                let outcome =
                    tokio::time::timeout(Duration::from_secs(5), heartbeat).await;
                match outcome {
                    Ok(Ok(_)) => {}
                    Ok(Err(_)) | Err(_) => {
                        eprintln!("Connection lost (heartbeat failed)");
                        this.on_abnormal_close().await;
                    }
                }
            }
        });
    }

    async fn on_abnormal_close(self: &Arc<Self>) {
        if self.state().await == ConnectionState::Reconnecting {
            return;
        }
        *self.client.write().await = None;
        self.set_state(ConnectionState::Reconnecting).await;
        self.sessions.lock().await.clear();

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.reconnect_loop().await;
        });
    }

    async fn reconnect_loop(self: &Arc<Self>) {
        loop {
            let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > self.config.reconnect_max_attempts {
                eprintln!("Reconnect attempts exhausted; giving up");
                self.set_state(ConnectionState::Disconnected).await;
                return;
            }
            eprintln!(
                "Reconnecting (attempt {attempt}/{})",
                self.config.reconnect_max_attempts
            );

            let jitter = (fnv_jitter(attempt) - 0.5) * 0.2;
            let delay = backoff_delay(
                attempt,
                self.config.reconnect_initial_backoff_ms,
                self.config.reconnect_max_backoff_ms,
                jitter,
            );
            tokio::time::sleep(delay).await;

            match self.connect().await {
                Ok(()) => {
                    eprintln!("Reconnected");
                    self.renavigate_active_session().await;
                    return;
                }
                Err(e) => {
                    eprintln!("Reconnect attempt {attempt} failed: {e}");
                }
            }
        }
    }

    async fn renavigate_active_session(&self) {
        let Some(url) = self.last_active_url.read().await.clone() else {
            return;
        };
        let sessions = self.sessions.lock().await;
        if let Some(session) = sessions.active_session() {
            let _ = session
                .send_command("Page.navigate", Some(serde_json::json!({ "url": url })))
                .await;
        }
    }

    #[must_use]
    pub fn console_buffer(&self) -> &Arc<ConsoleBuffer> {
        &self.console
    }

    #[must_use]
    pub fn network_buffer(&self) -> &Arc<NetworkBuffer> {
        &self.network
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<Mutex<SessionManager>> {
        &self.sessions
    }

    /// Force a transition to Reconnecting, for the IPC `reconnect` command.
    pub async fn force_reconnect(self: &Arc<Self>) {
        self.on_abnormal_close().await;
    }

    /// Run a closure with the active CDP Client, if connected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::connection_lost` if no client is currently open.
    pub async fn with_client<F, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&CdpClient) -> T,
    {
        let guard = self.client.read().await;
        guard
            .as_ref()
            .map(f)
            .ok_or_else(|| AppError::connection_lost("no active CDP connection"))
    }
}

/// Deterministic pseudo-jitter source in `[0, 1)`, avoiding a dependency on
/// `rand` for a single non-cryptographic use. Varies by attempt number so
/// consecutive attempts don't all sleep for an identical duration.
fn fnv_jitter(seed: u32) -> f64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in seed.to_le_bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    #[allow(clippy::cast_precision_loss)]
    let frac = (hash % 1_000_000) as f64 / 1_000_000.0;
    frac
}
