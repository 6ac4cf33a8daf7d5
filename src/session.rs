//! Session Manager: tracks attached page targets and the active session.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;

use crate::cdp::{CdpClient, CdpError, CdpEvent, CdpSession};

/// Domains enabled on every attached page session so events flow without a
/// per-command opt-in.
const AUTO_ENABLE_DOMAINS: [&str; 4] = ["Runtime", "Page", "DOM", "Network"];

/// A CDP session wrapper that tracks which domains have been enabled,
/// ensuring each domain is only enabled once per session (lazy domain
/// enabling, grounded in the original per-command connection wrapper).
#[derive(Debug)]
pub struct ManagedSession {
    session: CdpSession,
    enabled_domains: HashSet<String>,
}

impl ManagedSession {
    #[must_use]
    pub fn new(session: CdpSession) -> Self {
        Self {
            session,
            enabled_domains: HashSet::new(),
        }
    }

    /// Ensure a CDP domain is enabled. Sends `{domain}.enable` only if
    /// the domain has not already been enabled in this session.
    ///
    /// # Errors
    ///
    /// Returns `CdpError` if the enable command fails.
    pub async fn ensure_domain(&mut self, domain: &str) -> Result<(), CdpError> {
        if self.enabled_domains.contains(domain) {
            return Ok(());
        }
        let method = format!("{domain}.enable");
        self.session.send_command(&method, None).await?;
        self.enabled_domains.insert(domain.to_string());
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `CdpError` if the command fails.
    pub async fn send_command(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, CdpError> {
        self.session.send_command(method, params).await
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    /// # Errors
    ///
    /// Returns `CdpError` if the transport task has exited.
    pub async fn subscribe(&self, method: &str) -> Result<mpsc::Receiver<CdpEvent>, CdpError> {
        self.session.subscribe(method).await
    }

    #[must_use]
    pub fn enabled_domains(&self) -> &HashSet<String> {
        &self.enabled_domains
    }
}

/// A tracked page-level target: the daemon's view of a tab, kept current by
/// `Target.attachedToTarget`/`detachedFromTarget` and Page lifecycle events.
#[derive(Debug, Clone)]
pub struct PageSession {
    pub id: String,
    pub target_id: String,
    pub url: String,
    pub title: String,
    /// Last observed main-frame document HTTP status, if any.
    pub status: Option<u16>,
    pub active: bool,
}

/// Maintains the set of attached [`PageSession`]s and a well-defined active
/// session, enabling each session's CDP domains as it attaches.
///
/// Non-"no such session" attach failures are not swallowed here; callers
/// surface them through the triggering command. "no such session" failures
/// (the target detached mid-enable) discard the session silently.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<String, ManagedSession>,
    pages: HashMap<String, PageSession>,
    active: Option<String>,
    /// Attach order, most recent last; used to promote a new active session.
    attach_order: Vec<String>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable auto-attach on the client. Must be called once per CDP Client
    /// lifetime (including after each reconnect) before attach events arrive.
    ///
    /// # Errors
    ///
    /// Returns `CdpError` if the command fails.
    pub async fn enable_auto_attach(client: &CdpClient) -> Result<(), CdpError> {
        client
            .send_command(
                "Target.setAutoAttach",
                Some(serde_json::json!({
                    "autoAttach": true,
                    "flatten": true,
                    "waitForDebuggerOnStart": false,
                })),
            )
            .await?;
        Ok(())
    }

    /// Record a freshly attached page session, enabling its standard domain
    /// set. Returns `Ok(false)` (no-op) if the target is not a `page`.
    ///
    /// # Errors
    ///
    /// Returns `CdpError` for attach failures other than "no such session".
    pub async fn attach(
        &mut self,
        client: &CdpClient,
        target_id: &str,
        target_type: &str,
        url: &str,
        title: &str,
    ) -> Result<bool, CdpError> {
        if target_type != "page" {
            return Ok(false);
        }

        let session = match client.create_session(target_id).await {
            Ok(s) => s,
            Err(CdpError::Protocol { message, .. }) if message.contains("No such session") => {
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let session_id = session.session_id().to_string();
        let mut managed = ManagedSession::new(session);

        for domain in AUTO_ENABLE_DOMAINS {
            match managed.ensure_domain(domain).await {
                Ok(()) => {}
                Err(CdpError::Protocol { message, .. }) if message.contains("No such session") => {
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        let _ = managed
            .send_command(
                "Page.setLifecycleEventsEnabled",
                Some(serde_json::json!({ "enabled": true })),
            )
            .await;

        self.pages.insert(
            session_id.clone(),
            PageSession {
                id: session_id.clone(),
                target_id: target_id.to_string(),
                url: url.to_string(),
                title: title.to_string(),
                status: None,
                active: false,
            },
        );
        self.sessions.insert(session_id.clone(), managed);
        self.attach_order.push(session_id.clone());

        if self.active.is_none() {
            self.set_active(&session_id);
        }

        Ok(true)
    }

    /// Remove a detached session, promoting the most recently attached
    /// remaining session to active if the detached one was active.
    pub fn detach(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        self.pages.remove(session_id);
        self.attach_order.retain(|id| id != session_id);

        if self.active.as_deref() == Some(session_id) {
            self.active = None;
            if let Some(next) = self.attach_order.last().cloned() {
                self.set_active(&next);
            }
        }
    }

    /// Explicitly switch the active session. Returns `false` if the session
    /// id is not currently tracked.
    pub fn set_active(&mut self, session_id: &str) -> bool {
        if !self.sessions.contains_key(session_id) {
            return false;
        }
        for page in self.pages.values_mut() {
            page.active = page.id == session_id;
        }
        self.active = Some(session_id.to_string());
        true
    }

    #[must_use]
    pub fn active_session(&self) -> Option<&ManagedSession> {
        self.active.as_ref().and_then(|id| self.sessions.get(id))
    }

    #[must_use]
    pub fn active_session_mut(&mut self) -> Option<&mut ManagedSession> {
        let id = self.active.clone()?;
        self.sessions.get_mut(&id)
    }

    #[must_use]
    pub fn active_page(&self) -> Option<&PageSession> {
        self.active.as_ref().and_then(|id| self.pages.get(id))
    }

    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<&ManagedSession> {
        self.sessions.get(session_id)
    }

    #[must_use]
    pub fn session_mut(&mut self, session_id: &str) -> Option<&mut ManagedSession> {
        self.sessions.get_mut(session_id)
    }

    #[must_use]
    pub fn pages(&self) -> Vec<PageSession> {
        self.attach_order
            .iter()
            .filter_map(|id| self.pages.get(id).cloned())
            .collect()
    }

    /// Update the tracked URL/title/status for a page, e.g. on
    /// `Page.frameNavigated` or `Network.responseReceived` for the main frame.
    pub fn update_page(
        &mut self,
        session_id: &str,
        url: Option<&str>,
        title: Option<&str>,
        status: Option<u16>,
    ) {
        if let Some(page) = self.pages.get_mut(session_id) {
            if let Some(url) = url {
                page.url = url.to_string();
            }
            if let Some(title) = title {
                page.title = title.to_string();
            }
            if status.is_some() {
                page.status = status;
            }
        }
    }

    /// Clear all tracked sessions, e.g. before rebuilding after a reconnect.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.pages.clear();
        self.attach_order.clear();
        self.active = None;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
