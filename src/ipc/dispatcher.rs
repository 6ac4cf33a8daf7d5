//! Maps a decoded [`Command`] to its handler, producing the `data` payload
//! of an [`IpcResponse`].

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::watch;

use crate::commands::{buffers, interact, navigation, page};
use crate::error::AppError;
use crate::supervisor::Supervisor;

use super::protocol::Command;

/// Holds the shared daemon state a command handler needs and the shutdown
/// signal `stop` flips.
pub struct Dispatcher {
    supervisor: Arc<Supervisor>,
    stop_tx: watch::Sender<bool>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(supervisor: Arc<Supervisor>, stop_tx: watch::Sender<bool>) -> Self {
        Self { supervisor, stop_tx }
    }

    /// Run a decoded command to completion, switching the active session
    /// first if `target` names one. An explicit `target` overrides the
    /// Session Manager's active-session heuristics for this request only.
    ///
    /// # Errors
    ///
    /// Returns `AppError::not_found` if `target` names an unknown session,
    /// or whatever `AppError` the underlying handler produces.
    pub async fn dispatch(&self, target: Option<&str>, command: Command) -> Result<Value, AppError> {
        if let Some(session_id) = target {
            let mut sessions = self.supervisor.sessions().lock().await;
            if !sessions.set_active(session_id) {
                return Err(AppError::not_found(format!("no such session: {session_id}")));
            }
        }

        match command {
            Command::Status => self.status().await,
            Command::Navigate(p) => navigation::navigate(&self.supervisor, p).await,
            Command::Reload(p) => navigation::reload(&self.supervisor, p).await,
            Command::Back(p) => navigation::back(&self.supervisor, p).await,
            Command::Forward(p) => navigation::forward(&self.supervisor, p).await,
            Command::Ready(p) => navigation::ready(&self.supervisor, p).await,
            Command::Console(p) => buffers::console(&self.supervisor, p).await,
            Command::Network(p) => buffers::network(&self.supervisor, p).await,
            Command::Cookies(p) => buffers::cookies(&self.supervisor, p).await,
            Command::Html(p) => page::html(&self.supervisor, p).await,
            Command::Css(p) => page::css(&self.supervisor, p).await,
            Command::Screenshot(p) => page::screenshot(&self.supervisor, p).await,
            Command::Eval(p) => page::eval(&self.supervisor, p).await,
            Command::Click(p) => interact::click(&self.supervisor, p).await,
            Command::Type(p) => interact::type_text(&self.supervisor, p).await,
            Command::Key(p) => interact::key(&self.supervisor, p).await,
            Command::Select(p) => interact::select(&self.supervisor, p).await,
            Command::Focus(p) => interact::focus(&self.supervisor, p).await,
            Command::Scroll(p) => interact::scroll(&self.supervisor, p).await,
            Command::Clear(p) => buffers::clear(&self.supervisor, p).await,
            Command::Reconnect => self.reconnect().await,
            Command::Stop => self.stop(),
        }
    }

    async fn status(&self) -> Result<Value, AppError> {
        let state = self.supervisor.state().await;
        let sessions = self.supervisor.sessions().lock().await;
        let active_session = sessions.active_page().map(|p| {
            json!({
                "id": p.id,
                "url": p.url,
                "title": p.title,
                "status": p.status,
            })
        });
        Ok(json!({
            "running": true,
            "pid": std::process::id(),
            "connection": format!("{state:?}").to_lowercase(),
            "activeSession": active_session,
            "pages": sessions.pages().into_iter().map(|p| json!({
                "id": p.id,
                "url": p.url,
                "title": p.title,
                "status": p.status,
                "active": p.active,
            })).collect::<Vec<_>>(),
        }))
    }

    async fn reconnect(&self) -> Result<Value, AppError> {
        self.supervisor.force_reconnect().await;
        Ok(json!({ "reconnecting": true }))
    }

    fn stop(&self) -> Result<Value, AppError> {
        let _ = self.stop_tx.send(true);
        Ok(json!({ "stopping": true }))
    }
}
