//! Composition root support: wires the shared daemon state together and
//! serves the IPC socket until a `stop` command arrives or the process is
//! signaled, tying both paths into one `watch::Sender<bool>`.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::watch;

use crate::buffers::{ConsoleBuffer, NetworkBuffer};
use crate::config::ResolvedConfig;
use crate::error::AppError;
use crate::ipc::{self, Dispatcher};
use crate::runtime_dir;
use crate::session::SessionManager;
use crate::supervisor::{ReconnectTarget, Supervisor};

/// Build the CDP Client, Session Manager, Event Buffers, and Connection
/// Supervisor from `resolved`, bind the IPC socket, and serve requests to
/// completion.
///
/// # Errors
///
/// Returns `AppError::already_running` if another daemon holds the IPC
/// socket, or `AppError::connection_lost` if the initial CDP connection
/// cannot be established.
pub async fn run(resolved: ResolvedConfig) -> Result<(), AppError> {
    let console = Arc::new(ConsoleBuffer::new(resolved.daemon.buffer_capacity));
    let network = Arc::new(NetworkBuffer::new(resolved.daemon.buffer_capacity));
    let sessions = Arc::new(Mutex::new(SessionManager::new()));

    let target = ReconnectTarget {
        host: resolved.connection.host.clone(),
        port: Some(resolved.connection.port),
        ws_url: None,
    };
    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&sessions),
        Arc::clone(&console),
        Arc::clone(&network),
        resolved.daemon,
        target,
    ));

    supervisor.connect().await?;
    supervisor.spawn_heartbeat();

    let listener = ipc::server::bind()?;
    let (stop_tx, stop_rx) = watch::channel(false);
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&supervisor), stop_tx.clone()));

    let signal_tx = stop_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = signal_tx.send(true);
        }
    });

    ipc::server::serve(listener, dispatcher, stop_rx).await;
    clean_shutdown();
    Ok(())
}

/// Remove the PID file, socket file, and any offloaded response bodies.
/// Best-effort: a failed cleanup step does not fail the shutdown.
fn clean_shutdown() {
    let _ = runtime_dir::remove_pid_file();
    let _ = runtime_dir::remove_socket_file();
    if let Ok(dir) = runtime_dir::runtime_dir() {
        let _ = std::fs::remove_dir_all(dir.join("bodies"));
    }
}
