//! Unix-domain socket listener: one `IpcRequest`/`IpcResponse` round trip per
//! accepted connection, newline-delimited JSON.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::watch;

use crate::error::AppError;
use crate::runtime_dir;

use super::dispatcher::Dispatcher;
use super::protocol::{Command, IpcRequest, IpcResponse};

/// Bind the daemon's IPC socket, refusing to start if another daemon is
/// already listening.
///
/// # Errors
///
/// Returns `AppError::already_running` if a live daemon holds the socket, or
/// an I/O error if the socket cannot be bound.
pub fn bind() -> Result<UnixListener, AppError> {
    if runtime_dir::daemon_already_running()? {
        return Err(AppError::already_running());
    }
    runtime_dir::remove_socket_file()?;
    let path = runtime_dir::socket_path()?;
    let listener = UnixListener::bind(&path)?;
    runtime_dir::write_pid_file(std::process::id())?;
    Ok(listener)
}

/// Accept connections until `stop_rx` observes `true`, dispatching each
/// request on its own task.
pub async fn serve(listener: UnixListener, dispatcher: Arc<Dispatcher>, mut stop_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { continue; };
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    handle_connection(stream, dispatcher).await;
                });
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn handle_connection(stream: tokio::net::UnixStream, dispatcher: Arc<Dispatcher>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
    }

    let response = match serde_json::from_str::<IpcRequest>(line.trim_end()) {
        Ok(request) => handle_request(&dispatcher, request).await,
        Err(e) => IpcResponse::err(&AppError::invalid_argument(format!("malformed request: {e}"))),
    };

    if let Ok(mut body) = serde_json::to_string(&response) {
        body.push('\n');
        let _ = write_half.write_all(body.as_bytes()).await;
    }
}

async fn handle_request(dispatcher: &Dispatcher, request: IpcRequest) -> IpcResponse {
    let decoded = Command::decode(&request.cmd, request.params);
    match decoded {
        Ok(command) => match dispatcher.dispatch(request.target.as_deref(), command).await {
            Ok(data) => IpcResponse::ok(data),
            Err(e) => IpcResponse::err(&e),
        },
        Err(e) => IpcResponse::err(&e),
    }
}
