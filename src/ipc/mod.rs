//! IPC layer: wire protocol, command dispatch, and the Unix-socket server.

pub mod dispatcher;
pub mod protocol;
pub mod server;

pub use dispatcher::Dispatcher;
pub use protocol::{Command, IpcRequest, IpcResponse};
