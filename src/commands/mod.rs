//! Command handlers: one module per IPC command group, each a thin
//! async function from typed params to a `serde_json::Value` result.

pub mod buffers;
pub mod interact;
pub mod navigation;
pub mod page;
