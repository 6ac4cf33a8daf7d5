//! Event Buffers: two independent, bounded, mutex-protected sequences
//! (Console, Network) populated from CDP event handlers registered by the
//! Session Manager, and read by the IPC dispatcher's `console`/`network`
//! commands.

pub mod console;
pub mod filter;
pub mod network;

pub use console::{ConsoleBuffer, ConsoleEntry, ConsoleFilter};
pub use filter::{Slice, StatusFilter};
pub use network::{NetworkBuffer, NetworkEntry, NetworkFilter};
