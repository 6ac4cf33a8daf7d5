mod client;
mod error;
mod transport;
mod types;

pub use client::{CdpClient, CdpConfig, CdpSession};
pub use error::CdpError;
pub use transport::ReconnectConfig;
pub use types::{CdpEvent, CdpResponse};
