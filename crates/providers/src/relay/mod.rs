pub mod client;
pub mod config;

pub use client::{reconstruct, RelayClient};
pub use config::ClientConfig;
