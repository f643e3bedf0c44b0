pub mod client;
pub mod config;

pub use client::RunPodClient;
pub use config::RunPodConfig;
