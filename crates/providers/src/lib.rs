pub mod config;
mod http;
pub mod ollama;
pub mod relay;
pub mod runpod;
