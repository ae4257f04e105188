pub mod client;
pub mod config;
mod sse;

pub use client::CoralClient;
