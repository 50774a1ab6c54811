pub mod client;
pub mod decision;
pub mod review;

pub use client::{LlmClient, LlmConfig};
