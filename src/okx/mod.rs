pub mod auth;
pub mod client;
pub mod rate_limit;
pub mod ws_types;

pub use client::OkxClient;
