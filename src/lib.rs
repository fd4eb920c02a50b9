pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod gemini;
pub mod models;
pub mod rate_limiter;
pub mod server;
pub mod state;
pub mod store;
