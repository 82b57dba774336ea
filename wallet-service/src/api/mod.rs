//! HTTP surface: axum router, request DTOs, handlers, rate limiting.

pub mod handlers;
pub mod limiter;
pub mod server;
pub mod types;
