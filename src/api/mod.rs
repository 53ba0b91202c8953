//! HTTP API exposing the task gateway.

mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
