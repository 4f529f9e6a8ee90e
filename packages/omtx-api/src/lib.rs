//! GPU job orchestration HTTP service.
//!
//! Owns the admission pipeline (rate limit, validation, resource
//! estimation, quota, idempotent dispatch), the Completion Handler
//! webhook the GPU worker calls back into, and the background
//! reconciler that repairs state the request path can miss.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod reconciler;
pub mod routes;
pub mod state;
pub mod validation;

pub use config::AppConfig;
pub use routes::build_router;
pub use state::AppState;
