//! HTTP surface: health check, WebSocket session endpoint, model listing.

pub mod middleware;
pub mod routes;
pub mod ws;

pub use middleware::cors_layer;
pub use routes::{build_router, AppState};
