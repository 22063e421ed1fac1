//! HTTP and WebSocket handlers for kms-relay

pub mod health;
pub mod performances;
pub mod ws;

pub use health::health_routes;
pub use performances::{get_performance, list_performances};
pub use ws::performance_socket;
