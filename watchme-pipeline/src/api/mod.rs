//! HTTP API handlers for watchme-pipeline

pub mod events;
pub mod health;

pub use events::event_routes;
pub use health::health_routes;
