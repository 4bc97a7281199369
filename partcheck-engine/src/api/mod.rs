//! HTTP API handlers for partcheck-engine

pub mod cache;
pub mod health;
pub mod matching;

pub use cache::cache_routes;
pub use health::health_routes;
pub use matching::matching_routes;
