//! HTTP API handlers for machi-report
//!
//! Thin JSON surface over the report pipeline and the static lookups.

pub mod health;
pub mod municipalities;
pub mod reports;

pub use health::health_routes;
pub use municipalities::municipality_routes;
pub use reports::report_routes;
