//! machi-report library interface
//!
//! Exposes the report pipeline, its collaborators and the HTTP router for
//! the binary and for integration testing.

pub mod api;
pub mod charts;
pub mod error;
pub mod models;
pub mod report;
pub mod scoring;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use machi_common::events::EventBus;
use services::{LocationIndex, ReadingRegistry, ReportPipeline};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ReportPipeline>,
    pub registry: Arc<ReadingRegistry>,
    pub locations: Arc<LocationIndex>,
    /// Pipeline events (state changes, absorbed fetch failures)
    pub event_bus: EventBus,
    /// Cancelled on shutdown; each run gets a child token
    pub shutdown: CancellationToken,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last pipeline failure for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(pipeline: Arc<ReportPipeline>, locations: Arc<LocationIndex>, event_bus: EventBus) -> Self {
        Self {
            registry: Arc::clone(pipeline.registry()),
            pipeline,
            locations,
            event_bus,
            shutdown: CancellationToken::new(),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::report_routes())
        .merge(api::municipality_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
