//! orderflow HTTP service
//!
//! PostgreSQL-backed order store, the HTTP read and ingest surface, and the
//! configuration and telemetry that wire them together. The ingestion
//! pipeline itself lives in `orderflow-ingest`.

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod notifier;
pub mod page;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{
    AppConfig, CacheBackendKind, CacheSettings, DbConfig, PipelineSettings, ServerConfig,
    TelemetryConfig,
};
pub use db::PgStore;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use notifier::HttpSink;
pub use routes::create_router;
pub use state::{AppState, ServicePipeline, ServiceReadPath, SharedCache, SharedStore};
