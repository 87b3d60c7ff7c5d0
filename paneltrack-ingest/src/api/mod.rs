//! HTTP API handlers for paneltrack-ingest
//!
//! Thin wrappers over `IngestService`; every route module returns a
//! `Router<AppState>` merged by `build_router`.

pub mod batches;
pub mod health;
pub mod items;
pub mod settings;
pub mod sse;

pub use batches::batch_routes;
pub use health::health_routes;
pub use items::item_routes;
pub use settings::settings_routes;
pub use sse::event_stream;
