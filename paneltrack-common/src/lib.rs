//! # Paneltrack Common Library
//!
//! Shared code for the paneltrack services:
//! - Error and result types
//! - TOML configuration loading and root folder resolution
//! - Event types (`IngestEvent`) and the broadcast `EventBus`
//! - Heartbeat SSE stream over the event bus
//! - Series name / issue number normalization

pub mod config;
pub mod error;
pub mod events;
pub mod sse;
pub mod text;

pub use error::{Error, Result};
