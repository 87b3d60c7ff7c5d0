//! Test Helper Utilities
//!
//! Shared fakes and an in-memory application for paneltrack-ingest tests

#![allow(dead_code)]

pub mod app;
pub mod catalog;
pub mod filesystem;

pub use app::{drain, TestApp, LIBRARY_ROOT};
pub use catalog::{hit, FakeCatalog};
pub use filesystem::MemoryFileSystem;
