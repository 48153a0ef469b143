//! # Configuration
//!
//! Process configuration, read once from the environment at startup.

mod exporter;

pub use exporter::ExporterConfig;

use std::sync::Arc;

/// Immutable configuration handle passed to every component
pub type SharedExporterConfig = Arc<ExporterConfig>;
