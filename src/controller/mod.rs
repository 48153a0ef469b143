//! # Controller
//!
//! Core controller modules for the volume events exporter.
//!
//! - `backoff`: Exponential backoff for per-volume retries
//! - `diagnostics`: Kubernetes Events emitted on volumes
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod diagnostics;
pub mod reconciler;
pub mod server;
