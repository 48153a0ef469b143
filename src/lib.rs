//! Volume Events Exporter Library
//!
//! Watches `PersistentVolume` resources and exports their create and delete
//! events, signed, to an HTTP collector. Delivery is recorded on the volume
//! itself with marker annotations; deletion is held by a per-backend finalizer
//! until the delete event has been accepted.
//!
//! ## Quick Start
//!
//! ```rust
//! use volume_events_exporter::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod collector;
pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod prelude;
pub mod receiver;
pub mod runtime;
pub mod sign;
pub mod store;
pub mod transport;
