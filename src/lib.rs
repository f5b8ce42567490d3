//! Convoy: declarative infrastructure reconciliation.
//!
//! Every resource type is an out-of-process plugin speaking a small JSON
//! protocol over stdio. Convoy initializes each resource, resolves actual
//! state in dependency order, and runs the plugins' corrective actions until
//! everything reports VALID.

pub mod cli;
pub mod console;
pub mod core;
pub mod error;
pub mod runtime;

pub use error::{Error, Result};
