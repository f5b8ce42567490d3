//! Core reconciliation logic: manifests, protocol, resource state, planning.

pub mod eventlog;
pub mod invoker;
pub mod manifest;
pub mod plan;
pub mod protocol;
pub mod resource;
pub mod template;
pub mod types;
