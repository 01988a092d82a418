//! Domain layer for foreman
//!
//! Core models, collaborator ports and error types. Nothing in here performs I/O.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, QueueError, QueueResult, StoreError, StoreResult};
