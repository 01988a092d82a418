//! Plan storage adapters
//!
//! - `JsonFilePlanStorage`: JSON document with a cross-process file lock
//! - `InMemoryPlanStorage`: process-local, for tests and embedding

pub mod json_file;
pub mod memory;

pub use json_file::JsonFilePlanStorage;
pub use memory::InMemoryPlanStorage;
