//! Snapshot store implementations.
//!
//! - [`MemoryStore`] - In-memory storage for tests and development
//! - [`JsonFileStore`] - One JSON file per entity in an output directory

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
