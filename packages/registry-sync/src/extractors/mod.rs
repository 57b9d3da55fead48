//! Content extractor implementations.

pub mod file;

pub use file::FileContentExtractor;
