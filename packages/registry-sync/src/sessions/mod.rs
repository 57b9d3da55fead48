//! Registry session implementations.

pub mod mirror;

pub use mirror::{DirectoryMirror, DirectoryMirrorSession};
