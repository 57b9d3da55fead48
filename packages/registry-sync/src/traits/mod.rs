//! Collaborator seams of the pipeline.
//!
//! - `session`: remote registry acquisition
//! - `content`: reading local documents into service payloads
//! - `service`: the external AI extraction service
//! - `store`: snapshot persistence
//! - `observer`: progress callbacks

pub mod content;
pub mod observer;
pub mod service;
pub mod session;
pub mod store;
