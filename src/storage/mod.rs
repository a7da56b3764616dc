//! Object storage backends.
//!
//! The [`backend::BackendProvider`] and [`backend::ObjectBackend`] traits
//! abstract over the storage service.  Implementations are a client for
//! AWS S3 (and S3-compatible endpoints) and an in-memory store.

pub mod aws;
pub mod backend;
pub mod memory;
