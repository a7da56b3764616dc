//! Abstract object storage contract.
//!
//! The engine only needs two operations from storage, probing an object's
//! metadata and streaming it to a local file, plus a way to build a client
//! for a region and credential source. Both sides are traits so tests can
//! swap in [`super::memory::MemoryBackend`].

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use crate::errors::MethodError;

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, MethodError>> + Send + 'a>>;

/// Metadata returned by a successful HEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    pub last_modified: SystemTime,
}

/// Where a client gets its credentials from.
#[derive(Clone, PartialEq, Eq)]
pub enum ClientCredentials {
    /// Access key and secret embedded in the request URI.
    Static {
        access_key_id: String,
        secret_access_key: String,
    },
    /// Assume this role using the default chain as the source identity.
    AssumeRole { role_arn: String },
    /// The SDK's default credential chain.
    Default,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientCredentials::Static { access_key_id, .. } => f
                .debug_struct("Static")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .finish(),
            ClientCredentials::AssumeRole { role_arn } => f
                .debug_struct("AssumeRole")
                .field("role_arn", role_arn)
                .finish(),
            ClientCredentials::Default => f.write_str("Default"),
        }
    }
}

/// A client bound to one region and credential source.
pub trait ObjectBackend: Send + Sync {
    /// Fetch size and modification time, or [`MethodError::NotFound`].
    fn head(&self, bucket: &str, key: &str) -> BackendFuture<'_, ObjectMeta>;

    /// Stream the object into `dest` (created or truncated), returning the
    /// number of bytes written.
    fn download(&self, bucket: &str, key: &str, dest: &Path) -> BackendFuture<'_, u64>;
}

/// Builds [`ObjectBackend`] clients and knows the service endpoint.
pub trait BackendProvider: Send + Sync + 'static {
    /// Hostname of the storage endpoint serving `region`.
    fn endpoint_host(&self, region: &str) -> BackendFuture<'_, String>;

    /// Create a client for `region` using `credentials`.
    fn connect(
        &self,
        region: &str,
        credentials: ClientCredentials,
    ) -> BackendFuture<'_, Arc<dyn ObjectBackend>>;
}
