//! In-memory storage backend.
//!
//! Objects live in a `tokio::sync::RwLock<HashMap<...>>` keyed by
//! `(bucket, key)`. Every `connect` call is recorded so callers can see
//! which region and credential source a request ended up using. Clones
//! share the same state.
//!
//! Failures can be scheduled per object and per operation with
//! [`MemoryBackend::fail_head`] and [`MemoryBackend::fail_download`].

use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use super::backend::{BackendFuture, BackendProvider, ClientCredentials, ObjectBackend, ObjectMeta};
use crate::errors::MethodError;

type ObjectMap = HashMap<(String, String), (Bytes, SystemTime)>;

/// A failure to return instead of touching the stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Answer as if the object did not exist.
    NotFound,
    /// Fail with a transfer error carrying this text.
    Transfer(String),
}

impl Failure {
    fn to_error(&self, bucket: &str, key: &str) -> MethodError {
        match self {
            Failure::NotFound => MethodError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            Failure::Transfer(text) => MethodError::Transfer(anyhow::anyhow!("{text}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Head,
    Download,
}

type FailureMap = HashMap<(Op, String, String), Failure>;

/// In-memory storage backend.
#[derive(Clone)]
pub struct MemoryBackend {
    /// Hostname reported for every region.
    endpoint_host: String,
    objects: Arc<tokio::sync::RwLock<ObjectMap>>,
    /// `(region, credentials)` for each `connect` call, in order.
    connections: Arc<Mutex<Vec<(String, ClientCredentials)>>>,
    failures: Arc<Mutex<FailureMap>>,
}

impl MemoryBackend {
    pub fn new(endpoint_host: impl Into<String>) -> Self {
        Self {
            endpoint_host: endpoint_host.into(),
            objects: Arc::default(),
            connections: Arc::default(),
            failures: Arc::default(),
        }
    }

    /// Store `data` under `bucket`/`key`.
    pub async fn insert(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
        last_modified: SystemTime,
    ) {
        self.objects.write().await.insert(
            (bucket.to_string(), key.to_string()),
            (data.into(), last_modified),
        );
    }

    /// Connections made so far.
    pub fn connections(&self) -> Vec<(String, ClientCredentials)> {
        self.connections
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Make every `head` of `bucket`/`key` fail with `failure`.
    pub fn fail_head(&self, bucket: &str, key: &str, failure: Failure) {
        self.schedule(Op::Head, bucket, key, failure);
    }

    /// Make every `download` of `bucket`/`key` fail with `failure`.
    pub fn fail_download(&self, bucket: &str, key: &str, failure: Failure) {
        self.schedule(Op::Download, bucket, key, failure);
    }

    fn schedule(&self, op: Op, bucket: &str, key: &str, failure: Failure) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert((op, bucket.to_string(), key.to_string()), failure);
        }
    }

    fn check(&self, op: Op, bucket: &str, key: &str) -> Result<(), MethodError> {
        let failures = match self.failures.lock() {
            Ok(failures) => failures,
            Err(_) => return Ok(()),
        };
        match failures.get(&(op, bucket.to_string(), key.to_string())) {
            Some(failure) => Err(failure.to_error(bucket, key)),
            None => Ok(()),
        }
    }

    async fn lookup(&self, bucket: &str, key: &str) -> Result<(Bytes, SystemTime), MethodError> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| MethodError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

impl BackendProvider for MemoryBackend {
    fn endpoint_host(&self, _region: &str) -> BackendFuture<'_, String> {
        let host = self.endpoint_host.clone();
        Box::pin(async move { Ok(host) })
    }

    fn connect(
        &self,
        region: &str,
        credentials: ClientCredentials,
    ) -> BackendFuture<'_, Arc<dyn ObjectBackend>> {
        if let Ok(mut connections) = self.connections.lock() {
            connections.push((region.to_string(), credentials));
        }
        let backend: Arc<dyn ObjectBackend> = Arc::new(self.clone());
        Box::pin(async move { Ok(backend) })
    }
}

impl ObjectBackend for MemoryBackend {
    fn head(&self, bucket: &str, key: &str) -> BackendFuture<'_, ObjectMeta> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            self.check(Op::Head, &bucket, &key)?;
            let (data, last_modified) = self.lookup(&bucket, &key).await?;
            Ok(ObjectMeta {
                size: data.len() as u64,
                last_modified,
            })
        })
    }

    fn download(&self, bucket: &str, key: &str, dest: &Path) -> BackendFuture<'_, u64> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let dest = dest.to_path_buf();
        Box::pin(async move {
            self.check(Op::Download, &bucket, &key)?;
            let (data, _) = self.lookup(&bucket, &key).await?;
            tokio::fs::write(&dest, &data).await?;
            Ok(data.len() as u64)
        })
    }
}
