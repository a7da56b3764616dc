//! AWS S3 storage backend.
//!
//! A fresh [`Client`] is built for every acquire request because the
//! credential source depends on the request URI: keys embedded in the URI
//! win, then an assumed role from the APT configuration, then the
//! standard AWS credential chain (env vars, `~/.aws/credentials`, IAM
//! role, etc.).
//!
//! Endpoint hostnames come from the SDK's own S3 endpoint rules with the
//! global endpoint enabled, so `us-east-1` maps to `s3.amazonaws.com`.
//! Those rules accept any region name, so regions that fit none of the
//! AWS partitions' naming patterns are rejected first.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use aws_sdk_s3::config::endpoint::{DefaultResolver, Params, ResolveEndpoint};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::backend::{BackendFuture, BackendProvider, ClientCredentials, ObjectBackend, ObjectMeta};
use crate::config::StorageConfig;
use crate::errors::MethodError;

/// Session name used when assuming a role.
const ROLE_SESSION_NAME: &str = "apt-s3";

/// Provider name attached to credentials taken from a URI.
const URI_CREDENTIALS_PROVIDER: &str = "apt-s3-uri";

/// Region prefixes of the AWS partitions. A region is
/// `<prefix>-<word>-<number>`, e.g. `us-gov-west-1`.
const PARTITION_REGION_PREFIXES: &[&str] = &[
    "us", "eu", "ap", "sa", "ca", "me", "af", "il", "mx", // aws
    "cn",      // aws-cn
    "us-gov",  // aws-us-gov
    "us-iso",  // aws-iso
    "us-isob", // aws-iso-b
    "eu-isoe", // aws-iso-e
    "us-isof", // aws-iso-f
    "eusc-de", // aws-eusc
];

/// Partition-wide pseudo regions.
const GLOBAL_REGIONS: &[&str] = &[
    "aws-global",
    "aws-cn-global",
    "aws-us-gov-global",
    "aws-iso-global",
    "aws-iso-b-global",
];

/// Whether `region` belongs to one of the AWS partitions.
fn is_known_region(region: &str) -> bool {
    if GLOBAL_REGIONS.contains(&region) {
        return true;
    }
    let Some((head, number)) = region.rsplit_once('-') else {
        return false;
    };
    let Some((prefix, word)) = head.rsplit_once('-') else {
        return false;
    };
    !number.is_empty()
        && number.bytes().all(|b| b.is_ascii_digit())
        && !word.is_empty()
        && word.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
        && PARTITION_REGION_PREFIXES.contains(&prefix)
}

/// Builds S3 clients from the SDK's default configuration.
#[derive(Debug, Clone, Default)]
pub struct AwsBackendProvider {
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    endpoint_url: Option<String>,
    /// Force path-style URL addressing.
    force_path_style: bool,
}

impl AwsBackendProvider {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            endpoint_url: config.endpoint_url.clone().filter(|u| !u.is_empty()),
            force_path_style: config.force_path_style,
        }
    }

    /// Map an AWS SDK error to an anyhow error with context.
    fn map_sdk_error<E>(context: &str, err: E) -> anyhow::Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        anyhow::anyhow!("S3 {context}: {}", DisplayErrorContext(err))
    }

    async fn resolve_endpoint_host(&self, region: &str) -> anyhow::Result<String> {
        let endpoint = match &self.endpoint_url {
            Some(url) => url.clone(),
            None => {
                if !is_known_region(region) {
                    anyhow::bail!("region {region} is not in any known AWS partition");
                }
                let params = Params::builder()
                    .region(region)
                    .use_global_endpoint(true)
                    .build()
                    .map_err(|e| anyhow::anyhow!("invalid endpoint parameters: {e}"))?;
                let endpoint = DefaultResolver::new()
                    .resolve_endpoint(&params)
                    .await
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                endpoint.url().to_string()
            }
        };

        let parsed = url::Url::parse(&endpoint)
            .with_context(|| format!("parsing endpoint URL {endpoint}"))?;
        parsed
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("endpoint URL {endpoint} has no host"))
    }
}

impl BackendProvider for AwsBackendProvider {
    fn endpoint_host(&self, region: &str) -> BackendFuture<'_, String> {
        let region = region.to_string();
        Box::pin(async move {
            let host = self
                .resolve_endpoint_host(&region)
                .await
                .with_context(|| format!("resolving S3 endpoint for region {region}"))?;
            debug!("S3 endpoint for region {}: {}", region, host);
            Ok(host)
        })
    }

    fn connect(
        &self,
        region: &str,
        credentials: ClientCredentials,
    ) -> BackendFuture<'_, Arc<dyn ObjectBackend>> {
        let region = aws_config::Region::new(region.to_string());
        Box::pin(async move {
            let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(region.clone());

            if let Some(ref endpoint) = self.endpoint_url {
                config_loader = config_loader.endpoint_url(endpoint);
            }

            match credentials {
                ClientCredentials::Static {
                    access_key_id,
                    secret_access_key,
                } => {
                    let creds = aws_sdk_s3::config::Credentials::new(
                        access_key_id,
                        secret_access_key,
                        None, // session_token
                        None, // expiry
                        URI_CREDENTIALS_PROVIDER,
                    );
                    config_loader = config_loader.credentials_provider(creds);
                }
                ClientCredentials::AssumeRole { role_arn } => {
                    // The default chain supplies the identity that assumes the role.
                    let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
                        .region(region.clone())
                        .load()
                        .await;
                    info!("Assuming role {} for S3 access", role_arn);
                    let provider = aws_config::sts::AssumeRoleProvider::builder(role_arn)
                        .session_name(ROLE_SESSION_NAME)
                        .configure(&base)
                        .build()
                        .await;
                    config_loader = config_loader.credentials_provider(provider);
                }
                ClientCredentials::Default => {}
            }

            let sdk_config = config_loader.load().await;
            let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
                .force_path_style(self.force_path_style)
                .build();

            let backend: Arc<dyn ObjectBackend> = Arc::new(AwsObjectBackend {
                client: Client::from_conf(s3_config),
            });
            Ok(backend)
        })
    }
}

/// [`ObjectBackend`] over an S3 SDK client.
pub struct AwsObjectBackend {
    client: Client,
}

impl ObjectBackend for AwsObjectBackend {
    fn head(&self, bucket: &str, key: &str) -> BackendFuture<'_, ObjectMeta> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            debug!("S3 head_object: bucket={} key={}", bucket, key);

            let resp = match self
                .client
                .head_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        return Err(MethodError::NotFound { bucket, key });
                    }
                    return Err(AwsBackendProvider::map_sdk_error("head_object", service_err).into());
                }
            };

            let size = resp.content_length().unwrap_or_default();
            let size = u64::try_from(size)
                .map_err(|_| anyhow::anyhow!("S3 head_object: negative content length {size}"))?;
            let last_modified = resp
                .last_modified()
                .ok_or_else(|| anyhow::anyhow!("S3 head_object: response has no Last-Modified"))?;
            let last_modified = SystemTime::try_from(*last_modified)
                .map_err(|e| anyhow::anyhow!("S3 head_object: bad Last-Modified: {e}"))?;

            Ok(ObjectMeta {
                size,
                last_modified,
            })
        })
    }

    fn download(&self, bucket: &str, key: &str, dest: &Path) -> BackendFuture<'_, u64> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let dest = dest.to_path_buf();
        Box::pin(async move {
            debug!(
                "S3 get_object: bucket={} key={} dest={}",
                bucket,
                key,
                dest.display()
            );

            let resp = match self
                .client
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        return Err(MethodError::NotFound { bucket, key });
                    }
                    return Err(AwsBackendProvider::map_sdk_error("get_object", service_err).into());
                }
            };

            let mut file = tokio::fs::File::create(&dest)
                .await
                .with_context(|| format!("creating {}", dest.display()))?;

            let mut body = resp.body;
            let mut written: u64 = 0;
            while let Some(chunk) = body
                .try_next()
                .await
                .map_err(|e| AwsBackendProvider::map_sdk_error("get_object body", e))?
            {
                file.write_all(&chunk)
                    .await
                    .with_context(|| format!("writing {}", dest.display()))?;
                written += chunk.len() as u64;
            }
            file.flush().await?;

            Ok(written)
        })
    }
}

// -- Tests -------------------------------------------------------------------
