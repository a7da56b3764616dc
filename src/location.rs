//! Mapping `s3://` URIs onto bucket, key and credentials.
//!
//! Three addressing forms are accepted, checked in this order against the
//! hostname of the region's S3 endpoint:
//!
//! - path-style: `s3://s3.amazonaws.com/<bucket>/<key>`
//! - virtual-hosted-style: `s3://<bucket>.s3.amazonaws.com/<key>`
//! - anything else: `s3://<bucket>/<key>`
//!
//! Credentials may be embedded as userinfo (`s3://AKID:SECRET@host/...`).
//! AWS secrets can contain `/`, which is not legal there, so slashes in the
//! userinfo are percent-encoded before the URI is parsed.

use std::borrow::Cow;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::errors::MethodError;
use crate::storage::backend::ClientCredentials;

const USERINFO_ENCODE_SET: &AsciiSet = &CONTROLS.add(b'/');

/// A resolved request target.
#[derive(Debug, Clone)]
pub struct ObjectLocation {
    /// The URI exactly as APT sent it; echoed back in responses.
    pub request_uri: String,
    /// Parsed form of the URI after userinfo escaping.
    pub uri: Url,
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    /// Resolve `value` against the storage endpoint hostname.
    pub fn resolve(value: &str, endpoint_host: &str) -> Result<Self, MethodError> {
        let uri = Url::parse(&escape_userinfo(value)).map_err(|e| MethodError::Resolution {
            uri: value.to_string(),
            reason: e.to_string(),
        })?;

        let host = uri.host_str().unwrap_or_default();
        let path = percent_decode_str(uri.path()).decode_utf8_lossy();

        let (bucket, key) = if host == endpoint_host {
            // "/bucket/this/is/a/path" splits into ["", "bucket", "this", ...]
            let tokens: Vec<&str> = path.split('/').collect();
            if tokens.len() < 3 {
                return Err(MethodError::Resolution {
                    uri: value.to_string(),
                    reason: "location missing required number of tokens".to_string(),
                });
            }
            (tokens[1].to_string(), tokens[2..].join("/"))
        } else if let Some(bucket) = host.strip_suffix(&format!(".{endpoint_host}")) {
            (bucket.to_string(), strip_leading_slash(&path))
        } else {
            (host.to_string(), strip_leading_slash(&path))
        };

        Ok(Self {
            request_uri: value.to_string(),
            uri,
            bucket,
            key,
        })
    }

    /// Pick the credential source for this location.
    ///
    /// Keys in the URI take precedence; an access key without a secret is
    /// an error. Otherwise a configured role is assumed, and failing that
    /// the default chain is used.
    pub fn credentials(&self, role_arn: Option<&str>) -> Result<ClientCredentials, MethodError> {
        let access_key_id = decode(self.uri.username());
        if !access_key_id.is_empty() {
            let secret = self.uri.password().ok_or_else(|| MethodError::MissingField {
                message: "acquire",
                field: "Password".to_string(),
            })?;
            return Ok(ClientCredentials::Static {
                access_key_id: access_key_id.into_owned(),
                secret_access_key: decode(secret).into_owned(),
            });
        }

        match role_arn.filter(|arn| !arn.is_empty()) {
            Some(arn) => Ok(ClientCredentials::AssumeRole {
                role_arn: arn.to_string(),
            }),
            None => Ok(ClientCredentials::Default),
        }
    }
}

/// Percent-encode slashes inside `key:secret@` so the URI parser does not
/// end the authority early.
///
/// The text before the first `@` is only treated as userinfo when it holds
/// a `:` and the `@` is followed by a host and then a path. An `@` in the
/// last path segment (`s3://repo/pool/a:b@c.deb`) is left alone.
fn escape_userinfo(value: &str) -> Cow<'_, str> {
    let Some(scheme_end) = value.find("://") else {
        return Cow::Borrowed(value);
    };
    let rest_start = scheme_end + 3;
    let rest = &value[rest_start..];
    let Some(at) = rest.find('@') else {
        return Cow::Borrowed(value);
    };

    let userinfo = &rest[..at];
    if !userinfo.contains(':') || !userinfo.contains('/') {
        return Cow::Borrowed(value);
    }
    match rest[at + 1..].split_once('/') {
        Some((host, _)) if !host.is_empty() => {}
        _ => return Cow::Borrowed(value),
    }

    let escaped = utf8_percent_encode(userinfo, USERINFO_ENCODE_SET).to_string();
    Cow::Owned(format!("{}{}{}", &value[..rest_start], escaped, &rest[at..]))
}

fn decode(component: &str) -> Cow<'_, str> {
    percent_decode_str(component).decode_utf8_lossy()
}

fn strip_leading_slash(path: &str) -> String {
    path.strip_prefix('/').unwrap_or(path).to_string()
}
