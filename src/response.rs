//! Outbound messages.
//!
//! Each function builds one message the method sends to APT. The
//! `URI Done` message carries digests of the downloaded file; APT checks
//! them against the repository index, accepting `MD5Sum-Hash` as an alias
//! of `MD5-Hash`, so both are always sent.

use std::path::Path;
use std::time::SystemTime;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tokio::io::AsyncReadExt;

use crate::errors::{FatalError, MethodError};
use crate::message::{status, Field, Header, Message};

/// `Message` text of a URI Failure for a missing object.
pub const NOT_FOUND_TEXT: &str = "The specified key does not exist.";

const READ_BUF_SIZE: usize = 64 * 1024;

/// Hex digests of a downloaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digests {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
}

impl Digests {
    /// Digest an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = MultiHasher::default();
        hasher.update(data);
        hasher.finish()
    }

    /// Digest a file in one streaming pass.
    pub async fn of_file(path: &Path) -> Result<Self, MethodError> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut hasher = MultiHasher::default();
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finish())
    }
}

#[derive(Default)]
struct MultiHasher {
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
    sha512: Sha512,
}

impl MultiHasher {
    fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
        self.sha512.update(data);
    }

    fn finish(self) -> Digests {
        Digests {
            md5: hex::encode(self.md5.finalize()),
            sha1: hex::encode(self.sha1.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
            sha512: hex::encode(self.sha512.finalize()),
        }
    }
}

/// RFC 1123 date in GMT, e.g. `Thu, 25 Oct 2018 20:17:39 GMT`.
fn last_modified(t: SystemTime) -> Field {
    Field::new("Last-Modified", httpdate::fmt_http_date(t))
}

/// ```text
/// 100 Capabilities
/// Send-Config: true
/// Pipeline: true
/// Single-Instance: yes
/// ```
pub fn capabilities() -> Message {
    Message::new(
        Header::new(status::CAPABILITIES, "Capabilities"),
        vec![
            Field::new("Send-Config", "true"),
            Field::new("Pipeline", "true"),
            Field::new("Single-Instance", "yes"),
        ],
    )
}

/// Informational line for APT's debug output.
pub fn log(text: &str) -> Message {
    Message::new(
        Header::new(status::LOG, "Log"),
        vec![Field::new("Message", text)],
    )
}

pub fn request_status(uri: &str, text: &str) -> Message {
    Message::new(
        Header::new(status::STATUS, "Status"),
        vec![Field::new("URI", uri), Field::new("Message", text)],
    )
}

pub fn uri_start(uri: &str, size: u64, modified: SystemTime) -> Message {
    Message::new(
        Header::new(status::URI_START, "URI Start"),
        vec![
            Field::new("URI", uri),
            Field::new("Size", size.to_string()),
            last_modified(modified),
        ],
    )
}

/// ```text
/// 201 URI Done
/// URI: s3://...
/// Filename: /var/cache/apt/archives/partial/riemann-sumd_0.7.2-1_all.deb
/// Size: 9012
/// Last-Modified: Thu, 25 Oct 2018 20:17:39 GMT
/// MD5-Hash: ...
/// MD5Sum-Hash: ...
/// SHA1-Hash: ...
/// SHA256-Hash: ...
/// SHA512-Hash: ...
/// ```
pub fn uri_done(
    uri: &str,
    filename: &str,
    size: u64,
    modified: SystemTime,
    digests: &Digests,
) -> Message {
    Message::new(
        Header::new(status::URI_DONE, "URI Done"),
        vec![
            Field::new("URI", uri),
            Field::new("Filename", filename),
            Field::new("Size", size.to_string()),
            last_modified(modified),
            Field::new("MD5-Hash", &digests.md5),
            Field::new("MD5Sum-Hash", &digests.md5),
            Field::new("SHA1-Hash", &digests.sha1),
            Field::new("SHA256-Hash", &digests.sha256),
            Field::new("SHA512-Hash", &digests.sha512),
        ],
    )
}

pub fn not_found(uri: &str) -> Message {
    Message::new(
        Header::new(status::URI_FAILURE, "URI Failure"),
        vec![Field::new("Message", NOT_FOUND_TEXT), Field::new("URI", uri)],
    )
}

pub fn general_failure(err: &FatalError) -> Message {
    Message::new(
        Header::new(status::GENERAL_FAILURE, "General Failure"),
        vec![Field::new("Message", err.failure_text())],
    )
}
