//! The method's protocol engine.
//!
//! [`Method::run`] announces capabilities, then reads APT's requests from
//! the input stream, framing them on blank lines. Every framed message is
//! handled on its own task so a slow download never blocks the next
//! request. The run ends once input is exhausted and every handler has
//! finished.
//!
//! Acquire handlers wait until the first `601 Configuration` message has
//! been applied, so the region and role are known before any storage call.
//! The wait is a `tokio::sync::watch` channel over [`EngineState`].
//!
//! A `NotFound` from storage becomes a `400 URI Failure` for that request.
//! Any other error stops the run: a `401 General Failure` is written and
//! the [`FatalError`] is returned for the caller to exit on.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::errors::{FatalError, MethodError};
use crate::location::ObjectLocation;
use crate::message::{status, Message};
use crate::response::{self, Digests};
use crate::storage::backend::BackendProvider;

/// Region used until configuration says otherwise.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Config-Item key selecting the S3 region.
pub const REGION_CONFIG_ITEM: &str = "Acquire::s3::region";

/// Config-Item key naming an IAM role to assume.
pub const ROLE_CONFIG_ITEM: &str = "Acquire::s3::role";

const CONFIG_ITEM_FIELD: &str = "Config-Item";

/// Buffers no longer than this are not treated as a complete message.
const MIN_MESSAGE_LEN: usize = 3;

/// Settings applied from APT's configuration message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineState {
    pub region: String,
    pub role_arn: Option<String>,
    /// Set once the first configuration message has been applied.
    pub configured: bool,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            role_arn: None,
            configured: false,
        }
    }
}

/// Splits input lines into blank-line-terminated messages.
#[derive(Debug, Default)]
pub struct Framer {
    buffer: String,
}

impl Framer {
    /// Feed one line (with or without its terminator). Returns the buffered
    /// message when `line` completes it.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches(['\r', '\n']);
        if !line.is_empty() {
            self.buffer.push_str(line);
            self.buffer.push('\n');
            return None;
        }

        if self.buffer.trim().is_empty() {
            // Stray blank line between messages.
            self.buffer.clear();
            return None;
        }

        self.buffer.push('\n');
        if self.buffer.len() > MIN_MESSAGE_LEN {
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    /// Whether a partial message is buffered.
    pub fn has_pending(&self) -> bool {
        !self.buffer.trim().is_empty()
    }
}

/// An APT transport method serving `s3://` URIs.
pub struct Method {
    shared: Arc<Shared>,
}

struct Shared {
    backend: Arc<dyn BackendProvider>,
    state: watch::Sender<EngineState>,
    output: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl Method {
    /// Create a method that writes its messages to `output`.
    pub fn new<W>(backend: Arc<dyn BackendProvider>, output: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (state, _) = watch::channel(EngineState::default());
        Self {
            shared: Arc::new(Shared {
                backend,
                state,
                output: Mutex::new(Box::new(output)),
            }),
        }
    }

    /// Snapshot of the current engine state.
    pub fn state(&self) -> EngineState {
        self.shared.state.borrow().clone()
    }

    /// Serve requests from `input` until it is exhausted and all handlers
    /// are done.
    ///
    /// On a fatal error the General Failure message has already been
    /// written when this returns; in-flight handlers are aborted.
    pub async fn run<R>(&self, input: R) -> Result<(), FatalError>
    where
        R: AsyncRead + Unpin,
    {
        match self.serve(input).await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(kind = err.0.kind(), "Fatal error: {}", err);
                if let Err(write_err) = self.shared.emit(&response::general_failure(&err)).await {
                    warn!("Failed to report general failure: {}", write_err);
                }
                Err(err)
            }
        }
    }

    async fn serve<R>(&self, input: R) -> Result<(), FatalError>
    where
        R: AsyncRead + Unpin,
    {
        self.shared.emit(&response::capabilities()).await?;

        let mut lines = BufReader::new(input).lines();
        let mut framer = Framer::default();
        let mut tasks: JoinSet<Result<(), FatalError>> = JoinSet::new();
        let mut reading = true;

        loop {
            tokio::select! {
                line = lines.next_line(), if reading => {
                    match line.map_err(MethodError::from)? {
                        Some(line) => {
                            if let Some(raw) = framer.push_line(&line) {
                                let shared = Arc::clone(&self.shared);
                                tasks.spawn(async move { shared.handle(raw).await });
                                debug!(outstanding = tasks.len(), "Dispatched message");
                            }
                        }
                        None => {
                            if framer.has_pending() {
                                warn!("Input ended inside an unterminated message; discarding it");
                            }
                            debug!(outstanding = tasks.len(), "Input closed");
                            reading = false;
                        }
                    }
                }
                Some(joined) = tasks.join_next() => {
                    match joined {
                        Ok(result) => result?,
                        Err(join_err) => {
                            return Err(MethodError::Transfer(anyhow::anyhow!(
                                "message handler failed: {join_err}"
                            ))
                            .into());
                        }
                    }
                    debug!(outstanding = tasks.len(), "Message handled");
                }
                else => break,
            }
        }

        Ok(())
    }
}

impl Shared {
    async fn handle(self: Arc<Self>, raw: String) -> Result<(), FatalError> {
        let msg = Message::parse(&raw)?;
        match msg.header.status {
            status::CONFIGURATION => self.configure(&msg).await,
            status::URI_ACQUIRE => self.acquire(&msg).await,
            other => {
                debug!("Ignoring message {} {}", other, msg.header.description);
                Ok(())
            }
        }
    }

    /// Apply `Config-Item` fields and release waiting acquire handlers.
    ///
    /// A `101 Log` naming the settings in effect is written before any
    /// waiting handler is released.
    async fn configure(&self, msg: &Message) -> Result<(), FatalError> {
        let mut region = None;
        let mut role_arn = None;

        for item in msg.field_list(CONFIG_ITEM_FIELD) {
            let (name, value) = match item.value.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (item.value.as_str(), None),
            };
            let slot = match name {
                REGION_CONFIG_ITEM => &mut region,
                ROLE_CONFIG_ITEM => &mut role_arn,
                _ => continue,
            };
            let value = value.ok_or_else(|| MethodError::MissingField {
                message: "configuration",
                field: format!("{name} value"),
            })?;
            *slot = Some(value.to_string());
        }

        let mut next = self.state.borrow().clone();
        if let Some(region) = region {
            next.region = region;
        }
        if let Some(role_arn) = role_arn {
            next.role_arn = Some(role_arn);
        }
        next.configured = true;

        let text = match &next.role_arn {
            Some(role) => format!("Using S3 region {} with role {}", next.region, role),
            None => format!("Using S3 region {}", next.region),
        };
        self.emit(&response::log(&text)).await?;

        debug!(
            region = %next.region,
            role = next.role_arn.as_deref().unwrap_or(""),
            "Configuration applied"
        );
        self.state.send_replace(next);
        Ok(())
    }

    async fn wait_for_configuration(&self) -> Result<EngineState, MethodError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| state.configured)
            .await
            .map_err(|_| anyhow::anyhow!("engine state closed before configuration"))?;
        Ok((*state).clone())
    }

    /// Fetch one object: Status, URI Start, then URI Done or URI Failure.
    async fn acquire(&self, msg: &Message) -> Result<(), FatalError> {
        let state = self.wait_for_configuration().await?;

        let uri = required_field(msg, "URI")?;
        let host = self.backend.endpoint_host(&state.region).await?;
        let location = ObjectLocation::resolve(uri, &host)?;

        self.emit(&response::request_status(
            &location.request_uri,
            &format!("Connecting to {host}"),
        ))
        .await?;

        let credentials = location.credentials(state.role_arn.as_deref())?;
        let client = self.backend.connect(&state.region, credentials).await?;

        let meta = match client.head(&location.bucket, &location.key).await {
            Ok(meta) => meta,
            Err(err) if err.is_recoverable() => return self.report_not_found(&location, err).await,
            Err(err) => return Err(err.into()),
        };
        self.emit(&response::uri_start(
            &location.request_uri,
            meta.size,
            meta.last_modified,
        ))
        .await?;

        let filename = required_field(msg, "Filename")?;
        let dest = Path::new(filename);
        let size = match client.download(&location.bucket, &location.key, dest).await {
            Ok(size) => size,
            Err(err) if err.is_recoverable() => return self.report_not_found(&location, err).await,
            Err(err) => return Err(err.into()),
        };

        let digests = Digests::of_file(dest).await?;
        info!(
            bucket = %location.bucket,
            key = %location.key,
            bytes = size,
            "Downloaded to {}",
            filename
        );

        self.emit(&response::uri_done(
            &location.request_uri,
            filename,
            size,
            meta.last_modified,
            &digests,
        ))
        .await?;
        Ok(())
    }

    async fn report_not_found(
        &self,
        location: &ObjectLocation,
        err: MethodError,
    ) -> Result<(), FatalError> {
        info!("{}", err);
        self.emit(&response::not_found(&location.request_uri)).await?;
        Ok(())
    }

    /// Write one whole message; concurrent handlers never interleave lines.
    async fn emit(&self, msg: &Message) -> Result<(), MethodError> {
        let text = msg.to_string();
        let mut output = self.output.lock().await;
        output.write_all(text.as_bytes()).await?;
        output.flush().await?;
        Ok(())
    }
}

fn required_field<'a>(msg: &'a Message, name: &str) -> Result<&'a str, MethodError> {
    msg.field_value(name).ok_or_else(|| MethodError::MissingField {
        message: "acquire",
        field: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::NOT_FOUND_TEXT;
    use crate::storage::backend::ClientCredentials;
    use crate::storage::memory::{Failure, MemoryBackend};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::{Duration, UNIX_EPOCH};

    const S3_HOST: &str = "s3.amazonaws.com";

    const CONFIG_MSG: &str = "601 Configuration
Config-Item: Dir::Log=var/log/apt
Config-Item: Dir::Log::Terminal=term.log
Config-Item: Dir::Ignore-Files-Silently::=~$
Config-Item: Acquire::cdrom::mount=/media/cdrom
Config-Item: Acquire::s3::region=us-east-2
Config-Item: Aptitude::Get-Root-Command=sudo:/usr/bin/sudo
Config-Item: Unattended-Upgrade::Allowed-Origins::=${distro_id}:${distro_codename}-security

";

    /// Collects everything the method writes.
    #[derive(Clone, Default)]
    struct Sink(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Sink {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }

        fn messages(&self) -> Vec<Message> {
            self.text()
                .split("\n\n")
                .filter(|chunk| !chunk.trim().is_empty())
                .map(|chunk| Message::parse(chunk).unwrap())
                .collect()
        }
    }

    impl AsyncWrite for Sink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn method(backend: &MemoryBackend) -> (Method, Sink) {
        let sink = Sink::default();
        let method = Method::new(Arc::new(backend.clone()), sink.clone());
        (method, sink)
    }

    fn acquire_msg(uri: &str, filename: &str) -> String {
        format!("600 URI Acquire\nURI: {uri}\nFilename: {filename}\n\n")
    }

    fn statuses(messages: &[Message]) -> Vec<i32> {
        messages.iter().map(|m| m.header.status).collect()
    }

    // -- Framing -----------------------------------------------------------

    fn frame_all(input: &str) -> Vec<String> {
        let mut framer = Framer::default();
        input.lines().filter_map(|l| framer.push_line(l)).collect()
    }

    #[test]
    fn test_framer_splits_on_blank_lines() {
        let input = format!(
            "{}{}",
            acquire_msg("s3://b/one.deb", "/tmp/one.deb"),
            acquire_msg("s3://b/two.deb", "/tmp/two.deb")
        );
        let frames = frame_all(&input);
        assert_eq!(frames.len(), 2);
        assert!(frames[1].contains("two.deb"));
        assert!(frames[0].ends_with("\n\n"));
    }

    #[test]
    fn test_framer_skips_leading_blank_lines() {
        let frames = frame_all("\n\n\n\n\n601 Configuration\nConfig-Item: a=b\n\n");
        assert_eq!(frames, vec!["601 Configuration\nConfig-Item: a=b\n\n".to_string()]);
    }

    #[test]
    fn test_framer_unterminated_message_is_pending() {
        let mut framer = Framer::default();
        assert!(framer.push_line("600 URI Acquire\n").is_none());
        assert!(framer.push_line("URI: s3://b/k\n").is_none());
        assert!(framer.has_pending());
    }

    #[test]
    fn test_framer_crlf() {
        let mut framer = Framer::default();
        assert!(framer.push_line("600 URI Acquire\r\n").is_none());
        assert!(framer.push_line("URI: s3://b/k\r\n").is_none());
        let raw = framer.push_line("\r\n").unwrap();
        assert_eq!(raw, "600 URI Acquire\nURI: s3://b/k\n\n");
    }

    // -- Configuration -----------------------------------------------------

    #[tokio::test]
    async fn test_configuration_sets_region() {
        let backend = MemoryBackend::new(S3_HOST);
        let (method, _sink) = method(&backend);
        assert!(!method.state().configured);

        method.run(CONFIG_MSG.as_bytes()).await.unwrap();

        let state = method.state();
        assert!(state.configured);
        assert_eq!(state.region, "us-east-2");
        assert_eq!(state.role_arn, None);
    }

    #[tokio::test]
    async fn test_configuration_role_and_default_region() {
        let backend = MemoryBackend::new(S3_HOST);
        let (method, sink) = method(&backend);

        let input = "601 Configuration\nConfig-Item: Acquire::s3::role=arn:aws:iam::123456789012:role/apt=reader\n\n";
        method.run(input.as_bytes()).await.unwrap();

        let messages = sink.messages();
        assert_eq!(statuses(&messages), vec![100, 101]);
        assert_eq!(
            messages[1].field_value("Message"),
            Some("Using S3 region us-east-1 with role arn:aws:iam::123456789012:role/apt=reader")
        );

        let state = method.state();
        assert_eq!(state.region, DEFAULT_REGION);
        assert_eq!(
            state.role_arn.as_deref(),
            Some("arn:aws:iam::123456789012:role/apt=reader")
        );
    }

    #[tokio::test]
    async fn test_configuration_item_without_value_is_fatal() {
        let backend = MemoryBackend::new(S3_HOST);
        let (method, sink) = method(&backend);

        let input = "601 Configuration\nConfig-Item: Acquire::s3::region\n\n";
        let err = method.run(input.as_bytes()).await.unwrap_err();
        assert!(matches!(err.0, MethodError::MissingField { .. }));

        let messages = sink.messages();
        assert_eq!(statuses(&messages), vec![100, 401]);
    }

    // -- End to end --------------------------------------------------------

    #[tokio::test]
    async fn test_capabilities_flushed_first() {
        let backend = MemoryBackend::new(S3_HOST);
        let (method, sink) = method(&backend);

        method.run(&b""[..]).await.unwrap();

        assert_eq!(
            sink.text(),
            "100 Capabilities\nSend-Config: true\nPipeline: true\nSingle-Instance: yes\n\n"
        );
    }

    #[tokio::test]
    async fn test_acquire_downloads_and_reports_hashes() {
        let backend = MemoryBackend::new(S3_HOST);
        let modified = UNIX_EPOCH + Duration::from_secs(1_540_498_659);
        backend
            .insert(
                "apt-repo-bucket",
                "apt/generic/python-bernhard_0.2.3-1_all.deb",
                &b"not really a deb"[..],
                modified,
            )
            .await;
        let (method, sink) = method(&backend);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("python-bernhard_0.2.3-1_all.deb");
        let uri = "s3://fake-access-key-id:fake-access-key-secret@s3.amazonaws.com/apt-repo-bucket/apt/generic/python-bernhard_0.2.3-1_all.deb";
        let input = format!("{CONFIG_MSG}{}", acquire_msg(uri, dest.to_str().unwrap()));

        method.run(input.as_bytes()).await.unwrap();

        let messages = sink.messages();
        assert_eq!(statuses(&messages), vec![100, 101, 102, 200, 201]);

        let log = &messages[1];
        assert_eq!(log.header.description, "Log");
        assert_eq!(log.field_value("Message"), Some("Using S3 region us-east-2"));

        let status_msg = &messages[2];
        assert_eq!(status_msg.field_value("URI"), Some(uri));
        assert_eq!(
            status_msg.field_value("Message"),
            Some("Connecting to s3.amazonaws.com")
        );

        let start = &messages[3];
        assert_eq!(start.field_value("Size"), Some("16"));
        assert_eq!(
            start.field_value("Last-Modified"),
            Some("Thu, 25 Oct 2018 20:17:39 GMT")
        );

        let done = &messages[4];
        let expected = Digests::of_bytes(b"not really a deb");
        assert_eq!(done.field_value("URI"), Some(uri));
        assert_eq!(done.field_value("Filename"), dest.to_str());
        assert_eq!(done.field_value("Size"), Some("16"));
        assert_eq!(done.field_value("MD5-Hash"), Some(expected.md5.as_str()));
        assert_eq!(done.field_value("MD5Sum-Hash"), Some(expected.md5.as_str()));
        assert_eq!(done.field_value("SHA1-Hash"), Some(expected.sha1.as_str()));
        assert_eq!(done.field_value("SHA256-Hash"), Some(expected.sha256.as_str()));
        assert_eq!(done.field_value("SHA512-Hash"), Some(expected.sha512.as_str()));

        assert_eq!(std::fs::read(&dest).unwrap(), b"not really a deb");
        assert_eq!(
            backend.connections(),
            vec![(
                "us-east-2".to_string(),
                ClientCredentials::Static {
                    access_key_id: "fake-access-key-id".to_string(),
                    secret_access_key: "fake-access-key-secret".to_string(),
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_acquire_not_found() {
        let backend = MemoryBackend::new(S3_HOST);
        let (method, sink) = method(&backend);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.deb");
        let uri = "s3://fake-access-key-id:fake-access-key-secret@s3.amazonaws.com/apt-repo-bucket/apt/generic/missing.deb";
        let input = format!("{CONFIG_MSG}{}", acquire_msg(uri, dest.to_str().unwrap()));

        method.run(input.as_bytes()).await.unwrap();

        let messages = sink.messages();
        assert_eq!(statuses(&messages), vec![100, 101, 102, 400]);
        let failure = &messages[3];
        assert_eq!(failure.header.description, "URI Failure");
        assert_eq!(failure.field_value("Message"), Some(NOT_FOUND_TEXT));
        assert_eq!(failure.field_value("URI"), Some(uri));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_configuration() {
        let backend = MemoryBackend::new(S3_HOST);
        backend
            .insert("repo", "dists/stable/Release", &b"Origin: test\n"[..], UNIX_EPOCH)
            .await;
        let (method, sink) = method(&backend);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("Release");
        let input = format!(
            "{}601 Configuration\nConfig-Item: Acquire::s3::region=eu-west-1\nConfig-Item: Acquire::s3::role=arn:aws:iam::123456789012:role/apt\n\n",
            acquire_msg("s3://repo/dists/stable/Release", dest.to_str().unwrap())
        );

        method.run(input.as_bytes()).await.unwrap();

        assert_eq!(statuses(&sink.messages()), vec![100, 101, 102, 200, 201]);
        assert_eq!(
            backend.connections(),
            vec![(
                "eu-west-1".to_string(),
                ClientCredentials::AssumeRole {
                    role_arn: "arn:aws:iam::123456789012:role/apt".to_string()
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_pipelined_acquires_all_complete() {
        let backend = MemoryBackend::new(S3_HOST);
        for name in ["a.deb", "b.deb", "c.deb"] {
            backend
                .insert("repo", &format!("pool/{name}"), name.as_bytes().to_vec(), UNIX_EPOCH)
                .await;
        }
        let (method, sink) = method(&backend);

        let dir = tempfile::tempdir().unwrap();
        let mut input = CONFIG_MSG.to_string();
        for name in ["a.deb", "b.deb", "c.deb"] {
            let dest = dir.path().join(name);
            input.push_str(&acquire_msg(
                &format!("s3://repo/pool/{name}"),
                dest.to_str().unwrap(),
            ));
        }

        method.run(input.as_bytes()).await.unwrap();

        let messages = sink.messages();
        let done: Vec<_> = messages.iter().filter(|m| m.header.status == 201).collect();
        assert_eq!(done.len(), 3);
        for name in ["a.deb", "b.deb", "c.deb"] {
            assert_eq!(std::fs::read(dir.path().join(name)).unwrap(), name.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_missing_filename_is_fatal() {
        let backend = MemoryBackend::new(S3_HOST);
        backend
            .insert("repo", "pool/a.deb", &b"data"[..], UNIX_EPOCH)
            .await;
        let (method, sink) = method(&backend);

        let input = format!("{CONFIG_MSG}600 URI Acquire\nURI: s3://repo/pool/a.deb\n\n");
        let err = method.run(input.as_bytes()).await.unwrap_err();
        assert!(matches!(err.0, MethodError::MissingField { .. }));

        let messages = sink.messages();
        assert_eq!(statuses(&messages), vec![100, 101, 102, 200, 401]);
        assert_eq!(
            messages[4].field_value("Message"),
            Some("acquire message missing required field: Filename")
        );
    }

    #[tokio::test]
    async fn test_unresolvable_location_is_fatal() {
        let backend = MemoryBackend::new(S3_HOST);
        let (method, sink) = method(&backend);

        let input = format!(
            "{CONFIG_MSG}{}",
            acquire_msg("s3://s3.amazonaws.com/bucket-only", "/tmp/unused")
        );
        let err = method.run(input.as_bytes()).await.unwrap_err();
        assert!(matches!(err.0, MethodError::Resolution { .. }));
        assert_eq!(statuses(&sink.messages()), vec![100, 101, 401]);
    }

    #[tokio::test]
    async fn test_invalid_header_is_fatal() {
        let backend = MemoryBackend::new(S3_HOST);
        let (method, sink) = method(&backend);

        let err = method
            .run(&b"garbage header\nFoo: bar\n\n"[..])
            .await
            .unwrap_err();
        assert!(matches!(err.0, MethodError::Parse { .. }));
        assert_eq!(statuses(&sink.messages()), vec![100, 401]);
    }

    #[tokio::test]
    async fn test_unknown_status_ignored() {
        let backend = MemoryBackend::new(S3_HOST);
        let (method, sink) = method(&backend);

        method
            .run(&b"700 Fake Description\nFoo: bar\n\n"[..])
            .await
            .unwrap();
        assert_eq!(statuses(&sink.messages()), vec![100]);
    }

    #[tokio::test]
    async fn test_negative_status_ignored() {
        let backend = MemoryBackend::new(S3_HOST);
        let (method, sink) = method(&backend);

        method
            .run(&b"-1 Fake Description\nFoo: bar\n\n"[..])
            .await
            .unwrap();
        assert_eq!(statuses(&sink.messages()), vec![100]);
    }

    #[tokio::test]
    async fn test_not_found_during_download() {
        let backend = MemoryBackend::new(S3_HOST);
        backend
            .insert("repo", "pool/gone.deb", &b"data"[..], UNIX_EPOCH)
            .await;
        backend.fail_download("repo", "pool/gone.deb", Failure::NotFound);
        let (method, sink) = method(&backend);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("gone.deb");
        let uri = "s3://repo/pool/gone.deb";
        let input = format!("{CONFIG_MSG}{}", acquire_msg(uri, dest.to_str().unwrap()));

        method.run(input.as_bytes()).await.unwrap();

        let messages = sink.messages();
        assert_eq!(statuses(&messages), vec![100, 101, 102, 200, 400]);
        assert_eq!(messages[4].field_value("Message"), Some(NOT_FOUND_TEXT));
        assert_eq!(messages[4].field_value("URI"), Some(uri));
    }

    #[tokio::test]
    async fn test_head_transfer_error_is_fatal() {
        let backend = MemoryBackend::new(S3_HOST);
        backend
            .insert("repo", "pool/a.deb", &b"data"[..], UNIX_EPOCH)
            .await;
        backend.fail_head(
            "repo",
            "pool/a.deb",
            Failure::Transfer("connection reset\nby peer".to_string()),
        );
        let (method, sink) = method(&backend);

        let input = format!(
            "{CONFIG_MSG}{}",
            acquire_msg("s3://repo/pool/a.deb", "/tmp/unused")
        );
        let err = method.run(input.as_bytes()).await.unwrap_err();
        assert!(matches!(err.0, MethodError::Transfer(_)));

        let messages = sink.messages();
        assert_eq!(statuses(&messages), vec![100, 101, 102, 401]);
        assert_eq!(
            messages[3].field_value("Message"),
            Some("connection reset by peer")
        );
    }

    #[tokio::test]
    async fn test_download_transfer_error_is_fatal() {
        let backend = MemoryBackend::new(S3_HOST);
        backend
            .insert("repo", "pool/a.deb", &b"data"[..], UNIX_EPOCH)
            .await;
        backend.fail_download(
            "repo",
            "pool/a.deb",
            Failure::Transfer("body stream ended early".to_string()),
        );
        let (method, sink) = method(&backend);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.deb");
        let input = format!(
            "{CONFIG_MSG}{}",
            acquire_msg("s3://repo/pool/a.deb", dest.to_str().unwrap())
        );
        let err = method.run(input.as_bytes()).await.unwrap_err();
        assert!(matches!(err.0, MethodError::Transfer(_)));
        assert_eq!(statuses(&sink.messages()), vec![100, 101, 102, 200, 401]);
    }

    #[tokio::test]
    async fn test_fatal_error_while_acquire_waits() {
        let backend = MemoryBackend::new(S3_HOST);
        backend
            .insert("repo", "pool/a.deb", &b"data"[..], UNIX_EPOCH)
            .await;
        let (method, sink) = method(&backend);

        // The acquire never sees a configuration message.
        let input = format!(
            "{}garbage header\nFoo: bar\n\n",
            acquire_msg("s3://repo/pool/a.deb", "/tmp/unused")
        );
        let err = tokio::time::timeout(Duration::from_secs(5), method.run(input.as_bytes()))
            .await
            .expect("run returns once the fatal error is seen")
            .unwrap_err();
        assert!(matches!(err.0, MethodError::Parse { .. }));
        assert_eq!(statuses(&sink.messages()), vec![100, 401]);
        assert!(backend.connections().is_empty());
    }
}
