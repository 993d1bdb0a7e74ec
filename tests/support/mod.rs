//! In-memory container runtime used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bollard::models::HostConfig;
use bytes::Bytes;
use cflocal::container::logs::encode_frame;
use cflocal::container::runtime::ByteReader;
use futures::stream;
use cflocal::container::{
    ArchiveDownload, CommitRequest, ContainerConfig, ContainerError, ContainerRuntime,
    LogsRequest, StreamKind,
};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read};
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio_util::io::StreamReader;

type Result<T> = cflocal::container::Result<T>;

#[derive(Default)]
struct State {
    next_id: u64,
    containers: HashMap<String, MockContainer>,
    calls: Vec<String>,
    restarts: usize,
    restart_failures: usize,
    hanging_restart: bool,
    inspect_failures: usize,
    wait_delay: Option<Duration>,
    log_delay: Option<Duration>,
    fail_start: bool,
    started_at: String,
    exit_code: Option<i64>,
    log_scripts: VecDeque<Vec<u8>>,
    log_requests: Vec<LogsRequest>,
    commits: Vec<CommitRequest>,
    removed: Vec<String>,
}

struct MockContainer {
    name: String,
    files: HashMap<String, Vec<u8>>,
}

/// Scriptable [`ContainerRuntime`] double.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<State>,
}

impl MockRuntime {
    pub fn new() -> Self {
        let runtime = Self::default();
        runtime.lock().started_at = "2024-01-02T03:04:05.000000000Z".to_string();
        runtime
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Make `wait` return `code`; without it `wait` never returns.
    ///
    /// Logs of an exited process end after their frames instead of staying
    /// open.
    pub fn with_exit_code(self, code: i64) -> Self {
        self.lock().exit_code = Some(code);
        self
    }

    /// Fail the next `count` restart calls.
    pub fn with_restart_failures(self, count: usize) -> Self {
        self.lock().restart_failures = count;
        self
    }

    /// Make every restart call hang until it is abandoned.
    pub fn with_hanging_restart(self) -> Self {
        self.lock().hanging_restart = true;
        self
    }

    /// Fail the next `count` inspect calls.
    pub fn with_inspect_failures(self, count: usize) -> Self {
        self.lock().inspect_failures = count;
        self
    }

    /// Delay the return of `wait` by `delay`.
    pub fn with_wait_delay(self, delay: Duration) -> Self {
        self.lock().wait_delay = Some(delay);
        self
    }

    /// Hold back log frames for `delay` after the stream is opened.
    pub fn with_log_delay(self, delay: Duration) -> Self {
        self.lock().log_delay = Some(delay);
        self
    }

    pub fn with_failing_start(self) -> Self {
        self.lock().fail_start = true;
        self
    }

    pub fn with_started_at(self, raw: &str) -> Self {
        self.lock().started_at = raw.to_string();
        self
    }

    /// Queue the frames served by the next `logs` call.
    ///
    /// After the frames the stream stays open, as a followed log of a
    /// running process would.
    pub fn with_log_script(self, lines: &[(StreamKind, &str)]) -> Self {
        let bytes = lines
            .iter()
            .flat_map(|(kind, text)| encode_frame(*kind, text.as_bytes()).to_vec())
            .collect();
        self.lock().log_scripts.push_back(bytes);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn restarts(&self) -> usize {
        self.lock().restarts
    }

    pub fn log_requests(&self) -> Vec<LogsRequest> {
        self.lock().log_requests.clone()
    }

    pub fn commits(&self) -> Vec<CommitRequest> {
        self.lock().commits.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.lock().removed.clone()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.lock()
            .containers
            .values()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn file(&self, id: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .containers
            .get(id)
            .and_then(|c| c.files.get(path).cloned())
    }

    fn record(&self, call: &str, id: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("{} {}", call, id));
        if state.containers.contains_key(id) {
            Ok(())
        } else {
            Err(ContainerError::runtime_call(
                "mock",
                format!("No such container: {}", id),
            ))
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(
        &self,
        name: &str,
        config: &ContainerConfig,
        _host_config: &HostConfig,
    ) -> Result<String> {
        let mut state = self.lock();
        state.calls.push(format!("create {}", name));
        if config.image.is_empty() {
            return Err(ContainerError::Creation("No such image".to_string()));
        }
        if state.containers.values().any(|c| c.name == name) {
            return Err(ContainerError::Creation(format!(
                "Conflict. The container name \"{}\" is already in use",
                name
            )));
        }

        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        state.containers.insert(
            id.clone(),
            MockContainer {
                name: name.to_string(),
                files: HashMap::new(),
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.record("start", id)?;
        if self.lock().fail_start {
            return Err(ContainerError::runtime_call("start", "executable not found"));
        }
        Ok(())
    }

    async fn restart(&self, id: &str, _grace: Duration) -> Result<()> {
        self.record("restart", id)?;
        let hanging = self.lock().hanging_restart;
        if hanging {
            return std::future::pending().await;
        }
        let mut state = self.lock();
        if state.restart_failures > 0 {
            state.restart_failures -= 1;
            return Err(ContainerError::runtime_call("restart", "daemon busy"));
        }
        state.restarts += 1;
        Ok(())
    }

    async fn inspect_started_at(&self, id: &str) -> Result<String> {
        self.record("inspect", id)?;
        let mut state = self.lock();
        if state.inspect_failures > 0 {
            state.inspect_failures -= 1;
            return Err(ContainerError::runtime_call("inspect", "daemon busy"));
        }
        Ok(state.started_at.clone())
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        self.record("wait", id)?;
        let (exit_code, delay) = {
            let state = self.lock();
            (state.exit_code, state.wait_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match exit_code {
            Some(code) => Ok(code),
            None => std::future::pending().await,
        }
    }

    async fn logs(&self, id: &str, request: LogsRequest) -> Result<ByteReader> {
        self.record("logs", id)?;
        let mut state = self.lock();
        state.log_requests.push(request);
        let script = state.log_scripts.pop_front().unwrap_or_default();
        let frames: ByteReader = match state.log_delay {
            Some(delay) => Box::pin(StreamReader::new(stream::once(async move {
                tokio::time::sleep(delay).await;
                Ok::<_, io::Error>(Bytes::from(script))
            }))),
            None => Box::pin(io::Cursor::new(script)),
        };
        if state.exit_code.is_some() {
            Ok(frames)
        } else {
            Ok(Box::pin(AsyncReadExt::chain(frames, OpenStream)))
        }
    }

    async fn upload(&self, id: &str, dest_dir: &str, archive: Bytes) -> Result<()> {
        self.record("upload", id)?;
        let mut files = Vec::new();
        let mut tarball = tar::Archive::new(archive.as_ref());
        for entry in tarball.entries()? {
            let mut entry = entry?;
            let path = Path::new(dest_dir).join(entry.path()?);
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            files.push((path.to_string_lossy().into_owned(), contents));
        }

        let mut state = self.lock();
        if let Some(container) = state.containers.get_mut(id) {
            container.files.extend(files);
        }
        Ok(())
    }

    async fn download(&self, id: &str, path: &str) -> Result<ArchiveDownload> {
        self.record("download", id)?;
        let contents = self.file(id, path);

        let mut builder = tar::Builder::new(Vec::new());
        let stat_size = match &contents {
            Some(contents) => {
                let name = Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let mut header = tar::Header::new_gnu();
                header.set_size(contents.len() as u64);
                header.set_mode(0o755);
                builder.append_data(&mut header, name, contents.as_slice())?;
                Some(contents.len() as u64)
            }
            None => None,
        };

        Ok(ArchiveDownload {
            archive: Box::pin(io::Cursor::new(builder.into_inner()?)),
            stat_size,
        })
    }

    async fn commit(&self, id: &str, request: CommitRequest) -> Result<String> {
        self.record("commit", id)?;
        let mut state = self.lock();
        state.commits.push(request);
        Ok(format!("sha256:{:064x}", state.commits.len()))
    }

    async fn remove(&self, id: &str, _force: bool) -> Result<()> {
        self.record("remove", id)?;
        let mut state = self.lock();
        state.containers.remove(id);
        state.removed.push(id.to_string());
        Ok(())
    }
}

/// A reader that never produces data and never ends.
struct OpenStream;

impl AsyncRead for OpenStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

/// Log sink the test can inspect while the engine writes to it.
#[derive(Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl AsyncWrite for SharedSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Wait until `sink` contains `needle`, panicking after a few seconds.
pub async fn wait_for(sink: &SharedSink, needle: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !sink.contents().contains(needle) {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {:?}, got {:?}", needle, sink.contents());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until `check` holds, panicking after a few seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached in time");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
