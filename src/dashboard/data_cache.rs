use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;

use super::worker::UiWaker;

/// Write `data` to `path` through a temp file in the same directory.
///
/// Readers either see the previous file or the complete new one.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Per-feature directory under the cache root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn subdir(&self, name: &str) -> CacheDir {
        CacheDir::new(self.root.join(sanitize_key(name)))
    }

    /// File for `key` with the given extension. Keys are sanitized so urls and
    /// instance names can be used directly.
    pub fn file(&self, key: &str, ext: &str) -> PathBuf {
        self.root.join(format!("{}.{ext}", sanitize_key(key)))
    }

    pub fn ensure(&self) -> io::Result<&Path> {
        fs::create_dir_all(&self.root)?;
        Ok(&self.root)
    }
}

pub fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// A single JSON document owned by one widget.
#[derive(Debug, Clone)]
pub struct JsonCache<T> {
    path: PathBuf,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonCache<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the file is missing. A file that does not parse is moved
    /// aside with a `.corrupt` extension.
    pub fn load(&self) -> Option<T> {
        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<T>(&content) {
                Ok(data) => Some(data),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "corrupt cache file");
                    let _ = fs::rename(&self.path, self.path.with_extension("corrupt"));
                    None
                }
            },
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %err, "unreadable cache file");
                }
                None
            }
        }
    }

    pub fn save(&self, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)?;
        atomic_write(&self.path, &json).context("atomic write")?;
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}

/// Source of remote bytes for a download batch.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("deskboard")
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?;
        Ok(resp.bytes()?.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// `key` is available at `path`. `fresh` is false when an existing file was reused.
    FileDone { key: String, path: PathBuf, fresh: bool },
    Failed { key: String, error: String },
    /// The batch finished; `stopped` is set when it exited early.
    AllDone { stopped: bool },
}

/// Policy of a download batch.
#[derive(Debug, Clone, Copy)]
pub struct DownloadPolicy {
    /// Files younger than this are reused instead of fetched again.
    pub max_age: Duration,
    /// Files in the directory older than this are deleted after the batch.
    pub cleanup_age: Duration,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
            cleanup_age: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// A list of `(key, url)` downloads processed on a background thread.
///
/// Files are named after the key with the extension of the url. The stop flag is checked between items, never during a transfer.
pub struct DownloadBatch {
    stop: Arc<AtomicBool>,
    rx: Receiver<DownloadEvent>,
    finished: bool,
}

/// Extension of the last path segment of `url`, or `bin`.
fn url_extension(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            let segment = u.path_segments()?.last()?.to_string();
            let (_, ext) = segment.rsplit_once('.')?;
            (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
                .then(|| ext.to_ascii_lowercase())
        })
        .unwrap_or_else(|| "bin".to_string())
}

fn file_age(path: &Path, now: SystemTime) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(now.duration_since(modified).unwrap_or_default())
}

fn cleanup(dir: &Path, keep: &[PathBuf], cleanup_age: Duration) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let path = entry.path();
        if keep.contains(&path) || !path.is_file() {
            continue;
        }
        if file_age(&path, now).is_some_and(|age| age >= cleanup_age) {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed stale cache file"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "cache cleanup failed"),
            }
        }
    }
}

impl DownloadBatch {
    pub fn spawn(
        dir: CacheDir,
        items: Vec<(String, String)>,
        policy: DownloadPolicy,
        fetcher: Arc<dyn Fetcher>,
        waker: UiWaker,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = channel();
        let thread_stop = Arc::clone(&stop);
        let spawned = std::thread::Builder::new()
            .name("worker-download".into())
            .spawn(move || {
                let send = |event: DownloadEvent| {
                    if tx.send(event).is_ok() {
                        waker.wake();
                    }
                };
                if let Err(e) = dir.ensure() {
                    tracing::error!(dir = %dir.path().display(), error = %e, "cannot create cache dir");
                }
                let mut keep = Vec::with_capacity(items.len());
                for (key, url) in items {
                    if thread_stop.load(Ordering::SeqCst) {
                        send(DownloadEvent::AllDone { stopped: true });
                        return;
                    }
                    let path = dir.file(&key, &url_extension(&url));
                    keep.push(path.clone());
                    let now = SystemTime::now();
                    if file_age(&path, now).is_some_and(|age| age < policy.max_age) {
                        send(DownloadEvent::FileDone {
                            key,
                            path,
                            fresh: false,
                        });
                        continue;
                    }
                    let result = fetcher
                        .fetch(&url)
                        .and_then(|bytes| atomic_write(&path, &bytes).context("atomic write"));
                    match result {
                        Ok(()) => send(DownloadEvent::FileDone {
                            key,
                            path,
                            fresh: true,
                        }),
                        Err(e) => {
                            tracing::warn!(%url, error = %e, "download failed");
                            send(DownloadEvent::Failed {
                                key,
                                error: format!("{e:#}"),
                            });
                        }
                    }
                }
                cleanup(dir.path(), &keep, policy.cleanup_age);
                send(DownloadEvent::AllDone { stopped: false });
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn download thread");
        }
        Self {
            stop,
            rx,
            finished: false,
        }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn drain(&mut self) -> Vec<DownloadEvent> {
        let events: Vec<DownloadEvent> = self.rx.try_iter().collect();
        if events
            .iter()
            .any(|e| matches!(e, DownloadEvent::AllDone { .. }))
        {
            self.finished = true;
        }
        events
    }

    /// Block until the batch reports completion or `timeout` expires.
    pub fn wait(&mut self, timeout: Duration) -> Vec<DownloadEvent> {
        let deadline = std::time::Instant::now() + timeout;
        let mut out = Vec::new();
        while !self.finished {
            let left = deadline.saturating_duration_since(std::time::Instant::now());
            match self.rx.recv_timeout(left) {
                Ok(event) => {
                    if matches!(event, DownloadEvent::AllDone { .. }) {
                        self.finished = true;
                    }
                    out.push(event);
                }
                Err(_) => break,
            }
        }
        out
    }
}

impl Drop for DownloadBatch {
    fn drop(&mut self) {
        self.stop();
    }
}
