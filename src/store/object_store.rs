//! Object Store Abstraction
//!
//! Trait-based abstraction over a key-addressed blob store with
//! delimiter-scoped listing, streaming reads and writes, and per-key
//! attribute lookup.
//!
//! Implementations:
//! - `InMemoryObjectStore`: For unit tests and simulation
//! - `LocalFsObjectStore`: For development and local mirrors
//! - `S3ObjectStore`: For production (feature-gated)
//!
//! Writers follow a close-to-commit contract: bytes written to an
//! `ObjectWriter` become visible only after `shutdown()` returns `Ok`.
//! Dropping a writer without shutting it down discards the write.

use md5::{Digest, Md5};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// Default number of entries returned per listing page
pub const LIST_PAGE_SIZE: usize = 1000;

/// One item returned by a delimiter-scoped listing
///
/// Containers are virtual directories synthesized from the delimiter; their
/// keys end with the delimiter. They never exist as objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub key: String,
    pub is_container: bool,
}

impl StoreEntry {
    pub fn leaf(key: impl Into<String>) -> Self {
        StoreEntry {
            key: key.into(),
            is_container: false,
        }
    }

    pub fn container(key: impl Into<String>) -> Self {
        StoreEntry {
            key: key.into(),
            is_container: true,
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    /// Entries in key order
    pub entries: Vec<StoreEntry>,
    /// Continuation token for pagination (if more results exist)
    pub continuation_token: Option<String>,
}

/// Digest family a fingerprint was computed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FingerprintAlgorithm {
    /// MD5 of the object's bytes, lowercase hex
    Md5,
    /// Opaque entity tag assigned by a remote store
    ETag,
}

/// Comparable digest of an object's content
///
/// Fingerprints from different algorithms never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentFingerprint {
    pub algorithm: FingerprintAlgorithm,
    pub digest: String,
}

impl ContentFingerprint {
    pub fn new(algorithm: FingerprintAlgorithm, digest: impl Into<String>) -> Self {
        ContentFingerprint {
            algorithm,
            digest: digest.into(),
        }
    }

    pub fn md5_of(data: &[u8]) -> Self {
        Self::new(FingerprintAlgorithm::Md5, hex::encode(Md5::digest(data)))
    }

    /// Fingerprint from an S3-style entity tag.
    ///
    /// A single-part upload's ETag is the MD5 of the body and compares with
    /// local digests. Multipart ETags (`<md5>-<parts>`) and anything else
    /// not shaped like an MD5 stay opaque.
    pub fn from_etag(tag: &str) -> Self {
        let tag = tag.trim_matches('"');
        if tag.len() == 32 && tag.bytes().all(|b| b.is_ascii_hexdigit()) {
            Self::new(FingerprintAlgorithm::Md5, tag.to_ascii_lowercase())
        } else {
            Self::new(FingerprintAlgorithm::ETag, tag)
        }
    }
}

/// Attributes of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub key: String,
    pub size_bytes: u64,
    pub fingerprint: ContentFingerprint,
}

/// Streaming read handle; dropping it releases the handle
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Streaming write handle; `shutdown()` commits, dropping discards
pub type ObjectWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Boxed future returned by every store operation
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = IoResult<T>> + Send + 'a>>;

/// Shared handle to any store
pub type SharedStore = Arc<dyn ObjectStore>;

/// Object store abstraction trait
pub trait ObjectStore: Send + Sync + 'static {
    /// List entries under `prefix`, grouping by `delimiter`
    ///
    /// An empty delimiter lists every object under the prefix as a leaf.
    /// A store that forbids listing returns `ErrorKind::PermissionDenied`.
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult>;

    /// Open a streaming reader for an object
    fn open_reader<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectReader>;

    /// Open a streaming writer that creates or replaces an object on close
    fn open_writer<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectWriter>;

    /// Get an object's attributes; `ErrorKind::NotFound` if absent
    fn attributes<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectAttributes>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        (**self).list(prefix, delimiter, continuation_token)
    }

    fn open_reader<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectReader> {
        (**self).open_reader(key)
    }

    fn open_writer<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectWriter> {
        (**self).open_writer(key)
    }

    fn attributes<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectAttributes> {
        (**self).attributes(key)
    }
}

/// Group sorted keys under `prefix` into leaves and delimiter containers
///
/// Output preserves key order; each container appears once, at the position
/// of its first descendant.
pub fn group_by_delimiter<'k, I>(keys: I, prefix: &str, delimiter: &str) -> Vec<StoreEntry>
where
    I: IntoIterator<Item = &'k str>,
{
    let mut entries: Vec<StoreEntry> = Vec::new();
    for key in keys {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        let split = if delimiter.is_empty() {
            None
        } else {
            rest.find(delimiter)
        };
        match split {
            Some(idx) => {
                let container = format!("{}{}", prefix, &rest[..idx + delimiter.len()]);
                let seen = entries
                    .last()
                    .map(|e| e.is_container && e.key == container)
                    .unwrap_or(false);
                if !seen {
                    entries.push(StoreEntry::container(container));
                }
            }
            None => entries.push(StoreEntry::leaf(key)),
        }
    }
    entries
}

/// Slice a full listing into one page using an offset continuation token
fn paginate(
    entries: Vec<StoreEntry>,
    continuation_token: Option<&str>,
    page_size: usize,
) -> ListResult {
    let offset: usize = continuation_token
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);
    let total = entries.len();
    let page: Vec<StoreEntry> = entries.into_iter().skip(offset).take(page_size).collect();
    let next = offset + page.len();
    ListResult {
        entries: page,
        continuation_token: if next < total {
            Some(next.to_string())
        } else {
            None
        },
    }
}

// ============================================================================
// Open handle accounting
// ============================================================================

/// Counts currently open read/write handles and the high-water mark
#[derive(Debug, Default)]
pub struct HandleGauge {
    open: AtomicUsize,
    peak: AtomicUsize,
}

impl HandleGauge {
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn acquire(self: &Arc<Self>) -> HandleGuard {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        HandleGuard {
            gauge: Arc::clone(self),
        }
    }
}

/// Decrements the gauge when the handle it guards is dropped
#[derive(Debug)]
struct HandleGuard {
    gauge: Arc<HandleGauge>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.gauge.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reader that holds a handle guard for its lifetime
struct TrackedReader<R> {
    inner: R,
    _guard: HandleGuard,
}

impl<R: AsyncRead + Unpin> AsyncRead for TrackedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<IoResult<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

// ============================================================================
// InMemoryObjectStore - For tests and simulation
// ============================================================================

#[derive(Debug, Clone)]
struct StoredObject {
    data: Arc<Vec<u8>>,
    fingerprint: ContentFingerprint,
}

/// In-memory object store for unit tests and deterministic simulation
#[derive(Debug)]
pub struct InMemoryObjectStore {
    data: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    handles: Arc<HandleGauge>,
    listing_forbidden: bool,
    page_size: usize,
    open_latency: Option<Duration>,
}

impl InMemoryObjectStore {
    /// Create a new in-memory object store
    pub fn new() -> Self {
        InMemoryObjectStore {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            handles: Arc::new(HandleGauge::default()),
            listing_forbidden: false,
            page_size: LIST_PAGE_SIZE,
            open_latency: None,
        }
    }

    /// Reject every listing call, like a bucket with listing disabled
    pub fn with_listing_forbidden(mut self) -> Self {
        self.listing_forbidden = true;
        self
    }

    /// Return at most `page_size` entries per listing call
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Hold every newly opened handle for `latency` before returning it
    pub fn with_open_latency(mut self, latency: Duration) -> Self {
        self.open_latency = Some(latency);
        self
    }

    /// Store an object directly (for seeding tests)
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        let data: Vec<u8> = data.into();
        let obj = StoredObject {
            fingerprint: ContentFingerprint::md5_of(&data),
            data: Arc::new(data),
        };
        self.data.write().insert(key.into(), obj);
    }

    /// Read an object directly (for assertions)
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().get(key).map(|obj| obj.data.as_ref().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.data.write().remove(key).is_some()
    }

    /// All keys in order
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Get the number of stored objects
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Open handle accounting for this store (shared by clones)
    pub fn handles(&self) -> Arc<HandleGauge> {
        Arc::clone(&self.handles)
    }

    async fn open_delay(&self) {
        if let Some(latency) = self.open_latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryObjectStore {
    fn clone(&self) -> Self {
        InMemoryObjectStore {
            data: Arc::clone(&self.data),
            handles: Arc::clone(&self.handles),
            listing_forbidden: self.listing_forbidden,
            page_size: self.page_size,
            open_latency: self.open_latency,
        }
    }
}

/// Buffered writer that commits into the map on shutdown
struct MemoryWriter {
    key: String,
    buf: Vec<u8>,
    data: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    committed: bool,
    _guard: HandleGuard,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        self.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        if self.committed {
            return Poll::Ready(Ok(()));
        }
        let data = std::mem::take(&mut self.buf);
        let obj = StoredObject {
            fingerprint: ContentFingerprint::md5_of(&data),
            data: Arc::new(data),
        };
        let key = self.key.clone();
        self.data.write().insert(key, obj);
        self.committed = true;
        Poll::Ready(Ok(()))
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        Box::pin(async move {
            if self.listing_forbidden {
                return Err(IoError::new(
                    ErrorKind::PermissionDenied,
                    format!("listing is disabled for this store (prefix '{}')", prefix),
                ));
            }
            let entries = {
                let data = self.data.read();
                let keys = data
                    .range(prefix.to_string()..)
                    .map(|(k, _)| k.as_str())
                    .take_while(|k| k.starts_with(prefix));
                group_by_delimiter(keys, prefix, delimiter)
            };
            Ok(paginate(entries, continuation_token, self.page_size))
        })
    }

    fn open_reader<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectReader> {
        Box::pin(async move {
            let data = self
                .data
                .read()
                .get(key)
                .map(|obj| Arc::clone(&obj.data))
                .ok_or_else(|| IoError::new(ErrorKind::NotFound, format!("Key not found: {}", key)))?;
            let guard = self.handles.acquire();
            self.open_delay().await;
            let reader = TrackedReader {
                inner: std::io::Cursor::new(ArcBytes(data)),
                _guard: guard,
            };
            Ok(Box::new(reader) as ObjectReader)
        })
    }

    fn open_writer<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectWriter> {
        Box::pin(async move {
            let guard = self.handles.acquire();
            self.open_delay().await;
            let writer = MemoryWriter {
                key: key.to_string(),
                buf: Vec::new(),
                data: Arc::clone(&self.data),
                committed: false,
                _guard: guard,
            };
            Ok(Box::new(writer) as ObjectWriter)
        })
    }

    fn attributes<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectAttributes> {
        Box::pin(async move {
            self.data
                .read()
                .get(key)
                .map(|obj| ObjectAttributes {
                    key: key.to_string(),
                    size_bytes: obj.data.len() as u64,
                    fingerprint: obj.fingerprint.clone(),
                })
                .ok_or_else(|| IoError::new(ErrorKind::NotFound, format!("Key not found: {}", key)))
        })
    }
}

/// Shared object bytes readable through a cursor without copying
struct ArcBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

// ============================================================================
// LocalFsObjectStore - For development
// ============================================================================

const PARTIAL_SUFFIX: &str = ".partial";

/// Local filesystem object store for development and local mirrors
///
/// Keys map to paths under the base directory with `/` as the separator.
/// Writes land in a hidden sibling file and are renamed into place on close.
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_path: PathBuf,
}

impl LocalFsObjectStore {
    /// Create a new local filesystem object store
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsObjectStore { base_path }
    }

    /// Get the full path for a key
    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key.trim_start_matches('/'))
    }

    /// Get the base path
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn is_partial(name: &str) -> bool {
        name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
    }

    /// Convert a path under the base directory to a `/`-separated key
    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.base_path).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Single directory read for the common `/` delimiter
    fn list_dir(&self, prefix: &str) -> IoResult<Vec<StoreEntry>> {
        let (dir_key, name_prefix) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..=idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };
        let dir = self.full_path(dir_key);
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(name_prefix) || Self::is_partial(&name) {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                entries.push(StoreEntry::container(format!("{}{}/", dir_key, name)));
            } else if file_type.is_file() {
                entries.push(StoreEntry::leaf(format!("{}{}", dir_key, name)));
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Recursive walk for arbitrary delimiters
    fn list_recursive(&self, prefix: &str, delimiter: &str) -> IoResult<Vec<StoreEntry>> {
        fn walk_dir(dir: &Path, store: &LocalFsObjectStore, keys: &mut Vec<String>) -> IoResult<()> {
            let read_dir = match std::fs::read_dir(dir) {
                Ok(rd) => rd,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e),
            };
            for entry in read_dir {
                let entry = entry?;
                let path = entry.path();
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    walk_dir(&path, store, keys)?;
                } else if file_type.is_file() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if LocalFsObjectStore::is_partial(&name) {
                        continue;
                    }
                    if let Some(key) = store.key_for(&path) {
                        keys.push(key);
                    }
                }
            }
            Ok(())
        }

        let start = match prefix.rfind('/') {
            Some(idx) => self.full_path(&prefix[..idx]),
            None => self.base_path.clone(),
        };
        let mut keys = Vec::new();
        walk_dir(&start, self, &mut keys)?;
        keys.sort();
        Ok(group_by_delimiter(
            keys.iter().map(String::as_str),
            prefix,
            delimiter,
        ))
    }
}

/// File writer that renames its temporary file into place on shutdown
struct LocalFileWriter {
    file: tokio::fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl AsyncWrite for LocalFileWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        if self.committed {
            return Poll::Ready(Ok(()));
        }
        match Pin::new(&mut self.file).poll_shutdown(cx) {
            Poll::Ready(Ok(())) => {}
            other => return other,
        }
        std::fs::rename(&self.temp_path, &self.final_path)?;
        self.committed = true;
        Poll::Ready(Ok(()))
    }
}

impl Drop for LocalFileWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

impl ObjectStore for LocalFsObjectStore {
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        Box::pin(async move {
            let entries = if delimiter == "/" {
                self.list_dir(prefix)?
            } else {
                self.list_recursive(prefix, delimiter)?
            };
            Ok(paginate(entries, continuation_token, LIST_PAGE_SIZE))
        })
    }

    fn open_reader<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectReader> {
        Box::pin(async move {
            let file = tokio::fs::File::open(self.full_path(key)).await?;
            Ok(Box::new(file) as ObjectReader)
        })
    }

    fn open_writer<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectWriter> {
        Box::pin(async move {
            let final_path = self.full_path(key);
            let parent = final_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.base_path.clone());
            tokio::fs::create_dir_all(&parent).await?;
            let file_name = final_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    IoError::new(ErrorKind::InvalidInput, format!("Invalid object key: '{}'", key))
                })?;
            let temp_path = parent.join(format!(".{}{}", file_name, PARTIAL_SUFFIX));
            let file = tokio::fs::File::create(&temp_path).await?;
            Ok(Box::new(LocalFileWriter {
                file,
                temp_path,
                final_path,
                committed: false,
            }) as ObjectWriter)
        })
    }

    fn attributes<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectAttributes> {
        Box::pin(async move {
            let path = self.full_path(key);
            let metadata = tokio::fs::metadata(&path).await?;
            if !metadata.is_file() {
                return Err(IoError::new(
                    ErrorKind::NotFound,
                    format!("Key not found: {}", key),
                ));
            }

            let mut file = tokio::fs::File::open(&path).await?;
            let mut hasher = Md5::new();
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }

            Ok(ObjectAttributes {
                key: key.to_string(),
                size_bytes: metadata.len(),
                fingerprint: ContentFingerprint::new(
                    FingerprintAlgorithm::Md5,
                    hex::encode(hasher.finalize()),
                ),
            })
        })
    }
}
