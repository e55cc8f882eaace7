//! Simulated Object Store with Fault Injection
//!
//! Wraps another store and injects failures into listing, opening, writing
//! and attribute lookups. Random faults come from a seeded ChaCha8 RNG so a
//! failing run can be replayed from its seed; targeted faults (by prefix or
//! key) are deterministic regardless of seed.

use crate::store::object_store::{
    ListResult, ObjectAttributes, ObjectReader, ObjectStore, ObjectWriter, SharedStore,
    StoreFuture,
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of LIST failure
    pub list_fail_prob: f64,
    /// Probability of failing to open a reader
    pub read_fail_prob: f64,
    /// Probability of failing to open a writer
    pub write_fail_prob: f64,
    /// Probability that closing a writer fails (the write is discarded)
    pub close_fail_prob: f64,
    /// Probability of attribute lookup failure
    pub attributes_fail_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
    /// Listing at exactly these prefixes always fails
    pub failing_prefixes: HashSet<String>,
    /// Opening these keys for read always fails
    pub failing_keys: HashSet<String>,
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            list_fail_prob: 0.02,       // 2%
            read_fail_prob: 0.01,       // 1%
            write_fail_prob: 0.01,      // 1%
            close_fail_prob: 0.005,     // 0.5%
            attributes_fail_prob: 0.01, // 1%
            latency_range_us: (100, 2_000),
            failing_prefixes: HashSet::new(),
            failing_keys: HashSet::new(),
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            list_fail_prob: 0.1,
            read_fail_prob: 0.05,
            write_fail_prob: 0.05,
            close_fail_prob: 0.05,
            attributes_fail_prob: 0.05,
            latency_range_us: (100, 5_000),
            ..Default::default()
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            list_fail_prob: 0.0,
            read_fail_prob: 0.0,
            write_fail_prob: 0.0,
            close_fail_prob: 0.0,
            attributes_fail_prob: 0.0,
            latency_range_us: (0, 0),
            ..Default::default()
        }
    }

    pub fn fail_listing_at(mut self, prefix: impl Into<String>) -> Self {
        self.failing_prefixes.insert(prefix.into());
        self
    }

    pub fn fail_reading(mut self, key: impl Into<String>) -> Self {
        self.failing_keys.insert(key.into());
        self
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedStoreStats {
    pub list_attempts: u64,
    pub list_failures: u64,
    pub read_attempts: u64,
    pub read_failures: u64,
    pub write_attempts: u64,
    pub write_failures: u64,
    pub close_failures: u64,
    pub attributes_attempts: u64,
    pub attributes_failures: u64,
}

struct SimulatedStoreInner {
    rng: ChaCha8Rng,
    stats: SimulatedStoreStats,
}

/// Simulated object store that wraps another store and injects faults
#[derive(Clone)]
pub struct SimulatedObjectStore {
    inner_store: SharedStore,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

#[derive(Clone, Copy)]
enum Op {
    List,
    Read,
    Write,
    Close,
    Attributes,
}

impl SimulatedObjectStore {
    /// Create a new simulated store seeded for reproducibility
    pub fn new(inner_store: SharedStore, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedObjectStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    /// Record an attempt and decide whether it fails; also picks a latency
    fn roll(&self, op: Op, forced: bool) -> (bool, Duration) {
        let mut s = self.state.lock();
        let prob = match op {
            Op::List => self.config.list_fail_prob,
            Op::Read => self.config.read_fail_prob,
            Op::Write => self.config.write_fail_prob,
            Op::Close => self.config.close_fail_prob,
            Op::Attributes => self.config.attributes_fail_prob,
        };
        let fail = forced || (prob > 0.0 && s.rng.gen_bool(prob.min(1.0)));
        let (min, max) = self.config.latency_range_us;
        let latency = if max > min {
            Duration::from_micros(s.rng.gen_range(min..max))
        } else {
            Duration::from_micros(min)
        };

        let stats = &mut s.stats;
        match op {
            Op::List => {
                stats.list_attempts += 1;
                stats.list_failures += fail as u64;
            }
            Op::Read => {
                stats.read_attempts += 1;
                stats.read_failures += fail as u64;
            }
            Op::Write => {
                stats.write_attempts += 1;
                stats.write_failures += fail as u64;
            }
            Op::Close => {
                stats.close_failures += fail as u64;
            }
            Op::Attributes => {
                stats.attributes_attempts += 1;
                stats.attributes_failures += fail as u64;
            }
        }
        (fail, latency)
    }

    async fn delay(latency: Duration) {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl std::fmt::Debug for SimulatedObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedObjectStore")
            .field("config", &self.config)
            .finish()
    }
}

/// Writer whose close may fail, discarding everything written
struct FaultyWriter {
    inner: ObjectWriter,
    fail_on_close: bool,
}

impl AsyncWrite for FaultyWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        if self.fail_on_close {
            return Poll::Ready(Err(IoError::new(
                ErrorKind::Other,
                "simulated close failure",
            )));
        }
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl ObjectStore for SimulatedObjectStore {
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        Box::pin(async move {
            let forced = self.config.failing_prefixes.contains(prefix);
            let (fail, latency) = self.roll(Op::List, forced);
            Self::delay(latency).await;
            if fail {
                return Err(IoError::new(
                    ErrorKind::Other,
                    format!("simulated list failure at '{}'", prefix),
                ));
            }
            self.inner_store
                .list(prefix, delimiter, continuation_token)
                .await
        })
    }

    fn open_reader<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectReader> {
        Box::pin(async move {
            let forced = self.config.failing_keys.contains(key);
            let (fail, latency) = self.roll(Op::Read, forced);
            Self::delay(latency).await;
            if fail {
                return Err(IoError::new(
                    ErrorKind::Other,
                    format!("simulated read failure for '{}'", key),
                ));
            }
            self.inner_store.open_reader(key).await
        })
    }

    fn open_writer<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectWriter> {
        Box::pin(async move {
            let (fail, latency) = self.roll(Op::Write, false);
            Self::delay(latency).await;
            if fail {
                return Err(IoError::new(
                    ErrorKind::Other,
                    format!("simulated write failure for '{}'", key),
                ));
            }
            let (fail_on_close, _) = self.roll(Op::Close, false);
            let inner = self.inner_store.open_writer(key).await?;
            Ok(Box::new(FaultyWriter {
                inner,
                fail_on_close,
            }) as ObjectWriter)
        })
    }

    fn attributes<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectAttributes> {
        Box::pin(async move {
            let (fail, latency) = self.roll(Op::Attributes, false);
            Self::delay(latency).await;
            if fail {
                return Err(IoError::new(
                    ErrorKind::TimedOut,
                    format!("simulated attributes timeout for '{}'", key),
                ));
            }
            self.inner_store.attributes(key).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryObjectStore;
    use tokio::io::AsyncWriteExt;

    fn seeded_inner() -> Arc<InMemoryObjectStore> {
        let store = InMemoryObjectStore::new();
        store.insert("a/1.txt", "one");
        store.insert("b/1.txt", "two");
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_no_faults_passes_through() {
        let inner = seeded_inner();
        let store = SimulatedObjectStore::new(inner, 7, SimulatedStoreConfig::no_faults());

        let listed = store.list("", "/", None).await.unwrap();
        assert_eq!(listed.entries.len(), 2);
        assert!(store.open_reader("a/1.txt").await.is_ok());
        assert_eq!(store.stats().list_failures, 0);
    }

    #[tokio::test]
    async fn test_targeted_listing_failure() {
        let inner = seeded_inner();
        let config = SimulatedStoreConfig::no_faults().fail_listing_at("b/");
        let store = SimulatedObjectStore::new(inner, 7, config);

        assert!(store.list("a/", "/", None).await.is_ok());
        assert!(store.list("b/", "/", None).await.is_err());
        assert_eq!(store.stats().list_failures, 1);
    }

    #[tokio::test]
    async fn test_close_failure_discards_write() {
        let inner = seeded_inner();
        let config = SimulatedStoreConfig {
            close_fail_prob: 1.0,
            ..SimulatedStoreConfig::no_faults()
        };
        let store = SimulatedObjectStore::new(inner.clone(), 7, config);

        let mut writer = store.open_writer("c/1.txt").await.unwrap();
        writer.write_all(b"three").await.unwrap();
        assert!(writer.shutdown().await.is_err());
        drop(writer);
        assert!(!inner.contains("c/1.txt"));
    }

    #[tokio::test]
    async fn test_same_seed_same_faults() {
        let run = |seed: u64| async move {
            let store = SimulatedObjectStore::new(
                seeded_inner(),
                seed,
                SimulatedStoreConfig {
                    read_fail_prob: 0.5,
                    ..SimulatedStoreConfig::no_faults()
                },
            );
            let mut outcomes = Vec::new();
            for _ in 0..32 {
                outcomes.push(store.open_reader("a/1.txt").await.is_ok());
            }
            outcomes
        };

        assert_eq!(run(42).await, run(42).await);
    }
}
