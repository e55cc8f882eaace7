//! Mirror engine tests
//!
//! End-to-end runs of the mirror engine over in-memory, local filesystem
//! and fault-injecting stores. Seeded runs are deterministic: a failing
//! seed can be replayed on its own.

use async_compression::tokio::bufread::BzDecoder;
use openaccess_walk::codec::CompressionFormat;
use openaccess_walk::config::{CompressionComparePolicy, MirrorOptions, WalkConfig};
use openaccess_walk::mirror::{MirrorAction, MirrorEngine, MirrorOutcome};
use openaccess_walk::resolver::{PathResolver, TraversalMode, WalkTarget};
use openaccess_walk::store::{
    InMemoryObjectStore, LocalFsObjectStore, ObjectStore, SharedStore, SimulatedObjectStore,
    SimulatedStoreConfig,
};
use openaccess_walk::{AppConfig, WalkError, WalkSummary, Walker};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

fn seeded_source(units: &[&str], shards_per_unit: usize) -> Arc<InMemoryObjectStore> {
    let store = InMemoryObjectStore::new();
    for unit in units {
        for shard in 0..shards_per_unit {
            let key = format!("{}/{:02x}.txt", unit, shard);
            let body = format!("{{\"id\":\"{}-{}\",\"unitCode\":\"{}\"}}\n", unit, shard, unit);
            store.insert(key, body);
        }
    }
    Arc::new(store)
}

async fn mirror(
    source: SharedStore,
    target: SharedStore,
    options: MirrorOptions,
    config: WalkConfig,
    targets: Vec<WalkTarget>,
) -> (Vec<Result<MirrorOutcome, WalkError>>, WalkSummary) {
    let walker = Walker::new(source.clone(), config).unwrap();
    let engine = MirrorEngine::new(source, target, options);
    let seen = Mutex::new(Vec::new());
    let summary = engine
        .run(&walker, targets, |item| {
            seen.lock().push(item);
            Ok(())
        })
        .await;
    (seen.into_inner(), summary)
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn test_second_mirror_moves_nothing() {
    let source = seeded_source(&["nmah", "saam"], 5);
    let target = Arc::new(InMemoryObjectStore::new());
    let targets = vec![WalkTarget::listable("")];

    let (first, summary) = mirror(
        source.clone(),
        target.clone(),
        MirrorOptions::default(),
        WalkConfig::test(),
        targets.clone(),
    )
    .await;
    assert_eq!(first.len(), 10);
    assert_eq!(summary.jobs_transferred, 10);
    assert!(summary.bytes_transferred > 0);
    assert_eq!(target.keys(), source.keys());

    let (second, summary) = mirror(
        source.clone(),
        target.clone(),
        MirrorOptions::default(),
        WalkConfig::test(),
        targets,
    )
    .await;
    assert_eq!(second.len(), 10);
    assert!(second
        .iter()
        .all(|r| r.as_ref().map(|o| o.action == MirrorAction::Skipped).unwrap_or(false)));
    assert_eq!(summary.bytes_transferred, 0);
    assert_eq!(summary.jobs_skipped, 10);
    assert_eq!(summary.total_errors(), 0);
}

#[tokio::test]
async fn test_only_changed_objects_transfer() {
    let source = seeded_source(&["nmah"], 4);
    let target = Arc::new(InMemoryObjectStore::new());
    let targets = vec![WalkTarget::listable("nmah/")];

    mirror(
        source.clone(),
        target.clone(),
        MirrorOptions::default(),
        WalkConfig::test(),
        targets.clone(),
    )
    .await;
    source.insert("nmah/02.txt", "{\"id\":\"changed\"}\n");

    let (results, summary) = mirror(
        source.clone(),
        target.clone(),
        MirrorOptions::default(),
        WalkConfig::test(),
        targets,
    )
    .await;
    let transferred: Vec<String> = results
        .into_iter()
        .filter_map(Result::ok)
        .filter(|o| o.action == MirrorAction::Transferred)
        .map(|o| o.source_key)
        .collect();
    assert_eq!(transferred, vec!["nmah/02.txt"]);
    assert_eq!(summary.jobs_skipped, 3);
    assert_eq!(target.get("nmah/02.txt"), source.get("nmah/02.txt"));
}

// =============================================================================
// Compression
// =============================================================================

#[tokio::test]
async fn test_compressed_mirror_always_retransfers() {
    let source = seeded_source(&["nmah"], 3);
    let target = Arc::new(InMemoryObjectStore::new());
    let options = MirrorOptions {
        compress: true,
        ..Default::default()
    };
    let targets = vec![WalkTarget::listable("nmah/")];

    for _ in 0..2 {
        let (results, summary) = mirror(
            source.clone(),
            target.clone(),
            options.clone(),
            WalkConfig::test(),
            targets.clone(),
        )
        .await;
        assert_eq!(results.len(), 3);
        assert_eq!(summary.jobs_transferred, 3);
        assert_eq!(summary.jobs_skipped, 0);
    }
    assert_eq!(
        target.keys(),
        vec!["nmah/00.txt.bz2", "nmah/01.txt.bz2", "nmah/02.txt.bz2"]
    );
    for key in source.keys() {
        let stored = target.get(&format!("{}.bz2", key)).unwrap();
        let mut decoded = Vec::new();
        BzDecoder::new(stored.as_slice())
            .read_to_end(&mut decoded)
            .await
            .unwrap();
        assert_eq!(Some(decoded), source.get(&key));
    }
}

#[tokio::test]
async fn test_zstd_mirror_decodes_with_reference_decoder() {
    let source = seeded_source(&["saam"], 2);
    let target = Arc::new(InMemoryObjectStore::new());
    let options = MirrorOptions {
        compress: true,
        compression: CompressionFormat::Zstd,
        ..Default::default()
    };

    let (_, summary) = mirror(
        source.clone(),
        target.clone(),
        options,
        WalkConfig::test(),
        vec![WalkTarget::listable("saam/")],
    )
    .await;
    assert_eq!(summary.jobs_transferred, 2);
    assert_eq!(target.keys(), vec!["saam/00.txt.zst", "saam/01.txt.zst"]);
    for key in source.keys() {
        let stored = target.get(&format!("{}.zst", key)).unwrap();
        assert_eq!(zstd::decode_all(stored.as_slice()).ok(), source.get(&key));
    }
}

#[tokio::test]
async fn test_compressed_mirror_can_skip_existing_targets() {
    let source = seeded_source(&["nmah"], 3);
    let target = Arc::new(InMemoryObjectStore::new());
    let options = MirrorOptions {
        compress: true,
        compression_compare: CompressionComparePolicy::SkipIfTargetExists,
        ..Default::default()
    };
    let targets = vec![WalkTarget::listable("nmah/")];

    let (_, first) = mirror(
        source.clone(),
        target.clone(),
        options.clone(),
        WalkConfig::test(),
        targets.clone(),
    )
    .await;
    assert_eq!(first.jobs_transferred, 3);

    let (_, second) = mirror(source, target, options, WalkConfig::test(), targets).await;
    assert_eq!(second.jobs_transferred, 0);
    assert_eq!(second.jobs_skipped, 3);
}

// =============================================================================
// Local filesystem
// =============================================================================

#[tokio::test]
async fn test_mirror_into_local_directory() {
    let dir = tempfile::tempdir().unwrap();
    let source = seeded_source(&["nmah", "saam"], 2);
    let target: SharedStore = Arc::new(LocalFsObjectStore::new(dir.path().to_path_buf()));

    let (_, summary) = mirror(
        source.clone(),
        target.clone(),
        MirrorOptions::default(),
        WalkConfig::test(),
        vec![WalkTarget::listable("")],
    )
    .await;
    assert_eq!(summary.jobs_transferred, 4);
    assert_eq!(summary.total_errors(), 0);

    let on_disk = std::fs::read(dir.path().join("saam/01.txt")).unwrap();
    assert_eq!(Some(on_disk), source.get("saam/01.txt"));

    // Same content, same fingerprint algorithm: nothing to do
    let (_, again) = mirror(
        source,
        target,
        MirrorOptions::default(),
        WalkConfig::test(),
        vec![WalkTarget::listable("")],
    )
    .await;
    assert_eq!(again.jobs_skipped, 4);
}

#[tokio::test]
async fn test_local_directory_as_source() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("nmnhinv")).unwrap();
    std::fs::write(dir.path().join("nmnhinv/00.txt"), "{\"id\":1}\n").unwrap();
    std::fs::write(dir.path().join("nmnhinv/01.txt"), "{\"id\":2}\n").unwrap();

    let source: SharedStore = Arc::new(LocalFsObjectStore::new(dir.path().to_path_buf()));
    let target = Arc::new(InMemoryObjectStore::new());
    let resolver = PathResolver::new(Default::default(), TraversalMode::Listable);

    let (_, summary) = mirror(
        source,
        target.clone(),
        MirrorOptions::default(),
        WalkConfig::test(),
        resolver.resolve("NMNHINV"),
    )
    .await;
    assert_eq!(summary.jobs_transferred, 2);
    assert_eq!(target.get("nmnhinv/01.txt").unwrap(), b"{\"id\":2}\n");
}

// =============================================================================
// Concurrency and errors
// =============================================================================

#[tokio::test]
async fn test_handles_stay_within_worker_bound() {
    let source = InMemoryObjectStore::new().with_open_latency(Duration::from_millis(10));
    for shard in 0..24 {
        source.insert(format!("nmah/{:02x}.txt", shard), "{}\n");
    }
    let source = Arc::new(source);
    let target = Arc::new(InMemoryObjectStore::new());
    let keys: Vec<String> = source.keys();

    let workers = 3;
    let (_, summary) = mirror(
        source.clone(),
        target,
        MirrorOptions::default(),
        WalkConfig::test().with_workers(workers),
        vec![WalkTarget::enumerated("nmah/", keys)],
    )
    .await;
    assert_eq!(summary.jobs_transferred, 24);

    let handles = source.handles();
    assert!(handles.peak() <= workers, "peak {} exceeds {}", handles.peak(), workers);
    assert!(handles.peak() >= 2, "jobs never overlapped");
    assert_eq!(handles.open(), 0);
}

#[tokio::test]
async fn test_missing_enumerated_keys_report_transfer_errors() {
    let source = seeded_source(&["nmah"], 2);
    let target = Arc::new(InMemoryObjectStore::new());
    let keys = vec![
        "nmah/00.txt".to_string(),
        "nmah/01.txt".to_string(),
        "nmah/02.txt".to_string(),
    ];

    let (results, summary) = mirror(
        source,
        target,
        MirrorOptions::default(),
        WalkConfig::test(),
        vec![WalkTarget::enumerated("nmah/", keys)],
    )
    .await;
    assert_eq!(results.len(), 3);
    assert_eq!(summary.jobs_transferred, 2);
    assert_eq!(summary.errors_of("transfer"), 1);
    let failed: Vec<&WalkError> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(failed[0].path, "nmah/02.txt");
}

#[tokio::test]
async fn test_fail_fast_stops_after_first_error() {
    let source = seeded_source(&["nmah"], 40);
    let faulty = SimulatedObjectStore::new(
        source.clone(),
        7,
        SimulatedStoreConfig::no_faults().fail_reading("nmah/00.txt"),
    );
    let target = Arc::new(InMemoryObjectStore::new());

    let (_, summary) = mirror(
        Arc::new(faulty),
        target,
        MirrorOptions {
            force: true,
            ..Default::default()
        },
        WalkConfig::test().with_workers(1).fail_fast(),
        vec![WalkTarget::enumerated("nmah/", source.keys())],
    )
    .await;
    assert!(summary.cancelled);
    assert!(summary.errors_of("transfer") >= 1);
    assert!(summary.leaves_dispatched < 40);
}

// =============================================================================
// Fault injection (seeded)
// =============================================================================

/// Run one seeded mirror against a chaotic target and check that:
/// every leaf got exactly one delivery, and every committed target object
/// is a complete copy of its source.
async fn run_chaos_seed(seed: u64) {
    let source = seeded_source(&["nmah", "saam", "npg"], 8);
    let target_inner = Arc::new(InMemoryObjectStore::new());
    let target = SimulatedObjectStore::new(
        target_inner.clone(),
        seed,
        SimulatedStoreConfig {
            latency_range_us: (0, 200),
            ..SimulatedStoreConfig::high_chaos()
        },
    );

    let (results, summary) = mirror(
        source.clone(),
        Arc::new(target),
        MirrorOptions::default(),
        WalkConfig::test(),
        vec![WalkTarget::listable("")],
    )
    .await;

    let mut per_key: BTreeMap<String, usize> = BTreeMap::new();
    for result in &results {
        let key = match result {
            Ok(outcome) => outcome.source_key.clone(),
            Err(err) => err.path.clone(),
        };
        *per_key.entry(key).or_default() += 1;
    }
    assert_eq!(per_key.len(), 24, "seed {}", seed);
    assert!(per_key.values().all(|&n| n == 1), "seed {}: {:?}", seed, per_key);
    assert_eq!(
        summary.jobs_transferred + summary.errors_of("transfer"),
        24,
        "seed {}",
        seed
    );

    for key in target_inner.keys() {
        assert_eq!(target_inner.get(&key), source.get(&key), "seed {}: {}", seed, key);
    }
}

#[tokio::test]
async fn test_mirror_chaos_50_seeds() {
    for seed in 0..50 {
        run_chaos_seed(seed).await;
    }
}

#[tokio::test]
async fn test_app_config_drives_mirror() {
    let config = AppConfig::from_toml(
        r#"
        [walk]
        workers = 2

        [source]
        store_type = "InMemory"

        [mirror]
        force = true
        "#,
    )
    .unwrap();
    assert_eq!(config.walk.workers, 2);
    assert!(config.mirror.force);

    let source = seeded_source(&["nmah"], 2);
    let target = Arc::new(InMemoryObjectStore::new());
    target.insert("nmah/00.txt", source.get("nmah/00.txt").unwrap());

    let (_, summary) = mirror(
        source,
        target.clone(),
        config.mirror.clone(),
        config.walk.clone(),
        vec![WalkTarget::listable("nmah/")],
    )
    .await;
    assert_eq!(summary.jobs_transferred, 2);
    assert!(target.attributes("nmah/01.txt").await.is_ok());
}

// =============================================================================
// S3 source
// =============================================================================

#[cfg(feature = "s3")]
mod s3_source {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use md5::{Digest, Md5};
    use object_store::memory::InMemory;
    use object_store::ObjectStore as _;
    use object_store::path::Path as ObjectPath;
    use object_store::{
        GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, PutMultipartOpts,
        PutOptions, PutPayload, PutResult,
    };
    use openaccess_walk::store::S3ObjectStore;

    /// In-memory bucket whose ETags are body MD5s, as S3 reports for
    /// single-part uploads
    #[derive(Debug, Default)]
    struct Md5TaggedBucket {
        inner: InMemory,
    }

    impl std::fmt::Display for Md5TaggedBucket {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "Md5TaggedBucket")
        }
    }

    #[async_trait]
    impl object_store::ObjectStore for Md5TaggedBucket {
        async fn put_opts(
            &self,
            location: &ObjectPath,
            payload: PutPayload,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            self.inner.put_opts(location, payload, opts).await
        }

        async fn put_multipart_opts(
            &self,
            location: &ObjectPath,
            opts: PutMultipartOpts,
        ) -> object_store::Result<Box<dyn MultipartUpload>> {
            self.inner.put_multipart_opts(location, opts).await
        }

        async fn get_opts(
            &self,
            location: &ObjectPath,
            options: GetOptions,
        ) -> object_store::Result<GetResult> {
            self.inner.get_opts(location, options).await
        }

        async fn head(&self, location: &ObjectPath) -> object_store::Result<ObjectMeta> {
            let mut meta = self.inner.head(location).await?;
            let body = self.inner.get(location).await?.bytes().await?;
            meta.e_tag = Some(format!("\"{}\"", hex::encode(Md5::digest(&body))));
            Ok(meta)
        }

        async fn delete(&self, location: &ObjectPath) -> object_store::Result<()> {
            self.inner.delete(location).await
        }

        fn list(
            &self,
            prefix: Option<&ObjectPath>,
        ) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(
            &self,
            prefix: Option<&ObjectPath>,
        ) -> object_store::Result<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &ObjectPath, to: &ObjectPath) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(
            &self,
            from: &ObjectPath,
            to: &ObjectPath,
        ) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    #[tokio::test]
    async fn test_bucket_to_local_directory_is_idempotent() {
        let bucket = Md5TaggedBucket::default();
        for key in ["nmah/00.txt", "saam/00.txt"] {
            let body = format!("{{\"id\":\"{}\"}}\n", key);
            let payload = PutPayload::from(body.into_bytes());
            bucket.put(&ObjectPath::from(key), payload).await.unwrap();
        }
        let source: SharedStore = Arc::new(S3ObjectStore::from_store(Arc::new(bucket), String::new()));

        let dir = tempfile::tempdir().unwrap();
        let target: SharedStore = Arc::new(LocalFsObjectStore::new(dir.path().to_path_buf()));
        let targets = vec![WalkTarget::listable("")];

        let (_, first) = mirror(
            source.clone(),
            target.clone(),
            MirrorOptions::default(),
            WalkConfig::test(),
            targets.clone(),
        )
        .await;
        assert_eq!(first.jobs_transferred, 2);
        assert_eq!(first.total_errors(), 0);

        let (_, second) = mirror(source, target, MirrorOptions::default(), WalkConfig::test(), targets).await;
        assert_eq!(second.jobs_transferred, 0);
        assert_eq!(second.jobs_skipped, 2);
        assert_eq!(second.bytes_transferred, 0);
    }
}
