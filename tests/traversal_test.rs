//! Traversal tests
//!
//! Root resolution and the two traversal modes against whole stores:
//! enumerating shard names must reach exactly what listing reaches when a
//! unit is fully populated, and must never list.

use openaccess_walk::config::{DatasetConfig, StoreConfig, WalkConfig};
use openaccess_walk::delivery::JobContext;
use openaccess_walk::resolver::{shard_names, PathResolver, TraversalMode, WalkTarget};
use openaccess_walk::store::{open_store, InMemoryObjectStore, PrefixedStore, SharedStore};
use openaccess_walk::walker::{JobFuture, LeafHandler};
use openaccess_walk::{WalkSummary, Walker};
use parking_lot::Mutex;
use std::sync::Arc;

/// Delivers each visited key
struct Visit;

impl LeafHandler for Visit {
    type Output = String;

    fn handle_leaf<'a>(&'a self, key: &'a str, job: &'a JobContext<String>) -> JobFuture<'a> {
        Box::pin(async move {
            job.deliver(Ok(key.to_string())).await;
        })
    }
}

async fn visit(store: SharedStore, targets: Vec<WalkTarget>) -> (Vec<String>, WalkSummary) {
    let walker = Walker::new(store, WalkConfig::test()).unwrap();
    let keys = Mutex::new(Vec::new());
    let summary = walker
        .run(targets, Arc::new(Visit), |item| {
            if let Ok(key) = item {
                keys.lock().push(key);
            }
            Ok(())
        })
        .await;
    let mut keys = keys.into_inner();
    keys.sort();
    (keys, summary)
}

fn populated_unit(unit_dir: &str) -> InMemoryObjectStore {
    let store = InMemoryObjectStore::new().with_page_size(100);
    for name in shard_names(".txt") {
        store.insert(format!("{}{}", unit_dir, name), "{}\n");
    }
    store
}

#[tokio::test]
async fn test_enumerated_matches_listable_for_full_unit() {
    let store = populated_unit("nmah/");
    let dataset = DatasetConfig::smithsonian();

    let listable = PathResolver::new(dataset.clone(), TraversalMode::Listable);
    let (listed, listed_summary) = visit(Arc::new(store.clone()), listable.resolve("NMAH")).await;

    let enumerated = PathResolver::new(dataset, TraversalMode::Enumerated);
    let forbidden = store.clone().with_listing_forbidden();
    let (enumerated_keys, enum_summary) =
        visit(Arc::new(forbidden), enumerated.resolve("NMAH")).await;

    assert_eq!(listed.len(), 256);
    assert_eq!(listed, enumerated_keys);
    assert!(listed_summary.listings >= 3, "paged listing expected");
    assert_eq!(enum_summary.listings, 0);
    assert_eq!(enum_summary.total_errors(), 0);
}

#[tokio::test]
async fn test_alias_covers_every_unit_in_order() {
    let resolver = PathResolver::new(DatasetConfig::smithsonian(), TraversalMode::Enumerated);
    let targets = resolver.resolve("metadata");
    assert_eq!(targets.len(), 33);
    assert_eq!(targets[0].root_path, "acah/");
    assert_eq!(targets[32].root_path, "sil/");
    assert!(targets.iter().all(|t| t.leaf_keys.len() == 256));
    assert_eq!(targets[0].leaf_keys[0], "acah/00.txt");
    assert_eq!(targets[0].leaf_keys[255], "acah/ff.txt");
}

#[tokio::test]
async fn test_prefixed_store_walks_metadata_tree() {
    let bucket = Arc::new(InMemoryObjectStore::new());
    bucket.insert("metadata/edan/saam/00.txt", "{}\n");
    bucket.insert("metadata/edan/saam/01.txt", "{}\n");
    bucket.insert("metadata/edan/npg/00.txt", "{}\n");
    bucket.insert("other/readme.md", "hi");

    let store: SharedStore = Arc::new(PrefixedStore::new(bucket, "metadata/edan"));
    let resolver = PathResolver::new(DatasetConfig::smithsonian(), TraversalMode::Listable);

    let (keys, _) = visit(store.clone(), resolver.resolve("")).await;
    assert_eq!(keys, vec!["npg/00.txt", "saam/00.txt", "saam/01.txt"]);

    let (keys, _) = visit(store, resolver.resolve("saam/01.txt")).await;
    assert_eq!(keys, vec!["saam/01.txt"]);
}

#[tokio::test]
async fn test_open_store_applies_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let unit = dir.path().join("metadata/edan/nasm");
    std::fs::create_dir_all(&unit).unwrap();
    std::fs::write(unit.join("00.txt"), "{}\n").unwrap();
    std::fs::write(unit.join("0a.txt"), "{}\n").unwrap();

    let config = StoreConfig::local(dir.path()).with_prefix("metadata/edan");
    let store = open_store(&config).unwrap();
    let resolver = PathResolver::new(DatasetConfig::smithsonian(), config.traversal);

    let (keys, summary) = visit(store, resolver.resolve("nasm")).await;
    assert_eq!(keys, vec!["nasm/00.txt", "nasm/0a.txt"]);
    assert_eq!(summary.total_errors(), 0);
}

#[tokio::test]
async fn test_many_roots_walk_in_one_operation() {
    let store = InMemoryObjectStore::new();
    store.insert("nmah/00.txt", "{}");
    store.insert("saam/00.txt", "{}");
    store.insert("saam/sub/01.txt", "{}");
    let resolver = PathResolver::new(DatasetConfig::smithsonian(), TraversalMode::Listable);

    let (keys, summary) = visit(Arc::new(store), resolver.resolve_all(&["NMAH", "saam/"])).await;
    assert_eq!(keys, vec!["nmah/00.txt", "saam/00.txt", "saam/sub/01.txt"]);
    assert_eq!(summary.roots, 2);
}
